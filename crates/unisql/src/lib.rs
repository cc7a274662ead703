//! unisql - one blocking connection API over MySQL, SQLite and PostgreSQL.
//!
//! The same [`Connection`] type fronts three backends:
//!
//! - **wire-sql**: a native MySQL wire-protocol client over a bounded pool
//! - **embedded-sql**: SQLite linked into the process
//! - **pooled-sql**: PostgreSQL sessions in an `r2d2` pool
//!
//! On top of it sit a parameterized [`QueryBuilder`] and a derive-based
//! [`Model`] contract with CRUD helpers ([`Crud`]).
//!
//! # Quick Start
//!
//! ```ignore
//! use unisql::prelude::*;
//!
//! #[derive(Model, Debug)]
//! struct User {
//!     id: Option<i64>,
//!     name: String,
//!     email: String,
//! }
//!
//! let db = Database::from_url("sqlite::memory:")?;
//! db.exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, email TEXT)")?;
//!
//! let alice = User::create(&db, &User { id: None, name: "Alice".into(), email: "a@example.com".into() })?;
//! let adults = User::query(&db).filter("name", Op::Like, "A%").all()?;
//! User::destroy(&db, alice.id)?;
//! ```
//!
//! All values travel as bound parameters. Identifiers come from model
//! metadata or the caller and are never escaped.

pub mod connection;
pub mod database;
pub mod driver;
pub mod model;
pub mod scope;

pub use connection::Connection;
pub use database::Database;
pub use driver::Driver;
pub use model::{Crud, ModelQuery};
pub use scope::{current_connection, with_connection};

pub use unisql_core::{
    Backend, ConversionError, DatabaseConfig, Dialect, DriverKind, Error, FieldInfo, FromCell,
    Model, PoolConfig, Result, ResultSet, Row, SslMode, TransactionState, Value,
};

/// Derive [`Model`] for a struct with named fields.
pub use unisql_macros::Model;

pub use unisql_query::{Condition, Direction, Join, JoinType, Op, OrderBy, QueryBuilder};

pub use unisql_pool::{Pool, PoolStats};

pub use unisql_mysql::WireBackend;
pub use unisql_postgres::PooledBackend;
pub use unisql_sqlite::{SqliteConfig, SqliteConnection};

/// Everything most programs need.
pub mod prelude {
    pub use crate::{
        Connection, Crud, Database, DatabaseConfig, Direction, DriverKind, Error, Model, Op,
        QueryBuilder, Result, Row, Value, current_connection, with_connection,
    };
}
