//! Pooled-client backend for unisql (PostgreSQL).
//!
//! A blocking client for the PostgreSQL frontend/backend protocol (version
//! 3.0), written against `std::net::TcpStream`, plus [`PooledBackend`], which
//! keeps sessions in an `r2d2` pool. It provides:
//!
//! - Message framing and parsing
//! - Authentication (cleartext, MD5, SCRAM-SHA-256)
//! - Simple queries for plain statements, the extended protocol for bound
//!   parameters (`?` placeholders are rewritten to `$n`)
//! - Optional TLS upgrade (`tls` feature)
//!
//! All values travel in text format; rows come back as strings like on every
//! other backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use unisql_postgres::{PgConfig, PgConnection};
//!
//! let config = PgConfig::new("localhost", "postgres", "mydb").port(5432);
//!
//! let mut conn = PgConnection::connect(config)?;
//! let rows = conn.query("SELECT id, name FROM users WHERE id = ?", &[1.into()])?;
//! ```

pub mod auth;
pub mod backend;
pub mod config;
pub mod connection;
pub mod manager;
pub mod protocol;
pub mod sql;
pub mod tls;
pub mod types;

pub use backend::PooledBackend;
pub use config::PgConfig;
pub use connection::{ConnectionState, PgConnection};
pub use manager::PgManager;
