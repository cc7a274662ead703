//! Embedded backend for unisql over the SQLite C library.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! [`SqliteConnection`] implements [`unisql_core::Backend`] directly: the
//! library is in-process, so there is no pool. All rows are copied out of
//! SQLite's buffers before a statement is finalized.
//!
//! # Example
//!
//! ```rust,ignore
//! use unisql_core::{Backend, Value};
//! use unisql_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! conn.execute("INSERT INTO users (name) VALUES (?)", &[Value::from("Alice")])?;
//! let rows = conn.query("SELECT name FROM users", &[])?;
//! ```
//!
//! # Type Mapping
//!
//! | Bound `Value` | SQLite storage class |
//! |---------------|----------------------|
//! | `Bool` | INTEGER (0/1) |
//! | `Int` | INTEGER |
//! | `Float` | REAL |
//! | `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Null` | NULL |
//!
//! Cells come back as text; BLOBs are decoded as lossy UTF-8.

// libsqlite3-sys compiles and links the bundled amalgamation.
use libsqlite3_sys as _;

pub mod connection;
pub mod ffi;
mod statement;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

/// Get the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}
