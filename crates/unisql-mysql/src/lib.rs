//! Wire-protocol backend for unisql (MySQL).
//!
//! A blocking client for the MySQL client/server protocol, written against
//! `std::net::TcpStream`. It provides:
//!
//! - Packet framing with sequence numbers
//! - Authentication (`mysql_native_password`, `caching_sha2_password`)
//! - Text result sets for plain statements, prepared statements for bound
//!   parameters
//! - Optional TLS upgrade (`tls` feature)
//! - [`WireBackend`], which pools sessions and pins one per transaction
//!
//! # MySQL Protocol Overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Packets over 16MB are split
//! - Request/response pairing via sequence numbers
//!
//! # Example
//!
//! ```rust,ignore
//! use unisql_mysql::{MySqlConfig, MySqlConnection};
//!
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = MySqlConnection::connect(config)?;
//! let rows = conn.query("SELECT id, name FROM users WHERE id = ?", &[1.into()])?;
//! ```

pub mod auth;
pub mod backend;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod tls;
pub mod types;

pub use backend::{MySqlFactory, WireBackend};
pub use config::MySqlConfig;
pub use connection::{ConnectionState, MySqlConnection, ServerCapabilities};
