//! Core types and traits for unisql.
//!
//! This crate provides the abstractions shared by every backend:
//!
//! - [`Backend`] - the uniform query/exec/transaction contract
//! - [`Row`] and [`ResultSet`] - fully materialized results
//! - [`Value`] - dynamically typed bound parameters
//! - [`Error`] - the fixed error taxonomy
//! - [`DatabaseConfig`] and [`PoolConfig`] - connection settings
//! - [`Model`] - ORM-style struct mapping

pub mod config;
pub mod connection;
pub mod error;
pub mod field;
pub mod model;
pub mod row;
pub mod value;

pub use config::{DatabaseConfig, PoolConfig, SslMode};
pub use connection::{Backend, Dialect, DriverKind, TransactionState};
pub use error::{ConfigError, ConversionError, Error, NativeError, PoolError, Result};
pub use field::FieldInfo;
pub use model::Model;
pub use row::{FromCell, ResultSet, Row};
pub use value::Value;
