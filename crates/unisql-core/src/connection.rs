//! The capability set every backend implements.
//!
//! - [`DriverKind`] - which of the three backends is active
//! - [`Dialect`] - SQL flavour spoken by a backend
//! - [`TransactionState`] - per-connection transaction state machine
//! - [`Backend`] - the uniform query/exec/transaction contract
//!
//! Every call blocks the calling thread until the backend answers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::ResultSet;
use crate::value::Value;

/// Which backend a connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    /// Socket client speaking a wire protocol (MySQL), pooled internally
    #[default]
    WireSql,
    /// In-process library over a file or memory store (SQLite)
    EmbeddedSql,
    /// Client whose physical sessions are managed by an external pool (PostgreSQL)
    PooledSql,
}

impl DriverKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DriverKind::WireSql => "wire-sql",
            DriverKind::EmbeddedSql => "embedded-sql",
            DriverKind::PooledSql => "pooled-sql",
        }
    }

    /// SQL flavour spoken by this kind of backend.
    pub const fn dialect(&self) -> Dialect {
        match self {
            DriverKind::WireSql => Dialect::MySql,
            DriverKind::EmbeddedSql => Dialect::Sqlite,
            DriverKind::PooledSql => Dialect::Postgres,
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wire-sql" | "wire" | "mysql" | "mariadb" => Ok(DriverKind::WireSql),
            "embedded-sql" | "embedded" | "sqlite" | "sqlite3" => Ok(DriverKind::EmbeddedSql),
            "pooled-sql" | "pooled" | "postgres" | "postgresql" => Ok(DriverKind::PooledSql),
            other => Err(Error::config(format!("unknown driver kind '{other}'"))),
        }
    }
}

/// SQL dialect differences the engine has to care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Whether `INSERT ... RETURNING` is needed to learn a generated key.
    pub const fn needs_returning(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

/// Per-connection transaction state.
///
/// `Idle -> begin -> InTransaction -> commit | rollback -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    InTransaction,
}

impl TransactionState {
    /// Transition for `begin`.
    pub fn begin(&mut self) -> Result<()> {
        match self {
            TransactionState::Idle => {
                *self = TransactionState::InTransaction;
                Ok(())
            }
            TransactionState::InTransaction => Err(Error::TransactionAlreadyOpen),
        }
    }

    /// Transition for `commit` and `rollback`.
    pub fn finish(&mut self) -> Result<()> {
        match self {
            TransactionState::InTransaction => {
                *self = TransactionState::Idle;
                Ok(())
            }
            TransactionState::Idle => Err(Error::NoActiveTransaction),
        }
    }

    /// Fail unless a transaction could be opened now.
    pub fn ensure_idle(&self) -> Result<()> {
        match self {
            TransactionState::Idle => Ok(()),
            TransactionState::InTransaction => Err(Error::TransactionAlreadyOpen),
        }
    }

    /// Fail unless a transaction is open.
    pub fn ensure_active(&self) -> Result<()> {
        match self {
            TransactionState::InTransaction => Ok(()),
            TransactionState::Idle => Err(Error::NoActiveTransaction),
        }
    }

    pub const fn is_active(&self) -> bool {
        matches!(self, TransactionState::InTransaction)
    }
}

/// Uniform contract over the three backends.
///
/// Methods take `&self`: pooled backends are shared between threads and
/// synchronize internally; the embedded backend serializes on its handle.
/// Placeholders in `sql` are always `?`; backends translate as needed.
pub trait Backend: Send + Sync {
    /// Run a statement and materialize every returned row.
    fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet>;

    /// Run a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    /// Id generated by the most recent insert on this connection.
    fn last_insert_id(&self) -> Option<i64>;

    /// Round-trip to the server to check the session is alive.
    fn ping(&self) -> Result<()>;

    /// Release all native resources. Further calls fail.
    fn close(&self) -> Result<()>;

    fn driver_kind(&self) -> DriverKind;

    fn dialect(&self) -> Dialect {
        self.driver_kind().dialect()
    }

    fn transaction_state(&self) -> TransactionState;
}
