//! Shared database handle built from configuration.

use std::ops::Deref;
use std::sync::Arc;

use unisql_core::{DatabaseConfig, Result};

use crate::connection::Connection;
use crate::driver::Driver;
use crate::scope::with_connection;

/// A shareable [`Connection`] plus the configuration it was opened with.
///
/// Cloning is cheap; every clone uses the same backend.
///
/// ```ignore
/// let db = Database::from_url("sqlite::memory:")?;
/// db.exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Connection>,
    config: DatabaseConfig,
}

impl Database {
    /// Open the backend selected by `config.driver`.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let conn = Driver::connect(&config)?;
        Ok(Self {
            conn: Arc::new(conn),
            config,
        })
    }

    /// Parse a connection URL and open it.
    ///
    /// Accepts `mysql://`, `postgres://` / `postgresql://`, `sqlite://path`
    /// and `sqlite::memory:`.
    pub fn from_url(url: &str) -> Result<Self> {
        Self::open(DatabaseConfig::from_url(url)?)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Shared handle to the connection.
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.conn)
    }

    /// Run `f` with this database as the current scoped connection.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        with_connection(self.connection(), f)
    }
}

impl Deref for Database {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::current_connection;
    use unisql_core::{DriverKind, Error};

    #[test]
    fn test_open_memory_url() {
        let db = Database::from_url("sqlite::memory:").unwrap();
        assert_eq!(db.config().driver, DriverKind::EmbeddedSql);
        assert_eq!(db.driver_kind(), DriverKind::EmbeddedSql);
        db.exec("CREATE TABLE t (x INTEGER)").unwrap();
        assert_eq!(db.exec("INSERT INTO t VALUES (1)").unwrap(), 1);

        let clone = db.clone();
        let rows = clone.query("SELECT x FROM t").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_bad_url() {
        let err = Database::from_url("oracle://localhost/db").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_scope_exposes_connection() {
        let db = Database::from_url("sqlite::memory:").unwrap();
        let same = db.scope(|| {
            let current = current_connection().unwrap();
            Arc::ptr_eq(&current, &db.connection())
        });
        assert!(same);
        assert!(current_connection().is_err());
    }
}
