//! Backend selection.

use unisql_core::{DatabaseConfig, DriverKind, Result};
use unisql_mysql::WireBackend;
use unisql_postgres::PooledBackend;
use unisql_sqlite::{SqliteConfig, SqliteConnection};

use crate::connection::Connection;

/// Opens a [`Connection`] on one of the three backends.
///
/// Each constructor ignores `config.driver` and uses the backend it names;
/// [`Driver::connect`] dispatches on `config.driver`.
#[derive(Debug, Clone, Copy)]
pub struct Driver;

impl Driver {
    /// MySQL wire protocol over the built-in bounded pool.
    #[tracing::instrument(level = "debug", skip(config), fields(host = %config.host))]
    pub fn wire(config: &DatabaseConfig) -> Result<Connection> {
        let backend = WireBackend::connect(config)?;
        tracing::info!(driver = "wire-sql", database = %config.database, "Connected");
        Ok(Connection::from_backend(backend))
    }

    /// In-process SQLite; `config.database` is the file path or `:memory:`.
    #[tracing::instrument(level = "debug", skip(config), fields(path = %config.database))]
    pub fn embedded(config: &DatabaseConfig) -> Result<Connection> {
        let sqlite = SqliteConfig::from_database_config(config)?;
        let backend = SqliteConnection::open(&sqlite)?;
        tracing::info!(driver = "embedded-sql", path = %backend.path(), "Opened");
        Ok(Connection::from_backend(backend))
    }

    /// PostgreSQL sessions in an `r2d2` pool.
    #[tracing::instrument(level = "debug", skip(config), fields(host = %config.host))]
    pub fn pooled(config: &DatabaseConfig) -> Result<Connection> {
        let backend = PooledBackend::connect(config)?;
        tracing::info!(driver = "pooled-sql", database = %config.database, "Connected");
        Ok(Connection::from_backend(backend))
    }

    /// Open the backend selected by `config.driver`.
    pub fn connect(config: &DatabaseConfig) -> Result<Connection> {
        match config.driver {
            DriverKind::WireSql => Self::wire(config),
            DriverKind::EmbeddedSql => Self::embedded(config),
            DriverKind::PooledSql => Self::pooled(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unisql_core::{Error, PoolConfig};

    fn closed_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn network_config(driver: DriverKind) -> DatabaseConfig {
        DatabaseConfig::new(driver)
            .host("127.0.0.1")
            .port(closed_port())
            .user("app")
            .database("app")
            .connect_timeout(200)
            .pool(PoolConfig::new(1).acquire_timeout(300))
    }

    #[test]
    fn test_connect_embedded_memory() {
        let conn = Driver::connect(&DatabaseConfig::sqlite_memory()).unwrap();
        assert_eq!(conn.driver_kind(), DriverKind::EmbeddedSql);
        let rows = conn.query("SELECT 1 AS one").unwrap();
        assert_eq!(rows.first().unwrap().get_int("one"), Some(1));
    }

    #[test]
    fn test_connect_wire_unreachable() {
        let err = Driver::connect(&network_config(DriverKind::WireSql)).unwrap_err();
        assert!(err.is_connection_error() || matches!(err, Error::PoolExhausted(_)));
    }

    #[test]
    fn test_connect_pooled_unreachable() {
        let err = Driver::connect(&network_config(DriverKind::PooledSql)).unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_embedded_rejects_bad_charset() {
        let config = DatabaseConfig::sqlite_memory().charset("latin1");
        let err = Driver::embedded(&config).unwrap_err();
        assert!(matches!(err, Error::CharsetFailed(_)));
    }
}
