//! [`Backend`] implementation over a pool of MySQL sessions.
//!
//! Outside a transaction every statement borrows a session from the pool and
//! hands it back when the call returns. `begin` checks one session out and
//! pins it until `commit` or `rollback`, so all statements of a transaction
//! run on the same physical connection.

use std::sync::{Mutex, MutexGuard};

use unisql_core::{
    Backend, DatabaseConfig, DriverKind, Error, PoolConfig, Result, ResultSet, TransactionState,
    Value,
};
use unisql_pool::{ConnectionFactory, Pool, PoolStats, PooledConnection};

use crate::config::MySqlConfig;
use crate::connection::MySqlConnection;

/// Opens [`MySqlConnection`]s for the pool.
#[derive(Debug, Clone)]
pub struct MySqlFactory {
    config: MySqlConfig,
}

impl MySqlFactory {
    pub fn new(config: MySqlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }
}

impl ConnectionFactory for MySqlFactory {
    type Connection = MySqlConnection;

    fn connect(&self) -> Result<MySqlConnection> {
        MySqlConnection::connect(self.config.clone())
    }

    fn is_valid(&self, conn: &mut MySqlConnection) -> Result<()> {
        conn.ping()
    }

    fn close(&self, mut conn: MySqlConnection) {
        if let Err(e) = conn.close() {
            tracing::debug!(error = %e, "Failed to send COM_QUIT");
        }
    }
}

struct Session {
    /// Connection held for the open transaction
    pinned: Option<PooledConnection<MySqlFactory>>,
    state: TransactionState,
    last_insert_id: Option<i64>,
    closed: bool,
}

impl Session {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::connection("connection is closed"))
        } else {
            Ok(())
        }
    }
}

/// The wire-protocol backend.
pub struct WireBackend {
    pool: Pool<MySqlFactory>,
    session: Mutex<Session>,
}

impl std::fmt::Debug for WireBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireBackend")
            .field("pool", &self.pool)
            .field("state", &self.transaction_state())
            .finish_non_exhaustive()
    }
}

impl WireBackend {
    /// Build the pool described by `config`.
    ///
    /// `pool.min_connections` sessions are opened before this returns, so
    /// bad credentials or an unreachable server surface here.
    #[tracing::instrument(level = "debug", skip(config), fields(host = %config.host))]
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        Self::new(MySqlConfig::from(config), config.pool.clone())
    }

    pub fn new(config: MySqlConfig, pool_config: PoolConfig) -> Result<Self> {
        let pool = Pool::new(MySqlFactory::new(config), pool_config)?;
        Ok(Self {
            pool,
            session: Mutex::new(Session {
                pinned: None,
                state: TransactionState::Idle,
                last_insert_id: None,
                closed: false,
            }),
        })
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Run `f` on the pinned connection, or on one borrowed for this call.
    fn run<T>(&self, f: impl FnOnce(&mut MySqlConnection) -> Result<T>) -> Result<T> {
        let mut session = self.lock();
        session.ensure_open()?;

        if let Some(conn) = session.pinned.as_mut() {
            let result = f(&mut **conn);
            if matches!(&result, Err(e) if e.is_connection_error()) {
                conn.mark_broken();
            }
            return result;
        }
        drop(session);

        let mut conn = self.pool.acquire()?;
        let result = f(&mut *conn);
        if matches!(&result, Err(e) if e.is_connection_error()) {
            conn.mark_broken();
        }
        result
    }

    /// End the pinned transaction with `sql` and release its connection.
    fn finish(&self, sql: &str) -> Result<()> {
        let mut session = self.lock();
        session.ensure_open()?;
        session.state.finish()?;
        let Some(mut conn) = session.pinned.take() else {
            return Err(Error::NoActiveTransaction);
        };
        drop(session);

        let result = conn.execute(sql, &[]).map(drop);
        if let Err(e) = &result {
            // The session may still hold the transaction; never reuse it
            tracing::warn!(error = %e, sql, "Ending transaction failed");
            conn.mark_broken();
        }
        result
    }
}

impl Backend for WireBackend {
    fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let result = self.run(|conn| conn.query(sql, params))?;
        if let Some(id) = result.last_insert_id {
            self.lock().last_insert_id = Some(id);
        }
        Ok(result)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.query(sql, params).map(|r| r.affected_rows)
    }

    fn begin(&self) -> Result<()> {
        let mut session = self.lock();
        session.ensure_open()?;
        session.state.ensure_idle()?;

        let mut conn = self.pool.acquire()?;
        if let Err(e) = conn.execute("START TRANSACTION", &[]) {
            if e.is_connection_error() {
                conn.mark_broken();
            }
            return Err(e);
        }
        session.state.begin()?;
        session.pinned = Some(conn);
        tracing::debug!("Transaction started");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.finish("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK")
    }

    fn last_insert_id(&self) -> Option<i64> {
        self.lock().last_insert_id
    }

    fn ping(&self) -> Result<()> {
        self.run(MySqlConnection::ping)
    }

    fn close(&self) -> Result<()> {
        let mut session = self.lock();
        if session.closed {
            return Ok(());
        }
        session.closed = true;
        session.state = TransactionState::Idle;
        if let Some(mut conn) = session.pinned.take() {
            // The server rolls back when the session goes away
            tracing::warn!("Closing with an open transaction; it will be rolled back");
            conn.mark_broken();
        }
        drop(session);
        self.pool.close();
        Ok(())
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::WireSql
    }

    fn transaction_state(&self) -> TransactionState {
        self.lock().state
    }
}

impl Drop for WireBackend {
    fn drop(&mut self) {
        if let Err(e) = Backend::close(self) {
            tracing::warn!(error = %e, "Failed to close MySQL pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// A backend whose pool points at a port nobody listens on.
    fn unreachable_backend() -> WireBackend {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = MySqlConfig::new()
            .host("127.0.0.1")
            .port(port)
            .connect_timeout(Duration::from_millis(500));
        let mut pool = PoolConfig::new(2);
        pool.min_connections = 0;
        pool.acquire_timeout_ms = 500;
        WireBackend::new(config, pool).unwrap()
    }

    #[test]
    fn test_eager_connect_fails() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut config = DatabaseConfig::new(DriverKind::WireSql)
            .host("127.0.0.1")
            .database("app");
        config.port = Some(port);
        config.connect_timeout_ms = 500;
        let err = WireBackend::connect(&config).unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
    }

    #[test]
    fn test_statement_failure_keeps_state_idle() {
        let backend = unreachable_backend();
        assert_eq!(backend.driver_kind(), DriverKind::WireSql);
        assert!(backend.query("SELECT 1", &[]).unwrap_err().is_connection_error());
        assert!(backend.begin().is_err());
        assert_eq!(backend.transaction_state(), TransactionState::Idle);
        assert!(backend.last_insert_id().is_none());
        // Failed opens give their slot back
        assert_eq!(backend.pool_stats().total_connections, 0);
    }

    #[test]
    fn test_commit_without_begin() {
        let backend = unreachable_backend();
        assert!(matches!(backend.commit(), Err(Error::NoActiveTransaction)));
        assert!(matches!(backend.rollback(), Err(Error::NoActiveTransaction)));
    }

    #[test]
    fn test_calls_after_close_fail() {
        let backend = unreachable_backend();
        backend.close().unwrap();
        backend.close().unwrap();
        assert!(backend.ping().unwrap_err().is_connection_error());
        assert!(backend.begin().unwrap_err().is_connection_error());
    }
}
