//! [`Backend`] implementation over an `r2d2` pool of PostgreSQL sessions.
//!
//! Outside a transaction every statement checks a session out of the pool
//! and returns it when the call finishes. `begin` checks one session out and
//! pins it until `commit` or `rollback`.

use std::sync::{Mutex, MutexGuard};

use unisql_core::{
    Backend, DatabaseConfig, DriverKind, Error, PoolConfig, Result, ResultSet, TransactionState,
    Value,
};

use crate::config::PgConfig;
use crate::connection::PgConnection;
use crate::manager::{PgManager, acquire_error, build_pool};

struct Session {
    /// `None` once the backend is closed; dropping it closes idle sessions
    pool: Option<r2d2::Pool<PgManager>>,
    /// Connection held for the open transaction
    pinned: Option<r2d2::PooledConnection<PgManager>>,
    state: TransactionState,
    last_insert_id: Option<i64>,
}

impl Session {
    fn pool(&self) -> Result<r2d2::Pool<PgManager>> {
        self.pool
            .clone()
            .ok_or_else(|| Error::connection("connection is closed"))
    }
}

/// The pooled-client backend.
pub struct PooledBackend {
    pool_config: PoolConfig,
    session: Mutex<Session>,
}

impl std::fmt::Debug for PooledBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBackend")
            .field("max_connections", &self.pool_config.max_connections)
            .field("state", &self.transaction_state())
            .finish_non_exhaustive()
    }
}

impl PooledBackend {
    /// Build the pool described by `config`.
    #[tracing::instrument(level = "debug", skip(config), fields(host = %config.host))]
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        Self::new(PgConfig::from(config), config.pool.clone())
    }

    pub fn new(config: PgConfig, pool_config: PoolConfig) -> Result<Self> {
        let pool = build_pool(PgManager::new(config), &pool_config)?;
        Ok(Self {
            pool_config,
            session: Mutex::new(Session {
                pool: Some(pool),
                pinned: None,
                state: TransactionState::Idle,
                last_insert_id: None,
            }),
        })
    }

    /// Live and idle session counts, `None` after close.
    pub fn pool_state(&self) -> Option<r2d2::State> {
        self.lock().pool.as_ref().map(r2d2::Pool::state)
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn checkout(&self, pool: &r2d2::Pool<PgManager>) -> Result<r2d2::PooledConnection<PgManager>> {
        pool.get()
            .map_err(|e| acquire_error(&self.pool_config, &e))
    }

    /// Run `f` on the pinned connection, or on one checked out for this call.
    ///
    /// Broken sessions are discarded by the manager when they go back.
    fn run<T>(&self, f: impl FnOnce(&mut PgConnection) -> Result<T>) -> Result<T> {
        let mut session = self.lock();
        let pool = session.pool()?;
        if let Some(conn) = session.pinned.as_mut() {
            return f(&mut **conn);
        }
        drop(session);

        let mut conn = self.checkout(&pool)?;
        f(&mut *conn)
    }

    /// End the pinned transaction with `sql` and release its connection.
    fn finish(&self, sql: &str) -> Result<()> {
        let mut session = self.lock();
        session.pool()?;
        session.state.finish()?;
        let Some(mut conn) = session.pinned.take() else {
            return Err(Error::NoActiveTransaction);
        };
        drop(session);

        let result = conn.execute(sql, &[]).map(drop);
        if let Err(e) = &result {
            tracing::warn!(error = %e, sql, "Ending transaction failed");
        }
        result
    }
}

impl Backend for PooledBackend {
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
        let pool = session.pool()?;
        session.state.ensure_idle()?;

        let mut conn = self.checkout(&pool)?;
        conn.execute("BEGIN", &[])?;
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
        self.run(PgConnection::ping)
    }

    fn close(&self) -> Result<()> {
        let mut session = self.lock();
        let Some(pool) = session.pool.take() else {
            return Ok(());
        };
        session.state = TransactionState::Idle;
        if let Some(mut conn) = session.pinned.take() {
            // The server rolls back when the session goes away
            tracing::warn!("Closing with an open transaction; it will be rolled back");
            if let Err(e) = conn.close() {
                tracing::debug!(error = %e, "Failed to send Terminate");
            }
        }
        drop(session);
        drop(pool);
        Ok(())
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::PooledSql
    }

    fn transaction_state(&self) -> TransactionState {
        self.lock().state
    }
}

impl Drop for PooledBackend {
    fn drop(&mut self) {
        if let Err(e) = Backend::close(self) {
            tracing::warn!(error = %e, "Failed to close PostgreSQL pool");
        }
    }
}
