//! `r2d2` integration: connection manager, pool construction and error sink.

use std::time::Duration;

use unisql_core::{Error, PoolConfig, PoolError, Result};

use crate::config::PgConfig;
use crate::connection::PgConnection;

/// Opens and health-checks [`PgConnection`]s for an `r2d2` pool.
#[derive(Debug, Clone)]
pub struct PgManager {
    config: PgConfig,
}

impl PgManager {
    pub fn new(config: PgConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PgConfig {
        &self.config
    }
}

impl r2d2::ManageConnection for PgManager {
    type Connection = PgConnection;
    type Error = Error;

    fn connect(&self) -> Result<PgConnection> {
        PgConnection::connect(self.config.clone())
    }

    fn is_valid(&self, conn: &mut PgConnection) -> Result<()> {
        conn.ping()
    }

    /// A session that still holds a transaction block must not be reused.
    fn has_broken(&self, conn: &mut PgConnection) -> bool {
        !conn.is_ready() || conn.in_transaction()
    }
}

/// Routes background connection errors from the pool to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorHandler;

impl r2d2::HandleError<Error> for TracingErrorHandler {
    fn handle_error(&self, error: Error) {
        tracing::warn!(error = %error, "PostgreSQL pool failed to open a connection");
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Build an `r2d2` pool sized by `pool`.
///
/// `r2d2` opens `min_connections` sessions before returning and fails once
/// `acquire_timeout_ms` passes without them.
pub fn build_pool(manager: PgManager, pool: &PoolConfig) -> Result<r2d2::Pool<PgManager>> {
    pool.validate()?;
    let max_size = u32::try_from(pool.max_connections)
        .map_err(|_| Error::config("max_connections does not fit in u32"))?;
    let min_idle = u32::try_from(pool.min_connections)
        .map_err(|_| Error::config("min_connections does not fit in u32"))?;

    r2d2::Pool::builder()
        .max_size(max_size)
        .min_idle(Some(min_idle))
        .connection_timeout(Duration::from_millis(pool.acquire_timeout_ms.max(1)))
        .idle_timeout(millis(pool.max_idle_time_ms))
        .max_lifetime(millis(pool.max_lifetime_ms))
        .test_on_check_out(pool.test_on_checkout)
        .error_handler(Box::new(TracingErrorHandler))
        .build(manager)
        .map_err(|e| Error::connection(format!("failed to open PostgreSQL pool: {e}")))
}

/// `r2d2` reports every failed checkout as a timeout.
pub(crate) fn acquire_error(pool: &PoolConfig, err: &r2d2::Error) -> Error {
    Error::PoolExhausted(PoolError {
        max_connections: pool.max_connections,
        waited_ms: pool.acquire_timeout_ms,
        message: err.to_string(),
    })
}
