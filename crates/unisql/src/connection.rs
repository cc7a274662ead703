//! The backend-agnostic connection handle.

use std::sync::atomic::{AtomicBool, Ordering};

use unisql_core::{Backend, Dialect, DriverKind, Error, Result, ResultSet, TransactionState, Value};

/// One logical database session over whichever backend was configured.
///
/// A `Connection` owns exactly one backend. It is `Send + Sync`; backends
/// serialize access internally, and the two network backends spread
/// statements over their pools.
pub struct Connection {
    backend: Box<dyn Backend>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("driver", &self.backend.driver_kind())
            .field("state", &self.backend.transaction_state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Wrap an already opened backend.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_backend(backend: impl Backend + 'static) -> Self {
        Self::new(Box::new(backend))
    }

    fn live(&self) -> Result<&dyn Backend> {
        if self.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        Ok(self.backend.as_ref())
    }

    /// Run a statement without parameters and return its rows.
    pub fn query(&self, sql: &str) -> Result<ResultSet> {
        self.query_with_params(sql, &[])
    }

    /// Run a statement with `?` placeholders bound to `params`.
    ///
    /// Values are sent as native bound parameters on every backend.
    pub fn query_with_params(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        tracing::trace!(sql, params = params.len(), "query");
        self.live()?.query(sql, params)
    }

    /// Run a statement without parameters and return the affected row count.
    pub fn exec(&self, sql: &str) -> Result<u64> {
        self.exec_with_params(sql, &[])
    }

    pub fn exec_with_params(&self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::trace!(sql, params = params.len(), "exec");
        self.live()?.execute(sql, params)
    }

    pub fn begin_transaction(&self) -> Result<()> {
        self.live()?.begin()
    }

    pub fn commit(&self) -> Result<()> {
        self.live()?.commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.live()?.rollback()
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err` or
    /// panics. A rollback failure is logged and the error from `f` is
    /// returned.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.begin_transaction()?;
        let mut guard = RollbackGuard {
            conn: self,
            armed: true,
        };

        match f(self) {
            Ok(value) => {
                guard.armed = false;
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                guard.armed = false;
                if let Err(rollback_err) = self.rollback() {
                    tracing::warn!(error = %rollback_err, "Rollback after failed transaction failed");
                }
                Err(e)
            }
        }
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        if self.is_closed() {
            return None;
        }
        self.backend.last_insert_id()
    }

    pub fn ping(&self) -> Result<()> {
        self.live()?.ping()
    }

    /// Close the backend. Later calls fail with `ConnectionFailed`; closing
    /// twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!(driver = %self.backend.driver_kind(), "Closing connection");
        self.backend.close()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn driver_kind(&self) -> DriverKind {
        self.backend.driver_kind()
    }

    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.backend.transaction_state()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_state().is_active()
    }

    /// The underlying backend.
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close connection");
        }
    }
}

/// Rolls back when a transaction body unwinds.
struct RollbackGuard<'a> {
    conn: &'a Connection,
    armed: bool,
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.conn.rollback() {
                tracing::warn!(error = %e, "Rollback during unwind failed");
            }
        }
    }
}
