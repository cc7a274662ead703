//! Blocking connection pool for unisql.
//!
//! Bounds the number of live physical sessions and reuses them across
//! logical operations. The free list and counters sit behind one mutex;
//! waiters park on a condition variable until a connection is released or
//! the acquire timeout elapses.
//!
//! Nothing here spawns threads. Eviction of idle or expired connections
//! happens inline whenever a connection is acquired or released.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub use unisql_core::PoolConfig;
use unisql_core::{Error, PoolError, Result};

/// Opens, checks and closes the physical connections a [`Pool`] manages.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new physical connection.
    fn connect(&self) -> Result<Self::Connection>;

    /// Cheap liveness check, used when `test_on_checkout` is set.
    fn is_valid(&self, conn: &mut Self::Connection) -> Result<()>;

    /// Release native resources. Errors are logged, not returned.
    fn close(&self, conn: Self::Connection);
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of connections (active + idle)
    pub total_connections: usize,
    /// Number of idle connections
    pub idle_connections: usize,
    /// Number of connections handed out
    pub active_connections: usize,
    /// Number of callers blocked in `acquire`
    pub pending_requests: usize,
    /// Connections opened over the pool's lifetime
    pub created: u64,
    /// Connections closed over the pool's lifetime
    pub closed: u64,
}

struct Idle<C> {
    conn: C,
    created_at: Instant,
    idle_since: Instant,
}

struct State<C> {
    idle: VecDeque<Idle<C>>,
    /// Live connections, idle and handed out, plus ones being opened
    live: usize,
    waiting: usize,
    created: u64,
    closed: u64,
    shut_down: bool,
}

struct Shared<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<State<F::Connection>>,
    available: Condvar,
}

/// A bounded pool of physical connections.
///
/// Cloning is cheap; clones share the same connections.
pub struct Pool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a pool and open `min_connections` connections up front.
    #[tracing::instrument(level = "debug", skip(factory))]
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let pool = Self {
            shared: Arc::new(Shared {
                factory,
                config,
                state: Mutex::new(State {
                    idle: VecDeque::new(),
                    live: 0,
                    waiting: 0,
                    created: 0,
                    closed: 0,
                    shut_down: false,
                }),
                available: Condvar::new(),
            }),
        };

        for _ in 0..pool.shared.config.min_connections {
            let conn = pool.shared.factory.connect()?;
            let now = Instant::now();
            let mut state = pool.lock();
            state.live += 1;
            state.created += 1;
            state.idle.push_back(Idle {
                conn,
                created_at: now,
                idle_since: now,
            });
        }

        tracing::debug!(
            min = pool.shared.config.min_connections,
            max = pool.shared.config.max_connections,
            "Connection pool ready"
        );
        Ok(pool)
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    /// Get the current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            total_connections: state.live,
            idle_connections: state.idle.len(),
            active_connections: state.live - state.idle.len(),
            pending_requests: state.waiting,
            created: state.created,
            closed: state.closed,
        }
    }

    /// Check if the pool is at capacity.
    pub fn at_capacity(&self) -> bool {
        self.lock().live >= self.shared.config.max_connections
    }

    fn lock(&self) -> MutexGuard<'_, State<F::Connection>> {
        // A panic while holding the lock leaves counters consistent; keep going.
        self.shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Borrow a connection, blocking up to `acquire_timeout_ms`.
    ///
    /// Fails with [`Error::PoolExhausted`] when no connection frees up in time.
    pub fn acquire(&self) -> Result<PooledConnection<F>> {
        let config = &self.shared.config;
        let started = Instant::now();
        let deadline = started + Duration::from_millis(config.acquire_timeout_ms);
        let mut state = self.lock();

        loop {
            if state.shut_down {
                return Err(Error::connection("connection pool is closed"));
            }

            let now = Instant::now();
            while let Some(entry) = state.idle.pop_back() {
                if self.is_expired(entry.created_at, entry.idle_since, now) {
                    state.live -= 1;
                    state.closed += 1;
                    drop(state);
                    tracing::trace!("Closing expired pooled connection");
                    self.shared.factory.close(entry.conn);
                    state = self.lock();
                    continue;
                }
                drop(state);
                return self.check_out(entry.conn, entry.created_at);
            }

            if state.live < config.max_connections {
                state.live += 1;
                drop(state);
                return self.open_new();
            }

            let remaining = deadline.saturating_duration_since(now);
            if remaining.is_zero() {
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(
                    max = config.max_connections,
                    waited_ms,
                    "Connection pool exhausted"
                );
                return Err(Error::PoolExhausted(PoolError {
                    max_connections: config.max_connections,
                    waited_ms,
                    message: "timed out waiting for a connection".to_string(),
                }));
            }

            state.waiting += 1;
            let (guard, _) = self
                .shared
                .available
                .wait_timeout(state, remaining)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = guard;
            state.waiting -= 1;
        }
    }

    fn open_new(&self) -> Result<PooledConnection<F>> {
        match self.shared.factory.connect() {
            Ok(conn) => {
                self.lock().created += 1;
                tracing::debug!("Opened pooled connection");
                Ok(PooledConnection::new(self.clone(), conn, Instant::now()))
            }
            Err(e) => {
                let mut state = self.lock();
                state.live -= 1;
                drop(state);
                self.shared.available.notify_one();
                Err(e)
            }
        }
    }

    fn check_out(&self, mut conn: F::Connection, created_at: Instant) -> Result<PooledConnection<F>> {
        if self.shared.config.test_on_checkout {
            if let Err(e) = self.shared.factory.is_valid(&mut conn) {
                tracing::debug!(error = %e, "Pooled connection failed checkout test; replacing");
                self.shared.factory.close(conn);
                {
                    let mut state = self.lock();
                    state.closed += 1;
                }
                // The slot stays reserved for the replacement.
                return match self.shared.factory.connect() {
                    Ok(conn) => {
                        self.lock().created += 1;
                        Ok(PooledConnection::new(self.clone(), conn, Instant::now()))
                    }
                    Err(e) => {
                        self.lock().live -= 1;
                        self.shared.available.notify_one();
                        Err(e)
                    }
                };
            }
        }
        Ok(PooledConnection::new(self.clone(), conn, created_at))
    }

    fn is_expired(&self, created_at: Instant, idle_since: Instant, now: Instant) -> bool {
        let config = &self.shared.config;
        now.duration_since(created_at) > Duration::from_millis(config.max_lifetime_ms)
            || now.duration_since(idle_since) > Duration::from_millis(config.max_idle_time_ms)
    }

    /// Return a connection. Closes it instead if it is broken or too old.
    fn release(&self, conn: F::Connection, created_at: Instant, broken: bool) {
        let now = Instant::now();
        let too_old = now.duration_since(created_at)
            > Duration::from_millis(self.shared.config.max_lifetime_ms);

        let mut to_close = Vec::new();
        {
            let mut state = self.lock();
            if broken || too_old || state.shut_down {
                state.live -= 1;
                state.closed += 1;
                to_close.push(conn);
            } else {
                state.idle.push_back(Idle {
                    conn,
                    created_at,
                    idle_since: now,
                });
            }
            self.evict_idle(&mut state, now, &mut to_close);
        }
        self.shared.available.notify_one();

        for conn in to_close {
            tracing::trace!(broken, too_old, "Closing released connection");
            self.shared.factory.close(conn);
        }
    }

    /// Drop idle entries past their idle or lifetime limit, keeping `min_connections` live.
    fn evict_idle(&self, state: &mut State<F::Connection>, now: Instant, out: &mut Vec<F::Connection>) {
        let min = self.shared.config.min_connections;
        let mut kept = VecDeque::with_capacity(state.idle.len());
        while let Some(entry) = state.idle.pop_front() {
            if state.live > min && self.is_expired(entry.created_at, entry.idle_since, now) {
                state.live -= 1;
                state.closed += 1;
                out.push(entry.conn);
            } else {
                kept.push_back(entry);
            }
        }
        state.idle = kept;
    }

    /// Close every idle connection and refuse further acquires.
    ///
    /// Connections still handed out are closed when they come back.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.shut_down = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.live -= drained.len();
            state.closed += drained.len() as u64;
            drained
        };
        self.shared.available.notify_all();
        for entry in drained {
            self.shared.factory.close(entry.conn);
        }
        tracing::debug!("Connection pool closed");
    }
}

/// A connection borrowed from a [`Pool`].
///
/// Returned to the pool on drop. Call [`mark_broken`](Self::mark_broken)
/// after a connection-level failure so it is closed instead of reused.
pub struct PooledConnection<F: ConnectionFactory> {
    pool: Pool<F>,
    conn: Option<F::Connection>,
    created_at: Instant,
    broken: bool,
}

impl<F: ConnectionFactory> std::fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("age", &self.created_at.elapsed())
            .field("broken", &self.broken)
            .field("released", &self.conn.is_none())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> PooledConnection<F> {
    fn new(pool: Pool<F>, conn: F::Connection, created_at: Instant) -> Self {
        Self {
            pool,
            conn: Some(conn),
            created_at,
            broken: false,
        }
    }

    /// Close this connection on release instead of reusing it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Age of the physical connection.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.created_at, self.broken);
        }
    }
}
