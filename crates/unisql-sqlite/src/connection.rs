//! SQLite connection implementation.
//!
//! One [`SqliteConnection`] wraps one `sqlite3*` handle behind a mutex. File
//! databases are switched to write-ahead logging so readers in other
//! connections are not blocked by the single writer; SQLite enforces the
//! reader/writer rules itself.

use std::ffi::{CString, c_int};
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use unisql_core::{
    Backend, DatabaseConfig, DriverKind, Error, NativeError, Result, ResultSet, TransactionState,
    Value,
};

use crate::ffi;
use crate::statement::{self, Statement};

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create).
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Text encoding for newly created databases (`UTF-8`, `UTF-16le`, ...).
    pub encoding: Option<String>,
    /// Switch file databases to `journal_mode=WAL`.
    pub wal: bool,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            create: false,
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_only: false,
            create: true,
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = ffi::SQLITE_OPEN_FULLMUTEX;
        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        } else {
            flags |= ffi::SQLITE_OPEN_READWRITE;
            if self.create {
                flags |= ffi::SQLITE_OPEN_CREATE;
            }
        }
        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
            encoding: None,
            wal: true,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn wal(mut self, enabled: bool) -> Self {
        self.wal = enabled;
        self
    }

    /// Derive from the engine-wide configuration.
    ///
    /// `charset` maps onto `PRAGMA encoding`; anything SQLite cannot store
    /// is rejected with [`Error::CharsetFailed`].
    pub fn from_database_config(config: &DatabaseConfig) -> Result<Self> {
        let path = if config.database.is_empty() {
            ":memory:".to_string()
        } else {
            config.database.clone()
        };
        let encoding = config.charset.as_deref().map(sqlite_encoding).transpose()?;
        let busy_timeout_ms = config
            .transaction_timeout_ms
            .map_or(5000, |ms| u32::try_from(ms).unwrap_or(u32::MAX));
        Ok(Self {
            path,
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms,
            encoding,
            wal: true,
        })
    }

    /// Whether the database lives only in memory.
    pub fn is_memory(&self) -> bool {
        self.path.is_empty() || self.path == ":memory:" || self.path.starts_with("file::memory:")
    }
}

fn sqlite_encoding(charset: &str) -> Result<String> {
    match charset.to_ascii_lowercase().replace('_', "-").as_str() {
        "utf8" | "utf-8" | "utf8mb4" => Ok("UTF-8".to_string()),
        "utf16" | "utf-16" => Ok("UTF-16".to_string()),
        "utf-16le" | "utf16le" => Ok("UTF-16le".to_string()),
        "utf-16be" | "utf16be" => Ok("UTF-16be".to_string()),
        other => Err(Error::CharsetFailed(NativeError::new(format!(
            "SQLite cannot store text as '{other}'"
        )))),
    }
}

/// Inner state of the SQLite connection, protected by a mutex for thread safety.
struct SqliteInner {
    db: *mut ffi::sqlite3,
    state: TransactionState,
}

// SAFETY: the handle is opened in serialized mode and every use goes through
// the surrounding Mutex.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    #[tracing::instrument(level = "debug", skip(config), fields(path = %config.path))]
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str())
            .map_err(|_| Error::connection("invalid path: contains a NUL byte"))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let message = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is non-null; it must be closed even on failure
                unsafe {
                    let msg = statement::errmsg(db);
                    ffi::sqlite3_close_v2(db);
                    msg
                }
            };
            let native = NativeError::new(format!("failed to open database: {message}"))
                .with_code(i64::from(rc));
            return Err(if rc == ffi::SQLITE_NOMEM {
                Error::OutOfMemory(native)
            } else {
                Error::ConnectionFailed(native)
            });
        }

        let conn = Self {
            inner: Mutex::new(SqliteInner {
                db,
                state: TransactionState::Idle,
            }),
            path: config.path.clone(),
        };

        if config.busy_timeout_ms > 0 {
            let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is open
            unsafe {
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        if let Some(encoding) = &config.encoding {
            conn.execute_raw(&format!("PRAGMA encoding = '{encoding}'"))
                .map_err(|e| Error::CharsetFailed(NativeError::new(e.message())))?;
        }

        if config.wal && !config.is_memory() && !config.flags.read_only {
            conn.execute_raw("PRAGMA journal_mode = WAL")?;
            tracing::debug!(path = %config.path, "Enabled write-ahead logging");
        }

        tracing::debug!(version = ffi::version(), "Opened SQLite database");
        Ok(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_handle(inner: &SqliteInner) -> Result<*mut ffi::sqlite3> {
        if inner.db.is_null() {
            Err(Error::connection("connection is closed"))
        } else {
            Ok(inner.db)
        }
    }

    /// Execute one or more statements without parameters (DDL, scripts, pragmas).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        self.execute_script(sql).map(drop)
    }

    /// Run a parameterless script and count the rows it changed.
    ///
    /// The count is the growth of `sqlite3_total_changes` across the script,
    /// measured under the same lock, so DDL reports 0 and rows changed by
    /// another thread are never included.
    pub fn execute_script(&self, sql: &str) -> Result<u64> {
        let inner = self.lock();
        let db = Self::open_handle(&inner)?;
        // SAFETY: db is open while the lock is held
        unsafe {
            let before = ffi::sqlite3_total_changes(db);
            exec(db, sql)?;
            Ok(changes_since(db, before))
        }
    }

    /// Run a statement to completion, materializing every row.
    fn run(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let inner = self.lock();
        let db = Self::open_handle(&inner)?;

        // SAFETY: db stays open while the lock is held; stmt is dropped first
        let mut stmt = unsafe { Statement::prepare(db, sql)? };
        stmt.bind_all(sql, params)?;

        // SAFETY: db is open
        let (changes_before, rowid_before) = unsafe {
            (
                ffi::sqlite3_total_changes(db),
                ffi::sqlite3_last_insert_rowid(db),
            )
        };

        let columns = stmt.column_names();
        let width = columns.len();
        let mut cells = Vec::new();
        while stmt.step(sql)? {
            cells.push(stmt.materialize_row(width));
        }
        let readonly = stmt.is_readonly();
        drop(stmt);

        let mut result = ResultSet::from_cells(columns, cells);
        if !readonly {
            // SAFETY: db is open
            unsafe {
                let changed = ffi::sqlite3_total_changes(db) != changes_before;
                if changed {
                    result.affected_rows = u64::try_from(ffi::sqlite3_changes(db)).unwrap_or(0);
                }
                let rowid = ffi::sqlite3_last_insert_rowid(db);
                let inserted = rowid != rowid_before || (changed && is_insert(sql));
                result.last_insert_id = (inserted && rowid != 0).then_some(rowid);
            }
        }
        tracing::trace!(sql, rows = result.len(), "SQLite statement complete");
        Ok(result)
    }

    /// Run BEGIN / COMMIT / ROLLBACK and resync the state from SQLite.
    fn transition(&self, sql: &str, check: fn(&TransactionState) -> Result<()>) -> Result<()> {
        let mut inner = self.lock();
        let db = Self::open_handle(&inner)?;
        check(&inner.state)?;

        // SAFETY: db is open while the lock is held
        let outcome = unsafe { exec(db, sql) };
        // SAFETY: db is open
        let autocommit = unsafe { ffi::sqlite3_get_autocommit(db) } != 0;
        inner.state = if autocommit {
            TransactionState::Idle
        } else {
            TransactionState::InTransaction
        };
        tracing::debug!(sql, state = ?inner.state, "SQLite transaction transition");
        outcome
    }
}

/// Rows changed since `sqlite3_total_changes` read `before`.
///
/// # Safety
/// `db` must be an open handle.
unsafe fn changes_since(db: *mut ffi::sqlite3, before: c_int) -> u64 {
    // SAFETY: caller guarantees db
    let after = unsafe { ffi::sqlite3_total_changes(db) };
    u64::try_from(after.wrapping_sub(before)).unwrap_or(0)
}

/// Whether the statement's leading keyword makes it an insert.
fn is_insert(sql: &str) -> bool {
    let keyword = sql.split_whitespace().next().unwrap_or_default();
    keyword.eq_ignore_ascii_case("INSERT") || keyword.eq_ignore_ascii_case("REPLACE")
}

/// # Safety
/// `db` must be an open handle.
unsafe fn exec(db: *mut ffi::sqlite3, sql: &str) -> Result<()> {
    let c_sql = CString::new(sql).map_err(|_| {
        Error::PrepareFailed(NativeError::new("SQL contains a NUL byte").with_sql(sql))
    })?;
    let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

    if !errmsg.is_null() {
        // SAFETY: errmsg was allocated by SQLite and must be freed with sqlite3_free
        unsafe { ffi::sqlite3_free(errmsg.cast()) };
    }
    if rc == ffi::SQLITE_OK {
        Ok(())
    } else {
        // SAFETY: db is open
        Err(unsafe { statement::native_error(db, sql, rc) })
    }
}

impl Backend for SqliteConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        self.run(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        if params.is_empty() && !sql.contains('?') {
            return self.execute_script(sql);
        }
        self.run(sql, params).map(|r| r.affected_rows)
    }

    fn begin(&self) -> Result<()> {
        self.transition("BEGIN", TransactionState::ensure_idle)
    }

    fn commit(&self) -> Result<()> {
        self.transition("COMMIT", TransactionState::ensure_active)
    }

    fn rollback(&self) -> Result<()> {
        self.transition("ROLLBACK", TransactionState::ensure_active)
    }

    fn last_insert_id(&self) -> Option<i64> {
        let inner = self.lock();
        if inner.db.is_null() {
            return None;
        }
        // SAFETY: db is open
        let rowid = unsafe { ffi::sqlite3_last_insert_rowid(inner.db) };
        (rowid != 0).then_some(rowid)
    }

    fn ping(&self) -> Result<()> {
        self.run("SELECT 1", &[]).map(drop)
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.db.is_null() {
            return Ok(());
        }
        // SAFETY: db is open; close_v2 defers if statements are still alive
        let rc = unsafe { ffi::sqlite3_close_v2(inner.db) };
        inner.db = ptr::null_mut();
        inner.state = TransactionState::Idle;
        if rc == ffi::SQLITE_OK {
            tracing::debug!(path = %self.path, "Closed SQLite database");
            Ok(())
        } else {
            Err(Error::ConnectionFailed(
                NativeError::new(ffi::error_string(rc)).with_code(i64::from(rc)),
            ))
        }
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::EmbeddedSql
    }

    fn transaction_state(&self) -> TransactionState {
        self.lock().state
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Err(e) = Backend::close(self) {
            tracing::warn!(error = %e, "Failed to close SQLite database");
        }
    }
}
