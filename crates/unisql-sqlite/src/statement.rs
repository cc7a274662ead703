//! Prepared statement handle and row materialization.
//!
//! [`Statement`] owns a `sqlite3_stmt` and finalizes it on drop, so every
//! exit path (success, bind failure, step failure) releases the handle.
//! [`Statement::materialize_row`] is the only place cell memory owned by
//! SQLite is read; it copies each cell into an owned `String` before the next
//! `sqlite3_step` can invalidate it.

use std::ffi::{CStr, CString, c_int};
use std::ptr;

use unisql_core::{Error, NativeError, Result, Value};

use crate::ffi;

pub(crate) struct Statement {
    raw: *mut ffi::sqlite3_stmt,
    db: *mut ffi::sqlite3,
}

impl Statement {
    /// Compile `sql` against `db`.
    ///
    /// `sql` must hold exactly one statement. Trailing whitespace and
    /// comments are allowed; a second statement is a `PrepareFailed` error
    /// rather than being silently skipped.
    ///
    /// # Safety
    /// `db` must be an open handle that outlives the returned statement.
    pub(crate) unsafe fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| {
            Error::PrepareFailed(NativeError::new("SQL contains a NUL byte").with_sql(sql))
        })?;
        let bytes = c_sql.as_bytes();

        // SAFETY: db is open, bytes are NUL-terminated and outlive the call
        let Some((raw, consumed)) = (unsafe { prepare_one(db, bytes) }) else {
            // SAFETY: db is open
            return Err(unsafe { prepare_error(db, sql) });
        };
        if raw.is_null() {
            // Empty statement or only a comment.
            return Err(Error::PrepareFailed(
                NativeError::new("SQL contains no statement").with_sql(sql),
            ));
        }
        let stmt = Self { raw, db };

        let tail = &bytes[consumed..];
        if !tail.iter().all(u8::is_ascii_whitespace) {
            // SAFETY: as above; the tail is still NUL-terminated by c_sql
            let Some((extra, _)) = (unsafe { prepare_one(db, tail) }) else {
                // SAFETY: db is open
                return Err(unsafe { prepare_error(db, sql) });
            };
            if !extra.is_null() {
                // SAFETY: extra came from prepare_v2 and is not used again
                unsafe { ffi::sqlite3_finalize(extra) };
                return Err(Error::PrepareFailed(
                    NativeError::new("SQL contains more than one statement").with_sql(sql),
                ));
            }
        }
        Ok(stmt)
    }

    pub(crate) fn parameter_count(&self) -> usize {
        // SAFETY: raw is a live statement
        let n = unsafe { ffi::sqlite3_bind_parameter_count(self.raw) };
        usize::try_from(n).unwrap_or(0)
    }

    pub(crate) fn bind_all(&mut self, sql: &str, params: &[Value]) -> Result<()> {
        let expected = self.parameter_count();
        if expected != params.len() {
            return Err(Error::QueryFailed(
                NativeError::new(format!(
                    "statement expects {} parameters, {} given",
                    expected,
                    params.len()
                ))
                .with_code(i64::from(ffi::SQLITE_RANGE))
                .with_sql(sql),
            ));
        }
        for (i, value) in params.iter().enumerate() {
            let index = (i + 1) as c_int;
            // SAFETY: raw is live; index is within 1..=parameter_count
            let rc = unsafe { bind_value(self.raw, index, value) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: db is open
                return Err(unsafe { native_error(self.db, sql, rc) }.map_message(|m| {
                    format!("failed to bind parameter {}: {}", i + 1, m)
                }));
            }
        }
        Ok(())
    }

    /// Advance one row. `Ok(true)` when a row is available.
    pub(crate) fn step(&mut self, sql: &str) -> Result<bool> {
        // SAFETY: raw is live
        match unsafe { ffi::sqlite3_step(self.raw) } {
            ffi::SQLITE_ROW => Ok(true),
            ffi::SQLITE_DONE => Ok(false),
            // SAFETY: db is open
            rc => Err(unsafe { native_error(self.db, sql, rc) }),
        }
    }

    pub(crate) fn is_readonly(&self) -> bool {
        // SAFETY: raw is live
        unsafe { ffi::sqlite3_stmt_readonly(self.raw) != 0 }
    }

    pub(crate) fn column_count(&self) -> usize {
        // SAFETY: raw is live
        let n = unsafe { ffi::sqlite3_column_count(self.raw) };
        usize::try_from(n).unwrap_or(0)
    }

    pub(crate) fn column_names(&self) -> Vec<String> {
        (0..self.column_count())
            .map(|i| {
                // SAFETY: raw is live and i < column_count; the name is copied at once
                let ptr = unsafe { ffi::sqlite3_column_name(self.raw, i as c_int) };
                if ptr.is_null() {
                    format!("col{i}")
                } else {
                    // SAFETY: non-null names are NUL-terminated
                    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
                }
            })
            .collect()
    }

    /// Copy every cell of the current row into owned strings.
    ///
    /// Must only be called right after `step` returned `Ok(true)`.
    pub(crate) fn materialize_row(&self, columns: usize) -> Vec<Option<String>> {
        let mut cells = Vec::with_capacity(columns);
        for i in 0..columns {
            let index = i as c_int;
            // SAFETY: the statement is positioned on a row and index < column count.
            // Pointers returned by column_text / column_blob stay valid until the
            // next step, reset or finalize; the bytes are copied before returning.
            let cell = unsafe {
                match ffi::sqlite3_column_type(self.raw, index) {
                    ffi::SQLITE_NULL => None,
                    ffi::SQLITE_BLOB => {
                        let data = ffi::sqlite3_column_blob(self.raw, index);
                        let len = ffi::sqlite3_column_bytes(self.raw, index);
                        if data.is_null() || len <= 0 {
                            Some(String::new())
                        } else {
                            let bytes =
                                std::slice::from_raw_parts(data.cast::<u8>(), len as usize);
                            Some(String::from_utf8_lossy(bytes).into_owned())
                        }
                    }
                    _ => {
                        let text = ffi::sqlite3_column_text(self.raw, index);
                        let len = ffi::sqlite3_column_bytes(self.raw, index);
                        if text.is_null() || len <= 0 {
                            Some(String::new())
                        } else {
                            let bytes =
                                std::slice::from_raw_parts(text.cast::<u8>(), len as usize);
                            Some(String::from_utf8_lossy(bytes).into_owned())
                        }
                    }
                }
            };
            cells.push(cell);
        }
        cells
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw came from prepare_v2 and is finalized exactly once
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

/// Bind a Value to a prepared statement parameter.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a valid 1-based parameter index
unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    // SAFETY: caller guarantees stmt/index; text and blob buffers are copied
    // by SQLite (SQLITE_TRANSIENT) before the call returns.
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Bool(b) => ffi::sqlite3_bind_int64(stmt, index, i64::from(*b)),
            Value::Int(v) => ffi::sqlite3_bind_int64(stmt, index, *v),
            Value::Float(v) => ffi::sqlite3_bind_double(stmt, index, *v),
            Value::Text(s) => {
                let Ok(len) = c_int::try_from(s.len()) else {
                    return ffi::SQLITE_TOOBIG;
                };
                ffi::sqlite3_bind_text(stmt, index, s.as_ptr().cast(), len, ffi::transient())
            }
            Value::Bytes(b) => {
                let Ok(len) = c_int::try_from(b.len()) else {
                    return ffi::SQLITE_TOOBIG;
                };
                ffi::sqlite3_bind_blob(stmt, index, b.as_ptr().cast(), len, ffi::transient())
            }
        }
    }
}

trait MapMessage {
    fn map_message(self, f: impl FnOnce(&str) -> String) -> Self;
}

impl MapMessage for Error {
    fn map_message(mut self, f: impl FnOnce(&str) -> String) -> Self {
        match &mut self {
            Error::QueryFailed(e) | Error::OutOfMemory(e) | Error::ConnectionFailed(e) => {
                e.message = f(&e.message);
            }
            _ => {}
        }
        self
    }
}

/// Read the connection's current error message.
///
/// # Safety
/// `db` must be an open handle.
pub(crate) unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: caller guarantees db; the message is copied immediately
    unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        if ptr.is_null() {
            return String::new();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Translate a failed step / exec result code into the error taxonomy.
///
/// # Safety
/// `db` must be an open handle.
pub(crate) unsafe fn native_error(db: *mut ffi::sqlite3, sql: &str, rc: c_int) -> Error {
    // SAFETY: caller guarantees db
    let (message, extended) = unsafe { (errmsg(db), ffi::sqlite3_extended_errcode(db)) };
    let code = if extended != 0 { extended } else { rc };
    let native = NativeError::new(message)
        .with_code(i64::from(code))
        .with_sql(sql);
    match rc & 0xff {
        ffi::SQLITE_NOMEM => Error::OutOfMemory(native),
        ffi::SQLITE_CANTOPEN | ffi::SQLITE_NOTADB | ffi::SQLITE_IOERR => {
            Error::ConnectionFailed(native)
        }
        _ => Error::QueryFailed(native),
    }
}

/// Compile the first statement in `sql`, which must be followed in memory
/// by a NUL byte. Returns the statement (null for whitespace or comments
/// only) and the number of bytes it consumed, or `None` on a compile error.
///
/// # Safety
/// `db` must be an open handle.
unsafe fn prepare_one(
    db: *mut ffi::sqlite3,
    sql: &[u8],
) -> Option<(*mut ffi::sqlite3_stmt, usize)> {
    let len = c_int::try_from(sql.len()).ok()?;
    let start = sql.as_ptr().cast::<std::ffi::c_char>();
    let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
    let mut tail: *const std::ffi::c_char = ptr::null();

    // SAFETY: caller guarantees db; start..start+len is readable
    let rc = unsafe { ffi::sqlite3_prepare_v2(db, start, len, &mut raw, &mut tail) };
    if rc != ffi::SQLITE_OK {
        return None;
    }
    let consumed = if tail.is_null() {
        sql.len()
    } else {
        // SAFETY: SQLite sets tail inside the input buffer
        usize::try_from(unsafe { tail.offset_from(start) }).unwrap_or(sql.len())
    };
    Some((raw, consumed.min(sql.len())))
}

/// # Safety
/// `db` must be an open handle.
unsafe fn prepare_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: caller guarantees db
    let (message, code) = unsafe { (errmsg(db), ffi::sqlite3_errcode(db)) };
    let native = NativeError::new(message)
        .with_code(i64::from(code))
        .with_sql(sql);
    if code == ffi::SQLITE_NOMEM {
        Error::OutOfMemory(native)
    } else {
        Error::PrepareFailed(native)
    }
}
