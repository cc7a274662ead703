//! The slice of the SQLite C API the embedded backend calls.
//!
//! Declarations come from `libsqlite3-sys`, which also compiles and links
//! the bundled amalgamation. Everything the rest of the crate touches is
//! re-exported here so `unsafe` call sites read `ffi::sqlite3_step(..)`.
//! `sqlite3_close_v2` is missing from the generated bindings and is
//! declared by hand below.

use std::ffi::{CStr, c_int};

pub use libsqlite3_sys::{
    SQLITE_BLOB, SQLITE_CANTOPEN, SQLITE_DONE, SQLITE_IOERR, SQLITE_NOMEM, SQLITE_NOTADB,
    SQLITE_NULL, SQLITE_OK, SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_READONLY,
    SQLITE_OPEN_READWRITE, SQLITE_RANGE, SQLITE_ROW, SQLITE_TOOBIG, sqlite3, sqlite3_bind_blob,
    sqlite3_bind_double, sqlite3_bind_int64, sqlite3_bind_null, sqlite3_bind_parameter_count,
    sqlite3_bind_text, sqlite3_busy_timeout, sqlite3_changes,
    sqlite3_column_blob, sqlite3_column_bytes, sqlite3_column_count, sqlite3_column_name,
    sqlite3_column_text, sqlite3_column_type, sqlite3_destructor_type, sqlite3_errcode,
    sqlite3_errmsg, sqlite3_exec, sqlite3_extended_errcode, sqlite3_finalize, sqlite3_free,
    sqlite3_get_autocommit, sqlite3_last_insert_rowid, sqlite3_open_v2, sqlite3_prepare_v2,
    sqlite3_step, sqlite3_stmt, sqlite3_stmt_readonly, sqlite3_total_changes,
};

unsafe extern "C" {
    /// Close that defers until the last statement is finalized.
    pub fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
}

/// `SQLITE_TRANSIENT`: SQLite copies a bound buffer before the bind call
/// returns, so the caller's slice may be dropped right after.
pub fn transient() -> sqlite3_destructor_type {
    libsqlite3_sys::SQLITE_TRANSIENT()
}

/// Library version, e.g. `"3.46.0"`.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a pointer to a static C string
    unsafe { CStr::from_ptr(libsqlite3_sys::sqlite3_libversion()) }
        .to_str()
        .unwrap_or("unknown")
}

/// English text for a primary or extended result code.
pub fn error_string(code: c_int) -> &'static str {
    // SAFETY: sqlite3_errstr returns a static string for every code
    unsafe { CStr::from_ptr(libsqlite3_sys::sqlite3_errstr(code)) }
        .to_str()
        .unwrap_or("unknown error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_version() {
        assert!(version().starts_with("3."));
        // SAFETY: no arguments, no state
        let number = unsafe { libsqlite3_sys::sqlite3_libversion_number() };
        assert!(number >= 3_035_000, "{number}");
    }

    #[test]
    fn test_error_strings() {
        assert_eq!(error_string(SQLITE_OK), "not an error");
        assert_eq!(error_string(SQLITE_NOMEM), "out of memory");
        assert_eq!(error_string(SQLITE_CANTOPEN), "unable to open database file");
        assert_eq!(error_string(libsqlite3_sys::SQLITE_CONSTRAINT), "constraint failed");
    }

    #[test]
    fn test_transient_sentinel() {
        let raw = transient().map_or(0, |f| f as usize);
        assert_eq!(raw, usize::MAX);
    }
}
