//! Error types shared by every backend.
//!
//! Backend failures are translated at the driver boundary into the fixed set of
//! [`Error`] variants below. The native error code, SQLSTATE and message travel
//! along in a [`NativeError`] for diagnostics; callers never have to match on
//! backend-specific codes.

use std::fmt;

/// The primary error type for all unisql operations.
#[derive(Debug)]
pub enum Error {
    /// Could not establish a session, or the session was lost mid-operation
    ConnectionFailed(NativeError),
    /// The backend rejected or failed to run a statement
    QueryFailed(NativeError),
    /// The backend could not compile a statement
    PrepareFailed(NativeError),
    /// No pooled connection became available before the acquire timeout
    PoolExhausted(PoolError),
    /// `begin_transaction` called while a transaction is open
    TransactionAlreadyOpen,
    /// `commit` or `rollback` called with no open transaction
    NoActiveTransaction,
    /// The requested client character set was refused
    CharsetFailed(NativeError),
    /// The backend reported an allocation failure
    OutOfMemory(NativeError),
    /// Invalid configuration or connection string
    Config(ConfigError),
    /// A cell could not be parsed into the requested type
    Conversion(ConversionError),
}

/// Diagnostic payload attached to backend-originated errors.
#[derive(Debug, Default)]
pub struct NativeError {
    /// Native error code (SQLite result code, MySQL error number)
    pub code: Option<i64>,
    /// SQLSTATE, when the backend reports one
    pub sqlstate: Option<String>,
    pub message: String,
    /// The statement that failed, if any
    pub sql: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct PoolError {
    pub max_connections: usize,
    pub waited_ms: u64,
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionError {
    pub column: String,
    pub expected: &'static str,
    pub value: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl Error {
    /// Shorthand for a `ConnectionFailed` error with only a message.
    pub fn connection(message: impl Into<String>) -> Self {
        Error::ConnectionFailed(NativeError::new(message))
    }

    /// Shorthand for a `QueryFailed` error with only a message.
    pub fn query(message: impl Into<String>) -> Self {
        Error::QueryFailed(NativeError::new(message))
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Wrap an I/O failure on an open session.
    pub fn io(context: &str, err: std::io::Error) -> Self {
        Error::ConnectionFailed(NativeError::new(format!("{context}: {err}")).with_source(err))
    }

    /// The diagnostic payload, for variants that carry one.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Error::ConnectionFailed(e)
            | Error::QueryFailed(e)
            | Error::PrepareFailed(e)
            | Error::CharsetFailed(e)
            | Error::OutOfMemory(e) => Some(e),
            _ => None,
        }
    }

    /// Take the diagnostic payload out, building one from the message for
    /// variants that carry none.
    pub fn into_native(self) -> NativeError {
        match self {
            Error::ConnectionFailed(e)
            | Error::QueryFailed(e)
            | Error::PrepareFailed(e)
            | Error::CharsetFailed(e)
            | Error::OutOfMemory(e) => e,
            other => NativeError::new(other.message()),
        }
    }

    pub fn native_code(&self) -> Option<i64> {
        self.native().and_then(|e| e.code)
    }

    pub fn sqlstate(&self) -> Option<&str> {
        self.native().and_then(|e| e.sqlstate.as_deref())
    }

    /// The statement that failed, if the error came from one.
    pub fn sql(&self) -> Option<&str> {
        self.native().and_then(|e| e.sql.as_deref())
    }

    /// Human-readable message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Error::PoolExhausted(e) => e.message.clone(),
            Error::TransactionAlreadyOpen => "a transaction is already open".to_string(),
            Error::NoActiveTransaction => "no transaction is open".to_string(),
            Error::Config(e) => e.message.clone(),
            Error::Conversion(e) => e.to_string(),
            other => other
                .native()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
        }
    }

    /// Whether the session behind this error is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::ConnectionFailed(_))
    }

    /// Attach the failing SQL text when the variant carries a native payload.
    pub fn with_sql(mut self, sql: &str) -> Self {
        match &mut self {
            Error::ConnectionFailed(e)
            | Error::QueryFailed(e)
            | Error::PrepareFailed(e)
            | Error::CharsetFailed(e)
            | Error::OutOfMemory(e) => {
                if e.sql.is_none() {
                    e.sql = Some(sql.to_string());
                }
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            Error::QueryFailed(e) => write!(f, "Query failed: {}", e),
            Error::PrepareFailed(e) => write!(f, "Prepare failed: {}", e),
            Error::PoolExhausted(e) => write!(f, "Pool exhausted: {}", e),
            Error::TransactionAlreadyOpen => write!(f, "Transaction already open"),
            Error::NoActiveTransaction => write!(f, "No active transaction"),
            Error::CharsetFailed(e) => write!(f, "Charset failed: {}", e),
            Error::OutOfMemory(e) => write!(f, "Out of memory: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Conversion(e) => write!(f, "Conversion error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            other => other.native().and_then(|e| {
                e.source
                    .as_deref()
                    .map(|err| err as &(dyn std::error::Error + 'static))
            }),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        match (self.code, &self.sqlstate) {
            (Some(code), Some(state)) => write!(f, " (code {}, SQLSTATE {})", code, state),
            (Some(code), None) => write!(f, " (code {})", code),
            (None, Some(state)) => write!(f, " (SQLSTATE {})", state),
            (None, None) => Ok(()),
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (max_connections={}, waited {}ms)",
            self.message, self.max_connections, self.waited_ms
        )
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {} for column '{}', found '{}'",
            self.expected, self.column, self.value
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::io("I/O error", err)
    }
}

/// Result type alias for unisql operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_native_error_display() {
        let err = Error::QueryFailed(
            NativeError::new("no such table: users")
                .with_code(1)
                .with_sql("SELECT * FROM users"),
        );
        assert_eq!(err.to_string(), "Query failed: no such table: users (code 1)");
        assert_eq!(err.native_code(), Some(1));
        assert_eq!(err.sql(), Some("SELECT * FROM users"));
    }

    #[test]
    fn test_sqlstate_display() {
        let err = Error::QueryFailed(NativeError::new("duplicate key").with_sqlstate("23505"));
        assert_eq!(err.sqlstate(), Some("23505"));
        assert!(err.to_string().contains("SQLSTATE 23505"));
    }

    #[test]
    fn test_transaction_errors_have_no_native_payload() {
        assert!(Error::TransactionAlreadyOpen.native().is_none());
        assert_eq!(Error::NoActiveTransaction.to_string(), "No active transaction");
    }

    #[test]
    fn test_with_sql_keeps_first() {
        let err = Error::query("boom").with_sql("SELECT 1").with_sql("SELECT 2");
        assert_eq!(err.sql(), Some("SELECT 1"));
    }

    #[test]
    fn test_io_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::from(io);
        assert!(err.is_connection_error());
        assert!(err.source().is_some());
    }

    #[test]
    fn test_into_native() {
        let err = Error::QueryFailed(NativeError::new("syntax error").with_code(1064));
        let native = err.into_native();
        assert_eq!(native.code, Some(1064));
        assert_eq!(native.message, "syntax error");

        let native = Error::NoActiveTransaction.into_native();
        assert_eq!(native.code, None);
        assert_eq!(native.message, "no transaction is open");
    }

    #[test]
    fn test_pool_error_display() {
        let err = Error::PoolExhausted(PoolError {
            max_connections: 4,
            waited_ms: 250,
            message: "timed out waiting for a connection".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Pool exhausted: timed out waiting for a connection (max_connections=4, waited 250ms)"
        );
    }
}
