//! Frontend and backend message definitions.

use std::fmt;

/// Protocol version 3.0.
pub const PROTOCOL_VERSION: i32 = 196_608; // 3 << 16

/// SSL request code.
pub const SSL_REQUEST_CODE: i32 = 80_877_103; // 1234 << 16 | 5679

/// Messages sent from the client to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    /// First message after connecting (no type byte)
    Startup {
        version: i32,
        /// `user`, `database`, `client_encoding`, ...
        params: Vec<(String, String)>,
    },

    /// Cleartext or MD5 password
    PasswordMessage(String),

    SASLInitialResponse {
        /// e.g. "SCRAM-SHA-256"
        mechanism: String,
        data: Vec<u8>,
    },

    SASLResponse(Vec<u8>),

    /// Simple query: text results, no parameters
    Query(String),

    /// Extended protocol: prepare a statement
    Parse {
        /// "" for the unnamed statement
        name: String,
        /// SQL with $1, $2, ... placeholders
        query: String,
        /// 0 lets the server infer the type
        param_types: Vec<u32>,
    },

    Bind {
        portal: String,
        statement: String,
        /// 0=text, 1=binary
        param_formats: Vec<i16>,
        /// `None` for NULL
        params: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    },

    Describe {
        kind: DescribeKind,
        name: String,
    },

    Execute {
        portal: String,
        /// 0 for all rows
        max_rows: i32,
    },

    /// End of an extended-protocol batch; the server answers ReadyForQuery
    Sync,

    Terminate,

    SSLRequest,
}

/// Target of Describe messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeKind {
    Statement,
    Portal,
}

impl DescribeKind {
    pub const fn as_byte(self) -> u8 {
        match self {
            DescribeKind::Statement => b'S',
            DescribeKind::Portal => b'P',
        }
    }
}

/// Messages sent from the server to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    /// MD5-hashed password with this salt
    AuthenticationMD5Password([u8; 4]),
    /// Mechanisms the server offers
    AuthenticationSASL(Vec<String>),
    AuthenticationSASLContinue(Vec<u8>),
    AuthenticationSASLFinal(Vec<u8>),

    BackendKeyData {
        process_id: i32,
        secret_key: i32,
    },
    /// e.g. `server_encoding`, `client_encoding`, `TimeZone`
    ParameterStatus {
        name: String,
        value: String,
    },
    ReadyForQuery(TransactionStatus),

    RowDescription(Vec<FieldDescription>),
    DataRow(Vec<Option<Vec<u8>>>),
    /// Command tag, e.g. "INSERT 0 1"
    CommandComplete(String),
    EmptyQueryResponse,

    ParseComplete,
    BindComplete,
    CloseComplete,
    ParameterDescription(Vec<u32>),
    NoData,
    PortalSuspended,

    ErrorResponse(ErrorFields),
    NoticeResponse(ErrorFields),

    /// LISTEN/NOTIFY delivery; ignored
    NotificationResponse {
        process_id: i32,
        channel: String,
        payload: String,
    },

    NegotiateProtocolVersion {
        newest_minor: i32,
        unrecognized: Vec<String>,
    },
}

/// Transaction status indicator from ReadyForQuery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Not in a transaction block
    #[default]
    Idle,
    /// In a transaction block
    Transaction,
    /// In a failed transaction block
    Error,
}

impl TransactionStatus {
    pub const fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::Transaction => b'T',
            TransactionStatus::Error => b'E',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::Transaction),
            b'E' => Some(TransactionStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Idle => write!(f, "idle"),
            TransactionStatus::Transaction => write!(f, "in transaction"),
            TransactionStatus::Error => write!(f, "in failed transaction"),
        }
    }
}

/// Describes a single column of a row description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    /// OID of the table (0 if not from a table)
    pub table_oid: u32,
    pub column_id: i16,
    pub type_oid: u32,
    /// -1 for variable-length types
    pub type_size: i16,
    pub type_modifier: i32,
    /// 0=text, 1=binary
    pub format: i16,
}

/// Error and notice response fields.
///
/// Fields are identified by single-byte codes on the wire. Only the ones
/// the driver reports are kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorFields {
    /// ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: String,
    /// SQLSTATE, e.g. "23505"
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// 1-based position in the query string
    pub position: Option<i32>,
    pub constraint: Option<String>,
}

impl ErrorFields {
    pub fn is_fatal(&self) -> bool {
        self.severity == "FATAL" || self.severity == "PANIC"
    }

    /// SQLSTATE class (first two characters).
    pub fn error_class(&self) -> &str {
        self.code.get(..2).unwrap_or(&self.code)
    }
}

impl fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

/// Message type bytes for frontend messages.
pub mod frontend_type {
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const DESCRIBE: u8 = b'D';
    pub const EXECUTE: u8 = b'E';
    pub const SYNC: u8 = b'S';
    pub const TERMINATE: u8 = b'X';
}

/// Message type bytes for backend messages.
pub mod backend_type {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const EMPTY_QUERY: u8 = b'I';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const NO_DATA: u8 = b'n';
    pub const PORTAL_SUSPENDED: u8 = b's';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
}

/// Authentication method codes from the server.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_status_bytes() {
        for status in [
            TransactionStatus::Idle,
            TransactionStatus::Transaction,
            TransactionStatus::Error,
        ] {
            assert_eq!(TransactionStatus::from_byte(status.as_byte()), Some(status));
        }
        assert_eq!(TransactionStatus::from_byte(b'x'), None);
    }

    #[test]
    fn test_error_fields_display() {
        let err = ErrorFields {
            severity: "ERROR".to_string(),
            code: "23505".to_string(),
            message: "duplicate key value violates unique constraint".to_string(),
            detail: Some("Key (id)=(1) already exists.".to_string()),
            ..Default::default()
        };

        let display = err.to_string();
        assert!(display.starts_with("ERROR: duplicate key"));
        assert!(display.contains("Key (id)=(1)"));
        assert_eq!(err.error_class(), "23");
        assert!(!err.is_fatal());
    }
}
