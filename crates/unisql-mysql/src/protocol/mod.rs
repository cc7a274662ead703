//! MySQL wire protocol framing.
//!
//! MySQL packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum packet payload is 2^24 - 1 (16MB - 1). Larger payloads
//! are split into multiple packets.

pub mod prepared;
pub mod reader;
pub mod writer;

pub use prepared::{
    StmtPrepareOk, build_stmt_close_packet, build_stmt_execute_packet, build_stmt_prepare_packet,
    parse_stmt_prepare_ok,
};
pub use reader::PacketReader;
pub use writer::{PacketWriter, frame_packets};

use unisql_core::{Error, NativeError};

/// Maximum payload size for a single MySQL packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// MySQL capability flags (client and server).
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Client capabilities requested on every connection.
    ///
    /// Multi-statements stay off: one `COM_QUERY` carries one statement.
    pub const DEFAULT_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_TRANSACTIONS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PS_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_DEPRECATE_EOF;
}

/// Commands the client sends (COM_xxx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Quit = 0x01,
    Query = 0x03,
    Ping = 0x0e,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtClose = 0x19,
}

/// MySQL server status flags.
#[allow(dead_code)]
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
}

/// MySQL collation ids for the handshake.
#[allow(dead_code)]
pub mod charset {
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const BINARY: u8 = 63;
    pub const UTF8MB4_0900_AI_CI: u8 = 255;

    /// Collation for new connections (utf8mb4).
    pub const DEFAULT_CHARSET: u8 = UTF8MB4_GENERAL_CI;
}

/// Server error codes with a dedicated error kind.
pub mod error_codes {
    /// ER_OUTOFMEMORY
    pub const OUT_OF_MEMORY: u16 = 1037;
    /// ER_OUT_OF_SORTMEMORY
    pub const OUT_OF_SORT_MEMORY: u16 = 1038;
    /// ER_CON_COUNT_ERROR
    pub const TOO_MANY_CONNECTIONS: u16 = 1040;
    /// ER_DBACCESS_DENIED_ERROR
    pub const DB_ACCESS_DENIED: u16 = 1044;
    /// ER_ACCESS_DENIED_ERROR
    pub const ACCESS_DENIED: u16 = 1045;
    /// ER_BAD_DB_ERROR
    pub const BAD_DB: u16 = 1049;
    /// ER_UNKNOWN_CHARACTER_SET
    pub const UNKNOWN_CHARACTER_SET: u16 = 1115;
}

/// A MySQL packet header.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    pub const SIZE: usize = 4;

    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        Self {
            payload_length,
            sequence_id: bytes[3],
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let len = self.payload_length.to_le_bytes();
        [len[0], len[1], len[2], self.sequence_id]
    }
}

/// Server response packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// OK packet (0x00)
    Ok,
    /// Error packet (0xFF)
    Error,
    /// EOF packet (0xFE), also used for auth switch requests
    Eof,
    /// Local infile request (0xFB)
    LocalInfile,
    /// Anything else: column count, row, auth data
    Data,
}

impl PacketType {
    /// Detect packet type from the first byte of payload.
    pub fn from_first_byte(byte: u8, payload_len: usize) -> Self {
        match byte {
            0x00 => PacketType::Ok,
            0xFF => PacketType::Error,
            // EOF is 0xFE with payload < 9 bytes
            0xFE if payload_len < 9 => PacketType::Eof,
            0xFB => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    /// Parse an OK payload; the 0x00 (or 0xFE terminator) header is
    /// optional. `None` if truncated.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut reader = PacketReader::new(payload);
        if matches!(reader.peek(), Some(0x00 | 0xFE)) {
            reader.skip(1);
        }
        Some(Self {
            affected_rows: reader.read_lenenc_int()?,
            last_insert_id: reader.read_lenenc_int()?,
            status_flags: reader.read_u16_le()?,
            warnings: reader.read_u16_le()?,
            info: reader.read_rest_string(),
        })
    }
}

/// Parsed Error packet.
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    /// SQL state (5 characters, empty on pre-4.1 servers)
    pub sql_state: String,
    pub error_message: String,
}

/// Phase a server error was reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    Connect,
    Prepare,
    Query,
}

impl ErrPacket {
    /// Parse an ERR payload, with or without its 0xFF header.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut reader = PacketReader::new(payload);
        if reader.peek() == Some(0xFF) {
            reader.skip(1);
        }
        let error_code = reader.read_u16_le()?;
        let sql_state = if reader.peek() == Some(b'#') {
            reader.skip(1);
            String::from_utf8_lossy(reader.read_bytes(5)?).into_owned()
        } else {
            String::new()
        };
        Some(Self {
            error_code,
            sql_state,
            error_message: reader.read_rest_string(),
        })
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self.error_code,
            error_codes::OUT_OF_MEMORY | error_codes::OUT_OF_SORT_MEMORY
        )
    }

    /// Errors after which the session cannot be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.error_code,
            error_codes::TOO_MANY_CONNECTIONS
                | error_codes::DB_ACCESS_DENIED
                | error_codes::ACCESS_DENIED
                | error_codes::BAD_DB
        ) || self.sql_state.starts_with("08")
    }

    /// Translate into the shared error taxonomy.
    pub fn into_error(self, phase: ErrorPhase) -> Error {
        let mut native =
            NativeError::new(self.error_message.clone()).with_code(i64::from(self.error_code));
        if !self.sql_state.is_empty() {
            native = native.with_sqlstate(self.sql_state.clone());
        }

        if self.is_out_of_memory() {
            Error::OutOfMemory(native)
        } else if phase == ErrorPhase::Connect || self.is_fatal() {
            Error::ConnectionFailed(native)
        } else if phase == ErrorPhase::Prepare {
            Error::PrepareFailed(native)
        } else {
            Error::QueryFailed(native)
        }
    }
}

/// Parsed EOF packet (deprecated in newer MySQL versions).
#[derive(Debug, Clone, Copy)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut reader = PacketReader::new(payload);
        if reader.peek() == Some(0xFE) {
            reader.skip(1);
        }
        Some(Self {
            warnings: reader.read_u16_le()?,
            status_flags: reader.read_u16_le()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(code: u16, state: &str) -> ErrPacket {
        ErrPacket {
            error_code: code,
            sql_state: state.to_string(),
            error_message: "boom".to_string(),
        }
    }

    #[test]
    fn test_packet_header_roundtrip() {
        let header = PacketHeader {
            payload_length: 0x0012_3456,
            sequence_id: 7,
        };
        let parsed = PacketHeader::from_bytes(&header.to_bytes());
        assert_eq!(header.payload_length, parsed.payload_length);
        assert_eq!(header.sequence_id, parsed.sequence_id);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn test_packet_header_max_size() {
        let header = PacketHeader {
            payload_length: MAX_PACKET_SIZE as u32,
            sequence_id: 255,
        };
        assert_eq!(header.to_bytes(), [0xFF, 0xFF, 0xFF, 255]);
    }

    #[test]
    fn test_packet_type_detection() {
        assert_eq!(PacketType::from_first_byte(0x00, 10), PacketType::Ok);
        assert_eq!(PacketType::from_first_byte(0xFF, 10), PacketType::Error);
        assert_eq!(PacketType::from_first_byte(0xFE, 5), PacketType::Eof);
        assert_eq!(PacketType::from_first_byte(0xFE, 100), PacketType::Data);
        assert_eq!(
            PacketType::from_first_byte(0xFB, 10),
            PacketType::LocalInfile
        );
        assert_eq!(PacketType::from_first_byte(0x42, 10), PacketType::Data);
    }

    #[test]
    fn test_parse_ok() {
        let ok = OkPacket::parse(&[0x00, 0x01, 0xFC, 0x10, 0x27, 0x02, 0x00, 0x01, 0x00]).unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 10_000);
        assert_eq!(ok.status_flags, server_status::SERVER_STATUS_AUTOCOMMIT);
        assert_eq!(ok.warnings, 1);
        assert!(ok.info.is_empty());

        // OK-style terminator under CLIENT_DEPRECATE_EOF
        let ok = OkPacket::parse(&[0xFE, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(ok.status_flags, 0x0003);
        assert!(OkPacket::parse(&[0x00, 0x01]).is_none());
    }

    #[test]
    fn test_parse_err() {
        let mut data = vec![0xFF, 0x7A, 0x04, b'#'];
        data.extend_from_slice(b"42S02Table 'app.nope' doesn't exist");
        let err = ErrPacket::parse(&data).unwrap();
        assert_eq!(err.error_code, 1146);
        assert_eq!(err.sql_state, "42S02");
        assert_eq!(err.error_message, "Table 'app.nope' doesn't exist");

        let bare = ErrPacket::parse(&[0xFF, 0x10, 0x04, b'T', b'o', b'o']).unwrap();
        assert_eq!(bare.error_code, 1040);
        assert!(bare.sql_state.is_empty());
        assert_eq!(bare.error_message, "Too");
    }

    #[test]
    fn test_parse_eof() {
        let eof = EofPacket::parse(&[0xFE, 0x02, 0x00, 0x22, 0x00]).unwrap();
        assert_eq!(eof.warnings, 2);
        assert_eq!(eof.status_flags, 0x22);
        assert!(EofPacket::parse(&[0xFE, 0x00]).is_none());
    }

    #[test]
    fn test_error_mapping() {
        let e = err(1064, "42000").into_error(ErrorPhase::Query);
        assert!(matches!(e, Error::QueryFailed(_)));
        assert_eq!(e.native_code(), Some(1064));
        assert_eq!(e.sqlstate(), Some("42000"));

        let e = err(1064, "42000").into_error(ErrorPhase::Prepare);
        assert!(matches!(e, Error::PrepareFailed(_)));

        let e = err(1037, "HY001").into_error(ErrorPhase::Query);
        assert!(matches!(e, Error::OutOfMemory(_)));

        let e = err(1045, "28000").into_error(ErrorPhase::Query);
        assert!(matches!(e, Error::ConnectionFailed(_)));

        let e = err(1146, "42S02").into_error(ErrorPhase::Connect);
        assert!(e.is_connection_error());
    }
}
