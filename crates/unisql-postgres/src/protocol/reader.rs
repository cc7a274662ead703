//! Backend message decoder.

#![allow(clippy::cast_sign_loss)]

use super::messages::{
    BackendMessage, ErrorFields, FieldDescription, TransactionStatus, auth_type, backend_type,
};
use std::fmt;

/// Errors while decoding backend messages.
#[derive(Debug)]
pub enum ProtocolError {
    InvalidLength { length: i32 },
    MessageTooLarge { length: usize, max: usize },
    UnknownMessageType(u8),
    Utf8(std::string::FromUtf8Error),
    UnexpectedEof,
    InvalidField(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidLength { length } => {
                write!(f, "invalid message length: {}", length)
            }
            ProtocolError::MessageTooLarge { length, max } => {
                write!(f, "message too large: {} > {}", length, max)
            }
            ProtocolError::UnknownMessageType(ty) => {
                write!(f, "unknown message type: 0x{:02x}", ty)
            }
            ProtocolError::Utf8(err) => write!(f, "utf-8 error: {}", err),
            ProtocolError::UnexpectedEof => write!(f, "unexpected end of buffer"),
            ProtocolError::InvalidField(msg) => write!(f, "invalid field: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<std::string::FromUtf8Error> for ProtocolError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        ProtocolError::Utf8(err)
    }
}

impl From<ProtocolError> for unisql_core::Error {
    fn from(err: ProtocolError) -> Self {
        unisql_core::Error::connection(format!("protocol error: {err}"))
    }
}

/// Incremental reader for backend messages.
///
/// Bytes read from the socket are fed in; complete frames come out.
#[derive(Debug, Clone)]
pub struct MessageReader {
    buf: Vec<u8>,
    max_message_size: usize,
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageReader {
    pub fn new() -> Self {
        Self::with_max_size(64 * 1024 * 1024)
    }

    pub fn with_max_size(max_message_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_message_size,
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Append bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Parse the next complete message, `None` if more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<BackendMessage>, ProtocolError> {
        if self.buf.len() < 5 {
            return Ok(None);
        }

        let length = i32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
        if length < 4 {
            return Err(ProtocolError::InvalidLength { length });
        }

        let total_len = length as usize + 1;
        if total_len > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                length: total_len,
                max: self.max_message_size,
            });
        }

        if self.buf.len() < total_len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..total_len).collect();
        Self::parse_message(&frame).map(Some)
    }

    /// Parse a single full frame (type + length + payload).
    pub fn parse_message(frame: &[u8]) -> Result<BackendMessage, ProtocolError> {
        if frame.len() < 5 {
            return Err(ProtocolError::UnexpectedEof);
        }

        let ty = frame[0];
        let length = i32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        if length < 4 {
            return Err(ProtocolError::InvalidLength { length });
        }
        let total_len = length as usize + 1;
        let payload = frame.get(5..total_len).ok_or(ProtocolError::UnexpectedEof)?;
        let mut cur = Cursor::new(payload);

        match ty {
            backend_type::AUTHENTICATION => parse_authentication(&mut cur),
            backend_type::BACKEND_KEY_DATA => Ok(BackendMessage::BackendKeyData {
                process_id: cur.read_i32()?,
                secret_key: cur.read_i32()?,
            }),
            backend_type::PARAMETER_STATUS => Ok(BackendMessage::ParameterStatus {
                name: cur.read_cstring()?,
                value: cur.read_cstring()?,
            }),
            backend_type::READY_FOR_QUERY => {
                let status = TransactionStatus::from_byte(cur.read_u8()?)
                    .ok_or(ProtocolError::InvalidField("invalid transaction status"))?;
                Ok(BackendMessage::ReadyForQuery(status))
            }
            backend_type::ROW_DESCRIPTION => parse_row_description(&mut cur),
            backend_type::DATA_ROW => parse_data_row(&mut cur),
            backend_type::COMMAND_COMPLETE => {
                Ok(BackendMessage::CommandComplete(cur.read_cstring()?))
            }
            backend_type::EMPTY_QUERY => Ok(BackendMessage::EmptyQueryResponse),
            backend_type::PARSE_COMPLETE => Ok(BackendMessage::ParseComplete),
            backend_type::BIND_COMPLETE => Ok(BackendMessage::BindComplete),
            backend_type::CLOSE_COMPLETE => Ok(BackendMessage::CloseComplete),
            backend_type::PARAMETER_DESCRIPTION => {
                let count = cur.read_i16()?;
                let oids = (0..count)
                    .map(|_| cur.read_u32())
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(BackendMessage::ParameterDescription(oids))
            }
            backend_type::NO_DATA => Ok(BackendMessage::NoData),
            backend_type::PORTAL_SUSPENDED => Ok(BackendMessage::PortalSuspended),
            backend_type::ERROR_RESPONSE => {
                Ok(BackendMessage::ErrorResponse(parse_error_fields(&mut cur)?))
            }
            backend_type::NOTICE_RESPONSE => {
                Ok(BackendMessage::NoticeResponse(parse_error_fields(&mut cur)?))
            }
            backend_type::NOTIFICATION_RESPONSE => Ok(BackendMessage::NotificationResponse {
                process_id: cur.read_i32()?,
                channel: cur.read_cstring()?,
                payload: cur.read_cstring()?,
            }),
            backend_type::NEGOTIATE_PROTOCOL_VERSION => {
                let newest_minor = cur.read_i32()?;
                let count = cur.read_i32()?;
                let unrecognized = (0..count.max(0))
                    .map(|_| cur.read_cstring())
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(BackendMessage::NegotiateProtocolVersion {
                    newest_minor,
                    unrecognized,
                })
            }
            _ => Err(ProtocolError::UnknownMessageType(ty)),
        }
    }
}

fn parse_authentication(cur: &mut Cursor<'_>) -> Result<BackendMessage, ProtocolError> {
    match cur.read_i32()? {
        auth_type::OK => Ok(BackendMessage::AuthenticationOk),
        auth_type::CLEARTEXT_PASSWORD => Ok(BackendMessage::AuthenticationCleartextPassword),
        auth_type::MD5_PASSWORD => {
            let mut salt = [0_u8; 4];
            salt.copy_from_slice(cur.read_bytes(4)?);
            Ok(BackendMessage::AuthenticationMD5Password(salt))
        }
        auth_type::SASL => {
            let mut mechanisms = Vec::new();
            loop {
                let mech = cur.read_cstring()?;
                if mech.is_empty() {
                    break;
                }
                mechanisms.push(mech);
            }
            Ok(BackendMessage::AuthenticationSASL(mechanisms))
        }
        auth_type::SASL_CONTINUE => Ok(BackendMessage::AuthenticationSASLContinue(
            cur.take_remaining(),
        )),
        auth_type::SASL_FINAL => Ok(BackendMessage::AuthenticationSASLFinal(
            cur.take_remaining(),
        )),
        _ => Err(ProtocolError::InvalidField("unsupported authentication method")),
    }
}

fn parse_row_description(cur: &mut Cursor<'_>) -> Result<BackendMessage, ProtocolError> {
    let count = cur.read_i16()?;
    let mut fields = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        fields.push(FieldDescription {
            name: cur.read_cstring()?,
            table_oid: cur.read_u32()?,
            column_id: cur.read_i16()?,
            type_oid: cur.read_u32()?,
            type_size: cur.read_i16()?,
            type_modifier: cur.read_i32()?,
            format: cur.read_i16()?,
        });
    }
    Ok(BackendMessage::RowDescription(fields))
}

fn parse_data_row(cur: &mut Cursor<'_>) -> Result<BackendMessage, ProtocolError> {
    let count = cur.read_i16()?;
    let mut values = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let len = cur.read_i32()?;
        if len == -1 {
            values.push(None);
            continue;
        }
        if len < 0 {
            return Err(ProtocolError::InvalidField("negative data length"));
        }
        values.push(Some(cur.read_bytes(len as usize)?.to_vec()));
    }
    Ok(BackendMessage::DataRow(values))
}

fn parse_error_fields(cur: &mut Cursor<'_>) -> Result<ErrorFields, ProtocolError> {
    let mut fields = ErrorFields::default();
    loop {
        let code = cur.read_u8()?;
        if code == 0 {
            break;
        }
        let value = cur.read_cstring()?;
        match code {
            // 'V' is the non-localized severity and follows 'S' when present
            b'S' | b'V' => fields.severity = value,
            b'C' => fields.code = value,
            b'M' => fields.message = value,
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            b'P' => fields.position = value.parse().ok(),
            b'n' => fields.constraint = Some(value),
            _ => {}
        }
    }
    Ok(fields)
}

#[derive(Debug)]
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        let bytes = self.read_bytes(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos.checked_add(n).ok_or(ProtocolError::UnexpectedEof)?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(ProtocolError::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_cstring(&mut self) -> Result<String, ProtocolError> {
        let rest = self.buf.get(self.pos..).unwrap_or_default();
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::UnexpectedEof)?;
        let bytes = rest[..nul].to_vec();
        self.pos += nul + 1;
        Ok(String::from_utf8(bytes)?)
    }

    fn take_remaining(&mut self) -> Vec<u8> {
        let remaining = self.buf.get(self.pos..).unwrap_or_default().to_vec();
        self.pos = self.buf.len();
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn build_message(ty: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![ty];
        buf.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_parse_auth_md5() {
        let mut payload = auth_type::MD5_PASSWORD.to_be_bytes().to_vec();
        payload.extend_from_slice(b"salt");
        let msg = build_message(backend_type::AUTHENTICATION, &payload);
        assert_eq!(
            MessageReader::parse_message(&msg).unwrap(),
            BackendMessage::AuthenticationMD5Password(*b"salt")
        );
    }

    #[test]
    fn test_parse_sasl_mechanisms() {
        let mut payload = auth_type::SASL.to_be_bytes().to_vec();
        payload.extend_from_slice(b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        let msg = build_message(backend_type::AUTHENTICATION, &payload);
        match MessageReader::parse_message(&msg).unwrap() {
            BackendMessage::AuthenticationSASL(mechs) => {
                assert_eq!(mechs, vec!["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let payload = b"SERROR\0C42P01\0Mrelation \"nope\" does not exist\0P15\0\0";
        let msg = build_message(backend_type::ERROR_RESPONSE, payload);
        match MessageReader::parse_message(&msg).unwrap() {
            BackendMessage::ErrorResponse(fields) => {
                assert_eq!(fields.severity, "ERROR");
                assert_eq!(fields.code, "42P01");
                assert_eq!(fields.position, Some(15));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_data_row_with_null() {
        let mut payload = 2_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&3_i32.to_be_bytes());
        payload.extend_from_slice(b"foo");
        payload.extend_from_slice(&(-1_i32).to_be_bytes());

        let msg = build_message(backend_type::DATA_ROW, &payload);
        match MessageReader::parse_message(&msg).unwrap() {
            BackendMessage::DataRow(values) => {
                assert_eq!(values, vec![Some(b"foo".to_vec()), None]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_row_is_error() {
        let mut payload = 1_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&10_i32.to_be_bytes());
        payload.extend_from_slice(b"abc");
        let msg = build_message(backend_type::DATA_ROW, &payload);
        assert!(matches!(
            MessageReader::parse_message(&msg),
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_reader_buffers_partial_frames() {
        let msg = build_message(backend_type::READY_FOR_QUERY, b"T");
        let (left, right) = msg.split_at(3);

        let mut reader = MessageReader::new();
        reader.feed(left);
        assert!(reader.next_message().unwrap().is_none());
        reader.feed(right);
        assert_eq!(
            reader.next_message().unwrap(),
            Some(BackendMessage::ReadyForQuery(TransactionStatus::Transaction))
        );
        assert_eq!(reader.buffered_len(), 0);
    }

    #[test]
    fn test_unknown_type() {
        let msg = build_message(b'?', b"");
        assert!(matches!(
            MessageReader::parse_message(&msg),
            Err(ProtocolError::UnknownMessageType(b'?'))
        ));
    }
}
