//! Frontend message encoder.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use super::messages::{DescribeKind, FrontendMessage, SSL_REQUEST_CODE, frontend_type};

/// Buffer for writing PostgreSQL protocol messages.
///
/// All multi-byte integers are written in big-endian (network) byte order.
/// Messages are appended, so an extended-protocol batch
/// (Parse/Bind/Describe/Execute/Sync) goes out in one write.
#[derive(Debug, Clone)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl Default for MessageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Take ownership of the buffer, leaving an empty one in its place.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Append one encoded message to the buffer.
    pub fn push(&mut self, msg: &FrontendMessage) {
        match msg {
            FrontendMessage::Startup { version, params } => self.write_startup(*version, params),
            FrontendMessage::PasswordMessage(password) => {
                self.write_string_message(frontend_type::PASSWORD, password);
            }
            FrontendMessage::SASLInitialResponse { mechanism, data } => {
                self.write_sasl_initial(mechanism, data);
            }
            FrontendMessage::SASLResponse(data) => {
                self.begin(frontend_type::PASSWORD, data.len());
                self.buf.extend_from_slice(data);
            }
            FrontendMessage::Query(query) => {
                self.write_string_message(frontend_type::QUERY, query);
            }
            FrontendMessage::Parse {
                name,
                query,
                param_types,
            } => self.write_parse(name, query, param_types),
            FrontendMessage::Bind {
                portal,
                statement,
                param_formats,
                params,
                result_formats,
            } => self.write_bind(portal, statement, param_formats, params, result_formats),
            FrontendMessage::Describe { kind, name } => self.write_describe(*kind, name),
            FrontendMessage::Execute { portal, max_rows } => {
                self.begin(frontend_type::EXECUTE, portal.len() + 1 + 4);
                self.write_cstring(portal);
                self.buf.extend_from_slice(&max_rows.to_be_bytes());
            }
            FrontendMessage::Sync => self.begin(frontend_type::SYNC, 0),
            FrontendMessage::Terminate => self.begin(frontend_type::TERMINATE, 0),
            FrontendMessage::SSLRequest => {
                self.buf.extend_from_slice(&8_i32.to_be_bytes());
                self.buf.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
            }
        }
    }

    /// Encode a single message, replacing the buffer contents.
    pub fn write(&mut self, msg: &FrontendMessage) -> &[u8] {
        self.buf.clear();
        self.push(msg);
        &self.buf
    }

    /// Type byte plus length for a body of `body_len` bytes.
    fn begin(&mut self, type_byte: u8, body_len: usize) {
        self.buf.push(type_byte);
        self.buf
            .extend_from_slice(&((body_len + 4) as i32).to_be_bytes());
    }

    fn write_cstring(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    fn write_startup(&mut self, version: i32, params: &[(String, String)]) {
        let body_len = 4 + params
            .iter()
            .map(|(k, v)| k.len() + 1 + v.len() + 1)
            .sum::<usize>()
            + 1;
        self.buf
            .extend_from_slice(&((body_len + 4) as i32).to_be_bytes());
        self.buf.extend_from_slice(&version.to_be_bytes());
        for (key, value) in params {
            self.write_cstring(key);
            self.write_cstring(value);
        }
        self.buf.push(0);
    }

    fn write_sasl_initial(&mut self, mechanism: &str, data: &[u8]) {
        self.begin(frontend_type::PASSWORD, mechanism.len() + 1 + 4 + data.len());
        self.write_cstring(mechanism);
        if data.is_empty() {
            self.buf.extend_from_slice(&(-1_i32).to_be_bytes());
        } else {
            self.buf
                .extend_from_slice(&(data.len() as i32).to_be_bytes());
            self.buf.extend_from_slice(data);
        }
    }

    fn write_parse(&mut self, name: &str, query: &str, param_types: &[u32]) {
        let body_len = name.len() + 1 + query.len() + 1 + 2 + param_types.len() * 4;
        self.begin(frontend_type::PARSE, body_len);
        self.write_cstring(name);
        self.write_cstring(query);
        self.buf
            .extend_from_slice(&(param_types.len() as i16).to_be_bytes());
        for &oid in param_types {
            self.buf.extend_from_slice(&oid.to_be_bytes());
        }
    }

    fn write_bind(
        &mut self,
        portal: &str,
        statement: &str,
        param_formats: &[i16],
        params: &[Option<Vec<u8>>],
        result_formats: &[i16],
    ) {
        let values_len: usize = params
            .iter()
            .map(|p| 4 + p.as_ref().map_or(0, Vec::len))
            .sum();
        let body_len = portal.len()
            + 1
            + statement.len()
            + 1
            + 2
            + param_formats.len() * 2
            + 2
            + values_len
            + 2
            + result_formats.len() * 2;
        self.begin(frontend_type::BIND, body_len);

        self.write_cstring(portal);
        self.write_cstring(statement);

        self.buf
            .extend_from_slice(&(param_formats.len() as i16).to_be_bytes());
        for &fmt in param_formats {
            self.buf.extend_from_slice(&fmt.to_be_bytes());
        }

        self.buf
            .extend_from_slice(&(params.len() as i16).to_be_bytes());
        for param in params {
            match param {
                Some(data) => {
                    self.buf
                        .extend_from_slice(&(data.len() as i32).to_be_bytes());
                    self.buf.extend_from_slice(data);
                }
                // NULL
                None => self.buf.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }

        self.buf
            .extend_from_slice(&(result_formats.len() as i16).to_be_bytes());
        for &fmt in result_formats {
            self.buf.extend_from_slice(&fmt.to_be_bytes());
        }
    }

    fn write_describe(&mut self, kind: DescribeKind, name: &str) {
        self.begin(frontend_type::DESCRIBE, 1 + name.len() + 1);
        self.buf.push(kind.as_byte());
        self.write_cstring(name);
    }

    fn write_string_message(&mut self, type_byte: u8, s: &str) {
        self.begin(type_byte, s.len() + 1);
        self.write_cstring(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PROTOCOL_VERSION;

    fn declared_len(data: &[u8]) -> usize {
        i32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize
    }

    #[test]
    fn test_startup_message() {
        let mut writer = MessageWriter::new();
        let data = writer.write(&FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params: vec![
                ("user".to_string(), "postgres".to_string()),
                ("database".to_string(), "test".to_string()),
            ],
        });

        let len = i32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        assert_eq!(len, data.len());
        let version = i32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        assert_eq!(version, PROTOCOL_VERSION);
        assert!(data.ends_with(b"test\0\0"));
    }

    #[test]
    fn test_query_message() {
        let mut writer = MessageWriter::new();
        let data = writer.write(&FrontendMessage::Query("SELECT 1".to_string()));
        assert_eq!(data[0], b'Q');
        assert_eq!(declared_len(data), 4 + 8 + 1);
        assert_eq!(data.last(), Some(&0));
    }

    #[test]
    fn test_empty_messages() {
        let mut writer = MessageWriter::new();
        assert_eq!(writer.write(&FrontendMessage::Sync), &[b'S', 0, 0, 0, 4]);
        assert_eq!(writer.write(&FrontendMessage::Terminate), &[b'X', 0, 0, 0, 4]);
    }

    #[test]
    fn test_bind_length_and_null() {
        let mut writer = MessageWriter::new();
        let data = writer.write(&FrontendMessage::Bind {
            portal: String::new(),
            statement: String::new(),
            param_formats: vec![],
            params: vec![Some(b"42".to_vec()), None],
            result_formats: vec![],
        });
        assert_eq!(data[0], b'B');
        assert_eq!(declared_len(data) + 1, data.len());
        let null_indicator = (-1_i32).to_be_bytes();
        assert!(data.windows(4).any(|w| w == null_indicator));
    }

    #[test]
    fn test_pipeline_appends() {
        let mut writer = MessageWriter::new();
        writer.push(&FrontendMessage::Parse {
            name: String::new(),
            query: "SELECT $1".to_string(),
            param_types: vec![0],
        });
        let parse_len = writer.as_bytes().len();
        assert_eq!(declared_len(writer.as_bytes()) + 1, parse_len);

        writer.push(&FrontendMessage::Describe {
            kind: DescribeKind::Portal,
            name: String::new(),
        });
        writer.push(&FrontendMessage::Sync);
        let data = writer.take();
        assert_eq!(data[parse_len], b'D');
        assert_eq!(data[parse_len + 5], b'P');
        assert!(data.ends_with(&[b'S', 0, 0, 0, 4]));
        assert!(writer.as_bytes().is_empty());
    }

    #[test]
    fn test_ssl_request() {
        let mut writer = MessageWriter::new();
        let data = writer.write(&FrontendMessage::SSLRequest);
        assert_eq!(&data[..4], &8_i32.to_be_bytes());
        assert_eq!(&data[4..], &SSL_REQUEST_CODE.to_be_bytes());
    }

    #[test]
    fn test_sasl_initial_response() {
        let mut writer = MessageWriter::new();
        let data = writer.write(&FrontendMessage::SASLInitialResponse {
            mechanism: "SCRAM-SHA-256".to_string(),
            data: b"n,,n=,r=abc".to_vec(),
        });
        assert_eq!(data[0], b'p');
        assert_eq!(declared_len(data) + 1, data.len());
        assert!(data.ends_with(b"r=abc"));
    }
}
