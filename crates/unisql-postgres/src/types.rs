//! Text-format cell decoding.
//!
//! Every column is requested in text format, so most cells are already the
//! string the row API wants. `bytea` arrives hex-escaped and is decoded back
//! to its bytes before being stored as lossy UTF-8 like other backends do.

/// Type OIDs the driver treats specially.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const OID: u32 = 26;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const VARCHAR: u32 = 1043;
    pub const NUMERIC: u32 = 1700;
}

/// Whether a column of this type carries an integer value.
pub const fn is_integer(type_oid: u32) -> bool {
    matches!(type_oid, oid::INT2 | oid::INT4 | oid::INT8 | oid::OID)
}

/// Decode one text-format cell of type `type_oid`.
pub fn decode_text_cell(type_oid: u32, raw: &[u8]) -> String {
    if type_oid == oid::BYTEA {
        if let Some(bytes) = raw.strip_prefix(b"\\x").and_then(decode_hex) {
            return String::from_utf8_lossy(&bytes).into_owned();
        }
    }
    String::from_utf8_lossy(raw).into_owned()
}

fn decode_hex(hex: &[u8]) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.chunks_exact(2)
        .map(|pair| Some((hex_digit(pair[0])? << 4) | hex_digit(pair[1])?))
        .collect()
}

const fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bytea() {
        assert_eq!(decode_text_cell(oid::BYTEA, b"\\x68656c6c6f"), "hello");
        // Malformed hex is passed through
        assert_eq!(decode_text_cell(oid::BYTEA, b"\\x6"), "\\x6");
    }

    #[test]
    fn test_decode_plain_text() {
        assert_eq!(decode_text_cell(oid::TEXT, b"\\x41"), "\\x41");
        assert_eq!(decode_text_cell(oid::INT4, b"42"), "42");
        assert_eq!(decode_text_cell(oid::BOOL, b"t"), "t");
    }

    #[test]
    fn test_is_integer() {
        assert!(is_integer(oid::INT8));
        assert!(!is_integer(oid::NUMERIC));
        assert!(!is_integer(oid::VARCHAR));
    }
}
