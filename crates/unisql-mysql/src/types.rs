//! MySQL column metadata and cell decoding.
//!
//! Result cells are handed to callers as text, whichever protocol carried
//! them. The text protocol already sends strings; binary protocol rows are
//! rendered into the same textual form the server would have produced for
//! `COM_QUERY`, so a row reads the same with or without bound parameters.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::PacketReader;

/// MySQL field type codes (`MYSQL_TYPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            // Unknown types are read as length-encoded strings
            _ => FieldType::String,
        }
    }

    /// Size of a binary protocol value with a fixed width.
    const fn fixed_width(self) -> Option<usize> {
        match self {
            FieldType::Tiny => Some(1),
            FieldType::Short | FieldType::Year => Some(2),
            FieldType::Long | FieldType::Int24 | FieldType::Float => Some(4),
            FieldType::LongLong | FieldType::Double => Some(8),
            FieldType::Null => Some(0),
            _ => None,
        }
    }

    const fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::Time
                | FieldType::DateTime
                | FieldType::Timestamp
                | FieldType::NewDate
                | FieldType::Timestamp2
                | FieldType::DateTime2
                | FieldType::Time2
        )
    }
}

/// Column flags in result set metadata.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const BINARY: u16 = 128;
    pub const AUTO_INCREMENT: u16 = 512;
}

/// Column definition from a result set or prepare response.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Column name (or alias)
    pub name: String,
    /// Table name (or alias)
    pub table: String,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    /// Parse a `ColumnDefinition41` packet. `None` if truncated.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut reader = PacketReader::new(data);
        let _catalog = reader.read_lenenc_bytes()?;
        let _schema = reader.read_lenenc_bytes()?;
        let table = reader.read_lenenc_string()?;
        let _org_table = reader.read_lenenc_bytes()?;
        let name = reader.read_lenenc_string()?;
        let _org_name = reader.read_lenenc_bytes()?;
        // Length of fixed fields (always 0x0c)
        reader.read_lenenc_int()?;
        let _charset = reader.read_u16_le()?;
        let _column_length = reader.read_u32_le()?;
        let column_type = FieldType::from_u8(reader.read_u8()?);
        let flags = reader.read_u16_le()?;
        let decimals = reader.read_u8()?;
        Some(Self {
            name,
            table,
            column_type,
            flags,
            decimals,
        })
    }

    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }
}

/// Decode a text protocol cell.
///
/// Non-UTF-8 bytes (binary columns) are replaced lossily.
pub fn decode_text_cell(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

/// Decode one binary protocol value starting at `data[0]`.
///
/// Returns the textual cell and the number of bytes consumed, or `None`
/// when the buffer is too short for the declared type.
pub fn decode_binary_cell(column: &ColumnDef, data: &[u8]) -> Option<(String, usize)> {
    let field_type = column.column_type;
    let unsigned = column.is_unsigned();

    if let Some(width) = field_type.fixed_width() {
        let bytes = data.get(..width)?;
        let text = match field_type {
            FieldType::Tiny if unsigned => bytes[0].to_string(),
            FieldType::Tiny => (bytes[0] as i8).to_string(),
            FieldType::Short | FieldType::Year => {
                let v = u16::from_le_bytes([bytes[0], bytes[1]]);
                if unsigned || field_type == FieldType::Year {
                    v.to_string()
                } else {
                    (v as i16).to_string()
                }
            }
            FieldType::Long | FieldType::Int24 => {
                let v = u32::from_le_bytes(bytes.try_into().ok()?);
                if unsigned {
                    v.to_string()
                } else {
                    (v as i32).to_string()
                }
            }
            FieldType::LongLong => {
                let v = u64::from_le_bytes(bytes.try_into().ok()?);
                if unsigned {
                    v.to_string()
                } else {
                    (v as i64).to_string()
                }
            }
            FieldType::Float => f32::from_le_bytes(bytes.try_into().ok()?).to_string(),
            FieldType::Double => f64::from_le_bytes(bytes.try_into().ok()?).to_string(),
            _ => String::new(),
        };
        return Some((text, width));
    }

    if field_type.is_temporal() {
        let len = usize::from(*data.first()?);
        let body = data.get(1..=len)?;
        return Some((decode_binary_temporal(field_type, body), len + 1));
    }

    let mut reader = PacketReader::new(data);
    let bytes = reader.read_lenenc_bytes()?;
    let consumed = data.len() - reader.remaining();
    Some((decode_text_cell(bytes), consumed))
}

/// Render binary DATE/TIME/DATETIME bodies the way the text protocol does.
fn decode_binary_temporal(field_type: FieldType, data: &[u8]) -> String {
    match field_type {
        FieldType::Time | FieldType::Time2 => {
            if data.len() < 8 {
                return "00:00:00".to_string();
            }
            let sign = if data[0] != 0 { "-" } else { "" };
            let days = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
            let hours = days * 24 + u32::from(data[5]);
            let mut out = format!("{sign}{hours:02}:{:02}:{:02}", data[6], data[7]);
            if data.len() >= 12 {
                let micros = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
                out.push_str(&format!(".{micros:06}"));
            }
            out
        }
        _ => {
            if data.len() < 4 {
                return if matches!(field_type, FieldType::Date | FieldType::NewDate) {
                    "0000-00-00".to_string()
                } else {
                    "0000-00-00 00:00:00".to_string()
                };
            }
            let year = u16::from_le_bytes([data[0], data[1]]);
            let date = format!("{year:04}-{:02}-{:02}", data[2], data[3]);
            if matches!(field_type, FieldType::Date | FieldType::NewDate) {
                return date;
            }
            let (h, m, s) = if data.len() >= 7 {
                (data[4], data[5], data[6])
            } else {
                (0, 0, 0)
            };
            let mut out = format!("{date} {h:02}:{m:02}:{s:02}");
            if data.len() >= 11 {
                let micros = u32::from_le_bytes([data[7], data[8], data[9], data[10]]);
                out.push_str(&format!(".{micros:06}"));
            }
            out
        }
    }
}
