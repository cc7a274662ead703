//! MySQL prepared statement (binary protocol) messages.
//!
//! Bound parameters travel through `COM_STMT_PREPARE`, `COM_STMT_EXECUTE`
//! and `COM_STMT_CLOSE`:
//!
//! 1. **Prepare**: server answers with a statement id, the parameter count
//!    and the column count, followed by parameter and column definitions.
//! 2. **Execute**: statement id plus NULL bitmap, parameter types and
//!    binary-encoded values. Server answers with an OK packet or a binary
//!    result set.
//! 3. **Close**: no server response.
//!
//! Builders here return bare payloads; the connection frames them.

use super::{Command, PacketWriter};
use crate::types::{ColumnDef, FieldType, decode_binary_cell};
use unisql_core::Value;

/// Response from COM_STMT_PREPARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    /// Unique statement identifier (used in execute/close)
    pub statement_id: u32,
    /// Number of columns in result set (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of `?` placeholders in the SQL
    pub num_params: u16,
    pub warnings: u16,
}

pub fn build_stmt_prepare_packet(sql: &str) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(1 + sql.len());
    writer.write_u8(Command::StmtPrepare as u8);
    writer.write_bytes(sql.as_bytes());
    writer.into_bytes()
}

/// Build a COM_STMT_EXECUTE payload.
///
/// Layout:
/// - Command byte (0x17)
/// - Statement ID (4 bytes, little-endian)
/// - Flags (1 byte): 0x00 = no cursor
/// - Iteration count (4 bytes, always 1)
/// - NULL bitmap, new-params-bound flag, types and values (if any params)
pub fn build_stmt_execute_packet(statement_id: u32, params: &[Value]) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(16 + params.len() * 16);

    writer.write_u8(Command::StmtExecute as u8);
    writer.write_u32_le(statement_id);
    writer.write_u8(0x00);
    writer.write_u32_le(1);

    if params.is_empty() {
        return writer.into_bytes();
    }

    let mut null_bitmap = vec![0u8; params.len().div_ceil(8)];
    for (i, param) in params.iter().enumerate() {
        if param.is_null() {
            null_bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    writer.write_bytes(&null_bitmap);

    // Types are sent with every execute
    writer.write_u8(1);
    for param in params {
        writer.write_u8(field_type_of(param) as u8);
        writer.write_u8(0x00);
    }

    for param in params {
        encode_binary_param(&mut writer, param);
    }

    writer.into_bytes()
}

/// Build a COM_STMT_CLOSE payload. The server does not reply.
pub fn build_stmt_close_packet(statement_id: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(5);
    writer.write_u8(Command::StmtClose as u8);
    writer.write_u32_le(statement_id);
    writer.into_bytes()
}

/// Parse a COM_STMT_PREPARE_OK response.
///
/// - Status: 0x00 (1 byte)
/// - Statement ID (4 bytes)
/// - Number of columns (2 bytes)
/// - Number of parameters (2 bytes)
/// - Reserved: 0x00 (1 byte)
/// - Warning count (2 bytes)
pub fn parse_stmt_prepare_ok(data: &[u8]) -> Option<StmtPrepareOk> {
    if data.len() < 12 || data[0] != 0x00 {
        return None;
    }

    Some(StmtPrepareOk {
        statement_id: u32::from_le_bytes([data[1], data[2], data[3], data[4]]),
        num_columns: u16::from_le_bytes([data[5], data[6]]),
        num_params: u16::from_le_bytes([data[7], data[8]]),
        warnings: u16::from_le_bytes([data[10], data[11]]),
    })
}

/// Decode a binary protocol row into text cells.
///
/// Layout: 0x00 header, NULL bitmap with a two-bit offset, then the
/// non-NULL values back to back. `None` if the packet is truncated.
pub fn parse_binary_row(data: &[u8], columns: &[ColumnDef]) -> Option<Vec<Option<String>>> {
    if data.first() != Some(&0x00) {
        return None;
    }
    let bitmap_len = (columns.len() + 7 + 2) / 8;
    let bitmap = data.get(1..1 + bitmap_len)?;
    let mut pos = 1 + bitmap_len;

    let mut cells = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let bit = i + 2;
        if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
            cells.push(None);
            continue;
        }
        let (text, used) = decode_binary_cell(column, data.get(pos..)?)?;
        pos += used;
        cells.push(Some(text));
    }
    Some(cells)
}

fn field_type_of(value: &Value) -> FieldType {
    match value {
        Value::Null => FieldType::Null,
        Value::Bool(_) => FieldType::Tiny,
        Value::Int(_) => FieldType::LongLong,
        Value::Float(_) => FieldType::Double,
        Value::Text(_) => FieldType::VarString,
        Value::Bytes(_) => FieldType::Blob,
    }
}

fn encode_binary_param(writer: &mut PacketWriter, value: &Value) {
    match value {
        // carried by the NULL bitmap
        Value::Null => {}
        Value::Bool(b) => writer.write_u8(u8::from(*b)),
        Value::Int(i) => writer.write_bytes(&i.to_le_bytes()),
        Value::Float(f) => writer.write_bytes(&f.to_le_bytes()),
        Value::Text(s) => writer.write_lenenc_string(s),
        Value::Bytes(b) => writer.write_lenenc_bytes(b),
    }
}
