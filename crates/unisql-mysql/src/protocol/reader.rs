//! Cursor over one packet payload.
//!
//! The cursor is the unread tail of the payload; every read splits bytes
//! off its front. Reads return `None` when the tail is too short and leave
//! the cursor unchanged in that case.

/// First byte of a NULL cell in a text row.
pub const NULL_CELL: u8 = 0xFB;

#[derive(Debug, Clone, Copy)]
pub struct PacketReader<'a> {
    tail: &'a [u8],
}

impl<'a> PacketReader<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { tail: payload }
    }

    pub fn remaining(&self) -> usize {
        self.tail.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.tail.first().copied()
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if len > self.tail.len() {
            return None;
        }
        let (head, rest) = self.tail.split_at(len);
        self.tail = rest;
        Some(head)
    }

    /// Drop `n` bytes; false (and nothing consumed) if fewer remain.
    pub fn skip(&mut self, n: usize) -> bool {
        self.read_bytes(n).is_some()
    }

    /// Everything not yet read.
    pub fn read_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.tail)
    }

    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    /// Little-endian unsigned integer `width` bytes wide (at most 8).
    fn read_le(&mut self, width: usize) -> Option<u64> {
        let bytes = self.read_bytes(width)?;
        Some(
            bytes
                .iter()
                .rev()
                .fold(0, |acc, byte| (acc << 8) | u64::from(*byte)),
        )
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let (&first, rest) = self.tail.split_first()?;
        self.tail = rest;
        Some(first)
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.read_le(2).and_then(|v| u16::try_from(v).ok())
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.read_le(4).and_then(|v| u32::try_from(v).ok())
    }

    /// Length-encoded integer: one byte below 0xFB, otherwise a 0xFC /
    /// 0xFD / 0xFE prefix followed by 2, 3 or 8 bytes. The NULL marker and
    /// 0xFF yield `None`.
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        let mut ahead = *self;
        let value = match ahead.read_u8()? {
            small @ 0x00..=0xFA => u64::from(small),
            0xFC => ahead.read_le(2)?,
            0xFD => ahead.read_le(3)?,
            0xFE => ahead.read_le(8)?,
            _ => return None,
        };
        *self = ahead;
        Some(value)
    }

    pub fn read_lenenc_bytes(&mut self) -> Option<&'a [u8]> {
        let mut ahead = *self;
        let len = usize::try_from(ahead.read_lenenc_int()?).ok()?;
        let bytes = ahead.read_bytes(len)?;
        *self = ahead;
        Some(bytes)
    }

    pub fn read_lenenc_string(&mut self) -> Option<String> {
        self.read_lenenc_bytes()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// One text-row cell; `Some(None)` is SQL NULL, `None` a short packet.
    pub fn read_text_cell(&mut self) -> Option<Option<&'a [u8]>> {
        if self.peek() == Some(NULL_CELL) {
            self.tail = &self.tail[1..];
            return Some(None);
        }
        self.read_lenenc_bytes().map(Some)
    }

    /// Bytes up to the next NUL, which is consumed. An unterminated string
    /// runs to the end of the payload.
    pub fn read_null_string(&mut self) -> String {
        let end = self
            .tail
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.tail.len());
        let text = String::from_utf8_lossy(&self.tail[..end]).into_owned();
        self.tail = self.tail.get(end + 1..).unwrap_or_default();
        text
    }
}
