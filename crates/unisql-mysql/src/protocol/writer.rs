//! Outgoing payload builder and packet framing.

use crate::protocol::{MAX_PACKET_SIZE, PacketHeader};

/// Growable payload for one client message.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_capacity(128)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_zeros(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, 0);
    }

    pub fn write_null_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_u8(0);
    }

    /// Length-encoded integer, the inverse of
    /// [`PacketReader::read_lenenc_int`](super::PacketReader::read_lenenc_int).
    pub fn write_lenenc_int(&mut self, value: u64) {
        let le = value.to_le_bytes();
        match value {
            0..=0xFA => self.buf.push(le[0]),
            0xFB..=0xFFFF => {
                self.buf.push(0xFC);
                self.buf.extend_from_slice(&le[..2]);
            }
            0x1_0000..=0xFF_FFFF => {
                self.buf.push(0xFD);
                self.buf.extend_from_slice(&le[..3]);
            }
            _ => {
                self.buf.push(0xFE);
                self.buf.extend_from_slice(&le);
            }
        }
    }

    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.write_bytes(data);
    }

    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }
}

/// Frame `payload` for the wire starting at sequence id `seq`.
///
/// Payloads of `MAX_PACKET_SIZE` bytes or more are split; a payload that
/// ends exactly on a chunk boundary gets an empty trailing packet. Returns
/// the bytes to send and the next sequence id.
pub fn frame_packets(payload: &[u8], mut seq: u8) -> (Vec<u8>, u8) {
    let mut out = Vec::with_capacity(payload.len() + PacketHeader::SIZE);
    let mut push = |chunk: &[u8], seq: u8| {
        let header = PacketHeader {
            payload_length: u32::try_from(chunk.len()).unwrap_or(u32::MAX),
            sequence_id: seq,
        };
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(chunk);
    };

    for chunk in payload.chunks(MAX_PACKET_SIZE) {
        push(chunk, seq);
        seq = seq.wrapping_add(1);
    }
    if payload.len() % MAX_PACKET_SIZE == 0 {
        push(&[], seq);
        seq = seq.wrapping_add(1);
    }
    (out, seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketReader;

    fn lenenc(value: u64) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_lenenc_int(value);
        writer.into_bytes()
    }

    #[test]
    fn test_lenenc_boundaries() {
        assert_eq!(lenenc(0xFA), [0xFA]);
        assert_eq!(lenenc(0xFB), [0xFC, 0xFB, 0x00]);
        assert_eq!(lenenc(0xFFFF), [0xFC, 0xFF, 0xFF]);
        assert_eq!(lenenc(0x1_0000), [0xFD, 0x00, 0x00, 0x01]);
        assert_eq!(
            lenenc(0x100_0000),
            [0xFE, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]
        );
        for value in [0, 250, 251, 65_535, 65_536, 16_777_215, 16_777_216, u64::MAX] {
            assert_eq!(PacketReader::new(&lenenc(value)).read_lenenc_int(), Some(value));
        }
    }

    #[test]
    fn test_handshake_style_payload() {
        let mut writer = PacketWriter::new();
        writer.write_u32_le(0x0001_0200);
        writer.write_u8(45);
        writer.write_zeros(3);
        writer.write_null_string("app");
        writer.write_lenenc_string("pw");
        assert_eq!(
            writer.as_bytes(),
            &[0x00, 0x02, 0x01, 0x00, 45, 0, 0, 0, b'a', b'p', b'p', 0, 2, b'p', b'w']
        );
    }

    #[test]
    fn test_frame_small_payload() {
        let (packet, next) = frame_packets(&[0x03, b'S'], 0);
        assert_eq!(packet, [0x02, 0x00, 0x00, 0x00, 0x03, b'S']);
        assert_eq!(next, 1);

        let (packet, next) = frame_packets(&[], 255);
        assert_eq!(packet, [0, 0, 0, 255]);
        assert_eq!(next, 0);
    }

    #[test]
    fn test_frame_split_payloads() {
        let exact = vec![0u8; MAX_PACKET_SIZE];
        let (packet, next) = frame_packets(&exact, 3);
        assert_eq!(packet.len(), MAX_PACKET_SIZE + 8);
        assert_eq!(&packet[..4], &[0xFF, 0xFF, 0xFF, 3]);
        assert_eq!(&packet[packet.len() - 4..], &[0, 0, 0, 4]);
        assert_eq!(next, 5);

        let over = vec![1u8; MAX_PACKET_SIZE + 2];
        let (packet, next) = frame_packets(&over, 0);
        assert_eq!(packet.len(), MAX_PACKET_SIZE + 2 + 8);
        assert_eq!(&packet[MAX_PACKET_SIZE + 4..MAX_PACKET_SIZE + 8], &[2, 0, 0, 1]);
        assert_eq!(next, 2);
    }
}
