//! Outbound packets and their byte encoding
//!
//! A packet is an opcode optionally preceded by a value token. Values
//! `0..=127` travel as a single byte `0x80 | value`; larger values as a
//! length tag (`0x7C..=0x7F` for 1..4 bytes) followed by the value in
//! little-endian order. The device latches the last value it decoded, so a
//! packet whose argument equals that latched value may omit the token.

use super::opcode::Opcode;
use polarprint_core::ProtocolError;

/// Largest value that fits in an inline token
pub const INLINE_VALUE_MAX: u32 = 0x7F;

/// Length tag for a one-byte explicit value; tags for 2..4 bytes follow
pub const VALUE_TAG_BASE: u8 = 0x7C;

/// One outbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxPacket {
    /// Command opcode
    pub opcode: Opcode,
    /// Value token to transmit ahead of the opcode. `None` either because
    /// the opcode takes no argument or because the device already holds it.
    pub value: Option<u32>,
}

impl TxPacket {
    /// Packet without a value token
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            value: None,
        }
    }

    /// Packet carrying an explicit value token
    pub fn with_value(opcode: Opcode, value: u32) -> Self {
        Self {
            opcode,
            value: Some(value),
        }
    }

    /// Number of bytes this packet occupies on the wire
    pub fn encoded_len(&self) -> usize {
        1 + self.value.map_or(0, value_token_len)
    }

    /// Append the wire bytes for this packet
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        if let Some(value) = self.value {
            encode_value(value, out);
        }
        out.push(self.opcode.to_byte());
    }

    /// Wire bytes for this packet
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }
}

/// Bytes needed to carry `value` as a token
pub fn value_token_len(value: u32) -> usize {
    if value <= INLINE_VALUE_MAX {
        1
    } else {
        1 + explicit_len(value)
    }
}

fn explicit_len(value: u32) -> usize {
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

/// Append the token for `value`
pub fn encode_value(value: u32, out: &mut Vec<u8>) {
    if value <= INLINE_VALUE_MAX {
        out.push(0x80 | value as u8);
        return;
    }
    let len = explicit_len(value);
    out.push(VALUE_TAG_BASE + (len as u8 - 1));
    out.extend_from_slice(&value.to_le_bytes()[..len]);
}

/// Encode a packet batch into one contiguous buffer
pub fn encode_packets(packets: &[TxPacket]) -> Vec<u8> {
    let mut out = Vec::with_capacity(packets.iter().map(TxPacket::encoded_len).sum());
    for packet in packets {
        packet.encode_into(&mut out);
    }
    out
}

/// A decoded command with the value register resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedCommand {
    /// Command opcode
    pub opcode: Opcode,
    /// Register contents the opcode consumed, for opcodes that take one
    pub argument: Option<u32>,
}

/// Streaming decoder mirroring the device's parser
///
/// Used to replay logged streams and to check scheduler output.
#[derive(Debug, Default, Clone)]
pub struct PacketDecoder {
    register: u32,
}

impl PacketDecoder {
    /// Create a decoder with a zeroed value register
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a complete byte stream
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Vec<DecodedCommand>, ProtocolError> {
        let mut commands = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let byte = bytes[i];
            if byte & 0x80 != 0 {
                self.register = u32::from(byte & 0x7F);
                i += 1;
                continue;
            }
            if byte >= VALUE_TAG_BASE {
                let len = usize::from(byte - VALUE_TAG_BASE) + 1;
                let body = bytes
                    .get(i + 1..i + 1 + len)
                    .ok_or(ProtocolError::ShortFrame {
                        needed: len,
                        available: bytes.len() - i - 1,
                    })?;
                let mut le = [0u8; 4];
                le[..len].copy_from_slice(body);
                self.register = u32::from_le_bytes(le);
                i += 1 + len;
                continue;
            }
            let opcode = Opcode::from_byte(byte)?;
            commands.push(DecodedCommand {
                opcode,
                argument: opcode.takes_argument().then_some(self.register),
            });
            i += 1;
        }
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MotorId;

    #[test]
    fn test_inline_values() {
        assert_eq!(
            TxPacket::with_value(Opcode::Steps, 0).encode(),
            vec![0x80, 0x09]
        );
        assert_eq!(
            TxPacket::with_value(Opcode::Steps, 127).encode(),
            vec![0xFF, 0x09]
        );
    }

    #[test]
    fn test_explicit_values_are_length_tagged_little_endian() {
        assert_eq!(
            TxPacket::with_value(Opcode::StepRate, 128).encode(),
            vec![0x7C, 0x80, 0x08]
        );
        assert_eq!(
            TxPacket::with_value(Opcode::StepRate, 0x1234).encode(),
            vec![0x7D, 0x34, 0x12, 0x08]
        );
        assert_eq!(
            TxPacket::with_value(Opcode::StepRate, 0x12_3456).encode(),
            vec![0x7E, 0x56, 0x34, 0x12, 0x08]
        );
        assert_eq!(
            TxPacket::with_value(Opcode::StepRate, u32::MAX).encode(),
            vec![0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0x08]
        );
    }

    #[test]
    fn test_encoded_len_matches_bytes() {
        for value in [0, 1, 127, 128, 255, 256, 65_535, 65_536, 1 << 24, u32::MAX] {
            let packet = TxPacket::with_value(Opcode::Steps, value);
            assert_eq!(packet.encoded_len(), packet.encode().len(), "value {value}");
        }
        assert_eq!(TxPacket::new(Opcode::Sleep).encoded_len(), 1);
    }

    #[test]
    fn test_decoder_resolves_latched_register() {
        let m = MotorId::extruder(1).unwrap();
        let packets = [
            TxPacket::with_value(Opcode::RateMotor(m), 300),
            TxPacket::new(Opcode::DirectionCw),
            TxPacket::new(Opcode::Steps),
            TxPacket::new(Opcode::Sleep),
        ];
        let bytes = encode_packets(&packets);
        let decoded = PacketDecoder::new().decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[0].argument, Some(300));
        assert_eq!(decoded[1].argument, None);
        assert_eq!(decoded[2].opcode, Opcode::Steps);
        assert_eq!(decoded[2].argument, Some(300));
        assert_eq!(decoded[3].argument, None);
    }

    #[test]
    fn test_decoder_reports_truncated_value() {
        let err = PacketDecoder::new().decode(&[0x7D, 0x01]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ShortFrame {
                needed: 2,
                available: 1
            }
        );
    }
}
