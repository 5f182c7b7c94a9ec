use super::base::{BaseHeader, MessageType};
use crate::error::{LoraMesherError, Result};

/// `PingPongHeader` extends `BaseHeader` with a sequence number and sender
/// timestamp; the PING/PONG subtype lives in the base header's type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PingPongHeader {
    pub destination: u16,
    pub source: u16,
    pub is_ping: bool,
    pub sequence_number: u16,
    pub timestamp_ms: u32,
}

impl PingPongHeader {
    pub const EXT_LEN: usize = 6;
    pub const WIRE_LEN: usize = BaseHeader::WIRE_LEN + Self::EXT_LEN;

    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::WIRE_LEN {
            return Err(LoraMesherError::SerializationError);
        }
        let base = BaseHeader {
            destination: self.destination,
            source: self.source,
            message_type: if self.is_ping {
                MessageType::ControlPing
            } else {
                MessageType::ControlPong
            },
            payload_size: 0,
        };
        base.serialize(buf)?;
        let ext = &mut buf[BaseHeader::WIRE_LEN..Self::WIRE_LEN];
        ext[0..2].copy_from_slice(&self.sequence_number.to_le_bytes());
        ext[2..6].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        Ok(Self::WIRE_LEN)
    }

    pub fn deserialize(buf: &[u8]) -> Option<PingPongHeader> {
        if buf.len() < Self::WIRE_LEN {
            return None;
        }
        let base = BaseHeader::deserialize(buf)?;
        if !base.message_type.is_ping_pong() {
            return None;
        }
        let ext = &buf[BaseHeader::WIRE_LEN..Self::WIRE_LEN];
        Some(PingPongHeader {
            destination: base.destination,
            source: base.source,
            is_ping: base.message_type == MessageType::ControlPing,
            sequence_number: u16::from_le_bytes([ext[0], ext[1]]),
            timestamp_ms: u32::from_le_bytes([ext[2], ext[3], ext[4], ext[5]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trip() {
        let header = PingPongHeader {
            destination: 2,
            source: 1,
            is_ping: true,
            sequence_number: 42,
            timestamp_ms: 123_456,
        };
        let mut buf = [0u8; PingPongHeader::WIRE_LEN];
        header.serialize(&mut buf).unwrap();
        assert_eq!(PingPongHeader::deserialize(&buf), Some(header));
    }

    #[test]
    fn pong_round_trip() {
        let header = PingPongHeader {
            destination: 1,
            source: 2,
            is_ping: false,
            sequence_number: 42,
            timestamp_ms: 123_789,
        };
        let mut buf = [0u8; PingPongHeader::WIRE_LEN];
        header.serialize(&mut buf).unwrap();
        let decoded = PingPongHeader::deserialize(&buf).unwrap();
        assert_eq!(decoded, header);
        assert!(!decoded.is_ping);
    }

    #[test]
    fn rejects_non_pingpong_type() {
        let mut buf = [0u8; PingPongHeader::WIRE_LEN];
        let base = BaseHeader {
            destination: 0,
            source: 0,
            message_type: MessageType::Data,
            payload_size: 0,
        };
        base.serialize(&mut buf).unwrap();
        assert_eq!(PingPongHeader::deserialize(&buf), None);
    }
}
