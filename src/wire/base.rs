use super::MAX_PAYLOAD_LEN;
use crate::error::{LoraMesherError, Result};

/// High-nibble message class / low-nibble subtype, spec §6.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageType {
    Data,
    XlData,
    Hello,
    Ack,
    Lost,
    SyncBeacon,
    NeedAck,
    Routing,
    ControlPing,
    ControlPong,
    /// Any other `0x20..0x2F` control subtype not otherwise named.
    Control(u8),
}

impl MessageType {
    pub const fn to_u8(self) -> u8 {
        match self {
            MessageType::Data => 0x01,
            MessageType::XlData => 0x02,
            MessageType::Hello => 0x03,
            MessageType::Ack => 0x04,
            MessageType::Lost => 0x05,
            MessageType::SyncBeacon => 0x06,
            MessageType::NeedAck => 0x07,
            MessageType::Routing => 0x10,
            MessageType::ControlPing => 0x23,
            MessageType::ControlPong => 0x24,
            MessageType::Control(sub) => 0x20 | (sub & 0x0F),
        }
    }

    pub const fn from_u8(value: u8) -> Option<MessageType> {
        Some(match value {
            0x01 => MessageType::Data,
            0x02 => MessageType::XlData,
            0x03 => MessageType::Hello,
            0x04 => MessageType::Ack,
            0x05 => MessageType::Lost,
            0x06 => MessageType::SyncBeacon,
            0x07 => MessageType::NeedAck,
            0x10 => MessageType::Routing,
            0x23 => MessageType::ControlPing,
            0x24 => MessageType::ControlPong,
            v if v & 0xF0 == 0x20 => MessageType::Control(v & 0x0F),
            _ => return None,
        })
    }

    /// `true` for message types carrying a `SyncBeaconHeader` extension.
    pub const fn is_sync_beacon(self) -> bool {
        matches!(self, MessageType::SyncBeacon)
    }

    /// `true` for message types carrying a `PingPongHeader` extension.
    pub const fn is_ping_pong(self) -> bool {
        matches!(self, MessageType::ControlPing | MessageType::ControlPong)
    }
}

/// `{destination, source, type, payload_size}`, 6 bytes, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BaseHeader {
    pub destination: u16,
    pub source: u16,
    pub message_type: MessageType,
    pub payload_size: u8,
}

impl BaseHeader {
    pub const WIRE_LEN: usize = 6;

    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::WIRE_LEN {
            return Err(LoraMesherError::SerializationError);
        }
        buf[0..2].copy_from_slice(&self.destination.to_le_bytes());
        buf[2..4].copy_from_slice(&self.source.to_le_bytes());
        buf[4] = self.message_type.to_u8();
        buf[5] = self.payload_size;
        Ok(Self::WIRE_LEN)
    }

    pub fn deserialize(buf: &[u8]) -> Option<BaseHeader> {
        if buf.len() < Self::WIRE_LEN {
            return None;
        }
        let destination = u16::from_le_bytes([buf[0], buf[1]]);
        let source = u16::from_le_bytes([buf[2], buf[3]]);
        let message_type = MessageType::from_u8(buf[4])?;
        let payload_size = buf[5];
        Some(BaseHeader {
            destination,
            source,
            message_type,
            payload_size,
        })
    }
}

/// A DATA/HELLO/ACK/etc frame: `BaseHeader` plus an inline payload, bounded
/// by `heapless::Vec` so the whole thing stays stack-resident.
#[derive(Debug, Clone)]
pub struct BaseMessage {
    pub header: BaseHeader,
    pub payload: heapless::Vec<u8, MAX_PAYLOAD_LEN>,
}

impl BaseMessage {
    /// Build a message, rejecting an oversized payload or unrecognized type
    /// (spec §4.1).
    pub fn create(
        destination: u16,
        source: u16,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<BaseMessage> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(LoraMesherError::InvalidParameter);
        }
        let mut stored = heapless::Vec::new();
        stored
            .extend_from_slice(payload)
            .map_err(|_| LoraMesherError::BufferOverflow)?;
        Ok(BaseMessage {
            header: BaseHeader {
                destination,
                source,
                message_type,
                payload_size: payload.len() as u8,
            },
            payload: stored,
        })
    }

    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        let header_len = self.header.serialize(buf)?;
        let total = header_len + self.payload.len();
        if buf.len() < total {
            return Err(LoraMesherError::SerializationError);
        }
        buf[header_len..total].copy_from_slice(&self.payload);
        Ok(total)
    }

    pub fn deserialize(buf: &[u8]) -> Option<BaseMessage> {
        let header = BaseHeader::deserialize(buf)?;
        let payload_start = BaseHeader::WIRE_LEN;
        let payload_end = payload_start + header.payload_size as usize;
        if buf.len() < payload_end {
            return None;
        }
        let mut payload = heapless::Vec::new();
        payload
            .extend_from_slice(&buf[payload_start..payload_end])
            .ok()?;
        Some(BaseMessage { header, payload })
    }
}

impl PartialEq for BaseMessage {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.payload == other.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips() {
        for raw in 0u8..=255 {
            if let Some(mt) = MessageType::from_u8(raw) {
                assert_eq!(mt.to_u8(), raw, "raw={:#x}", raw);
            }
        }
    }

    #[test]
    fn control_subtype_is_low_nibble() {
        assert_eq!(MessageType::from_u8(0x23), Some(MessageType::ControlPing));
        assert_eq!(MessageType::from_u8(0x24), Some(MessageType::ControlPong));
        assert_eq!(MessageType::from_u8(0x29), Some(MessageType::Control(0x9)));
    }

    #[test]
    fn unknown_type_is_none() {
        assert_eq!(MessageType::from_u8(0x08), None);
        assert_eq!(MessageType::from_u8(0x00), None);
    }

    #[test]
    fn base_header_round_trip() {
        let header = BaseHeader {
            destination: 0xFFFF,
            source: 0x1234,
            message_type: MessageType::Hello,
            payload_size: 10,
        };
        let mut buf = [0u8; BaseHeader::WIRE_LEN];
        let written = header.serialize(&mut buf).unwrap();
        assert_eq!(written, BaseHeader::WIRE_LEN);
        assert_eq!(buf, [0xFF, 0xFF, 0x34, 0x12, 0x03, 10]);
        assert_eq!(BaseHeader::deserialize(&buf), Some(header));
    }

    #[test]
    fn base_header_short_buffer_is_none() {
        assert_eq!(BaseHeader::deserialize(&[0u8; 5]), None);
    }

    #[test]
    fn create_rejects_oversized_payload() {
        let payload = [0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            BaseMessage::create(1, 2, MessageType::Data, &payload),
            Err(LoraMesherError::InvalidParameter)
        );
    }

    #[test]
    fn base_message_round_trip_for_all_sizes() {
        for len in [0usize, 1, 128, 255] {
            let payload: heapless::Vec<u8, 255> =
                (0..len).map(|i| (i % 256) as u8).collect();
            let msg = BaseMessage::create(0x0042, 0x0007, MessageType::Data, &payload).unwrap();
            let mut buf = [0u8; super::super::MAX_FRAME_LEN];
            let n = msg.serialize(&mut buf).unwrap();
            let decoded = BaseMessage::deserialize(&buf[..n]).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn deserialize_rejects_truncated_payload() {
        let msg = BaseMessage::create(1, 2, MessageType::Data, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 16];
        let n = msg.serialize(&mut buf).unwrap();
        assert!(BaseMessage::deserialize(&buf[..n - 1]).is_none());
    }
}
