use crate::error::{LoraMesherError, Result};

/// `RoutingHeader`: inserted between `BaseHeader` and the payload for a
/// forwardable DATA frame. 5 bytes, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RoutingHeader {
    pub next_hop: u16,
    pub sequence_id: u8,
    pub fragment_number: u16,
}

impl RoutingHeader {
    pub const WIRE_LEN: usize = 5;

    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::WIRE_LEN {
            return Err(LoraMesherError::SerializationError);
        }
        buf[0..2].copy_from_slice(&self.next_hop.to_le_bytes());
        buf[2] = self.sequence_id;
        buf[3..5].copy_from_slice(&self.fragment_number.to_le_bytes());
        Ok(Self::WIRE_LEN)
    }

    pub fn deserialize(buf: &[u8]) -> Option<RoutingHeader> {
        if buf.len() < Self::WIRE_LEN {
            return None;
        }
        Some(RoutingHeader {
            next_hop: u16::from_le_bytes([buf[0], buf[1]]),
            sequence_id: buf[2],
            fragment_number: u16::from_le_bytes([buf[3], buf[4]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let header = RoutingHeader {
            next_hop: 0x00AB,
            sequence_id: 7,
            fragment_number: 3,
        };
        let mut buf = [0u8; RoutingHeader::WIRE_LEN];
        header.serialize(&mut buf).unwrap();
        assert_eq!(RoutingHeader::deserialize(&buf), Some(header));
    }

    #[test]
    fn short_buffer_is_none() {
        assert_eq!(RoutingHeader::deserialize(&[0u8; 4]), None);
    }
}
