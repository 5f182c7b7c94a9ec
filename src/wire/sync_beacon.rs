use super::base::{BaseHeader, MessageType};
use crate::error::{LoraMesherError, Result};

/// `SyncBeaconHeader` extends `BaseHeader` with 13 bytes of superframe/NM
/// state. No payload (`payload_size` in the base header is always 0).
///
/// This crate standardizes on the variant that omits `original_timestamp_ms`
/// (see SPEC_FULL.md §E) — `propagation_delay_ms` alone is sufficient to
/// recompute the anchor in `SyncService`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncBeaconHeader {
    pub destination: u16,
    pub source: u16,
    pub network_id: u16,
    pub total_slots: u8,
    pub slot_duration_ms: u16,
    pub network_manager: u16,
    pub hop_count: u8,
    pub propagation_delay_ms: u32,
    pub max_hops: u8,
}

impl SyncBeaconHeader {
    pub const EXT_LEN: usize = 13;
    pub const WIRE_LEN: usize = BaseHeader::WIRE_LEN + Self::EXT_LEN;

    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::WIRE_LEN {
            return Err(LoraMesherError::SerializationError);
        }
        let base = BaseHeader {
            destination: self.destination,
            source: self.source,
            message_type: MessageType::SyncBeacon,
            payload_size: 0,
        };
        base.serialize(buf)?;
        let ext = &mut buf[BaseHeader::WIRE_LEN..Self::WIRE_LEN];
        ext[0..2].copy_from_slice(&self.network_id.to_le_bytes());
        ext[2] = self.total_slots;
        ext[3..5].copy_from_slice(&self.slot_duration_ms.to_le_bytes());
        ext[5..7].copy_from_slice(&self.network_manager.to_le_bytes());
        ext[7] = self.hop_count;
        ext[8..12].copy_from_slice(&self.propagation_delay_ms.to_le_bytes());
        ext[12] = self.max_hops;
        Ok(Self::WIRE_LEN)
    }

    pub fn deserialize(buf: &[u8]) -> Option<SyncBeaconHeader> {
        if buf.len() < Self::WIRE_LEN {
            return None;
        }
        let base = BaseHeader::deserialize(buf)?;
        if !base.message_type.is_sync_beacon() {
            return None;
        }
        let ext = &buf[BaseHeader::WIRE_LEN..Self::WIRE_LEN];
        Some(SyncBeaconHeader {
            destination: base.destination,
            source: base.source,
            network_id: u16::from_le_bytes([ext[0], ext[1]]),
            total_slots: ext[2],
            slot_duration_ms: u16::from_le_bytes([ext[3], ext[4]]),
            network_manager: u16::from_le_bytes([ext[5], ext[6]]),
            hop_count: ext[7],
            propagation_delay_ms: u32::from_le_bytes([ext[8], ext[9], ext[10], ext[11]]),
            max_hops: ext[12],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spec §8 scenario 7 (golden buffer).
    #[test]
    fn golden_buffer_round_trip() {
        let header = SyncBeaconHeader {
            destination: 0xFFFF,
            source: 0x1234,
            network_id: 1,
            total_slots: 20,
            slot_duration_ms: 50,
            network_manager: 0x1234,
            hop_count: 2,
            propagation_delay_ms: 100,
            max_hops: 5,
        };
        let mut buf = [0u8; SyncBeaconHeader::WIRE_LEN];
        let n = header.serialize(&mut buf).unwrap();
        assert_eq!(n, SyncBeaconHeader::WIRE_LEN);
        let expected: [u8; 19] = [
            0xFF, 0xFF, // destination
            0x34, 0x12, // source
            0x06, // type = SYNC_BEACON
            0x00, // payload_size
            0x01, 0x00, // network_id
            20,   // total_slots
            50, 0x00, // slot_duration_ms
            0x34, 0x12, // network_manager
            2,    // hop_count
            100, 0, 0, 0, // propagation_delay_ms
            5,    // max_hops
        ];
        assert_eq!(buf, expected);
        assert_eq!(SyncBeaconHeader::deserialize(&buf), Some(header));
    }

    #[test]
    fn rejects_wrong_message_type() {
        let mut buf = [0u8; SyncBeaconHeader::WIRE_LEN];
        let base = BaseHeader {
            destination: 0,
            source: 0,
            message_type: MessageType::Hello,
            payload_size: 0,
        };
        base.serialize(&mut buf).unwrap();
        assert_eq!(SyncBeaconHeader::deserialize(&buf), None);
    }

    #[test]
    fn rejects_short_buffer() {
        assert_eq!(SyncBeaconHeader::deserialize(&[0u8; 10]), None);
    }
}
