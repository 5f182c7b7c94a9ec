//! Forwarding engine (C7).
//!
//! Builds and unwraps `DATA` frames (`BaseHeader` with a `RoutingHeader`
//! packed as the first 5 bytes of the payload, per spec §6.1 — the teacher's
//! extension-header convention applied to a dynamically-sized payload
//! instead of a fixed one), and decides deliver/forward/drop for each
//! received frame. I/O (enqueuing into a TX slot, handing a frame to
//! `RadioManager::send`) is left to the caller, the same separation
//! `SyncService`/`HelloService` use.

use crate::error::{LoraMesherError, Result};
use crate::routing::RoutingTable;
use crate::wire::{BaseMessage, MessageType, RoutingHeader, MAX_PAYLOAD_LEN};

pub const BROADCAST_ADDRESS: u16 = 0xFFFF;

/// The `RoutingHeader` rides inside `BaseMessage::payload` (ahead of the
/// application payload), so the usable application payload is smaller than
/// `MAX_PAYLOAD_LEN` by its width.
pub const MAX_APPLICATION_PAYLOAD_LEN: usize = MAX_PAYLOAD_LEN - RoutingHeader::WIRE_LEN;

/// Bound on the "recently seen `(source, sequence_id)`" dedup cache (spec
/// §4.6 "small recently-seen set per source").
pub const SEEN_CACHE_CAPACITY: usize = 32;

/// What the caller should do with a received DATA frame.
#[derive(Debug, Clone)]
pub enum ForwardAction {
    /// Addressed to this node: hand the inner payload to the application.
    DeliverToApplication {
        source: u16,
        payload: heapless::Vec<u8, MAX_PAYLOAD_LEN>,
    },
    /// A fresh broadcast: deliver to the application *and* re-flood the
    /// frame to all neighbors exactly once per `(source, sequence_id)`
    /// (spec §4.6), relying on the dedup cache at every hop to stop it.
    DeliverAndRebroadcast {
        source: u16,
        payload: heapless::Vec<u8, MAX_PAYLOAD_LEN>,
        message: BaseMessage,
    },
    /// Addressed elsewhere, a route exists and hops remain: re-transmit this
    /// frame (with `RoutingHeader.next_hop` updated) into the next TX slot.
    Forward { message: BaseMessage, next_hop: u16 },
    /// A duplicate, or a frame this node cannot usefully act on.
    Drop,
    /// No valid route, or the hop budget is exhausted: optionally emit a
    /// LOST control frame back toward `to` (spec §4.6).
    EmitLost { to: u16 },
}

/// Accepts outbound datagrams, resolves next hop, and dispatches received
/// DATA frames (C7).
pub struct ForwardingEngine {
    self_address: u16,
    max_hops: u8,
    next_sequence_id: u8,
    seen: heapless::Vec<(u16, u8), SEEN_CACHE_CAPACITY>,
}

impl ForwardingEngine {
    pub fn new(self_address: u16, max_hops: u8) -> Self {
        ForwardingEngine {
            self_address,
            max_hops,
            next_sequence_id: 0,
            seen: heapless::Vec::new(),
        }
    }

    fn has_seen(&self, key: (u16, u8)) -> bool {
        self.seen.contains(&key)
    }

    fn mark_seen(&mut self, key: (u16, u8)) {
        if self.has_seen(key) {
            return;
        }
        if self.seen.is_full() {
            self.seen.remove(0);
        }
        let _ = self.seen.push(key);
    }

    fn pack_payload(routing: &RoutingHeader, payload: &[u8]) -> Result<heapless::Vec<u8, MAX_PAYLOAD_LEN>> {
        let mut buf = [0u8; RoutingHeader::WIRE_LEN];
        routing.serialize(&mut buf)?;
        let mut packed = heapless::Vec::new();
        packed
            .extend_from_slice(&buf)
            .map_err(|_| LoraMesherError::BufferOverflow)?;
        packed
            .extend_from_slice(payload)
            .map_err(|_| LoraMesherError::BufferOverflow)?;
        Ok(packed)
    }

    fn unpack_payload(payload: &[u8]) -> Option<(RoutingHeader, &[u8])> {
        let routing = RoutingHeader::deserialize(payload)?;
        Some((routing, &payload[RoutingHeader::WIRE_LEN..]))
    }

    /// `send(dest, payload)` (spec §4.6): wrap in DATA with `source = self`,
    /// resolve next hop via `table`, and return the frame for the caller to
    /// enqueue into this node's next `TX` slot. Broadcast goes out as-is,
    /// with `next_hop = BROADCAST_ADDRESS`.
    pub fn send(&mut self, destination: u16, payload: &[u8], table: &RoutingTable) -> Result<(BaseMessage, u16)> {
        let next_hop = if destination == BROADCAST_ADDRESS {
            BROADCAST_ADDRESS
        } else {
            table
                .get_route(destination)
                .map(|r| r.next_hop)
                .ok_or(LoraMesherError::InvalidParameter)?
        };
        let sequence_id = self.next_sequence_id;
        self.next_sequence_id = self.next_sequence_id.wrapping_add(1);
        let routing = RoutingHeader {
            next_hop,
            sequence_id,
            fragment_number: 0,
        };
        let packed = Self::pack_payload(&routing, payload)?;
        let message = BaseMessage::create(destination, self.self_address, MessageType::Data, &packed)?;
        self.mark_seen((self.self_address, sequence_id));
        Ok((message, next_hop))
    }

    /// Process a received DATA frame (spec §4.6): deliver, forward, or drop.
    /// `now_ms` is accepted for symmetry with the rest of the crate's clock
    /// model even though this path doesn't currently need it.
    pub fn on_receive(&mut self, message: &BaseMessage, table: &RoutingTable, _now_ms: u32) -> ForwardAction {
        let Some((routing, inner_payload)) = Self::unpack_payload(&message.payload) else {
            return ForwardAction::Drop;
        };
        let key = (message.header.source, routing.sequence_id);
        if self.has_seen(key) {
            return ForwardAction::Drop;
        }
        self.mark_seen(key);

        if message.header.destination == self.self_address {
            let mut payload = heapless::Vec::new();
            if payload.extend_from_slice(inner_payload).is_err() {
                return ForwardAction::Drop;
            }
            return ForwardAction::DeliverToApplication {
                source: message.header.source,
                payload,
            };
        }

        if message.header.destination == BROADCAST_ADDRESS {
            let original_source = message.header.source;
            let mut payload = heapless::Vec::new();
            if payload.extend_from_slice(inner_payload).is_err() {
                return ForwardAction::Drop;
            }
            // Re-flood with the same source/sequence_id so every other hop's
            // dedup cache recognizes it and stops the flood after one pass.
            let rebroadcast_routing = RoutingHeader {
                next_hop: BROADCAST_ADDRESS,
                sequence_id: routing.sequence_id,
                fragment_number: routing.fragment_number,
            };
            let packed = Self::pack_payload(&rebroadcast_routing, inner_payload)
                .and_then(|packed| BaseMessage::create(BROADCAST_ADDRESS, original_source, MessageType::Data, &packed));
            return match packed {
                Ok(rebroadcast) => ForwardAction::DeliverAndRebroadcast {
                    source: original_source,
                    payload,
                    message: rebroadcast,
                },
                Err(_) => ForwardAction::DeliverToApplication {
                    source: original_source,
                    payload,
                },
            };
        }

        let route = match table.get_route(message.header.destination) {
            Some(r) => r,
            None => return ForwardAction::EmitLost { to: message.header.source },
        };
        let hops_remaining = self.max_hops.saturating_sub(route.hop_count);
        if hops_remaining == 0 {
            return ForwardAction::EmitLost { to: message.header.source };
        }

        let forwarded_routing = RoutingHeader {
            next_hop: route.next_hop,
            sequence_id: routing.sequence_id,
            fragment_number: routing.fragment_number,
        };
        let Ok(packed) = Self::pack_payload(&forwarded_routing, inner_payload) else {
            return ForwardAction::Drop;
        };
        match BaseMessage::create(message.header.destination, message.header.source, MessageType::Data, &packed) {
            Ok(forwarded) => ForwardAction::Forward {
                message: forwarded,
                next_hop: route.next_hop,
            },
            Err(_) => ForwardAction::Drop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_route(dest: u16, next_hop: u16, hop_count: u8) -> RoutingTable {
        let mut table = RoutingTable::new(8, 10);
        table.consider_candidate(1, dest, next_hop, hop_count, 200, 1000);
        table
    }

    #[test]
    fn send_to_unknown_destination_is_rejected() {
        let mut engine = ForwardingEngine::new(1, 10);
        let table = RoutingTable::new(8, 10);
        assert_eq!(
            engine.send(9, b"hi", &table),
            Err(LoraMesherError::InvalidParameter)
        );
    }

    #[test]
    fn send_resolves_next_hop_from_table() {
        let mut engine = ForwardingEngine::new(1, 10);
        let table = table_with_route(9, 5, 2);
        let (message, next_hop) = engine.send(9, b"hi", &table).unwrap();
        assert_eq!(next_hop, 5);
        assert_eq!(message.header.destination, 9);
        assert_eq!(message.header.source, 1);
    }

    #[test]
    fn broadcast_send_uses_broadcast_next_hop() {
        let mut engine = ForwardingEngine::new(1, 10);
        let table = RoutingTable::new(8, 10);
        let (_, next_hop) = engine.send(BROADCAST_ADDRESS, b"hi", &table).unwrap();
        assert_eq!(next_hop, BROADCAST_ADDRESS);
    }

    #[test]
    fn receiving_own_addressed_frame_delivers_to_application() {
        let mut sender = ForwardingEngine::new(2, 10);
        let table_at_sender = RoutingTable::new(8, 10);
        let (message, _) = sender.send(1, b"payload", &table_at_sender).unwrap();

        let mut receiver = ForwardingEngine::new(1, 10);
        let table_at_receiver = RoutingTable::new(8, 10);
        let action = receiver.on_receive(&message, &table_at_receiver, 1000);
        match action {
            ForwardAction::DeliverToApplication { source, payload } => {
                assert_eq!(source, 2);
                assert_eq!(payload.as_slice(), b"payload");
            }
            other => panic!("expected delivery, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_frame_is_dropped() {
        let mut sender = ForwardingEngine::new(2, 10);
        let table_at_sender = RoutingTable::new(8, 10);
        let (message, _) = sender.send(1, b"payload", &table_at_sender).unwrap();

        let mut receiver = ForwardingEngine::new(1, 10);
        let table = RoutingTable::new(8, 10);
        receiver.on_receive(&message, &table, 1000);
        let second = receiver.on_receive(&message, &table, 1001);
        assert!(matches!(second, ForwardAction::Drop));
    }

    #[test]
    fn forwards_when_route_exists_and_hops_remain() {
        let mut sender = ForwardingEngine::new(2, 10);
        let table_at_sender = table_with_route(9, 3, 1);
        let (message, _) = sender.send(9, b"payload", &table_at_sender).unwrap();

        let mut forwarder = ForwardingEngine::new(3, 10);
        let forwarder_table = table_with_route(9, 7, 3);
        let action = forwarder.on_receive(&message, &forwarder_table, 1000);
        match action {
            ForwardAction::Forward { message, next_hop } => {
                assert_eq!(next_hop, 7);
                assert_eq!(message.header.destination, 9);
                assert_eq!(message.header.source, 2);
            }
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn broadcast_reception_delivers_and_rebroadcasts_once() {
        let mut sender = ForwardingEngine::new(2, 10);
        let table_at_sender = RoutingTable::new(8, 10);
        let (message, _) = sender.send(BROADCAST_ADDRESS, b"payload", &table_at_sender).unwrap();

        let mut neighbor = ForwardingEngine::new(3, 10);
        let neighbor_table = RoutingTable::new(8, 10);
        let action = neighbor.on_receive(&message, &neighbor_table, 1000);
        match action {
            ForwardAction::DeliverAndRebroadcast { source, payload, message } => {
                assert_eq!(source, 2);
                assert_eq!(payload.as_slice(), b"payload");
                assert_eq!(message.header.destination, BROADCAST_ADDRESS);
                assert_eq!(message.header.source, 2);
            }
            other => panic!("expected deliver-and-rebroadcast, got {:?}", other),
        }

        // A second reception of the same (source, sequence_id) is dropped.
        let second = neighbor.on_receive(&message, &neighbor_table, 1001);
        assert!(matches!(second, ForwardAction::Drop));
    }

    #[test]
    fn drops_and_reports_lost_when_no_route_exists() {
        let mut sender = ForwardingEngine::new(2, 10);
        let table_at_sender = table_with_route(9, 3, 1);
        let (message, _) = sender.send(9, b"payload", &table_at_sender).unwrap();

        let mut forwarder = ForwardingEngine::new(3, 10);
        let empty_table = RoutingTable::new(8, 10);
        let action = forwarder.on_receive(&message, &empty_table, 1000);
        assert!(matches!(action, ForwardAction::EmitLost { to: 2 }));
    }

    #[test]
    fn drops_and_reports_lost_when_hop_budget_exhausted() {
        let mut sender = ForwardingEngine::new(2, 3);
        let table_at_sender = table_with_route(9, 3, 1);
        let (message, _) = sender.send(9, b"payload", &table_at_sender).unwrap();

        let mut forwarder = ForwardingEngine::new(3, 3);
        let table_at_limit = table_with_route(9, 7, 3); // hop_count == max_hops
        let action = forwarder.on_receive(&message, &table_at_limit, 1000);
        assert!(matches!(action, ForwardAction::EmitLost { to: 2 }));
    }
}
