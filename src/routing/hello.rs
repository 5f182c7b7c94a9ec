use super::table::{RouteChange, RoutingTable};
use super::{Capabilities, RoutingEntry};
use crate::error::{LoraMesherError, Result};
use crate::wire::{BaseMessage, MessageType};

pub const MAX_NEIGHBOR_SUMMARY: usize = 10;
pub const DEFAULT_HELLO_INTERVAL_MS: u32 = 60_000;

/// One entry of a HELLO frame's neighbor summary (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NeighborSummaryEntry {
    pub address: u16,
    pub hop_count: u8,
    pub link_quality: u8,
}

/// Decoded HELLO application payload: `{self_address, battery_level,
/// capabilities, hop_count, neighbors summary}` (spec §4.5).
#[derive(Debug, Clone, PartialEq)]
pub struct HelloMessage {
    pub self_address: u16,
    pub battery_level: u8,
    pub capabilities: Capabilities,
    pub hop_count: u8,
    pub neighbors: heapless::Vec<NeighborSummaryEntry, MAX_NEIGHBOR_SUMMARY>,
}

impl HelloMessage {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let needed = 5 + self.neighbors.len() * 4;
        if buf.len() < needed {
            return Err(LoraMesherError::SerializationError);
        }
        buf[0..2].copy_from_slice(&self.self_address.to_le_bytes());
        buf[2] = self.battery_level;
        buf[3] = self.capabilities.0;
        buf[4] = self.hop_count;
        let mut offset = 5;
        for n in &self.neighbors {
            buf[offset..offset + 2].copy_from_slice(&n.address.to_le_bytes());
            buf[offset + 2] = n.hop_count;
            buf[offset + 3] = n.link_quality;
            offset += 4;
        }
        Ok(offset)
    }

    pub fn decode(buf: &[u8]) -> Option<HelloMessage> {
        if buf.len() < 5 {
            return None;
        }
        let self_address = u16::from_le_bytes([buf[0], buf[1]]);
        let battery_level = buf[2];
        let capabilities = Capabilities(buf[3]);
        let hop_count = buf[4];
        let mut neighbors = heapless::Vec::new();
        let mut offset = 5;
        while offset + 4 <= buf.len() && !neighbors.is_full() {
            let address = u16::from_le_bytes([buf[offset], buf[offset + 1]]);
            let n_hop_count = buf[offset + 2];
            let link_quality = buf[offset + 3];
            let _ = neighbors.push(NeighborSummaryEntry {
                address,
                hop_count: n_hop_count,
                link_quality,
            });
            offset += 4;
        }
        Some(HelloMessage {
            self_address,
            battery_level,
            capabilities,
            hop_count,
            neighbors,
        })
    }

    /// Build the broadcast `BaseMessage` carrying this HELLO.
    pub fn to_message(&self, source: u16) -> Result<BaseMessage> {
        let mut buf = [0u8; 5 + MAX_NEIGHBOR_SUMMARY * 4];
        let len = self.encode(&mut buf)?;
        BaseMessage::create(0xFFFF, source, MessageType::Hello, &buf[..len])
    }
}

/// HELLO emission/consumption and route maintenance (C6).
pub struct HelloService {
    table: RoutingTable,
    running: bool,
    hop_count: u8,
}

impl HelloService {
    pub fn new(max_nodes: usize, max_hops: u8) -> Self {
        HelloService {
            table: RoutingTable::new(max_nodes, max_hops),
            running: false,
            hop_count: u8::MAX,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn get_route(&self, destination: u16) -> Option<RoutingEntry> {
        self.table.get_route(destination)
    }

    pub fn set_hop_count_to_nm(&mut self, hop_count: u8) {
        self.hop_count = hop_count;
    }

    /// Build this node's outbound HELLO frame from its current route table
    /// (spec §4.5 emission), bounded to `MAX_NEIGHBOR_SUMMARY` entries.
    pub fn build_hello(&self, self_address: u16, battery_level: u8, capabilities: Capabilities) -> HelloMessage {
        let mut neighbors = heapless::Vec::new();
        for node in self.table.iter() {
            if node.routing_entry.hop_count == 1 && !neighbors.is_full() {
                let _ = neighbors.push(NeighborSummaryEntry {
                    address: node.address,
                    hop_count: node.routing_entry.hop_count,
                    link_quality: node.routing_entry.link_quality,
                });
            }
        }
        HelloMessage {
            self_address,
            battery_level,
            capabilities,
            hop_count: self.hop_count,
            neighbors,
        }
    }

    /// Process a received HELLO (spec §4.5): upsert the sender as a direct
    /// neighbor, then consider every entry in its summary as a candidate
    /// multi-hop route. `recipient` is this node's own address.
    pub fn on_hello(
        &mut self,
        recipient: u16,
        hello: &HelloMessage,
        rssi_dbm: i16,
        snr_db: i8,
        now_ms: u32,
    ) -> heapless::Vec<(u16, RouteChange), { super::table::MAX_NETWORK_NODES }> {
        let mut changes = heapless::Vec::new();
        let sender_caps = Capabilities::default();
        let sender_lq =
            self.table
                .on_neighbor_seen(hello.self_address, hello.battery_level, sender_caps, rssi_dbm, snr_db, now_ms);

        for r in &hello.neighbors {
            if r.address == recipient {
                continue;
            }
            let candidate_hop_count = r.hop_count.saturating_add(1);
            let candidate_lq = sender_lq.min(r.link_quality);
            if let Some(change) = self.table.consider_candidate(
                recipient,
                r.address,
                hello.self_address,
                candidate_hop_count,
                candidate_lq,
                now_ms,
            ) {
                let _ = changes.push((r.address, change));
            }
        }
        changes
    }

    /// Merge a slice of already-resolved routes learned through a control
    /// frame forwarded by `via` (spec §4.5 `on_control`), using the same
    /// candidate-acceptance rule as a HELLO neighbor summary.
    pub fn on_control(&mut self, recipient: u16, via: u16, entries: &[RoutingEntry], now_ms: u32) {
        for e in entries {
            let _ = self.table.consider_candidate(
                recipient,
                e.destination,
                via,
                e.hop_count.saturating_add(1),
                e.link_quality,
                now_ms,
            );
        }
    }

    /// Evict stale routes (spec §4.5). Returns removed addresses for the
    /// `route_removed` notification.
    pub fn tick(&mut self, now_ms: u32, route_timeout_ms: u32) -> heapless::Vec<u16, { super::table::MAX_NETWORK_NODES }> {
        self.table.tick(now_ms, route_timeout_ms)
    }
}
