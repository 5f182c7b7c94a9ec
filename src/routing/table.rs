use super::Capabilities;

/// `{destination, next_hop, hop_count, link_quality, last_seen_ms, is_valid}`
/// (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RoutingEntry {
    pub destination: u16,
    pub next_hop: u16,
    pub hop_count: u8,
    pub link_quality: u8,
    pub last_seen_ms: u32,
    pub is_valid: bool,
}

/// Peer descriptor (spec §3 `NetworkNode`), keyed by `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NetworkNode {
    pub address: u16,
    pub battery_level: u8,
    pub last_seen_ms: u32,
    pub is_network_manager: bool,
    pub capabilities: Capabilities,
    pub allocated_slots: u8,
    pub next_hop: u16,
    pub routing_entry: RoutingEntry,
}

/// Bound on how many `NetworkNode`s any single `RoutingTable` can hold.
/// Compile-time capacity for the backing `heapless::Vec`; `ProtocolConfig`'s
/// `max_network_nodes` can impose a smaller runtime cap but never a larger
/// one (spec §6.3 default 64).
pub const MAX_NETWORK_NODES: usize = 64;

/// Per-destination next-hop routes built from HELLO exchanges (C6).
pub struct RoutingTable {
    nodes: heapless::Vec<NetworkNode, MAX_NETWORK_NODES>,
    max_nodes: usize,
    max_hops: u8,
}

/// What happened to a route on `consider_candidate`/`tick`, for the
/// application's `on_route_update` callback (SPEC_FULL.md §B.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RouteChange {
    Installed,
    Updated,
    Removed,
}

impl RoutingTable {
    pub fn new(max_nodes: usize, max_hops: u8) -> Self {
        RoutingTable {
            nodes: heapless::Vec::new(),
            max_nodes: max_nodes.min(MAX_NETWORK_NODES),
            max_hops,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, destination: u16) -> Option<&NetworkNode> {
        self.nodes.iter().find(|n| n.address == destination)
    }

    /// Public `get_route` operation (spec §4.5): returns the routing entry
    /// only if it's still marked valid.
    pub fn get_route(&self, destination: u16) -> Option<RoutingEntry> {
        self.get(destination)
            .map(|n| n.routing_entry)
            .filter(|r| r.is_valid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.iter()
    }

    /// Upsert a neighbor's `NetworkNode` (spec §4.5 step 1). `recipient` is
    /// this node's own address, used to enforce the loop-prevention
    /// invariant that a node never routes through itself.
    fn upsert_neighbor_node(
        &mut self,
        address: u16,
        battery_level: u8,
        capabilities: Capabilities,
        link_quality: u8,
        now_ms: u32,
    ) -> &mut NetworkNode {
        if let Some(idx) = self.nodes.iter().position(|n| n.address == address) {
            let node = &mut self.nodes[idx];
            node.battery_level = battery_level;
            node.capabilities = capabilities;
            node.last_seen_ms = now_ms;
            node.next_hop = address;
            node.routing_entry.link_quality = link_quality;
            node.routing_entry.last_seen_ms = now_ms;
            node.routing_entry.hop_count = 1;
            node.routing_entry.is_valid = true;
            return &mut self.nodes[idx];
        }
        self.make_room_for_new_entry();
        let node = NetworkNode {
            address,
            battery_level,
            last_seen_ms: now_ms,
            is_network_manager: false,
            capabilities,
            allocated_slots: 0,
            next_hop: address,
            routing_entry: RoutingEntry {
                destination: address,
                next_hop: address,
                hop_count: 1,
                link_quality,
                last_seen_ms: now_ms,
                is_valid: true,
            },
        };
        let _ = self.nodes.push(node);
        let idx = self.nodes.len() - 1;
        &mut self.nodes[idx]
    }

    /// Neighbor upsert entry point: updates `last_seen_ms`, smooths
    /// `link_quality` via EWMA, and returns the new link quality to the
    /// neighbor (spec §4.5 step 1).
    pub fn on_neighbor_seen(
        &mut self,
        address: u16,
        battery_level: u8,
        capabilities: Capabilities,
        rssi_dbm: i16,
        snr_db: i8,
        now_ms: u32,
    ) -> u8 {
        let sample = super::link_quality_sample(rssi_dbm, snr_db);
        let old_lq = self.get(address).map(|n| n.routing_entry.link_quality).unwrap_or(sample);
        let smoothed = super::ewma_u8(old_lq, sample, super::DEFAULT_EWMA_ALPHA_SIXTEENTHS);
        self.upsert_neighbor_node(address, battery_level, capabilities, smoothed, now_ms);
        smoothed
    }

    /// Consider installing a multi-hop route learned via a neighbor's HELLO
    /// summary (spec §4.5 step 2). `recipient` is this node's own address:
    /// a route whose `next_hop == recipient` is never installed
    /// (loop prevention, spec §4.5).
    pub fn consider_candidate(
        &mut self,
        recipient: u16,
        destination: u16,
        next_hop: u16,
        hop_count: u8,
        link_quality: u8,
        now_ms: u32,
    ) -> Option<RouteChange> {
        if destination == recipient || next_hop == recipient {
            return None;
        }
        if hop_count > self.max_hops {
            return None;
        }
        if let Some(idx) = self.nodes.iter().position(|n| n.address == destination) {
            let existing = self.nodes[idx].routing_entry;
            let better = hop_count < existing.hop_count
                || (hop_count == existing.hop_count && link_quality > existing.link_quality);
            if !existing.is_valid || better {
                let node = &mut self.nodes[idx];
                node.next_hop = next_hop;
                node.last_seen_ms = now_ms;
                node.routing_entry = RoutingEntry {
                    destination,
                    next_hop,
                    hop_count,
                    link_quality,
                    last_seen_ms: now_ms,
                    is_valid: true,
                };
                return Some(RouteChange::Updated);
            }
            return None;
        }
        self.make_room_for_new_entry();
        let node = NetworkNode {
            address: destination,
            battery_level: 0,
            last_seen_ms: now_ms,
            is_network_manager: false,
            capabilities: Capabilities::default(),
            allocated_slots: 0,
            next_hop,
            routing_entry: RoutingEntry {
                destination,
                next_hop,
                hop_count,
                link_quality,
                last_seen_ms: now_ms,
                is_valid: true,
            },
        };
        if self.nodes.push(node).is_ok() {
            Some(RouteChange::Installed)
        } else {
            None
        }
    }

    /// Evict routes untouched for longer than `route_timeout_ms` (spec
    /// §4.5). Returns the addresses removed, for the `route_removed`
    /// notification (SPEC_FULL.md §B.3).
    pub fn tick(&mut self, now_ms: u32, route_timeout_ms: u32) -> heapless::Vec<u16, MAX_NETWORK_NODES> {
        let mut removed = heapless::Vec::new();
        self.nodes.retain(|n| {
            let stale = now_ms.saturating_sub(n.last_seen_ms) > route_timeout_ms;
            if stale {
                let _ = removed.push(n.address);
            }
            !stale
        });
        removed
    }

    /// On overflow (table at `max_nodes`), evict the entry with the oldest
    /// `last_seen_ms` to make room (spec §4.5 bounds).
    fn make_room_for_new_entry(&mut self) {
        if self.nodes.len() < self.max_nodes && self.nodes.len() < self.nodes.capacity() {
            return;
        }
        if let Some((idx, _)) = self
            .nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, n)| n.last_seen_ms)
        {
            self.nodes.swap_remove(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities::default().with(Capabilities::CAN_FORWARD)
    }

    #[test]
    fn neighbor_seen_installs_direct_route() {
        let mut table = RoutingTable::new(8, 10);
        table.on_neighbor_seen(5, 80, caps(), -70, 5, 1000);
        let route = table.get_route(5).unwrap();
        assert_eq!(route.next_hop, 5);
        assert_eq!(route.hop_count, 1);
    }

    #[test]
    fn candidate_route_rejected_if_next_hop_is_recipient() {
        let mut table = RoutingTable::new(8, 10);
        assert_eq!(table.consider_candidate(1, 9, 1, 2, 200, 1000), None);
    }

    #[test]
    fn candidate_route_rejected_if_destination_is_recipient() {
        let mut table = RoutingTable::new(8, 10);
        assert_eq!(table.consider_candidate(1, 1, 5, 2, 200, 1000), None);
    }

    #[test]
    fn candidate_route_installed_when_absent() {
        let mut table = RoutingTable::new(8, 10);
        let change = table.consider_candidate(1, 9, 5, 2, 200, 1000);
        assert_eq!(change, Some(RouteChange::Installed));
        assert_eq!(table.get_route(9).unwrap().hop_count, 2);
    }

    #[test]
    fn candidate_route_improves_on_shorter_hop_count() {
        let mut table = RoutingTable::new(8, 10);
        table.consider_candidate(1, 9, 5, 3, 100, 1000);
        let change = table.consider_candidate(1, 9, 6, 2, 50, 2000);
        assert_eq!(change, Some(RouteChange::Updated));
        let route = table.get_route(9).unwrap();
        assert_eq!(route.hop_count, 2);
        assert_eq!(route.next_hop, 6);
    }

    #[test]
    fn candidate_route_improves_on_equal_hop_better_quality() {
        let mut table = RoutingTable::new(8, 10);
        table.consider_candidate(1, 9, 5, 2, 100, 1000);
        let change = table.consider_candidate(1, 9, 6, 2, 150, 2000);
        assert_eq!(change, Some(RouteChange::Updated));
        assert_eq!(table.get_route(9).unwrap().next_hop, 6);
    }

    #[test]
    fn candidate_route_not_replaced_by_worse_route() {
        let mut table = RoutingTable::new(8, 10);
        table.consider_candidate(1, 9, 5, 2, 200, 1000);
        let change = table.consider_candidate(1, 9, 6, 3, 255, 2000);
        assert_eq!(change, None);
        assert_eq!(table.get_route(9).unwrap().next_hop, 5);
    }

    #[test]
    fn candidate_route_beyond_max_hops_is_rejected() {
        let mut table = RoutingTable::new(8, 3);
        assert_eq!(table.consider_candidate(1, 9, 5, 4, 200, 1000), None);
        assert_eq!(table.consider_candidate(1, 9, 5, 3, 200, 1000), Some(RouteChange::Installed));
    }

    #[test]
    fn tick_evicts_stale_routes() {
        let mut table = RoutingTable::new(8, 10);
        table.on_neighbor_seen(5, 80, caps(), -70, 5, 1000);
        let removed = table.tick(1000 + 180_000 + 1, 180_000);
        assert_eq!(removed.as_slice(), &[5]);
        assert!(table.get_route(5).is_none());
    }

    #[test]
    fn tick_keeps_fresh_routes() {
        let mut table = RoutingTable::new(8, 10);
        table.on_neighbor_seen(5, 80, caps(), -70, 5, 1000);
        let removed = table.tick(1000 + 100, 180_000);
        assert!(removed.is_empty());
        assert!(table.get_route(5).is_some());
    }

    #[test]
    fn overflow_evicts_oldest_entry() {
        let mut table = RoutingTable::new(2, 10);
        table.on_neighbor_seen(1, 50, caps(), -70, 0, 1000);
        table.on_neighbor_seen(2, 50, caps(), -70, 0, 2000);
        // table is now at its configured max of 2; a third neighbor should
        // evict the oldest (address 1, last_seen_ms=1000).
        table.on_neighbor_seen(3, 50, caps(), -70, 0, 3000);
        assert!(table.get_route(1).is_none());
        assert!(table.get_route(2).is_some());
        assert!(table.get_route(3).is_some());
    }
}
