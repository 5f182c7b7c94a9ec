//! Synchronization service & Network Manager election (C5).

use crate::scheduler::SchedulerClock;
use crate::wire::SyncBeaconHeader;

/// `Discovery -> Network_Manager | Normal_Operation`, with a failure
/// transition back to `Discovery` (spec §4.4, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncState {
    Discovery,
    NetworkManager,
    NormalOperation,
}

/// Outcome of processing a tick or a received beacon, for the caller (the
/// forwarding/protocol layer) to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncEvent {
    PromotedToNetworkManager,
    JoinedNetwork { network_manager: u16 },
    MigratedToBetterNetwork { network_manager: u16 },
    DemotedToNormalOperation,
    LostSync,
}

pub struct SyncConfig {
    pub discovery_timeout_ms: u32,
    pub nm_lost_timeout_ms: u32,
    pub max_hops: u8,
    /// Processing delay this node adds when forwarding a beacon (spec
    /// §4.4 forwarded beacon propagation accumulation), separate from the
    /// radio's own `time_on_air`.
    pub processing_delay_ms: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            discovery_timeout_ms: 30_000,
            nm_lost_timeout_ms: 180_000,
            max_hops: 10,
            processing_delay_ms: 2,
        }
    }
}

/// NM election and beacon-driven clock alignment (C5).
pub struct SyncService {
    self_address: u16,
    config: SyncConfig,
    state: SyncState,
    network_id: u16,
    network_manager: u16,
    own_hop_count: u8,
    discovery_started_ms: Option<u32>,
    last_beacon_heard_ms: Option<u32>,
}

impl SyncService {
    pub fn new(self_address: u16, config: SyncConfig) -> Self {
        SyncService {
            self_address,
            config,
            state: SyncState::Discovery,
            network_id: 0,
            network_manager: 0,
            own_hop_count: u8::MAX,
            discovery_started_ms: None,
            last_beacon_heard_ms: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn network_manager(&self) -> u16 {
        self.network_manager
    }

    pub fn network_id(&self) -> u16 {
        self.network_id
    }

    pub fn hop_count(&self) -> u8 {
        self.own_hop_count
    }

    pub fn is_synchronized(&self) -> bool {
        self.state != SyncState::Discovery
    }

    pub fn start(&mut self, now_ms: u32) {
        self.state = SyncState::Discovery;
        self.discovery_started_ms = Some(now_ms);
        self.last_beacon_heard_ms = None;
    }

    pub fn stop(&mut self) {
        self.discovery_started_ms = None;
        self.last_beacon_heard_ms = None;
    }

    /// Drive the discovery timeout and NM-lost recovery. Must be called
    /// every scheduler tick; anchors a fresh superframe on promotion.
    pub fn tick(&mut self, now_ms: u32, scheduler: &mut SchedulerClock) -> Option<SyncEvent> {
        match self.state {
            SyncState::Discovery => {
                let started = *self.discovery_started_ms.get_or_insert(now_ms);
                if now_ms.saturating_sub(started) > self.config.discovery_timeout_ms {
                    self.state = SyncState::NetworkManager;
                    self.network_manager = self.self_address;
                    self.network_id = self.self_address;
                    self.own_hop_count = 0;
                    scheduler.start(now_ms);
                    scheduler.mark_synchronized();
                    return Some(SyncEvent::PromotedToNetworkManager);
                }
                None
            }
            SyncState::NetworkManager | SyncState::NormalOperation => {
                if let Some(last_heard) = self.last_beacon_heard_ms {
                    if now_ms.saturating_sub(last_heard) > self.config.nm_lost_timeout_ms {
                        self.start(now_ms);
                        scheduler.mark_unsynchronized();
                        return Some(SyncEvent::LostSync);
                    }
                }
                None
            }
        }
    }

    /// Build this node's outbound beacon, called only when the caller has
    /// confirmed it's the NM's assigned `CONTROL_TX` slot (spec §4.4).
    pub fn build_beacon(&self, scheduler: &SchedulerClock) -> SyncBeaconHeader {
        let sf = scheduler.superframe();
        SyncBeaconHeader {
            destination: 0xFFFF,
            source: self.self_address,
            network_id: self.network_id,
            total_slots: sf.total_slots.min(u8::MAX as u16) as u8,
            slot_duration_ms: sf.slot_duration_ms.min(u16::MAX as u32) as u16,
            network_manager: self.network_manager,
            hop_count: 0,
            propagation_delay_ms: 0,
            max_hops: self.config.max_hops,
        }
    }

    /// `own_hop_count == beacon.hop_count + 1 AND beacon.hop_count <
    /// max_hops` (spec §4.4 `ShouldBeForwardedBy`).
    pub fn should_forward(&self, beacon: &SyncBeaconHeader) -> bool {
        self.own_hop_count == beacon.hop_count.saturating_add(1) && beacon.hop_count < beacon.max_hops
    }

    /// Apply the forwarding transform: source = self, hop_count += 1,
    /// accumulated delay += processing + time-on-air (spec §4.4).
    pub fn prepare_forwarded_beacon(&self, beacon: &SyncBeaconHeader, time_on_air_ms: u32) -> SyncBeaconHeader {
        let mut forwarded = *beacon;
        forwarded.source = self.self_address;
        forwarded.hop_count = beacon.hop_count.saturating_add(1);
        forwarded.propagation_delay_ms = beacon
            .propagation_delay_ms
            .saturating_add(self.config.processing_delay_ms)
            .saturating_add(time_on_air_ms);
        forwarded
    }

    /// Process a received sync beacon (spec §4.4): NM election/conflict
    /// resolution, hop-count/anchor update, and whether it should be
    /// forwarded. Returns the event (if the node's state changed) and
    /// whether the caller should forward the (possibly transformed) beacon.
    ///
    /// `reception_time_ms` is this node's local clock at the moment the
    /// beacon was fully received. The beacon wire format (SPEC_FULL.md §E)
    /// carries no explicit "NM slot index at transmission" field, so this
    /// resolves that gap by using the superframe's first `CONTROL` slot
    /// index as the NM's well-known beacon slot (the NM always sends its
    /// beacon from a `CONTROL_TX` slot it owns, and the slot table layout
    /// fixes that index network-wide).
    pub fn on_beacon_received(
        &mut self,
        beacon: &SyncBeaconHeader,
        reception_time_ms: u32,
        scheduler: &mut SchedulerClock,
    ) -> (Option<SyncEvent>, bool) {
        self.last_beacon_heard_ms = Some(reception_time_ms);

        if self.state == SyncState::NetworkManager {
            if beacon.network_manager < self.self_address {
                self.migrate_to(beacon, reception_time_ms, scheduler);
                return (Some(SyncEvent::DemotedToNormalOperation), self.should_forward(beacon));
            }
            return (None, false);
        }

        if self.state == SyncState::Discovery {
            self.migrate_to(beacon, reception_time_ms, scheduler);
            return (Some(SyncEvent::JoinedNetwork { network_manager: self.network_manager }), self.should_forward(beacon));
        }

        // Normal_Operation.
        let different_nm = beacon.network_manager != self.network_manager;
        let lower_nm = beacon.network_manager < self.network_manager;
        let same_nm_lower_network = beacon.network_manager == self.network_manager && beacon.network_id < self.network_id;
        if different_nm && lower_nm || same_nm_lower_network {
            self.migrate_to(beacon, reception_time_ms, scheduler);
            return (Some(SyncEvent::MigratedToBetterNetwork { network_manager: self.network_manager }), self.should_forward(beacon));
        }
        if different_nm {
            // Higher-addressed NM than ours: ignore for election purposes,
            // but still candidate for forwarding per hop-count rule.
            return (None, self.should_forward(beacon));
        }

        let mut event = None;
        if beacon.hop_count < self.own_hop_count {
            self.own_hop_count = beacon.hop_count.saturating_add(1);
            self.realign_clock(beacon, reception_time_ms, scheduler);
            event = Some(SyncEvent::JoinedNetwork { network_manager: self.network_manager });
        }
        (event, self.should_forward(beacon))
    }

    fn migrate_to(&mut self, beacon: &SyncBeaconHeader, reception_time_ms: u32, scheduler: &mut SchedulerClock) {
        self.state = SyncState::NormalOperation;
        self.network_manager = beacon.network_manager;
        self.network_id = beacon.network_id;
        self.own_hop_count = beacon.hop_count.saturating_add(1);
        self.realign_clock(beacon, reception_time_ms, scheduler);
    }

    fn realign_clock(&self, beacon: &SyncBeaconHeader, reception_time_ms: u32, scheduler: &mut SchedulerClock) {
        let t_tx = reception_time_ms.saturating_sub(beacon.propagation_delay_ms);
        let sf = scheduler.superframe();
        let nm_control_slot = sf
            .data_slots
            .saturating_add(sf.discovery_slots)
            .min(sf.total_slots.saturating_sub(1));
        scheduler.synchronize_with(t_tx, nm_control_slot);
        scheduler.mark_synchronized();
    }
}
