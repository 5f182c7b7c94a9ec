//! Scheduler clock & superframe (C4).
//!
//! Every operation takes the platform time explicitly as `now_ms: u32`
//! (Design Notes §9 clock model) so the whole module is driven and tested
//! without any real time source.

use crate::error::{LoraMesherError, Result};

pub const DEFAULT_TOTAL_SLOTS: u16 = 100;
pub const DEFAULT_SLOT_DURATION_MS: u32 = 1000;
pub const MIN_SLOT_DURATION_MS: u32 = 10;
pub const MAX_SLOT_DURATION_MS: u32 = 60_000;
/// Bound on `Superframe::total_slots`; also the capacity of `SlotTable`.
pub const MAX_TOTAL_SLOTS: usize = 256;

/// The role a slot plays for the owning node (spec §3 `SlotAllocation`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotType {
    Tx,
    Rx,
    DiscoveryTx,
    DiscoveryRx,
    ControlTx,
    ControlRx,
    Sleep,
}

/// `{slot_index, slot_type}` — one entry of a node's `slot_table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotAllocation {
    pub slot_index: u16,
    pub slot_type: SlotType,
}

/// Per-node assignment of a `SlotType` to every index of the superframe.
/// Bounded by `MAX_TOTAL_SLOTS`; indices beyond `total_slots` are unused.
#[derive(Debug, Clone)]
pub struct SlotTable {
    slots: heapless::Vec<SlotType, MAX_TOTAL_SLOTS>,
}

impl SlotTable {
    /// Build the canonical table the NM publishes (spec §3): data slots
    /// first (alternating TX/RX would require peer coordination the spec
    /// doesn't define, so all data slots are RX by default and the
    /// forwarding engine claims specific indices via `set`), then
    /// discovery, then control, then sleep for the remainder.
    pub fn new(superframe: &Superframe) -> Self {
        let mut slots = heapless::Vec::new();
        for i in 0..superframe.total_slots {
            let kind = if i < superframe.data_slots {
                SlotType::Rx
            } else if i < superframe.data_slots + superframe.discovery_slots {
                SlotType::DiscoveryRx
            } else if i < superframe.data_slots + superframe.discovery_slots + superframe.control_slots {
                SlotType::ControlRx
            } else {
                SlotType::Sleep
            };
            let _ = slots.push(kind);
        }
        SlotTable { slots }
    }

    pub fn get(&self, slot_index: u16) -> SlotType {
        self.slots
            .get(slot_index as usize)
            .copied()
            .unwrap_or(SlotType::Sleep)
    }

    pub fn set(&mut self, slot_index: u16, slot_type: SlotType) {
        if let Some(slot) = self.slots.get_mut(slot_index as usize) {
            *slot = slot_type;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// The repeating cycle of slots every node schedules against (spec §3).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Superframe {
    pub total_slots: u16,
    pub data_slots: u16,
    pub discovery_slots: u16,
    pub control_slots: u16,
    pub slot_duration_ms: u32,
    /// NM's local time at which the current cycle began; non-NMs store
    /// their own estimate of this anchor.
    pub start_time_ms: u32,
}

impl Default for Superframe {
    fn default() -> Self {
        Superframe {
            total_slots: DEFAULT_TOTAL_SLOTS,
            data_slots: 70,
            discovery_slots: 20,
            control_slots: 10,
            slot_duration_ms: DEFAULT_SLOT_DURATION_MS,
            start_time_ms: 0,
        }
    }
}

impl Superframe {
    pub fn validate(&self) -> Result<()> {
        if self.total_slots == 0 || self.total_slots as usize > MAX_TOTAL_SLOTS {
            return Err(LoraMesherError::Configuration);
        }
        let assigned = self.data_slots as u32 + self.discovery_slots as u32 + self.control_slots as u32;
        if assigned > self.total_slots as u32 {
            return Err(LoraMesherError::Configuration);
        }
        if self.slot_duration_ms < MIN_SLOT_DURATION_MS || self.slot_duration_ms > MAX_SLOT_DURATION_MS {
            return Err(LoraMesherError::Configuration);
        }
        Ok(())
    }

    /// `total_slots × slot_duration_ms`.
    pub fn duration_ms(&self) -> u32 {
        self.total_slots as u32 * self.slot_duration_ms
    }
}

/// Drives the slot grid: tracks the current slot index and detects
/// superframe rollovers, applying external sync adjustments.
#[derive(Debug, Clone)]
pub struct SchedulerClock {
    superframe: Superframe,
    running: bool,
    /// `(slot_index, superframe_count)` as of the last `current_slot` call,
    /// used to detect edges for `is_new_superframe`.
    last_slot: u16,
    last_superframe_count: u32,
    /// Set by a non-NM that hasn't heard a beacon within its holdover window.
    unsynchronized: bool,
}

impl SchedulerClock {
    pub fn new(superframe: Superframe) -> Self {
        SchedulerClock {
            superframe,
            running: false,
            last_slot: 0,
            last_superframe_count: 0,
            unsynchronized: false,
        }
    }

    pub fn superframe(&self) -> &Superframe {
        &self.superframe
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_unsynchronized(&self) -> bool {
        self.unsynchronized
    }

    pub fn mark_unsynchronized(&mut self) {
        self.unsynchronized = true;
    }

    pub fn mark_synchronized(&mut self) {
        self.unsynchronized = false;
    }

    pub fn start(&mut self, now_ms: u32) {
        self.superframe.start_time_ms = now_ms;
        self.running = true;
        self.last_slot = 0;
        self.last_superframe_count = 0;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// `((now - start_time_ms) / slot_duration_ms) mod total_slots`, or `0`
    /// if `now < start_time_ms` (spec §4.3 algorithm).
    pub fn current_slot(&self, now_ms: u32) -> u16 {
        if now_ms < self.superframe.start_time_ms || self.superframe.total_slots == 0 {
            return 0;
        }
        let elapsed = now_ms - self.superframe.start_time_ms;
        ((elapsed / self.superframe.slot_duration_ms) % self.superframe.total_slots as u32) as u16
    }

    /// Elapsed time within the current slot.
    pub fn time_in_slot(&self, now_ms: u32) -> u32 {
        if now_ms < self.superframe.start_time_ms {
            return 0;
        }
        let elapsed = now_ms - self.superframe.start_time_ms;
        elapsed % self.superframe.slot_duration_ms
    }

    fn superframe_count(&self, now_ms: u32) -> u32 {
        if now_ms < self.superframe.start_time_ms {
            return 0;
        }
        let elapsed = now_ms - self.superframe.start_time_ms;
        elapsed / self.superframe.slot_duration_ms / self.superframe.total_slots.max(1) as u32
    }

    /// `true` exactly once per superframe cycle, the first time `now_ms`
    /// lands in a new cycle since the clock last observed one.
    pub fn is_new_superframe(&mut self, now_ms: u32) -> bool {
        let count = self.superframe_count(now_ms);
        let is_new = count != self.last_superframe_count;
        self.last_superframe_count = count;
        is_new
    }

    /// Advances the anchor by exactly one superframe duration (auto-advance,
    /// spec §4.3).
    pub fn advance_to_next_superframe(&mut self) {
        self.superframe.start_time_ms = self
            .superframe
            .start_time_ms
            .wrapping_add(self.superframe.duration_ms());
    }

    /// External sync adjustment: re-anchor so that local `current_slot ==
    /// remote_slot_index` at `nm_tx_time_ms` (spec §4.3). Monotone-safe:
    /// moving the anchor backwards in wall time is the expected case when
    /// the local clock drifted ahead, so it's always accepted.
    pub fn synchronize_with(&mut self, nm_tx_time_ms: u32, remote_slot_index: u16) {
        let offset = remote_slot_index as u32 * self.superframe.slot_duration_ms;
        self.superframe.start_time_ms = nm_tx_time_ms.wrapping_sub(offset);
        self.mark_synchronized();
    }

    /// Fires a `(slot_index, new_superframe)` notification if either the
    /// slot index or the superframe generation changed since the last call.
    /// Returns `None` when nothing changed (no boundary crossed).
    pub fn poll(&mut self, now_ms: u32) -> Option<(u16, bool)> {
        let slot = self.current_slot(now_ms);
        let new_superframe = self.is_new_superframe(now_ms);
        if slot == self.last_slot && !new_superframe {
            return None;
        }
        self.last_slot = slot;
        Some((slot, new_superframe))
    }

    pub fn slot_type(&self, table: &SlotTable, slot_index: u16) -> SlotType {
        table.get(slot_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> SchedulerClock {
        let sf = Superframe {
            total_slots: 10,
            data_slots: 6,
            discovery_slots: 2,
            control_slots: 2,
            slot_duration_ms: 100,
            start_time_ms: 0,
        };
        SchedulerClock::new(sf)
    }

    #[test]
    fn current_slot_before_start_is_zero() {
        let mut c = clock();
        c.start(1000);
        assert_eq!(c.current_slot(500), 0);
    }

    #[test]
    fn current_slot_advances_and_wraps() {
        let mut c = clock();
        c.start(0);
        assert_eq!(c.current_slot(0), 0);
        assert_eq!(c.current_slot(250), 2);
        assert_eq!(c.current_slot(999), 9);
        // one full superframe (1000ms) wraps back to slot 0
        assert_eq!(c.current_slot(1000), 0);
        assert_eq!(c.current_slot(1050), 0);
        assert_eq!(c.current_slot(1250), 2);
    }

    #[test]
    fn time_in_slot_is_remainder() {
        let mut c = clock();
        c.start(0);
        assert_eq!(c.time_in_slot(250), 50);
        assert_eq!(c.time_in_slot(999), 99);
    }

    #[test]
    fn is_new_superframe_fires_once_per_cycle() {
        let mut c = clock();
        c.start(0);
        assert!(!c.is_new_superframe(0)); // initial cycle, count 0 == last 0
        assert!(!c.is_new_superframe(500));
        assert!(c.is_new_superframe(1000)); // crossed into cycle 1
        assert!(!c.is_new_superframe(1500));
        assert!(c.is_new_superframe(2000));
    }

    #[test]
    fn advance_to_next_superframe_adds_one_cycle() {
        let mut c = clock();
        c.start(0);
        c.advance_to_next_superframe();
        assert_eq!(c.superframe().start_time_ms, 1000);
    }

    #[test]
    fn synchronize_with_anchors_to_remote_slot() {
        let mut c = clock();
        c.start(0);
        // Remote says: at T=5000, it was at slot 3.
        c.synchronize_with(5000, 3);
        assert_eq!(c.current_slot(5000), 3);
        assert!(!c.is_unsynchronized());
    }

    #[test]
    fn synchronize_with_accepts_backwards_anchor_move() {
        let mut c = clock();
        c.start(10_000); // anchor way ahead of remote
        c.synchronize_with(100, 0);
        assert_eq!(c.superframe().start_time_ms, 100);
    }

    #[test]
    fn poll_emits_boundary_exactly_once_per_change() {
        let mut c = clock();
        c.start(0);
        assert_eq!(c.poll(0), None); // initial slot 0, no change from default last_slot=0... see below
        assert_eq!(c.poll(100), Some((1, false)));
        assert_eq!(c.poll(100), None);
        assert_eq!(c.poll(150), None);
        assert_eq!(c.poll(200), Some((2, false)));
    }

    #[test]
    fn slot_table_assigns_classes_in_order() {
        let sf = Superframe {
            total_slots: 10,
            data_slots: 6,
            discovery_slots: 2,
            control_slots: 2,
            slot_duration_ms: 100,
            start_time_ms: 0,
        };
        let table = SlotTable::new(&sf);
        assert_eq!(table.get(0), SlotType::Rx);
        assert_eq!(table.get(5), SlotType::Rx);
        assert_eq!(table.get(6), SlotType::DiscoveryRx);
        assert_eq!(table.get(7), SlotType::DiscoveryRx);
        assert_eq!(table.get(8), SlotType::ControlRx);
        assert_eq!(table.get(9), SlotType::ControlRx);
        assert_eq!(table.get(10), SlotType::Sleep); // out of range
    }

    #[test]
    fn degenerate_single_slot_superframe_is_legal() {
        let sf = Superframe {
            total_slots: 1,
            data_slots: 1,
            discovery_slots: 0,
            control_slots: 0,
            slot_duration_ms: 100,
            start_time_ms: 0,
        };
        assert_eq!(sf.validate(), Ok(()));
        let mut c = SchedulerClock::new(sf);
        c.start(0);
        assert_eq!(c.current_slot(350), 0);
    }

    #[test]
    fn invalid_superframe_is_rejected() {
        let mut sf = Superframe::default();
        sf.data_slots = sf.total_slots; // + discovery + control now overflows
        assert_eq!(sf.validate(), Err(LoraMesherError::Configuration));

        let mut sf2 = Superframe::default();
        sf2.slot_duration_ms = 0;
        assert_eq!(sf2.validate(), Err(LoraMesherError::Configuration));
    }
}
