//! Top-level application facade (spec §6.4).
//!
//! Wires C2/C3 (radio), C4 (scheduler), and the C5–C9 protocol manager
//! behind the `start`/`stop`/`send`/`send_ping`/`get_routing_table`/
//! `get_network_status`/`get_slot_table` commands, running spec §5's
//! single-worker cooperative loop as an `embassy_executor` task — the same
//! shape `lr2021-apps`'s `board::blink`/`user_intf` tasks take: own the
//! hardware handle, loop, yield at `Timer::after`.
//!
//! Slot-boundary TX dispatch (data/forwarded frames queued and drained at
//! the node's own TX slots, subject to the airtime admission check; sync
//! beacons and ping-pong control frames sent opportunistically as soon as
//! the protocol layer produces them) stays inside `run`, so the rest of the
//! crate never depends on `embassy`.

use embassy_time::{Instant, Timer};

use crate::config::{ProtocolConfig, RadioConfig};
use crate::error::{LoraMesherError, Result};
use crate::forwarding::ForwardAction;
use crate::pingpong::PingPongAction;
use crate::protocol::{NetworkStatus, ProtocolEvent, ProtocolManager, ProtocolType, RoutingObserver};
use crate::radio::{RadioDriver, RadioEvent, RadioManager};
use crate::routing::RoutingTable;
use crate::scheduler::{SlotTable, SlotType};
use crate::sync::SyncState;
use crate::wire::{BaseMessage, PingPongHeader, SyncBeaconHeader};

/// Bound on outbound DATA/forwarded frames awaiting their node's TX slot.
pub const TX_QUEUE_CAPACITY: usize = 8;

/// Worker loop poll granularity. Slot durations are `>= MIN_SLOT_DURATION_MS`
/// (10 ms, `scheduler::MIN_SLOT_DURATION_MS`), so polling every 5 ms keeps
/// slot-boundary and radio-event latency well under one slot.
pub const WORKER_POLL_INTERVAL_MS: u64 = 5;

fn now_ms() -> u32 {
    Instant::now().as_millis() as u32
}

/// Owns the radio and protocol state for one node and runs the single
/// cooperative worker spec §5 requires: one task drains the radio event
/// queue, drives slot-boundary transitions, and calls back into the
/// application. All state lives behind `&mut self`, so there is exactly one
/// writer — no mutex needed, matching the `RadioManager` single-writer rule.
pub struct LoraMesher<D: RadioDriver, O: RoutingObserver> {
    radio: RadioManager<D>,
    protocol: ProtocolManager<O>,
    config: ProtocolConfig,
    slot_table: SlotTable,
    tx_queue: heapless::Deque<BaseMessage, TX_QUEUE_CAPACITY>,
    on_data_received: Option<fn(u16, &[u8])>,
    on_ping_complete: Option<fn(u16, u32, bool)>,
    on_radio_fault: Option<fn(LoraMesherError)>,
}

impl<D: RadioDriver, O: RoutingObserver> LoraMesher<D, O> {
    pub fn new(
        driver: D,
        radio_config: RadioConfig,
        protocol_config: ProtocolConfig,
        stable_system_id: u32,
        observer: O,
    ) -> Result<Self> {
        radio_config.validate()?;
        protocol_config.validate()?;
        let slot_table = SlotTable::new(&protocol_config.superframe);
        Ok(LoraMesher {
            radio: RadioManager::new(driver, radio_config),
            protocol: ProtocolManager::new(&protocol_config, stable_system_id, observer),
            config: protocol_config,
            slot_table,
            tx_queue: heapless::Deque::new(),
            on_data_received: None,
            on_ping_complete: None,
            on_radio_fault: None,
        })
    }

    pub fn node_address(&self) -> u16 {
        self.protocol.node_address()
    }

    pub fn set_on_data_received(&mut self, callback: fn(u16, &[u8])) {
        self.on_data_received = Some(callback);
    }

    pub fn set_on_ping_complete(&mut self, callback: fn(u16, u32, bool)) {
        self.on_ping_complete = Some(callback);
    }

    pub fn set_on_radio_fault(&mut self, callback: fn(LoraMesherError)) {
        self.on_radio_fault = Some(callback);
    }

    pub fn set_error_handler(&mut self, handler: fn(ProtocolType, LoraMesherError)) {
        self.protocol.set_error_handler(handler);
    }

    pub fn observer_mut(&mut self) -> &mut O {
        self.protocol.observer_mut()
    }

    /// spec §6.4 `start`: bring the radio up in RX and start the protocol
    /// manager (sync first, per SPEC_FULL.md §E).
    pub async fn start(&mut self) -> Result<()> {
        self.radio.start_receive().await?;
        self.protocol.start(now_ms());
        Ok(())
    }

    /// spec §6.4 `stop` / spec §5 reverse-order teardown: cancel outstanding
    /// pings, tear down the protocol state, then sleep the radio. Idempotent.
    pub async fn stop(&mut self) -> heapless::Vec<crate::pingpong::PingResult, { crate::pingpong::MAX_PENDING_PINGS }> {
        let cancelled = self.protocol.stop();
        self.tx_queue.clear();
        let _ = self.radio.sleep().await;
        cancelled
    }

    /// spec §6.4 `send`: resolve the next hop and queue the frame for this
    /// node's next TX slot. Returns once the frame is accepted into the
    /// bounded queue, not once it's on air.
    pub fn send(&mut self, destination: u16, payload: &[u8]) -> Result<()> {
        let (message, _next_hop) = self.protocol.send(destination, payload)?;
        self.tx_queue
            .push_back(message)
            .map_err(|_| LoraMesherError::BufferOverflow)
    }

    /// spec §6.4 `send_ping`: ping-pong control frames aren't slot-gated —
    /// small request/response traffic the original sends opportunistically,
    /// like a forwarded sync beacon, rather than queueing behind a full
    /// superframe rotation.
    pub async fn send_ping(&mut self, destination: u16, timeout_ms: u32) -> Result<()> {
        let header = self.protocol.send_ping(destination, timeout_ms, now_ms())?;
        let mut buf = [0u8; PingPongHeader::WIRE_LEN];
        let n = header.serialize(&mut buf)?;
        self.radio.send_raw(&buf[..n]).await
    }

    /// spec §6.4 `get_routing_table`.
    pub fn get_routing_table(&self) -> &RoutingTable {
        self.protocol.hello().table()
    }

    /// spec §6.4 `get_network_status`.
    pub fn get_network_status(&self) -> NetworkStatus {
        self.protocol.network_status(now_ms())
    }

    /// spec §6.4 `get_slot_table`. Every node computes the canonical table
    /// locally from its (statically shared) superframe parameters rather
    /// than receiving it over a control frame: the wire format has no slot
    /// table dissemination frame (spec §3 "NM publishes the canonical
    /// table" names no wire encoding for it), and parameters are fixed at
    /// configuration time, so the locally-built table already matches the
    /// NM's.
    pub fn get_slot_table(&self) -> &SlotTable {
        &self.slot_table
    }

    /// The single cooperative worker (spec §5): drains the radio event
    /// queue, advances the slot clock, and periodically sweeps maintenance.
    /// Never returns; intended to be the body of an `embassy_executor` task.
    pub async fn run(&mut self) -> ! {
        loop {
            let now = now_ms();

            if let Some((slot_index, _new_superframe)) = self.protocol.scheduler_mut().poll(now) {
                self.on_slot_boundary(slot_index, now).await;
            }

            self.radio.poll_driver(now);
            while let Some(event) = self.radio.events_mut().pop() {
                self.handle_radio_event(event).await;
            }

            for result in self.protocol.tick(now, self.config.route_timeout_ms) {
                if let Some(callback) = self.on_ping_complete {
                    callback(result.peer, result.rtt_ms, result.success);
                }
            }

            Timer::after_millis(WORKER_POLL_INTERVAL_MS).await;
        }
    }

    /// Drive the radio to match the role of the slot just entered (spec
    /// §4.3 slot-boundary callback, §4.4 NM beacon emission, §4.6 TX drain).
    async fn on_slot_boundary(&mut self, slot_index: u16, now_ms: u32) {
        match self.slot_table.get(slot_index) {
            SlotType::ControlTx => {
                if self.protocol.sync().state() == SyncState::NetworkManager {
                    let beacon = self.protocol.sync().build_beacon(self.protocol.scheduler());
                    let mut buf = [0u8; SyncBeaconHeader::WIRE_LEN];
                    if let Ok(n) = beacon.serialize(&mut buf) {
                        let _ = self.radio.send_raw(&buf[..n]).await;
                    }
                }
                let _ = self.radio.start_receive().await;
            }
            SlotType::Tx | SlotType::DiscoveryTx => {
                if let Some(message) = self.tx_queue.pop_front() {
                    let mut buf = [0u8; crate::wire::MAX_FRAME_LEN];
                    let slot_duration_ms = self.protocol.scheduler().superframe().slot_duration_ms;
                    let remaining = slot_duration_ms.saturating_sub(self.protocol.scheduler().time_in_slot(now_ms));
                    let fits = message
                        .serialize(&mut buf)
                        .map(|n| self.radio.fits_in_remaining_slot(n, remaining, self.config.guard_time_ms))
                        .unwrap_or(false);
                    if fits {
                        let _ = self.radio.send(&message).await;
                    } else {
                        // Doesn't fit this slot: give it back for the next one.
                        let _ = self.tx_queue.push_front(message);
                    }
                }
            }
            SlotType::Rx | SlotType::DiscoveryRx | SlotType::ControlRx => {
                let _ = self.radio.start_receive().await;
            }
            SlotType::Sleep => {
                let _ = self.radio.sleep().await;
            }
        }
    }

    async fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Received { frame, rssi, snr, timestamp_ms } => {
                let time_on_air = self.radio.time_on_air(frame.len());
                let outcome = self.protocol.dispatch(&frame, rssi, snr, timestamp_ms, time_on_air);
                self.handle_protocol_event(outcome).await;
            }
            RadioEvent::CrcError => self.report_radio_fault(LoraMesherError::CrcError),
            RadioEvent::RxError | RadioEvent::ReceivedTimeout => self.report_radio_fault(LoraMesherError::Reception),
            RadioEvent::TxError | RadioEvent::TransmittedTimeout => self.report_radio_fault(LoraMesherError::Transmission),
            RadioEvent::Transmitted { .. }
            | RadioEvent::PreambleDetected
            | RadioEvent::SyncWordValid
            | RadioEvent::HeaderValid
            | RadioEvent::HeaderError
            | RadioEvent::Noise
            | RadioEvent::CadDone
            | RadioEvent::CadDetected => {}
        }
    }

    async fn handle_protocol_event(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Sync { forward_beacon, .. } => {
                if let Some(beacon) = forward_beacon {
                    let mut buf = [0u8; SyncBeaconHeader::WIRE_LEN];
                    if let Ok(n) = beacon.serialize(&mut buf) {
                        let _ = self.radio.send_raw(&buf[..n]).await;
                    }
                }
            }
            ProtocolEvent::Forward(action) => self.handle_forward_action(action),
            ProtocolEvent::PingPong(action) => self.handle_pingpong_action(action).await,
            ProtocolEvent::RouteChanges(_)
            | ProtocolEvent::ControlNotification { .. }
            | ProtocolEvent::Dropped
            | ProtocolEvent::UnknownType => {}
        }
    }

    fn handle_forward_action(&mut self, action: ForwardAction) {
        match action {
            ForwardAction::DeliverToApplication { source, payload } => {
                if let Some(callback) = self.on_data_received {
                    callback(source, &payload);
                }
            }
            ForwardAction::DeliverAndRebroadcast { source, payload, message } => {
                if let Some(callback) = self.on_data_received {
                    callback(source, &payload);
                }
                let _ = self.tx_queue.push_back(message);
            }
            ForwardAction::Forward { message, .. } => {
                let _ = self.tx_queue.push_back(message);
            }
            ForwardAction::Drop | ForwardAction::EmitLost { .. } => {}
        }
    }

    async fn handle_pingpong_action(&mut self, action: PingPongAction) {
        match action {
            PingPongAction::SendFrame(header) => {
                let mut buf = [0u8; PingPongHeader::WIRE_LEN];
                if let Ok(n) = header.serialize(&mut buf) {
                    let _ = self.radio.send_raw(&buf[..n]).await;
                }
            }
            PingPongAction::Complete(result) => {
                if let Some(callback) = self.on_ping_complete {
                    callback(result.peer, result.rtt_ms, result.success);
                }
            }
        }
    }

    fn report_radio_fault(&self, error: LoraMesherError) {
        if let Some(callback) = self.on_radio_fault {
            callback(error);
        }
    }
}
