//! Host-only test doubles (compiled only under `cfg(test)`): a loopback
//! `RadioDriver` and a deterministic virtual clock, so the concrete
//! scenarios in spec.md §8 can be driven without hardware or a real time
//! source.

use crate::config::RadioConfig;
use crate::error::Result;
use crate::radio::{time_on_air_ms, FrameBuffer, RadioDriver, RadioState};

/// Monotonic `now_ms` counter a test advances by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualClock {
    now_ms: u32,
}

impl VirtualClock {
    pub fn new(start_ms: u32) -> Self {
        VirtualClock { now_ms: start_ms }
    }

    pub fn now_ms(&self) -> u32 {
        self.now_ms
    }

    pub fn advance(&mut self, ms: u32) -> u32 {
        self.now_ms = self.now_ms.wrapping_add(ms);
        self.now_ms
    }
}

struct QueuedFrame {
    bytes: heapless::Vec<u8, { crate::wire::MAX_FRAME_LEN }>,
    rssi: i16,
    snr: i8,
}

/// A `RadioDriver` whose "air" is a `Vec` a test can inject into and drain
/// from directly — two instances can be wired to each other's `inbox` to
/// simulate a link.
pub struct LoopbackRadioDriver {
    config: RadioConfig,
    state: RadioState,
    pub sent: heapless::Deque<heapless::Vec<u8, { crate::wire::MAX_FRAME_LEN }>, 16>,
    inbox: heapless::Deque<QueuedFrame, 16>,
    pub last_packet_rssi: i16,
    pub last_packet_snr: i8,
}

impl LoopbackRadioDriver {
    pub fn new() -> Self {
        LoopbackRadioDriver {
            config: RadioConfig::default(),
            state: RadioState::Idle,
            sent: heapless::Deque::new(),
            inbox: heapless::Deque::new(),
            last_packet_rssi: 0,
            last_packet_snr: 0,
        }
    }

    /// Inject a received frame as if the modem had just decoded it.
    pub fn queue_received(&mut self, bytes: &[u8], rssi: i16, snr: i8) {
        let mut stored = heapless::Vec::new();
        let _ = stored.extend_from_slice(bytes);
        let _ = self.inbox.push_back(QueuedFrame {
            bytes: stored,
            rssi,
            snr,
        });
    }

    /// Drain everything sent so far (pops in send order).
    pub fn take_sent(&mut self) -> Option<heapless::Vec<u8, { crate::wire::MAX_FRAME_LEN }>> {
        self.sent.pop_front()
    }
}

impl Default for LoopbackRadioDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioDriver for LoopbackRadioDriver {
    async fn configure(&mut self, config: RadioConfig) -> Result<()> {
        self.config = config;
        Ok(())
    }

    async fn begin(&mut self, config: RadioConfig) -> Result<()> {
        self.configure(config).await
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let mut stored = heapless::Vec::new();
        let _ = stored.extend_from_slice(bytes);
        let _ = self.sent.push_back(stored);
        Ok(())
    }

    async fn start_receive(&mut self) -> Result<()> {
        self.state = RadioState::Receive;
        Ok(())
    }

    async fn sleep(&mut self) -> Result<()> {
        self.state = RadioState::Sleep;
        Ok(())
    }

    fn state(&self) -> RadioState {
        self.state
    }

    fn rssi(&self) -> i16 {
        -90
    }

    fn snr(&self) -> i8 {
        5
    }

    fn last_packet_rssi(&self) -> i16 {
        self.last_packet_rssi
    }

    fn last_packet_snr(&self) -> i8 {
        self.last_packet_snr
    }

    fn is_transmitting(&self) -> bool {
        false
    }

    fn time_on_air(&self, length_bytes: usize) -> u32 {
        time_on_air_ms(&self.config, length_bytes, true)
    }

    fn take_received(&mut self, buf: &mut FrameBuffer) -> Option<(usize, i16, i8)> {
        let frame = self.inbox.pop_front()?;
        buf.clear();
        let _ = buf.extend_from_slice(&frame.bytes);
        self.last_packet_rssi = frame.rssi;
        self.last_packet_snr = frame.snr;
        Some((frame.bytes.len(), frame.rssi, frame.snr))
    }
}
