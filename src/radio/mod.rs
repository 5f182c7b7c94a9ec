//! Radio driver interface & manager (C2, C3).

mod event;
mod manager;

pub use event::{EventQueue, RadioEvent, RadioEventStats, EVENT_QUEUE_CAPACITY};
pub use manager::RadioManager;

use micromath::F32Ext;

use crate::config::RadioConfig;
use crate::error::Result;
use crate::wire::MAX_FRAME_LEN;

/// Radio hardware states (spec §4.2). Any state can transition to `Sleep`;
/// `Receive<->Idle` and `Idle<->Transmit` are expected to complete in under
/// 1 ms; `Receive<->Transmit` may pass through `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioState {
    Idle,
    Receive,
    Transmit,
    Cad,
    Sleep,
    Error,
}

/// The one-packet, bounds-checked buffer passed to/from the driver.
pub type FrameBuffer = heapless::Vec<u8, MAX_FRAME_LEN>;

/// Abstraction over the LoRa modem register driver (out of scope to
/// reimplement, spec §1). Mirrors the shape of `Lr2021`'s command surface —
/// `configure`/`send`/`start_receive`/`sleep` plus parameter and query
/// accessors — generalized to any modem.
///
/// Implementations MAY be blocking or non-blocking; `RadioManager` tolerates
/// either by awaiting every call (spec §4.2).
#[allow(async_fn_in_trait)]
pub trait RadioDriver {
    async fn configure(&mut self, config: RadioConfig) -> Result<()>;
    async fn begin(&mut self, config: RadioConfig) -> Result<()>;
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;
    async fn start_receive(&mut self) -> Result<()>;
    async fn sleep(&mut self) -> Result<()>;

    fn state(&self) -> RadioState;
    fn rssi(&self) -> i16;
    fn snr(&self) -> i8;
    fn last_packet_rssi(&self) -> i16;
    fn last_packet_snr(&self) -> i8;
    fn is_transmitting(&self) -> bool;

    /// Duration in ms the radio would occupy the channel sending
    /// `length_bytes` under the currently configured modulation.
    fn time_on_air(&self, length_bytes: usize) -> u32;

    /// Drain the next decoded reception, if the driver buffered one since
    /// the last poll. The driver's own IRQ handler is expected to be a
    /// promptly-returning, non-blocking action (spec §4.2); this accessor
    /// lets `RadioManager` pull the result of that action without the
    /// driver blocking here.
    fn take_received(&mut self, buf: &mut FrameBuffer) -> Option<(usize, i16, i8)>;
}

/// Time-on-air formula (spec §4.2): `T_symbol = 2^SF / BW_kHz` ms;
/// `T_preamble = (n_preamble + 4.25) * T_symbol`; payload symbol count adds
/// header, CRC and coding-rate overhead. Returns the total duration in ms.
pub fn time_on_air_ms(config: &RadioConfig, length_bytes: usize, explicit_header: bool) -> u32 {
    let t_symbol = (1u32 << config.spreading_factor) as f32 / config.bandwidth_khz;
    let t_preamble = (config.preamble_length as f32 + 4.25) * t_symbol;

    let de = if config.spreading_factor >= 11 { 1.0 } else { 0.0 };
    let header_bits = if explicit_header { 20.0 } else { 0.0 };
    let crc_bits = if config.crc_enabled { 16.0 } else { 0.0 };

    let numerator = 8.0 * length_bytes as f32 - 4.0 * config.spreading_factor as f32 + 28.0
        + crc_bits
        - header_bits;
    let denominator = 4.0 * (config.spreading_factor as f32 - 2.0 * de);
    let rounded_up = (numerator / denominator).ceil();
    let payload_symbols = 8.0 + f32_max(rounded_up, 0.0) * config.coding_rate as f32;

    let t_payload = payload_symbols * t_symbol;
    (t_preamble + t_payload).ceil() as u32
}

/// `f32::max` is `std`-only; `core`'s `f32` has no such method, so this
/// crate's one `no_std` float comparison is spelled out by hand.
fn f32_max(a: f32, b: f32) -> f32 {
    if a > b {
        a
    } else {
        b
    }
}
