//! Radio and protocol configuration (spec §6.2, §6.3).
//!
//! Plain `Copy` parameter structs validated once at `configure()` /
//! `ProtocolConfig::validate()`, in the style of `lr2021::lora::set_lora_modulation`'s
//! parameter set rather than a builder crate.

use crate::error::{LoraMesherError, Result};
use crate::scheduler::Superframe;

/// Radio modem parameters (spec §6.2). The modem register driver itself is
/// out of scope; this struct is the contract a `RadioDriver` implementation
/// is configured with.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioConfig {
    pub frequency_mhz: f32,
    pub spreading_factor: u8,
    pub bandwidth_khz: f32,
    pub coding_rate: u8,
    pub power_dbm: i8,
    pub sync_word: u8,
    pub crc_enabled: bool,
    pub preamble_length: u16,
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig {
            frequency_mhz: 868.0,
            spreading_factor: 7,
            bandwidth_khz: 125.0,
            coding_rate: 5,
            power_dbm: 14,
            sync_word: 0x12,
            crc_enabled: true,
            preamble_length: 8,
        }
    }
}

impl RadioConfig {
    pub fn validate(&self) -> Result<()> {
        if !(150.0..=960.0).contains(&self.frequency_mhz) {
            return Err(LoraMesherError::Configuration);
        }
        if !(6..=12).contains(&self.spreading_factor) {
            return Err(LoraMesherError::Configuration);
        }
        if !(7.8..=500.0).contains(&self.bandwidth_khz) {
            return Err(LoraMesherError::Configuration);
        }
        if !(5..=8).contains(&self.coding_rate) {
            return Err(LoraMesherError::Configuration);
        }
        if !(-4..=22).contains(&self.power_dbm) {
            return Err(LoraMesherError::Configuration);
        }
        Ok(())
    }
}

/// Protocol-level configuration (spec §6.3).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolConfig {
    /// `0` means auto-assign from a stable system identifier.
    pub node_address: u16,
    pub hello_interval_ms: u32,
    pub route_timeout_ms: u32,
    pub max_hops: u8,
    pub discovery_timeout_ms: u32,
    pub max_network_nodes: usize,
    pub superframe: Superframe,
    /// Margin subtracted from the remaining slot time before admitting a
    /// transmission (spec §4.6 slot admission).
    pub guard_time_ms: u32,
    pub ping_timeout_ms: u32,
    pub timeout_check_interval_ms: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            node_address: 0,
            hello_interval_ms: 60_000,
            route_timeout_ms: 180_000,
            max_hops: 10,
            discovery_timeout_ms: 30_000,
            max_network_nodes: 64,
            superframe: Superframe::default(),
            guard_time_ms: 20,
            ping_timeout_ms: 1_000,
            timeout_check_interval_ms: 1_000,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<()> {
        self.superframe.validate()?;
        if self.max_hops == 0 {
            return Err(LoraMesherError::Configuration);
        }
        if self.max_network_nodes == 0 {
            return Err(LoraMesherError::Configuration);
        }
        if self.destination_is_broadcast() {
            return Err(LoraMesherError::Configuration);
        }
        Ok(())
    }

    fn destination_is_broadcast(&self) -> bool {
        self.node_address == 0xFFFF
    }
}
