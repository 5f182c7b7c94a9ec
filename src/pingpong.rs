//! PingPong protocol (C9).

use crate::error::{LoraMesherError, Result};
use crate::wire::PingPongHeader;

pub const DEFAULT_PING_TIMEOUT_MS: u32 = 1_000;
pub const DEFAULT_TIMEOUT_CHECK_INTERVAL_MS: u32 = 1_000;

/// Bound on concurrently outstanding pings this node tracks (spec §4.8
/// `PendingPing`); a node with more in flight than this rejects `send_ping`.
pub const MAX_PENDING_PINGS: usize = 8;

struct PendingPing {
    destination: u16,
    sequence_number: u16,
    sent_at_ms: u32,
    timeout_ms: u32,
}

/// Outcome handed to the application's `on_complete` callback (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PingResult {
    pub peer: u16,
    pub rtt_ms: u32,
    pub success: bool,
}

/// What the caller should do as a result of processing an event (spec
/// §4.8): emit a wire frame, or surface a completed ping to the
/// application. I/O and the application callback itself stay with the
/// caller, matching `ForwardingEngine`/`SyncService`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PingPongAction {
    SendFrame(PingPongHeader),
    Complete(PingResult),
}

/// Request/response RTT measurement over the mesh (C9).
pub struct PingPongService {
    self_address: u16,
    next_sequence_number: u16,
    pending: heapless::Vec<PendingPing, MAX_PENDING_PINGS>,
}

impl PingPongService {
    pub fn new(self_address: u16) -> Self {
        PingPongService {
            self_address,
            next_sequence_number: 0,
            pending: heapless::Vec::new(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// `send_ping(destination, timeout_ms)` (spec §4.8): allocate a sequence
    /// number, record a `PendingPing`, and return the CONTROL/PING frame to
    /// transmit. The caller supplies `now_ms` as the send timestamp (this
    /// crate's explicit clock model) and is responsible for invoking
    /// `on_complete` when a later call returns `PingPongAction::Complete`.
    pub fn send_ping(&mut self, destination: u16, timeout_ms: u32, now_ms: u32) -> Result<PingPongHeader> {
        if self.pending.is_full() {
            return Err(LoraMesherError::BufferOverflow);
        }
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number = self.next_sequence_number.wrapping_add(1);
        let _ = self.pending.push(PendingPing {
            destination,
            sequence_number,
            sent_at_ms: now_ms,
            timeout_ms,
        });
        Ok(PingPongHeader {
            destination,
            source: self.self_address,
            is_ping: true,
            sequence_number,
            timestamp_ms: now_ms,
        })
    }

    /// Process a received PING/PONG header (spec §4.8).
    pub fn on_receive(&mut self, header: &PingPongHeader, now_ms: u32) -> Option<PingPongAction> {
        if header.is_ping {
            if header.destination != self.self_address {
                return None;
            }
            return Some(PingPongAction::SendFrame(PingPongHeader {
                destination: header.source,
                source: self.self_address,
                is_ping: false,
                sequence_number: header.sequence_number,
                timestamp_ms: header.timestamp_ms,
            }));
        }

        if header.destination != self.self_address {
            return None;
        }
        let idx = self
            .pending
            .iter()
            .position(|p| p.destination == header.source && p.sequence_number == header.sequence_number)?;
        let entry = self.pending.swap_remove(idx);
        let rtt_ms = now_ms.saturating_sub(entry.sent_at_ms);
        Some(PingPongAction::Complete(PingResult {
            peer: header.source,
            rtt_ms,
            success: true,
        }))
    }

    /// Timeout sweep (spec §4.8): called every `timeout_check_interval_ms`.
    /// Returns one `Complete(success=false)` per pending ping that expired.
    pub fn tick(&mut self, now_ms: u32) -> heapless::Vec<PingResult, MAX_PENDING_PINGS> {
        let mut expired = heapless::Vec::new();
        self.pending.retain(|p| {
            let timed_out = now_ms.saturating_sub(p.sent_at_ms) > p.timeout_ms;
            if timed_out {
                let _ = expired.push(PingResult {
                    peer: p.destination,
                    rtt_ms: 0,
                    success: false,
                });
            }
            !timed_out
        });
        expired
    }

    /// `stop()` cancellation (spec §5): every outstanding ping completes
    /// immediately with `success=false, rtt=0`.
    pub fn stop(&mut self) -> heapless::Vec<PingResult, MAX_PENDING_PINGS> {
        let mut cancelled = heapless::Vec::new();
        for p in self.pending.iter() {
            let _ = cancelled.push(PingResult {
                peer: p.destination,
                rtt_ms: 0,
                success: false,
            });
        }
        self.pending.clear();
        cancelled
    }
}
