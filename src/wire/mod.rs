//! Wire codec (C1): little-endian frame encode/decode.
//!
//! Frame layout is always `BaseHeader ‖ typed extension (if any) ‖ payload`.
//! Every header exposes `serialize(buf) -> Result<usize, LoraMesherError>`
//! (returns the number of bytes written) and `deserialize(buf) ->
//! Option<Self>`, following the `cmd_*` buffer-building style of the
//! `lr2021` command set but little-endian per spec §6.1 instead of the
//! modem's big-endian register convention.

mod base;
mod pingpong;
mod routing;
mod sync_beacon;

pub use base::{BaseHeader, BaseMessage, MessageType};
pub use pingpong::PingPongHeader;
pub use routing::RoutingHeader;
pub use sync_beacon::SyncBeaconHeader;

pub const MAX_PAYLOAD_LEN: usize = 255;

/// Maximum size in bytes of any frame this crate ever builds: base header +
/// the largest extension (sync beacon, 13 B) + the largest payload.
pub const MAX_FRAME_LEN: usize = BaseHeader::WIRE_LEN + SyncBeaconHeader::EXT_LEN + MAX_PAYLOAD_LEN;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_frame_len_matches_sum() {
        assert_eq!(MAX_FRAME_LEN, 6 + 13 + 255);
    }
}
