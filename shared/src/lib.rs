//! # Shared protocol library
//!
//! Wire-level types shared between the authoritative server and anything that
//! speaks its protocol: the opaque [`RawPacket`] transport unit, the tagged
//! [`Message`] payloads exchanged on the main channel, the
//! [`AutohostMessage`] payloads exchanged on the side channel, and the
//! [`ConnectionMetrics`] snapshot shape.
//!
//! The simulation itself (unit/map state, Lua, demo recording) is an external
//! collaborator and has no representation here: this crate only knows how to
//! move bytes across the wire, not what they mean to the game.

pub mod autohost_message;
pub mod message;
pub mod metrics;
pub mod raw_packet;

pub use autohost_message::AutohostMessage;
pub use message::Message;
pub use metrics::ConnectionMetrics;
pub use raw_packet::RawPacket;

/// Hard cap on player slots: participant slots are `[0, MAX_PLAYERS)`.
pub const MAX_PLAYERS: usize = 250;

/// Hard cap on skirmish AI slots.
pub const MAX_AIS: usize = 255;

/// Simulation frames between keyframes / sync-check points.
pub const SERVER_KEYFRAME_INTERVAL: u32 = 16;

/// Base timeout, in simulation frames, before a pending sync entry is treated
/// as a desync candidate.
pub const SYNCCHECK_TIMEOUT: u32 = 300;

/// RTT, in milliseconds, above which `SYNCCHECK_TIMEOUT` is dynamically
/// inflated.
pub const SYNCCHECK_MSG_TIMEOUT: u32 = 400;

/// Default RTT cutoff, in milliseconds, for the redundancy manager's
/// low-latency peer group.
pub const DEFAULT_GROUP_RTT_THRESHOLD_MS: u64 = 50;

/// Default MTU used by transport plugins absent an explicit `mtu` option.
pub const DEFAULT_MTU: usize = 1400;

/// Largest payload a [`RawPacket`] may carry.
pub const MAX_RAW_PACKET_LEN: usize = 65_535;

/// Capacity of the bounded inbound/outbound queues backing a `Connection`.
pub const CONNECTION_QUEUE_CAPACITY: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyframe_cadence_is_sixteen_frames() {
        assert_eq!(SERVER_KEYFRAME_INTERVAL, 16);
    }

    #[test]
    fn max_raw_packet_len_is_max_u16() {
        assert_eq!(MAX_RAW_PACKET_LEN, 65_535);
    }
}
