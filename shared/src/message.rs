//! Tagged payloads for the main server wire protocol.
//!
//! Each variant corresponds to one row of the wire protocol table. Encoding
//! writes the tag byte first, then the `bincode` serialization of the
//! variant's payload, in the same round-trip style [`crate::RawPacket`]
//! expects from every channel.

use serde::{Deserialize, Serialize};

use crate::raw_packet::{RawPacket, RawPacketError};

/// Tag byte for each wire message, in the order the wire protocol table lists them.
pub mod tag {
    pub const SYNCRESPONSE: u8 = 1;
    pub const CREATE_NEWPLAYER: u8 = 2;
    pub const PING: u8 = 3;
    pub const GAME_FRAME_PROGRESS: u8 = 4;
    pub const GAMESTATE_DUMP: u8 = 5;
    pub const CHAT: u8 = 6;
    pub const PAUSE: u8 = 7;
    pub const KEYFRAME: u8 = 8;
    pub const USER_SPEED: u8 = 9;
    pub const INTERNAL_SPEED: u8 = 10;
    pub const SYSTEM_MESSAGE: u8 = 11;
    pub const REJECT: u8 = 12;
    pub const QUIT: u8 = 13;
    pub const GAME_OVER: u8 = 14;
}

/// Errors decoding a [`RawPacket`] as a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum MessageDecodeError {
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("malformed payload for tag {tag}: {source}")]
    Malformed {
        tag: u8,
        #[source]
        source: bincode::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum MessageEncodeError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] bincode::Error),
    #[error(transparent)]
    RawPacket(#[from] RawPacketError),
}

/// The full set of wire messages the core dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// A player's reply to an open sync-check entry.
    SyncResponse { player: u16, frame: u32, checksum: u32 },
    /// A newly admitted (or AI-hosted) player announcing itself.
    CreateNewPlayer { player: u16, spectator: bool, team: u8, name: String },
    /// RTT probe.
    Ping { player: u16 },
    /// A player acknowledging the frame it has simulated up to.
    GameFrameProgress { player: u16, frame: u32 },
    /// A player's demo/gamestate dump, forwarded to the recorder and broadcast.
    GamestateDump { player: u16, frame: i32 },
    /// Chat text, `dest` following the source's own addressing convention
    /// (0 = all, otherwise a specific player number).
    Chat { player: u16, dest: u16, text: String },
    /// Pause toggle, `on` non-zero meaning paused.
    Pause { player: u16, on: u8 },
    /// Keyframe marker broadcast by the scheduler.
    Keyframe { frame: u32 },
    /// Per-player speed factor, broadcast after `UpdateSpeedControl` changes it.
    UserSpeed { player: u16, speed: f32 },
    /// Server-wide simulation speed, broadcast after `InternalSpeedChange`.
    InternalSpeed { speed: f32 },
    /// Informational text shown to clients (e.g. desync warning).
    SystemMessage { player: u16, text: String },
    /// Join refusal with a human-readable reason.
    Reject { player: u16, reason: String },
    /// Graceful shutdown notice.
    Quit,
    /// Game-over notice naming the player that triggered it.
    GameOver { player: u16 },
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::SyncResponse { .. } => tag::SYNCRESPONSE,
            Message::CreateNewPlayer { .. } => tag::CREATE_NEWPLAYER,
            Message::Ping { .. } => tag::PING,
            Message::GameFrameProgress { .. } => tag::GAME_FRAME_PROGRESS,
            Message::GamestateDump { .. } => tag::GAMESTATE_DUMP,
            Message::Chat { .. } => tag::CHAT,
            Message::Pause { .. } => tag::PAUSE,
            Message::Keyframe { .. } => tag::KEYFRAME,
            Message::UserSpeed { .. } => tag::USER_SPEED,
            Message::InternalSpeed { .. } => tag::INTERNAL_SPEED,
            Message::SystemMessage { .. } => tag::SYSTEM_MESSAGE,
            Message::Reject { .. } => tag::REJECT,
            Message::Quit => tag::QUIT,
            Message::GameOver { .. } => tag::GAME_OVER,
        }
    }

    /// Encodes this message as a tagged [`RawPacket`]: tag byte followed by
    /// the `bincode` encoding of the payload.
    pub fn to_raw_packet(&self) -> Result<RawPacket, MessageEncodeError> {
        let mut bytes = vec![self.tag()];
        bytes.extend(bincode::serialize(self)?);
        Ok(RawPacket::new(bytes)?)
    }

    /// Decodes a [`RawPacket`] back into a [`Message`].
    ///
    /// The tag byte is used only to classify decode failures; the payload
    /// (including the discriminant bincode itself writes) is what actually
    /// drives deserialization, so an unknown tag is only ever reported when
    /// the payload fails to parse as any known variant.
    pub fn from_raw_packet(packet: &RawPacket) -> Result<Self, MessageDecodeError> {
        let tag = packet.tag();
        bincode::deserialize(packet.payload())
            .map_err(|source| MessageDecodeError::Malformed { tag, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let packet = msg.to_raw_packet().unwrap();
        let decoded = Message::from_raw_packet(&packet).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn tag_matches_wire_table() {
        assert_eq!(Message::Quit.tag(), tag::QUIT);
        assert_eq!(
            Message::CreateNewPlayer {
                player: 1,
                spectator: false,
                team: 0,
                name: "alice".into()
            }
            .tag(),
            tag::CREATE_NEWPLAYER
        );
    }

    #[test]
    fn round_trips_every_variant() {
        roundtrip(Message::SyncResponse { player: 0, frame: 160, checksum: 0xDEADBEEF });
        roundtrip(Message::CreateNewPlayer { player: 1, spectator: false, team: 0, name: "alice".into() });
        roundtrip(Message::Ping { player: 2 });
        roundtrip(Message::GameFrameProgress { player: 2, frame: 99 });
        roundtrip(Message::GamestateDump { player: 2, frame: -1 });
        roundtrip(Message::Chat { player: 2, dest: 0, text: "gg".into() });
        roundtrip(Message::Pause { player: 2, on: 1 });
        roundtrip(Message::Keyframe { frame: 32 });
        roundtrip(Message::UserSpeed { player: 0, speed: 0.25 });
        roundtrip(Message::InternalSpeed { speed: 1.0 });
        roundtrip(Message::SystemMessage { player: 0, text: "desync".into() });
        roundtrip(Message::Reject { player: 0, reason: "Server full".into() });
        roundtrip(Message::Quit);
        roundtrip(Message::GameOver { player: 3 });
    }

    #[test]
    fn decode_garbage_is_malformed_not_panic() {
        let packet = RawPacket::new(vec![tag::PING, 0xff, 0xff]).unwrap();
        assert!(Message::from_raw_packet(&packet).is_err());
    }
}
