//! Tagged payloads for the autohost side channel.
//!
//! Same "tag byte + bincode payload" shape as [`crate::message::Message`];
//! kept as a separate enum because the two channels never share a queue or a
//! dispatch table.

use serde::{Deserialize, Serialize};

use crate::raw_packet::{RawPacket, RawPacketError};

pub mod tag {
    pub const SERVER_STARTED: u8 = 1;
    pub const SERVER_QUIT: u8 = 2;
    pub const SERVER_STARTPLAYING: u8 = 3;
    pub const SERVER_GAMEOVER: u8 = 4;
    pub const PLAYER_JOINED: u8 = 5;
    pub const PLAYER_LEFT: u8 = 6;
    pub const PLAYER_READY: u8 = 7;
    pub const PLAYER_CHAT: u8 = 8;
    pub const PLAYER_DEFEATED: u8 = 9;
    pub const GAME_LUAMSG: u8 = 10;
}

#[derive(Debug, thiserror::Error)]
pub enum AutohostDecodeError {
    #[error("malformed autohost payload for tag {tag}: {source}")]
    Malformed {
        tag: u8,
        #[source]
        source: bincode::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AutohostMessage {
    ServerStarted,
    ServerQuit,
    ServerStartPlaying { game_id: [u8; 16], demo_name: String },
    ServerGameOver { player_num: u16, winning_ally_teams: Vec<u8> },
    PlayerJoined { player_num: u16, name: String },
    PlayerLeft { player_num: u16, reason: String },
    PlayerReady { player_num: u16, state: bool },
    PlayerChat { player_num: u16, dest: u16, msg: String },
    PlayerDefeated { player_num: u16 },
    GameLuaMsg { bytes: Vec<u8> },
}

impl AutohostMessage {
    pub fn tag(&self) -> u8 {
        match self {
            AutohostMessage::ServerStarted => tag::SERVER_STARTED,
            AutohostMessage::ServerQuit => tag::SERVER_QUIT,
            AutohostMessage::ServerStartPlaying { .. } => tag::SERVER_STARTPLAYING,
            AutohostMessage::ServerGameOver { .. } => tag::SERVER_GAMEOVER,
            AutohostMessage::PlayerJoined { .. } => tag::PLAYER_JOINED,
            AutohostMessage::PlayerLeft { .. } => tag::PLAYER_LEFT,
            AutohostMessage::PlayerReady { .. } => tag::PLAYER_READY,
            AutohostMessage::PlayerChat { .. } => tag::PLAYER_CHAT,
            AutohostMessage::PlayerDefeated { .. } => tag::PLAYER_DEFEATED,
            AutohostMessage::GameLuaMsg { .. } => tag::GAME_LUAMSG,
        }
    }

    pub fn to_raw_packet(&self) -> Result<RawPacket, RawPacketError> {
        let mut bytes = vec![self.tag()];
        bytes.extend(bincode::serialize(self).expect("autohost message always serializable"));
        RawPacket::new(bytes)
    }

    pub fn from_raw_packet(packet: &RawPacket) -> Result<Self, AutohostDecodeError> {
        let tag = packet.tag();
        bincode::deserialize(packet.payload())
            .map_err(|source| AutohostDecodeError::Malformed { tag, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_player_joined() {
        let msg = AutohostMessage::PlayerJoined { player_num: 1, name: "alice".into() };
        let packet = msg.to_raw_packet().unwrap();
        assert_eq!(packet.tag(), tag::PLAYER_JOINED);
        assert_eq!(AutohostMessage::from_raw_packet(&packet).unwrap(), msg);
    }

    #[test]
    fn round_trips_server_startplaying() {
        let msg = AutohostMessage::ServerStartPlaying {
            game_id: [7u8; 16],
            demo_name: "game.sdfz".into(),
        };
        let packet = msg.to_raw_packet().unwrap();
        assert_eq!(AutohostMessage::from_raw_packet(&packet).unwrap(), msg);
    }
}
