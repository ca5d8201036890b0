//! Decodes incoming packets, mutates participant/team/skirmish-AI state, and
//! broadcasts — the host of the protocol state machine keyed by wire tag.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use log::{debug, info, warn};
use shared::message::tag;
use shared::{Message, RawPacket};

use crate::autohost::AutohostChannel;
use crate::participant::{GameId, ParticipantTable, SkirmishAiTable, TeamTable};
use crate::sync_checker::SyncChecker;
use crate::transport::Connection;

const REJECTION_THRESHOLD: u32 = 3;
const PING_SAMPLE_WINDOW: usize = 5;
/// Sentinel `dest` the source's chat convention reserves for the server's
/// own voice; chat addressed elsewhere than this mirrors to the autohost.
const SERVER_PLAYER_DEST: u16 = u16::MAX;

pub struct ServerDispatcher {
    pub participants: ParticipantTable,
    pub teams: TeamTable,
    pub skirmish_ais: SkirmishAiTable,
    pub sync_checker: SyncChecker,

    packet_cache: Vec<RawPacket>,
    rejected_connections: HashMap<String, u32>,
    ping_samples: HashMap<u16, VecDeque<f64>>,
    last_ping_at: HashMap<u16, Instant>,
    pub average_rtt_millis: f64,
    pub is_paused: bool,
    pub game_pausable: bool,
    pub game_has_started: bool,
    pub ready_time: Option<Instant>,
    pub allow_spec_join: bool,
    pub white_list_additional_players: bool,
    pub game_id: Option<GameId>,
    pub max_players: usize,
}

impl ServerDispatcher {
    pub fn new(max_teams: usize, max_ais: usize, max_players: usize) -> Self {
        Self {
            participants: ParticipantTable::new(),
            teams: TeamTable::new(max_teams),
            skirmish_ais: SkirmishAiTable::new(max_ais),
            sync_checker: SyncChecker::new(),
            packet_cache: Vec::new(),
            rejected_connections: HashMap::new(),
            ping_samples: HashMap::new(),
            last_ping_at: HashMap::new(),
            average_rtt_millis: 0.0,
            is_paused: false,
            game_pausable: true,
            game_has_started: false,
            ready_time: None,
            allow_spec_join: true,
            white_list_additional_players: true,
            game_id: None,
            max_players: max_players.min(shared::MAX_PLAYERS),
        }
    }

    /// Adds the server's own locally-hosted client; always admitted.
    pub fn add_local_client(&mut self, player: u16, name: &str, team: u8, connection: Box<dyn Connection>) -> bool {
        self.participants.activate(player, name, false, team, false, connection)
    }

    /// Admits (or rejects) a `CreateNewPlayer` request, replaying the packet
    /// cache to a mid-game joiner before any live packets reach it.
    pub fn add_additional_user(
        &mut self,
        player: u16,
        name: &str,
        spectator: bool,
        team: u8,
        connection: Box<dyn Connection>,
        autohost: &AutohostChannel,
    ) -> bool {
        if let Some(count) = self.rejected_connections.get(name) {
            if *count > REJECTION_THRESHOLD {
                self.reject_connection(player, &connection, "Too many failed connection attempts");
                connection_drop(connection);
                return false;
            }
        }

        if self.participants.active_count() >= self.max_players {
            self.reject_connection(player, &connection, "Server is full");
            *self.rejected_connections.entry(name.to_string()).or_insert(0) += 1;
            connection_drop(connection);
            return false;
        }

        if spectator && !self.allow_spec_join && !self.white_list_additional_players {
            self.reject_connection(player, &connection, "Server does not allow additional spectators");
            *self.rejected_connections.entry(name.to_string()).or_insert(0) += 1;
            connection_drop(connection);
            return false;
        }

        let is_midgame_join = self.game_has_started;
        for packet in &self.packet_cache {
            let _ = connection.send(packet.clone());
        }

        if !self.participants.activate(player, name, spectator, team, is_midgame_join, connection) {
            return false;
        }

        if !spectator {
            self.teams.assign(team, team, player);
        }

        autohost.send(&shared::AutohostMessage::PlayerJoined {
            player_num: player,
            name: name.to_string(),
        });

        if let Ok(packet) = (Message::CreateNewPlayer {
            player,
            spectator,
            team,
            name: name.to_string(),
        })
        .to_raw_packet()
        {
            self.broadcast(&packet);
        }

        info!("player {player} ({name}) joined, spectator={spectator}, team={team}");
        true
    }

    fn reject_connection(&self, player: u16, connection: &dyn Connection, reason: &str) {
        if let Ok(packet) = (Message::Reject { player, reason: reason.to_string() }).to_raw_packet() {
            let _ = connection.send(packet);
        }
        warn!("rejected connection (player {player}): {reason}");
    }

    pub fn got_chat_message(&mut self, player: u16, dest: u16, text: &str, autohost: &AutohostChannel) {
        if let Ok(packet) = (Message::Chat { player, dest, text: text.to_string() }).to_raw_packet() {
            self.broadcast(&packet);
        }
        if dest != SERVER_PLAYER_DEST {
            autohost.send(&shared::AutohostMessage::PlayerChat {
                player_num: player,
                dest,
                msg: text.to_string(),
            });
        }
    }

    /// Records a ping round-trip sample for `player`, recomputes both its
    /// median and the dispatcher-wide average used by speed control, and
    /// feeds the fresh sample into the player's own connection so its
    /// redundancy manager's RTT group and primary-path choice stay current.
    pub fn handle_ping(&mut self, player: u16, now: Instant) {
        let mut rtt_sample = None;
        let samples = self.ping_samples.entry(player).or_default();
        if let Some(last) = self.last_ping_at.get(&player) {
            let millis = last.elapsed().as_secs_f64() * 1000.0;
            samples.push_back(millis);
            if samples.len() > PING_SAMPLE_WINDOW {
                samples.pop_front();
            }
            rtt_sample = Some(millis);
        }
        self.last_ping_at.insert(player, now);
        self.recompute_average_rtt();

        if let Some(rtt) = rtt_sample {
            if let Some(connection) = self.participants.get_mut(player).and_then(|p| p.connection.as_mut()) {
                connection.observe_rtt(rtt);
            }
        }
    }

    fn recompute_average_rtt(&mut self) {
        let medians: Vec<f64> = self
            .ping_samples
            .values()
            .filter_map(|samples| median(samples))
            .collect();
        if medians.is_empty() {
            return;
        }
        self.average_rtt_millis = medians.iter().sum::<f64>() / medians.len() as f64;
    }

    pub fn handle_frame_progress(&mut self, player: u16, frame: u32) {
        if let Some(p) = self.participants.get_mut(player) {
            p.last_frame_response = frame;
        }
    }

    /// Forwards an opaque gamestate dump to the (external) demo recorder and
    /// broadcasts it. The recorder itself is a black box reached only through
    /// this named hook.
    pub fn dump_state(&mut self, player: u16, frame: i32, recorder: &dyn Fn(i32)) {
        recorder(frame);
        if let Ok(packet) = (Message::GamestateDump { player, frame }).to_raw_packet() {
            self.broadcast(&packet);
        }
    }

    pub fn unpack_sync_response(&mut self, player: u16, frame: u32, checksum: u32) {
        self.sync_checker.record_response(player, frame, checksum);
        if self.sync_checker.desync_has_occurred {
            if let Ok(packet) = (Message::SystemMessage {
                player: 0,
                text: format!("desync detected at frame {frame}"),
            })
            .to_raw_packet()
            {
                self.broadcast(&packet);
            }
        }
    }

    /// Enqueues a shared reference to `packet` on every active participant's
    /// connection; no per-recipient copy. Also appends it to the joiner
    /// replay cache.
    pub fn broadcast(&mut self, packet: &RawPacket) {
        self.packet_cache.push(packet.clone());
        for (player, participant) in self.participants.active_iter() {
            if let Some(connection) = participant.connection.as_ref() {
                if let Err(e) = connection.send(packet.clone()) {
                    debug!("broadcast to player {player} failed: {e}");
                }
            }
        }
    }

    /// Dispatches one decoded message. Unknown/other messages fall through
    /// to a verbatim broadcast per the dispatch table's catch-all row.
    pub fn dispatch(&mut self, sender: u16, message: Message, autohost: &AutohostChannel) {
        match message {
            Message::SyncResponse { player, frame, checksum } => {
                self.unpack_sync_response(player, frame, checksum);
            }
            Message::Ping { player } => self.handle_ping(player, Instant::now()),
            Message::GameFrameProgress { player, frame } => self.handle_frame_progress(player, frame),
            Message::Chat { player, dest, text } => self.got_chat_message(player, dest, &text, autohost),
            Message::Pause { player, on } => {
                self.set_pause(on != 0, false);
                let _ = player;
            }
            other => {
                if let Ok(packet) = other.to_raw_packet() {
                    self.broadcast(&packet);
                }
            }
        }
        let _ = sender;
    }

    /// Pause is a no-op unless `gamePausable` and the state actually changes.
    pub fn set_pause(&mut self, on: bool, from_server: bool) {
        if !self.game_pausable || self.is_paused == on {
            return;
        }
        self.is_paused = on;
        if let Ok(packet) = (Message::Pause { player: 0, on: on as u8 }).to_raw_packet() {
            self.broadcast(&packet);
        }
        let _ = from_server;
    }

    /// Game-end predicate: only once the game has actually started and only
    /// on reduction to a single ally team, never at startup.
    pub fn should_end_game(&self) -> bool {
        if !self.game_has_started || self.ready_time.is_none() {
            return false;
        }
        self.teams.active_ally_teams().len() <= 1
    }
}

fn connection_drop(mut connection: Box<dyn Connection>) {
    connection.close(false);
}

fn median(samples: &VecDeque<f64>) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub use tag as wire_tag;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FallbackConnection;

    fn fallback() -> Box<dyn Connection> {
        Box::new(FallbackConnection::new("127.0.0.1", 0, "127.0.0.1:1").unwrap())
    }

    fn autohost() -> AutohostChannel {
        AutohostChannel::new("127.0.0.1", 0, "127.0.0.1:1").unwrap()
    }

    #[test]
    fn reject_threshold_escalates_reason_after_four_attempts() {
        let mut dispatcher = ServerDispatcher::new(16, 16, shared::MAX_PLAYERS);
        dispatcher.allow_spec_join = false;
        dispatcher.white_list_additional_players = false;
        let host = autohost();

        for _ in 0..4 {
            assert!(!dispatcher.add_additional_user(1, "bob", true, 0, fallback(), &host));
        }
        assert_eq!(*dispatcher.rejected_connections.get("bob").unwrap(), 4);

        // a 5th attempt now sees the escalated "too many attempts" reason path
        assert!(!dispatcher.add_additional_user(1, "bob", true, 0, fallback(), &host));
        assert_eq!(*dispatcher.rejected_connections.get("bob").unwrap(), 4);
    }

    #[test]
    fn join_beyond_max_players_is_rejected_as_server_full() {
        let mut dispatcher = ServerDispatcher::new(16, 16, 1);
        let host = autohost();

        assert!(dispatcher.add_additional_user(1, "alice", false, 0, fallback(), &host));
        assert!(!dispatcher.add_additional_user(2, "bob", false, 0, fallback(), &host));
        assert_eq!(*dispatcher.rejected_connections.get("bob").unwrap(), 1);
        assert!(dispatcher.participants.get(2).is_none());
    }

    #[test]
    fn accepted_join_activates_slot_and_team() {
        let mut dispatcher = ServerDispatcher::new(16, 16, shared::MAX_PLAYERS);
        let host = autohost();
        let accepted = dispatcher.add_additional_user(1, "alice", false, 0, fallback(), &host);
        assert!(accepted);
        assert!(dispatcher.participants.get(1).unwrap().active);
        assert!(dispatcher.teams.get(0).unwrap().active);
    }

    #[test]
    fn pause_is_idempotent() {
        let mut dispatcher = ServerDispatcher::new(16, 16, shared::MAX_PLAYERS);
        dispatcher.set_pause(true, false);
        assert!(dispatcher.is_paused);
        dispatcher.set_pause(true, false);
        assert!(dispatcher.is_paused);
    }

    #[test]
    fn game_end_never_fires_before_game_start() {
        let dispatcher = ServerDispatcher::new(16, 16, shared::MAX_PLAYERS);
        assert!(!dispatcher.should_end_game());
    }

    #[test]
    fn handle_ping_updates_median_rtt_sample() {
        let mut dispatcher = ServerDispatcher::new(16, 16, shared::MAX_PLAYERS);
        dispatcher.handle_ping(0, Instant::now());
        std::thread::sleep(std::time::Duration::from_millis(5));
        dispatcher.handle_ping(0, Instant::now());
        assert!(dispatcher.average_rtt_millis >= 0.0);
    }
}
