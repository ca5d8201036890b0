//! Participant/Team/SkirmishAi data model: the slot tables the dispatcher mutates.
//!
//! Generalizes `client_manager.rs`'s `Client`/`ClientManager` (monotonic IDs,
//! capacity cap, per-client bookkeeping under a single owner) to the slotted
//! participant table the dispatcher drives: slots are fixed-size `[0,
//! MAX_PLAYERS)` rather than freshly allocated per connection, since a
//! player's slot number is part of the wire protocol itself.

use std::time::Instant;

use shared::MAX_PLAYERS;

use crate::transport::connection::Connection;

/// One occupant of a player slot; may be human or AI-controlled.
pub struct Participant {
    pub active: bool,
    pub name: String,
    pub version: String,
    pub spectator: bool,
    pub team: u8,
    pub ready: bool,
    pub is_midgame_join: bool,
    pub cpu_usage: f32,
    pub last_frame_response: u32,
    pub connection: Option<Box<dyn Connection>>,
}

impl Default for Participant {
    fn default() -> Self {
        Self {
            active: false,
            name: String::new(),
            version: String::new(),
            spectator: false,
            team: 0,
            ready: false,
            is_midgame_join: false,
            cpu_usage: 0.0,
            last_frame_response: 0,
            connection: None,
        }
    }
}

impl Participant {
    fn activate(&mut self, name: &str, spectator: bool, team: u8, is_midgame_join: bool, connection: Box<dyn Connection>) {
        self.active = true;
        self.name = name.to_string();
        self.spectator = spectator;
        self.team = team;
        self.ready = false;
        self.is_midgame_join = is_midgame_join;
        self.cpu_usage = 0.0;
        self.last_frame_response = 0;
        self.connection = Some(connection);
    }

    fn deactivate(&mut self) {
        *self = Participant::default();
    }
}

/// Fixed-size table of player slots, indexed by player number.
pub struct ParticipantTable {
    slots: Vec<Participant>,
}

impl ParticipantTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PLAYERS);
        slots.resize_with(MAX_PLAYERS, Participant::default);
        Self { slots }
    }

    pub fn get(&self, player: u16) -> Option<&Participant> {
        self.slots.get(player as usize)
    }

    pub fn get_mut(&mut self, player: u16) -> Option<&mut Participant> {
        self.slots.get_mut(player as usize)
    }

    /// First free slot, in ascending order, or `None` if the table is full.
    pub fn next_free_slot(&self) -> Option<u16> {
        self.slots
            .iter()
            .position(|p| !p.active)
            .map(|i| i as u16)
    }

    pub fn activate(
        &mut self,
        player: u16,
        name: &str,
        spectator: bool,
        team: u8,
        is_midgame_join: bool,
        connection: Box<dyn Connection>,
    ) -> bool {
        match self.slots.get_mut(player as usize) {
            Some(slot) if !slot.active => {
                slot.activate(name, spectator, team, is_midgame_join, connection);
                true
            }
            _ => false,
        }
    }

    pub fn deactivate(&mut self, player: u16) {
        if let Some(slot) = self.slots.get_mut(player as usize) {
            slot.deactivate();
        }
    }

    pub fn active_iter(&self) -> impl Iterator<Item = (u16, &Participant)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, p)| p.active)
            .map(|(i, p)| (i as u16, p))
    }

    pub fn active_iter_mut(&mut self) -> impl Iterator<Item = (u16, &mut Participant)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(_, p)| p.active)
            .map(|(i, p)| (i as u16, p))
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|p| p.active).count()
    }

    pub fn active_non_spectator_count(&self) -> usize {
        self.slots.iter().filter(|p| p.active && !p.spectator).count()
    }
}

impl Default for ParticipantTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A side, possibly spanning multiple player slots under the same ally team.
#[derive(Debug, Clone, Copy, Default)]
pub struct Team {
    pub active: bool,
    pub ally_team: u8,
    pub start_pos: (f32, f32),
    pub leader_player: u16,
}

pub struct TeamTable {
    teams: Vec<Team>,
}

impl TeamTable {
    pub fn new(max_teams: usize) -> Self {
        Self {
            teams: vec![Team::default(); max_teams],
        }
    }

    pub fn get(&self, team: u8) -> Option<&Team> {
        self.teams.get(team as usize)
    }

    /// Activates `team` the first time a non-spectator is assigned to it.
    pub fn assign(&mut self, team: u8, ally_team: u8, leader_player: u16) {
        if let Some(slot) = self.teams.get_mut(team as usize) {
            if !slot.active {
                slot.active = true;
                slot.ally_team = ally_team;
                slot.leader_player = leader_player;
            }
        }
    }

    /// Deactivates `team` once the caller has confirmed no participant
    /// remains assigned to it.
    pub fn deactivate_if_empty(&mut self, team: u8, still_occupied: bool) {
        if !still_occupied {
            if let Some(slot) = self.teams.get_mut(team as usize) {
                slot.active = false;
            }
        }
    }

    pub fn active_ally_teams(&self) -> std::collections::HashSet<u8> {
        self.teams.iter().filter(|t| t.active).map(|t| t.ally_team).collect()
    }
}

/// Handle to one slot in a [`SkirmishAiTable`]'s free-list.
pub struct SkirmishAi {
    pub host_player: u16,
    pub name: String,
    pub active: bool,
}

/// Free-list allocator over `[0, MAX_AIS)`: every id is, at all times, in
/// exactly one of the free list or the active set.
pub struct SkirmishAiTable {
    slots: Vec<Option<SkirmishAi>>,
    free: Vec<usize>,
}

impl SkirmishAiTable {
    pub fn new(max_ais: usize) -> Self {
        Self {
            slots: (0..max_ais).map(|_| None).collect(),
            free: (0..max_ais).rev().collect(),
        }
    }

    pub fn spawn(&mut self, host_player: u16, name: &str) -> Option<usize> {
        let id = self.free.pop()?;
        self.slots[id] = Some(SkirmishAi {
            host_player,
            name: name.to_string(),
            active: true,
        });
        Some(id)
    }

    pub fn release(&mut self, id: usize) {
        if self.slots.get(id).and_then(|s| s.as_ref()).is_some() {
            self.slots[id] = None;
            self.free.push(id);
        }
    }

    pub fn get(&self, id: usize) -> Option<&SkirmishAi> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }
}

/// Opaque game identifier, generated once all players ready up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameId(pub [u8; 16]);

impl GameId {
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// Clock feeding `serverFrameNum`/`modGameTime`.
pub struct ServerClock {
    pub started_at: Instant,
    pub server_frame_num: i64,
    pub mod_game_time: f64,
}

impl ServerClock {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            server_frame_num: -1,
            mod_game_time: 0.0,
        }
    }

    pub fn advance_frame(&mut self, delta_seconds: f64, internal_speed: f32) {
        self.server_frame_num += 1;
        self.mod_game_time += delta_seconds * internal_speed as f64;
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skirmish_ai_ids_are_never_double_allocated() {
        let mut table = SkirmishAiTable::new(4);
        let a = table.spawn(0, "botA").unwrap();
        let b = table.spawn(0, "botB").unwrap();
        assert_ne!(a, b);
        table.release(a);
        let c = table.spawn(0, "botC").unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn skirmish_ai_table_exhausts_cleanly() {
        let mut table = SkirmishAiTable::new(1);
        assert!(table.spawn(0, "only").is_some());
        assert!(table.spawn(0, "overflow").is_none());
    }

    #[test]
    fn participant_table_reuses_freed_slots() {
        let mut table = ParticipantTable::new();
        assert_eq!(table.next_free_slot(), Some(0));
    }

    #[test]
    fn server_clock_starts_before_frame_zero() {
        let clock = ServerClock::new();
        assert_eq!(clock.server_frame_num, -1);
    }

    #[test]
    fn server_clock_advances_monotonically() {
        let mut clock = ServerClock::new();
        clock.advance_frame(1.0 / 30.0, 1.0);
        clock.advance_frame(1.0 / 30.0, 1.0);
        assert_eq!(clock.server_frame_num, 1);
        assert!(clock.mod_game_time > 0.0);
    }
}
