//! Tracks per-keyframe checksums, detects desynchronization, and escalates
//! to failover.

use std::collections::HashMap;

use log::warn;
use shared::{SYNCCHECK_MSG_TIMEOUT, SYNCCHECK_TIMEOUT};

struct PendingEntry {
    responses: HashMap<u16, u32>,
    opened_at_frame: i64,
}

/// Tracks outstanding sync-check entries and the desync flags the scheduler
/// consults once per tick.
pub struct SyncChecker {
    pending: HashMap<u32, PendingEntry>,
    pub desync_has_occurred: bool,
    pub sync_error_frame: Option<u32>,
    pub sync_warning_frame: Option<u32>,
}

impl SyncChecker {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            desync_has_occurred: false,
            sync_error_frame: None,
            sync_warning_frame: None,
        }
    }

    /// Opens a `pending[frame]` entry; called when the scheduler emits a keyframe.
    pub fn open_entry(&mut self, frame: u32, current_server_frame: i64) {
        self.pending.insert(
            frame,
            PendingEntry {
                responses: HashMap::new(),
                opened_at_frame: current_server_frame,
            },
        );
    }

    /// Records a player's checksum reply for `frame`. Marks desync if it
    /// disagrees with any checksum already recorded for that frame.
    pub fn record_response(&mut self, player: u16, frame: u32, checksum: u32) {
        let Some(entry) = self.pending.get_mut(&frame) else {
            return;
        };
        for (&other_player, &other_checksum) in entry.responses.iter() {
            if other_player != player && other_checksum != checksum {
                self.desync_has_occurred = true;
                self.sync_error_frame = Some(frame);
                warn!(
                    "desync detected at frame {frame}: player {player} checksum {checksum:#x} != player {other_player} checksum {other_checksum:#x}"
                );
                break;
            }
        }
        entry.responses.insert(player, checksum);
    }

    /// Effective timeout in frames: the base 300 inflated by `rtt/10` once
    /// `averageRtt` exceeds `SYNCCHECK_MSG_TIMEOUT`.
    pub fn effective_timeout(average_rtt_millis: f64) -> u32 {
        if average_rtt_millis > SYNCCHECK_MSG_TIMEOUT as f64 {
            SYNCCHECK_TIMEOUT + (average_rtt_millis / 10.0) as u32
        } else {
            SYNCCHECK_TIMEOUT
        }
    }

    /// Drops an entry once every active non-spectator player has answered,
    /// or marks it as a desync candidate once it ages past the effective
    /// timeout (without removing it, so a late reply is still recorded).
    pub fn tick(&mut self, current_server_frame: i64, active_non_spectators: usize, average_rtt_millis: f64) {
        let timeout = Self::effective_timeout(average_rtt_millis);
        let mut resolved = Vec::new();

        for (&frame, entry) in self.pending.iter() {
            if entry.responses.len() >= active_non_spectators && active_non_spectators > 0 {
                resolved.push(frame);
                continue;
            }
            let age = current_server_frame - entry.opened_at_frame;
            if age > timeout as i64 {
                self.sync_warning_frame = Some(frame);
                warn!("sync-check entry for frame {frame} timed out after {age} frames, treating as desync candidate");
            }
        }

        for frame in resolved {
            self.pending.remove(&frame);
        }
    }

    /// Whether this tick should request a failover consideration, clearing
    /// the desync flag once consumed so the next tick starts fresh.
    pub fn take_failover_request(&mut self) -> bool {
        if self.desync_has_occurred || self.sync_warning_frame.is_some() {
            self.desync_has_occurred = false;
            self.sync_warning_frame = None;
            true
        } else {
            false
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for SyncChecker {
    fn default() -> Self {
        Self::new()
    }
}
