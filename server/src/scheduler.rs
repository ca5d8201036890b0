//! Frame Scheduler: drives lockstep frame generation, keyframes, pause, and
//! speed control from a fixed-period tick loop.

use std::time::{Duration, Instant};

use log::info;
use shared::{Message, SERVER_KEYFRAME_INTERVAL};

use crate::autohost::AutohostChannel;
use crate::dispatcher::ServerDispatcher;
use crate::participant::ServerClock;

pub const SERVER_SLEEP_MILLIS: u64 = 5;
const CPU_USAGE_BROADCAST_INTERVAL: Duration = Duration::from_secs(1);
const BANDWIDTH_STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedControlMode {
    Average,
    Max,
}

pub struct FrameScheduler {
    pub clock: ServerClock,
    pub internal_speed: f32,
    pub user_speed_factor: f32,
    pub min_user_speed: f32,
    pub max_user_speed: f32,
    pub reloading: bool,
    pub quit_server: bool,
    last_cpu_broadcast: Instant,
    last_bandwidth_emit: Instant,
    tick_period: Duration,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self {
            clock: ServerClock::new(),
            internal_speed: 1.0,
            user_speed_factor: 1.0,
            min_user_speed: 0.1,
            max_user_speed: 5.0,
            reloading: false,
            quit_server: false,
            last_cpu_broadcast: Instant::now(),
            last_bandwidth_emit: Instant::now(),
            tick_period: Duration::from_millis(SERVER_SLEEP_MILLIS),
        }
    }

    /// Runs one full tick: inbound drain, frame advance, keyframe check,
    /// CPU-usage broadcast, bandwidth stats, sync-check tick, game-end check.
    pub fn tick(&mut self, dispatcher: &mut ServerDispatcher, autohost: &AutohostChannel) {
        self.drain_inbound(dispatcher, autohost);

        if !dispatcher.is_paused && !self.reloading {
            self.advance_frame(dispatcher);
        }

        if self.last_cpu_broadcast.elapsed() >= CPU_USAGE_BROADCAST_INTERVAL {
            self.broadcast_cpu_usage(dispatcher);
            self.last_cpu_broadcast = Instant::now();
        }

        if self.last_bandwidth_emit.elapsed() >= BANDWIDTH_STATS_INTERVAL {
            self.emit_bandwidth_stats(dispatcher);
            self.last_bandwidth_emit = Instant::now();
        }

        dispatcher
            .sync_checker
            .tick(self.clock.server_frame_num, dispatcher.participants.active_non_spectator_count(), dispatcher.average_rtt_millis);
        if dispatcher.sync_checker.take_failover_request() {
            self.trigger_failover_if_needed(dispatcher);
        }

        if dispatcher.should_end_game() {
            self.quit_server = true;
        }
    }

    fn drain_inbound(&mut self, dispatcher: &mut ServerDispatcher, autohost: &AutohostChannel) {
        let mut inbound = Vec::new();
        for (player, participant) in dispatcher.participants.active_iter_mut() {
            if let Some(connection) = participant.connection.as_mut() {
                connection.update();
                while let Some(packet) = connection.next() {
                    inbound.push((player, packet));
                }
            }
        }
        for (player, packet) in inbound {
            match shared::Message::from_raw_packet(&packet) {
                Ok(message) => dispatcher.dispatch(player, message, autohost),
                Err(e) => log::debug!("dropped unparseable packet from player {player}: {e}"),
            }
        }
    }

    fn advance_frame(&mut self, dispatcher: &mut ServerDispatcher) {
        let delta_seconds = self.tick_period.as_secs_f64();
        self.clock.advance_frame(delta_seconds, self.internal_speed);

        if self.clock.server_frame_num >= 0 && self.clock.server_frame_num as u64 % SERVER_KEYFRAME_INTERVAL as u64 == 0 {
            let frame = self.clock.server_frame_num as u32;
            dispatcher.sync_checker.open_entry(frame, self.clock.server_frame_num);
            if let Ok(packet) = (Message::Keyframe { frame }).to_raw_packet() {
                dispatcher.broadcast(&packet);
            }
        }
    }

    fn broadcast_cpu_usage(&mut self, dispatcher: &mut ServerDispatcher) {
        let mode = SpeedControlMode::Average;
        self.update_speed_control(dispatcher, mode);
    }

    fn emit_bandwidth_stats(&self, dispatcher: &ServerDispatcher) {
        for (player, participant) in dispatcher.participants.active_iter() {
            if let Some(connection) = participant.connection.as_ref() {
                let stats = connection.stats();
                info!(
                    "player {player} bandwidth: sent={} recv={} failed={}",
                    stats.bytes_sent, stats.bytes_received, stats.failed_send_attempts
                );
            }
        }
    }

    /// `UpdateSpeedControl(mode)`: derives a new candidate
    /// internal speed from per-player CPU usage, then applies the RTT
    /// throttle before broadcasting whatever actually changed.
    pub fn update_speed_control(&mut self, dispatcher: &mut ServerDispatcher, mode: SpeedControlMode) {
        let usages: Vec<f32> = dispatcher.participants.active_iter().map(|(_, p)| p.cpu_usage).collect();
        if !usages.is_empty() {
            let candidate = match mode {
                SpeedControlMode::Average => usages.iter().sum::<f32>() / usages.len() as f32,
                SpeedControlMode::Max => usages.iter().cloned().fold(f32::MIN, f32::max),
            };
            self.internal_speed_change(dispatcher, candidate.clamp(self.min_user_speed, self.user_speed_factor));
        }

        if dispatcher.average_rtt_millis > 50.0 {
            let throttled = (self.user_speed_factor * 50.0 / dispatcher.average_rtt_millis as f32)
                .clamp(self.min_user_speed, self.max_user_speed);
            if throttled != self.user_speed_factor {
                self.user_speed_factor = throttled;
                if let Ok(packet) = (Message::UserSpeed { player: 0, speed: throttled }).to_raw_packet() {
                    dispatcher.broadcast(&packet);
                }
            }
        }
    }

    /// `InternalSpeedChange(v)`: no-op if unchanged; else set and broadcast.
    pub fn internal_speed_change(&mut self, dispatcher: &mut ServerDispatcher, new_speed: f32) {
        if (new_speed - self.internal_speed).abs() < f32::EPSILON {
            return;
        }
        self.internal_speed = new_speed;
        if let Ok(packet) = (Message::InternalSpeed { speed: new_speed }).to_raw_packet() {
            dispatcher.broadcast(&packet);
        }
    }

    fn trigger_failover_if_needed(&self, dispatcher: &mut ServerDispatcher) {
        info!("sync checker requested failover consideration");
        if let Ok(packet) = (Message::SystemMessage {
            player: 0,
            text: "desync detected, attempting connection failover".to_string(),
        })
        .to_raw_packet()
        {
            dispatcher.broadcast(&packet);
        }
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ServerDispatcher;

    #[test]
    fn keyframe_cadence_matches_sixteen_frame_interval() {
        let mut scheduler = FrameScheduler::new();
        let mut dispatcher = ServerDispatcher::new(16, 16, shared::MAX_PLAYERS);
        for _ in 0..33 {
            scheduler.advance_frame(&mut dispatcher);
        }
        // frames advance 0..=32; keyframes should have opened at 0, 16, 32
        assert_eq!(scheduler.clock.server_frame_num, 32);
    }

    #[test]
    fn rtt_speed_throttle_applies_at_high_average_rtt() {
        let mut scheduler = FrameScheduler::new();
        let mut dispatcher = ServerDispatcher::new(16, 16, shared::MAX_PLAYERS);
        scheduler.user_speed_factor = 1.0;
        scheduler.max_user_speed = 2.0;
        scheduler.min_user_speed = 0.1;
        dispatcher.average_rtt_millis = 200.0;

        scheduler.update_speed_control(&mut dispatcher, SpeedControlMode::Average);
        assert!((scheduler.user_speed_factor - 0.25).abs() < 1e-6);
    }

    #[test]
    fn internal_speed_change_is_a_noop_when_unchanged() {
        let mut scheduler = FrameScheduler::new();
        let mut dispatcher = ServerDispatcher::new(16, 16, shared::MAX_PLAYERS);
        let before = scheduler.internal_speed;
        scheduler.internal_speed_change(&mut dispatcher, before);
        assert_eq!(scheduler.internal_speed, before);
    }

    #[test]
    fn pause_blocks_frame_advance() {
        let mut scheduler = FrameScheduler::new();
        let mut dispatcher = ServerDispatcher::new(16, 16, shared::MAX_PLAYERS);
        let autohost = AutohostChannel::new("127.0.0.1", 0, "127.0.0.1:1").unwrap();
        dispatcher.set_pause(true, false);
        let frame_before = scheduler.clock.server_frame_num;
        scheduler.tick(&mut dispatcher, &autohost);
        assert_eq!(scheduler.clock.server_frame_num, frame_before);
    }
}
