//! # Lockstep core server library
//!
//! The authoritative half of a redundant, multi-transport lockstep protocol:
//! frame generation and keyframe dispatch, adaptive speed control, desync
//! detection, and a pluggable self-healing transport layer, serving up to
//! [`shared::MAX_PLAYERS`] concurrent participants.
//!
//! ## Module Organization
//!
//! - [`config`] — JSON configuration file loading and environment overrides.
//! - [`transport`] — the `TransportPlugin` contract, the built-in UDP plugin
//!   and dynamic-library loader, the RTT-based `RedundancyManager`, and the
//!   `Connection` abstraction (`Primary`/`Fallback`).
//! - [`autohost`] — the write-mostly side channel mirroring lifecycle events
//!   to an external controller.
//! - [`participant`] — the `Participant`/`Team`/`SkirmishAi` slot tables and
//!   the simulation clock.
//! - [`dispatcher`] — decodes incoming packets, mutates participant/team
//!   state, and broadcasts; hosts the protocol state machine.
//! - [`scheduler`] — the fixed-period tick loop: frame generation, keyframes,
//!   pause, and speed control.
//! - [`sync_checker`] — per-keyframe checksum tracking and desync detection.
//! - [`metrics`] — mutex-guarded connection metrics storage.
//! - [`server`] — the top-level `GameServer` wiring everything together.
//!
//! The simulation itself — unit/map state, Lua, demo recording — is an
//! external collaborator reached only through the opaque wire protocol and
//! the `recorder.save_state(frame)` hook; it has no representation here.

pub mod autohost;
pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod participant;
pub mod scheduler;
pub mod server;
pub mod sync_checker;
pub mod transport;
