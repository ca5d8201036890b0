//! Connection: the per-peer channel the dispatcher and scheduler actually
//! talk to. Two variants, [`PrimaryConnection`] and [`FallbackConnection`],
//! expose the identical [`Connection`] trait so downstream code never has to
//! know which one it holds.
//!
//! Both drain an inbound queue on `update()` and an outbound queue on
//! `flush()`, using bounded, lock-free `crossbeam::queue::ArrayQueue`s so a
//! slow peer backpressures instead of growing memory without bound. Retries
//! are scheduled across ticks with a capped backoff rather than fired
//! immediately inline.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use log::{debug, warn};
use parking_lot::Mutex;
use shared::{ConnectionMetrics, RawPacket, CONNECTION_QUEUE_CAPACITY};

use super::plugin::{SendFailure, TransportPlugin, UdpTransportPlugin};
use super::redundancy::RedundancyManager;
use crate::metrics::MetricsHandle;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("invalid connection configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Packet(#[from] shared::raw_packet::RawPacketError),
    #[error("outbound queue is full, packet dropped")]
    QueueOverflow,
    #[error("connection is closed")]
    Closed,
    #[error("reconnect not allowed in current state")]
    ReconnectNotAllowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Initialized,
    Running,
    Degraded,
    Closing,
    Closed,
}

/// Outbound item awaiting its first attempt or a scheduled retry.
struct PendingSend {
    packet: RawPacket,
    attempt: u32,
    next_attempt_at: Instant,
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis((100u64 * attempt as u64).min(500))
}

const MAX_SEND_ATTEMPTS: u32 = 3;
const SEND_QUEUE_BACKPRESSURE: Duration = Duration::from_millis(10);
const MAX_DRAIN_PER_TICK: usize = 64;

/// State shared by both Connection variants: queues, metrics, lifecycle.
struct ConnectionCore {
    inbound: Arc<ArrayQueue<RawPacket>>,
    peek_buffer: Mutex<VecDeque<RawPacket>>,
    outbound: Arc<ArrayQueue<RawPacket>>,
    pending: Mutex<VecDeque<PendingSend>>,
    metrics: MetricsHandle,
    state: Mutex<ConnectionState>,
    last_metrics_emit: Mutex<Instant>,
}

impl ConnectionCore {
    fn new() -> Self {
        Self {
            inbound: Arc::new(ArrayQueue::new(CONNECTION_QUEUE_CAPACITY)),
            peek_buffer: Mutex::new(VecDeque::new()),
            outbound: Arc::new(ArrayQueue::new(CONNECTION_QUEUE_CAPACITY)),
            pending: Mutex::new(VecDeque::new()),
            metrics: MetricsHandle::new(),
            state: Mutex::new(ConnectionState::Created),
            last_metrics_emit: Mutex::new(Instant::now()),
        }
    }

    fn set_state(&self, s: ConnectionState) {
        *self.state.lock() = s;
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn enqueue_outbound(&self, packet: RawPacket) -> Result<(), ConnectionError> {
        let deadline = Instant::now() + SEND_QUEUE_BACKPRESSURE;
        let mut item = packet;
        loop {
            match self.outbound.push(item) {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    if Instant::now() >= deadline {
                        warn!("outbound queue full, dropping packet tag={}", rejected.tag());
                        return Err(ConnectionError::QueueOverflow);
                    }
                    item = rejected;
                    std::thread::yield_now();
                }
            }
        }
    }

    fn refill_peek_buffer(&self) {
        let mut buf = self.peek_buffer.lock();
        while buf.len() < MAX_DRAIN_PER_TICK {
            match self.inbound.pop() {
                Some(p) => buf.push_back(p),
                None => break,
            }
        }
    }

    fn has_incoming(&self) -> bool {
        !self.peek_buffer.lock().is_empty() || !self.inbound.is_empty()
    }

    fn peek(&self, n: usize) -> Vec<RawPacket> {
        self.refill_peek_buffer();
        self.peek_buffer.lock().iter().take(n).cloned().collect()
    }

    fn next(&self) -> Option<RawPacket> {
        self.refill_peek_buffer();
        self.peek_buffer.lock().pop_front()
    }

    fn should_emit_metrics(&self, interval: Duration) -> bool {
        let mut last = self.last_metrics_emit.lock();
        if last.elapsed() >= interval {
            *last = Instant::now();
            true
        } else {
            false
        }
    }

    /// Attempts delivery of everything ready to go (new sends plus any
    /// pending retry whose backoff has elapsed), reporting per-attempt
    /// outcomes through `send_fn`. Used by both variants' `flush`.
    fn drain_and_send(
        &self,
        forced: bool,
        mut send_fn: impl FnMut(&RawPacket) -> Result<(), SendFailure>,
    ) {
        let now = Instant::now();
        let mut batch: Vec<PendingSend> = Vec::new();

        {
            let mut pending = self.pending.lock();
            let mut remaining = VecDeque::new();
            for item in pending.drain(..) {
                if forced || item.next_attempt_at <= now {
                    batch.push(item);
                } else {
                    remaining.push_back(item);
                }
            }
            *pending = remaining;
        }

        for _ in 0..MAX_DRAIN_PER_TICK {
            match self.outbound.pop() {
                Some(packet) => batch.push(PendingSend {
                    packet,
                    attempt: 0,
                    next_attempt_at: now,
                }),
                None => break,
            }
        }

        for mut item in batch {
            item.attempt += 1;
            match send_fn(&item.packet) {
                Ok(()) => {
                    self.metrics.update(|m| {
                        m.record_sent(item.packet.len(), now_millis());
                        m.reset_failed_sends();
                    });
                }
                Err(SendFailure::Other) => {
                    self.metrics.update(|m| m.record_failed_send());
                    debug!("send aborted after unclassified error, tag={}", item.packet.tag());
                }
                Err(failure) => {
                    self.metrics.update(|m| m.record_failed_send());
                    if item.attempt < MAX_SEND_ATTEMPTS {
                        item.next_attempt_at = now + backoff(item.attempt + 1);
                        self.pending.lock().push_back(item);
                    } else {
                        debug!("send retry budget exhausted: {:?}", failure);
                    }
                }
            }
        }
    }
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Public contract both Connection variants implement identically.
pub trait Connection: Send {
    fn send(&self, packet: RawPacket) -> Result<(), ConnectionError>;
    fn has_incoming(&self) -> bool;
    fn peek(&self, n: usize) -> Vec<RawPacket>;
    fn next(&self) -> Option<RawPacket>;
    fn update(&mut self);
    fn flush(&mut self, forced: bool);
    fn can_reconnect(&self) -> bool;
    fn reconnect(&mut self) -> Result<(), ConnectionError>;
    fn close(&mut self, flush: bool);
    fn stats(&self) -> ConnectionMetrics;
    fn state(&self) -> ConnectionState;

    /// Registers an alternate route the redundancy manager may pick as
    /// primary on failover. No-op on connections with no redundancy manager
    /// of their own (i.e. Fallback).
    fn register_peer(&mut self, peer_id: &str, addr: &str) {
        let _ = (peer_id, addr);
    }

    /// Feeds a freshly measured round-trip time for the peer this
    /// connection already talks to, so its RTT group and primary-path
    /// selection stay current. No-op on connections with no redundancy
    /// manager of their own.
    fn observe_rtt(&mut self, rtt_millis: f64) {
        let _ = rtt_millis;
    }
}

/// Redundant, P2P-capable path: a `TransportPlugin` fronted by a
/// `RedundancyManager` that picks the peer to send to and reacts to failures.
pub struct PrimaryConnection {
    core: ConnectionCore,
    plugin: Box<dyn TransportPlugin>,
    redundancy: RedundancyManager,
    peer_id: String,
    host: String,
    port: u16,
}

impl PrimaryConnection {
    pub fn new(
        mut plugin: Box<dyn TransportPlugin>,
        host: &str,
        port: u16,
        peer_id: &str,
        peer_addr: &str,
        group_rtt_threshold_ms: u64,
    ) -> Result<Self, ConnectionError> {
        plugin
            .setup(host, port)
            .map_err(|e| ConnectionError::InvalidConfig(e.to_string()))?;
        let mut redundancy = RedundancyManager::new(group_rtt_threshold_ms);
        redundancy.observe_rtt(peer_id, peer_addr, 0.0, Instant::now());

        let core = ConnectionCore::new();
        core.set_state(ConnectionState::Initialized);
        core.set_state(ConnectionState::Running);
        Ok(Self {
            core,
            plugin,
            redundancy,
            peer_id: peer_id.to_string(),
            host: host.to_string(),
            port,
        })
    }

}

impl Connection for PrimaryConnection {
    fn send(&self, packet: RawPacket) -> Result<(), ConnectionError> {
        self.core.enqueue_outbound(packet)
    }

    fn has_incoming(&self) -> bool {
        self.core.has_incoming()
    }

    fn peek(&self, n: usize) -> Vec<RawPacket> {
        self.core.peek(n)
    }

    fn next(&self) -> Option<RawPacket> {
        self.core.next()
    }

    fn update(&mut self) {
        for _ in 0..MAX_DRAIN_PER_TICK {
            match self.plugin.receive() {
                Some((bytes, _from)) => match RawPacket::new(bytes) {
                    Ok(packet) => {
                        self.core.metrics.update(|m| m.record_received(packet.len(), now_millis()));
                        if self.core.inbound.push(packet).is_err() {
                            warn!("inbound queue full, dropping datagram");
                        }
                    }
                    Err(e) => debug!("dropped invalid datagram: {e}"),
                },
                None => break,
            }
        }

        self.flush(false);

        if self.core.metrics.snapshot().needs_reconnect() {
            self.core.set_state(ConnectionState::Degraded);
        }
        if self.can_reconnect() {
            if let Err(e) = self.reconnect() {
                debug!("reconnect attempt failed: {e}");
            }
        }

        if self.core.should_emit_metrics(Duration::from_secs(2)) {
            debug!("primary connection metrics: {:?}", self.core.metrics.snapshot());
        }
    }

    fn flush(&mut self, forced: bool) {
        let Some(target) = self.redundancy.primary_addr().map(str::to_string) else {
            return;
        };
        let peer_id = self.peer_id.clone();
        let plugin = &self.plugin;
        let redundancy = &mut self.redundancy;
        self.core.drain_and_send(forced, |packet| {
            let result = plugin.send(packet.as_bytes(), &target);
            match &result {
                Ok(()) => redundancy.record_success(&peer_id),
                Err(_) => {
                    redundancy.record_failure(&peer_id);
                }
            }
            result
        });
    }

    fn can_reconnect(&self) -> bool {
        self.core.state() == ConnectionState::Degraded
    }

    fn reconnect(&mut self) -> Result<(), ConnectionError> {
        if !self.can_reconnect() {
            return Err(ConnectionError::ReconnectNotAllowed);
        }
        // Release the old socket and join its worker threads before opening
        // a new one; re-running setup() on top of a live plugin would leak
        // the old I/O workers instead of replacing them.
        self.plugin.destroy();
        self.plugin
            .setup(&self.host, self.port)
            .map_err(|e| ConnectionError::InvalidConfig(e.to_string()))?;
        self.core.metrics.update(|m| m.reset_failed_sends());
        self.core.set_state(ConnectionState::Running);
        Ok(())
    }

    fn close(&mut self, flush: bool) {
        if self.core.state() == ConnectionState::Closed {
            return;
        }
        self.core.set_state(ConnectionState::Closing);
        if flush {
            self.flush(true);
        }
        self.plugin.destroy();
        self.core.set_state(ConnectionState::Closed);
    }

    fn stats(&self) -> ConnectionMetrics {
        self.core.metrics.snapshot()
    }

    fn state(&self) -> ConnectionState {
        self.core.state()
    }

    fn register_peer(&mut self, peer_id: &str, addr: &str) {
        self.redundancy.observe_rtt(peer_id, addr, 0.0, Instant::now());
    }

    fn observe_rtt(&mut self, rtt_millis: f64) {
        let peer_id = self.peer_id.clone();
        self.redundancy.update_rtt(&peer_id, rtt_millis, Instant::now());
    }
}

/// Classic datagram listener used when the primary path could not be
/// constructed, or as the transport for the autohost side channel.
pub struct FallbackConnection {
    core: ConnectionCore,
    plugin: UdpTransportPlugin,
    target_addr: String,
    host: String,
    port: u16,
}

impl FallbackConnection {
    pub fn new(host: &str, port: u16, target_addr: &str) -> Result<Self, ConnectionError> {
        let mut plugin = UdpTransportPlugin::new(2);
        plugin
            .setup(host, port)
            .map_err(|e| ConnectionError::InvalidConfig(e.to_string()))?;
        let core = ConnectionCore::new();
        core.set_state(ConnectionState::Initialized);
        core.set_state(ConnectionState::Running);
        Ok(Self {
            core,
            plugin,
            target_addr: target_addr.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl Connection for FallbackConnection {
    fn send(&self, packet: RawPacket) -> Result<(), ConnectionError> {
        self.core.enqueue_outbound(packet)
    }

    fn has_incoming(&self) -> bool {
        self.core.has_incoming()
    }

    fn peek(&self, n: usize) -> Vec<RawPacket> {
        self.core.peek(n)
    }

    fn next(&self) -> Option<RawPacket> {
        self.core.next()
    }

    fn update(&mut self) {
        for _ in 0..MAX_DRAIN_PER_TICK {
            match self.plugin.receive() {
                Some((bytes, _from)) => match RawPacket::new(bytes) {
                    Ok(packet) => {
                        self.core.metrics.update(|m| m.record_received(packet.len(), now_millis()));
                        if self.core.inbound.push(packet).is_err() {
                            warn!("inbound queue full, dropping datagram");
                        }
                    }
                    Err(e) => debug!("dropped invalid datagram: {e}"),
                },
                None => break,
            }
        }

        self.flush(false);

        if self.core.metrics.snapshot().needs_reconnect() {
            self.core.set_state(ConnectionState::Degraded);
        }
        if self.can_reconnect() {
            if let Err(e) = self.reconnect() {
                debug!("reconnect attempt failed: {e}");
            }
        }

        if self.core.should_emit_metrics(Duration::from_secs(5)) {
            debug!("fallback connection metrics: {:?}", self.core.metrics.snapshot());
        }
    }

    fn flush(&mut self, forced: bool) {
        let target = self.target_addr.clone();
        let plugin = &self.plugin;
        self.core.drain_and_send(forced, |packet| plugin.send(packet.as_bytes(), &target));
    }

    fn can_reconnect(&self) -> bool {
        self.core.metrics.snapshot().needs_reconnect()
    }

    fn reconnect(&mut self) -> Result<(), ConnectionError> {
        if !self.can_reconnect() {
            return Err(ConnectionError::ReconnectNotAllowed);
        }
        self.plugin.destroy();
        self.plugin
            .setup(&self.host, self.port)
            .map_err(|e| ConnectionError::InvalidConfig(e.to_string()))?;
        self.core.metrics.update(|m| m.reset_failed_sends());
        self.core.set_state(ConnectionState::Running);
        Ok(())
    }

    fn close(&mut self, flush: bool) {
        if self.core.state() == ConnectionState::Closed {
            return;
        }
        self.core.set_state(ConnectionState::Closing);
        if flush {
            self.flush(true);
        }
        self.plugin.destroy();
        self.core.set_state(ConnectionState::Closed);
    }

    fn stats(&self) -> ConnectionMetrics {
        self.core.metrics.snapshot()
    }

    fn state(&self) -> ConnectionState {
        self.core.state()
    }
}
