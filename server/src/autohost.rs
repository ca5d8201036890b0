//! Autohost side channel: a write-mostly channel mirroring lifecycle events
//! to an external controller process, with a rare inbound path for chat
//! commands the controller injects.
//!
//! Built directly on [`FallbackConnection`] — the autohost peer is a single
//! fixed endpoint, so there is no RTT-based path selection to do.

use log::warn;
use shared::AutohostMessage;

use crate::transport::{Connection, FallbackConnection};

pub struct AutohostChannel {
    connection: FallbackConnection,
}

impl AutohostChannel {
    pub fn new(host: &str, port: u16, autohost_addr: &str) -> Result<Self, crate::transport::ConnectionError> {
        Ok(Self {
            connection: FallbackConnection::new(host, port, autohost_addr)?,
        })
    }

    pub fn send(&self, message: &AutohostMessage) {
        match message.to_raw_packet() {
            Ok(packet) => {
                if let Err(e) = self.connection.send(packet) {
                    warn!("autohost send failed for {:?}: {e}", message.tag());
                }
            }
            Err(e) => warn!("failed to encode autohost message: {e}"),
        }
    }

    /// Drains and decodes the rare inbound chat-command traffic.
    pub fn next_chat(&self) -> Option<AutohostMessage> {
        loop {
            let packet = self.connection.next()?;
            match AutohostMessage::from_raw_packet(&packet) {
                Ok(msg) => return Some(msg),
                Err(e) => warn!("dropped malformed autohost inbound packet: {e}"),
            }
        }
    }

    pub fn update(&mut self) {
        self.connection.update();
    }

    pub fn flush(&mut self, forced: bool) {
        self.connection.flush(forced);
    }

    pub fn close(&mut self) {
        self.connection.close(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_does_not_panic_without_a_live_peer() {
        let channel = AutohostChannel::new("127.0.0.1", 0, "127.0.0.1:1").unwrap();
        channel.send(&AutohostMessage::ServerStarted);
    }

    #[test]
    fn next_chat_is_none_when_queue_empty() {
        let channel = AutohostChannel::new("127.0.0.1", 0, "127.0.0.1:1").unwrap();
        assert!(channel.next_chat().is_none());
    }
}
