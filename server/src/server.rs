//! Top-level `GameServer`: wires the dispatcher, scheduler, and autohost
//! channel together and runs the fixed-period tick loop on a dedicated
//! thread, one server thread holding the state for the duration of a tick.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{error, info};

use crate::autohost::AutohostChannel;
use crate::config::ServerConfig;
use crate::dispatcher::ServerDispatcher;
use crate::scheduler::FrameScheduler;
use crate::transport::{
    Connection, DynamicTransportPlugin, FallbackConnection, PrimaryConnection, TransportPlugin,
    UdpTransportPlugin, EXPECTED_PLUGIN_VERSION,
};

const MAX_TEAMS: usize = 16;
const MAX_AIS: usize = shared::MAX_AIS;

pub struct GameServer {
    dispatcher: ServerDispatcher,
    scheduler: FrameScheduler,
    autohost: AutohostChannel,
    quit: Arc<AtomicBool>,
    accept_socket: UdpSocket,
}

impl GameServer {
    pub fn new(config: &ServerConfig) -> Result<Self, crate::transport::ConnectionError> {
        let accept_socket = UdpSocket::bind((config.host.as_str(), config.port))
            .map_err(|e| crate::transport::ConnectionError::InvalidConfig(e.to_string()))?;
        accept_socket
            .set_nonblocking(true)
            .map_err(|e| crate::transport::ConnectionError::InvalidConfig(e.to_string()))?;

        let autohost = AutohostChannel::new(&config.host, 0, "127.0.0.1:0")?;
        autohost.send(&shared::AutohostMessage::ServerStarted);

        Ok(Self {
            dispatcher: ServerDispatcher::new(MAX_TEAMS, MAX_AIS, config.max_players),
            scheduler: FrameScheduler::new(),
            autohost,
            quit: Arc::new(AtomicBool::new(false)),
            accept_socket,
        })
    }

    /// Boxes the configured Primary plugin: the dynamically-loaded library
    /// named by `plugins.transport`, or the built-in UDP plugin if none is
    /// configured or the load fails.
    fn build_primary_plugin(config: &ServerConfig) -> Box<dyn TransportPlugin> {
        if let Some(path) = config.plugins.transport.as_deref() {
            match DynamicTransportPlugin::load(path, EXPECTED_PLUGIN_VERSION, config.network_settings.mtu) {
                Ok(plugin) => return Box::new(plugin),
                Err(e) => {
                    log::warn!("failed to load transport plugin {path} ({e}), falling back to UDP");
                }
            }
        }
        Box::new(UdpTransportPlugin::new(2))
    }

    /// Attempts to open the configured Primary transport; falls back to a
    /// bare UDP Connection on any setup failure. Registers every configured
    /// alternate peer as a redundancy candidate on success.
    fn open_connection(config: &ServerConfig, peer_id: &str, peer_addr: &str) -> Box<dyn Connection> {
        let primary_attempt = (|| -> Result<Box<dyn Connection>, crate::transport::ConnectionError> {
            let plugin = Self::build_primary_plugin(config);
            let connection = PrimaryConnection::new(
                plugin,
                &config.host,
                0,
                peer_id,
                peer_addr,
                config.group_rtt_threshold,
            )?;
            Ok(Box::new(connection))
        })();

        let mut connection = match primary_attempt {
            Ok(connection) => connection,
            Err(e) => {
                log::warn!("primary connection setup failed ({e}), falling back to UDP");
                let connection = FallbackConnection::new(&config.host, 0, peer_addr)
                    .expect("fallback UDP bind must not itself fail");
                Box::new(connection) as Box<dyn Connection>
            }
        };

        for alternate in &config.peers {
            connection.register_peer(alternate, alternate);
        }
        connection
    }

    /// Drains newly-arrived handshake datagrams on the accept socket and
    /// admits them as new participants via the dispatcher.
    fn accept_new_connections(&mut self, config: &ServerConfig) {
        let mut buf = [0u8; 2048];
        loop {
            match self.accept_socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    let packet = match shared::RawPacket::new(buf[..len].to_vec()) {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    if let Ok(shared::Message::CreateNewPlayer { player, spectator, team, name }) =
                        shared::Message::from_raw_packet(&packet)
                    {
                        let connection = Self::open_connection(config, &name, &from.to_string());
                        self.dispatcher.add_additional_user(player, &name, spectator, team, connection, &self.autohost);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    /// Runs the tick loop until `quitServer` is set. Spawns no extra worker
    /// threads of its own: Connection and plugin workers already run their
    /// own, so this loop stays synchronous — one thread holding the state
    /// for the duration of a tick.
    pub fn run(mut self, config: ServerConfig) {
        info!("game server listening on {}:{}", config.host, config.port);
        while !self.quit.load(Ordering::SeqCst) && !self.scheduler.quit_server {
            self.accept_new_connections(&config);
            self.scheduler.tick(&mut self.dispatcher, &self.autohost);
            self.autohost.update();
            self.autohost.flush(false);
            thread::sleep(self.scheduler.tick_period());
        }
        self.shutdown();
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    fn shutdown(mut self) {
        info!("game server shutting down");
        self.autohost.send(&shared::AutohostMessage::ServerQuit);
        self.autohost.flush(true);
        self.autohost.close();
        for (_, participant) in self.dispatcher.participants.active_iter_mut() {
            if let Some(connection) = participant.connection.as_mut() {
                connection.close(true);
            }
        }
    }
}

pub fn notify_autohost_fatal(config: &ServerConfig, reason: &str) {
    if let Ok(mut channel) = AutohostChannel::new(&config.host, 0, "127.0.0.1:0") {
        channel.send(&shared::AutohostMessage::ServerQuit);
        channel.flush(true);
    }
    error!("fatal startup error: {reason}");
}
