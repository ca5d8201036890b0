//! Transport layer: pluggable send/receive plugins, RTT-based redundancy
//! across them, and the `Connection` abstraction the rest of the server
//! programs against.

pub mod connection;
pub mod plugin;
pub mod redundancy;

pub use connection::{Connection, ConnectionError, ConnectionState, FallbackConnection, PrimaryConnection};
pub use plugin::{
    DynamicTransportPlugin, SendFailure, TransportError, TransportPlugin, UdpTransportPlugin,
    EXPECTED_PLUGIN_VERSION,
};
pub use redundancy::RedundancyManager;
