//! Configuration loading: JSON config file plus `DCF_HOST`/`DCF_PORT`
//! environment overrides, validated once at startup.

use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required key: node_id")]
    MissingNodeId,
    #[error("invalid DCF_PORT override: {0}")]
    InvalidPortOverride(String),
}

fn default_transport() -> String {
    "gRPC".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8452
}
fn default_mode() -> String {
    "auto".to_string()
}
fn default_group_rtt_threshold() -> u64 {
    50
}
fn default_fallback_transport() -> String {
    "udp".to_string()
}
fn default_max_players() -> usize {
    160
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    #[serde(default = "default_reconnect_timeout")]
    pub reconnect_timeout: u64,
    #[serde(default)]
    pub network_loss_factor: u32,
}

fn default_mtu() -> usize {
    1400
}
fn default_reconnect_timeout() -> u64 {
    15
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            mtu: default_mtu(),
            reconnect_timeout: default_reconnect_timeout(),
            network_loss_factor: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginSettings {
    pub transport: Option<String>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self { transport: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub level: LogLevel,
    pub file: Option<String>,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: u64,
}

fn default_metrics_interval() -> u64 {
    5000
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            file: None,
            metrics_interval: default_metrics_interval(),
        }
    }
}

/// Every recognized configuration key, with the documented defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_mode")]
    pub mode: String,
    pub node_id: Option<String>,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_group_rtt_threshold")]
    pub group_rtt_threshold: u64,
    #[serde(default)]
    pub plugins: PluginSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default = "default_fallback_transport")]
    pub fallback_transport: String,
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    #[serde(default)]
    pub network_settings: NetworkSettings,
}

impl ServerConfig {
    /// Loads and validates config from `path`, then applies `DCF_HOST`/`DCF_PORT`
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: ServerConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("DCF_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("DCF_PORT") {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidPortOverride(port))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::MissingNodeId);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn write_temp_config(contents: &str) -> std::path::PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("lockstep-core-test-config-{}-{n}.json", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_node_id_is_fatal() {
        let path = write_temp_config(r#"{ "host": "0.0.0.0" }"#);
        let err = ServerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingNodeId));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn defaults_match_spec_table() {
        let path = write_temp_config(r#"{ "node_id": "server-a" }"#);
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.transport, "gRPC");
        assert_eq!(config.port, 8452);
        assert_eq!(config.group_rtt_threshold, 50);
        assert_eq!(config.max_players, 160);
        assert_eq!(config.network_settings.mtu, 1400);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn malformed_json_is_rejected() {
        let path = write_temp_config("{ not json");
        let err = ServerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        let _ = fs::remove_file(path);
    }
}
