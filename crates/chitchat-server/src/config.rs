//! Server configuration.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! - `~/.config/chitchat/chitchat.toml`
//! - `/etc/chitchat/chitchat.toml`
//! - `chitchat.toml` in the working directory
//! - The file passed with `--config`, if any
//! - Environment variables (`CHITCHAT_PORT`, `CHITCHAT_LIMITS__MAX_MESSAGE_SIZE`, ...)

use anyhow::{ensure, Context, Result};
use chitchat_core::{GatewayConfig, MemoryBusConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config files, lowest precedence first.
const CONFIG_PATHS: [&str; 3] = [
    "~/.config/chitchat/chitchat.toml",
    "/etc/chitchat/chitchat.toml",
    "chitchat.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// History query configuration.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Trusted identity headers.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Entries retained per channel log. Unlimited when unset.
    #[serde(default)]
    pub max_messages_per_channel: Option<usize>,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Deadline for each write in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Close connections idle for this many milliseconds. Disabled when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// History query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Wait for each replayed entry in milliseconds.
    #[serde(default = "default_history_read_timeout")]
    pub read_timeout_ms: u64,
}

/// Names of the headers set by the authenticating proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_user_id_header")]
    pub user_id_header: String,

    #[serde(default = "default_user_name_header")]
    pub user_name_header: String,

    #[serde(default = "default_avatar_header")]
    pub avatar_header: String,

    #[serde(default = "default_channel_header")]
    pub channel_header: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/channel".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_heartbeat_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_history_read_timeout() -> u64 {
    1_000
}

fn default_user_id_header() -> String {
    "x-chitchat-user-id".to_string()
}

fn default_user_name_header() -> String {
    "x-chitchat-user-name".to_string()
}

fn default_avatar_header() -> String {
    "x-chitchat-user-avatar".to_string()
}

fn default_channel_header() -> String {
    "x-chitchat-channel".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            history: HistoryConfig::default(),
            identity: IdentityConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_messages_per_channel: None,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            write_timeout_ms: default_write_timeout(),
            timeout_ms: None,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_history_read_timeout(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id_header: default_user_id_header(),
            user_name_header: default_user_name_header(),
            avatar_header: default_avatar_header(),
            channel_header: default_channel_header(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the default paths, an optional explicit file
    /// and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be parsed, `explicit` does not
    /// exist, an environment override has the wrong type, or the result fails
    /// [`Config::validate`].
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        for path in CONFIG_PATHS {
            let expanded = PathBuf::from(shellexpand::tilde(path).as_ref());
            builder = builder.add_source(config::File::from(expanded).required(false));
        }
        if let Some(path) = explicit {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CHITCHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings sessions cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.heartbeat.interval_ms > 0,
            "heartbeat.interval_ms must be greater than zero"
        );
        ensure!(
            self.heartbeat.write_timeout_ms > 0,
            "heartbeat.write_timeout_ms must be greater than zero"
        );
        ensure!(
            self.heartbeat.timeout_ms != Some(0),
            "heartbeat.timeout_ms must be greater than zero when set"
        );
        ensure!(
            self.limits.max_message_size > 0,
            "limits.max_message_size must be greater than zero"
        );
        ensure!(
            self.transport.websocket_path.starts_with('/'),
            "transport.websocket_path must start with '/'"
        );
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Session and query settings for the gateway.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            session: SessionConfig {
                ping_interval: Duration::from_millis(self.heartbeat.interval_ms),
                write_timeout: Duration::from_millis(self.heartbeat.write_timeout_ms),
                read_timeout: self.heartbeat.timeout_ms.map(Duration::from_millis),
                max_message_size: self.limits.max_message_size,
            },
            history_read_timeout: Duration::from_millis(self.history.read_timeout_ms),
        }
    }

    /// Settings for the in-process bus.
    #[must_use]
    pub fn bus_config(&self) -> MemoryBusConfig {
        MemoryBusConfig {
            max_messages_per_channel: self.limits.max_messages_per_channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/channel");
        assert_eq!(config.identity.user_id_header, "x-chitchat-user-id");
        assert!(config.heartbeat.timeout_ms.is_none());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let broken = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(broken.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_messages_per_channel = 500

            [heartbeat]
            timeout_ms = 45000

            [identity]
            channel_header = "x-room"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_messages_per_channel, Some(500));
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert_eq!(config.identity.channel_header, "x-room");
        assert_eq!(config.identity.user_name_header, "x-chitchat-user-name");

        let gateway = config.gateway_config();
        assert_eq!(gateway.session.read_timeout, Some(Duration::from_secs(45)));
        assert_eq!(gateway.session.ping_interval, Duration::from_secs(10));
        assert_eq!(gateway.history_read_timeout, Duration::from_secs(1));
    }

    fn temp_config(tag: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("chitchat-{tag}-{}.toml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_explicit_file() {
        let path = temp_config("file", "port = 7000\n[history]\nread_timeout_ms = 250\n");

        let loaded = Config::load(Some(&path));
        std::fs::remove_file(&path).unwrap();
        let config = loaded.unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(
            config.gateway_config().history_read_timeout,
            Duration::from_millis(250)
        );

        assert!(Config::load(Some(Path::new("/nonexistent/chitchat.toml"))).is_err());
    }

    // The only test that sets a CHITCHAT_* variable; no other test reads metrics.port.
    #[test]
    fn test_load_explicit_file_keeps_env_overrides() {
        let path = temp_config("env", "[metrics]\nport = 9100\n");
        std::env::set_var("CHITCHAT_METRICS__PORT", "9191");

        let loaded = Config::load(Some(&path));
        std::env::remove_var("CHITCHAT_METRICS__PORT");
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.unwrap().metrics.port, 9191);
    }

    #[test]
    fn test_validate_rejects_zero_heartbeat() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.heartbeat.interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat.interval_ms"));

        let mut config = Config::default();
        config.heartbeat.write_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.heartbeat.timeout_ms = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.max_message_size = 0;
        assert!(config.validate().is_err());

        let path = temp_config("zero", "[heartbeat]\ninterval_ms = 0\n");
        let loaded = Config::load(Some(&path));
        std::fs::remove_file(&path).unwrap();
        assert!(loaded.is_err());
    }
}
