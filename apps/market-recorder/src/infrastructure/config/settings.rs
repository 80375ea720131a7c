//! Recorder Configuration Settings
//!
//! Configuration types for the recorder, loaded from environment variables.
//! Transport tuning is fixed and not read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::subscription::{Topic, topic_plan};
use crate::infrastructure::wamp::compression::DeflateOffer;

/// Default router endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://api.poloniex.com:443";

/// Default realm.
pub const DEFAULT_REALM: &str = "realm1";

/// Default tracked market.
pub const DEFAULT_MARKET: &str = "BTC_ETH";

/// Default database file.
pub const DEFAULT_DB_PATH: &str = "poloniex.db";

/// Default per-topic channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// WebSocket protocol options applied to every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Largest accepted frame payload.
    pub max_frame_size: usize,
    /// Largest accepted message payload.
    pub max_message_size: usize,
    /// Outgoing text above this size is sent as a fragmented message.
    pub auto_fragment_size: usize,
    /// Bound on TCP, TLS and WebSocket handshakes, and on the realm join.
    pub open_handshake_timeout: Duration,
    /// Bound on the session leave and on the close handshake.
    pub close_handshake_timeout: Duration,
    /// Disable Nagle's algorithm.
    pub tcp_nodelay: bool,
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Time allowed for the matching pong.
    pub ping_timeout: Duration,
    /// Random payload bytes per ping.
    pub ping_payload_size: usize,
    /// Compression offer; `None` offers nothing.
    pub deflate: Option<DeflateOffer>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_frame_size: 1_048_576,
            max_message_size: 1_048_576,
            auto_fragment_size: 65_536,
            open_handshake_timeout: Duration::from_secs(25),
            close_handshake_timeout: Duration::from_secs(1),
            tcp_nodelay: true,
            ping_interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
            ping_payload_size: 4,
            deflate: Some(DeflateOffer::default()),
        }
    }
}

/// Complete recorder configuration.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Router WebSocket URL (`ws://` or `wss://`).
    pub endpoint: String,
    /// Realm to join.
    pub realm: String,
    /// Market codes to record, in subscription order.
    pub markets: Vec<String>,
    /// Database file.
    pub db_path: PathBuf,
    /// Capacity of each topic's event channel.
    pub channel_capacity: usize,
    /// Prometheus listener port (0 = disabled).
    pub metrics_port: u16,
    /// Fixed protocol options.
    pub transport: TransportSettings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            realm: DEFAULT_REALM.to_string(),
            markets: vec![DEFAULT_MARKET.to_string()],
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            metrics_port: 0,
            transport: TransportSettings::default(),
        }
    }
}

impl RecorderConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unusable value.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let endpoint = lookup("RECORDER_ENDPOINT").unwrap_or(defaults.endpoint);
        if !(endpoint.starts_with("wss://") || endpoint.starts_with("ws://")) {
            return Err(ConfigError::InvalidValue {
                key: "RECORDER_ENDPOINT".to_string(),
                value: endpoint,
            });
        }

        let realm = lookup("RECORDER_REALM").unwrap_or(defaults.realm);
        if realm.trim().is_empty() {
            return Err(ConfigError::EmptyValue("RECORDER_REALM".to_string()));
        }

        let markets = lookup("RECORDER_MARKETS").map_or(defaults.markets, |raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string)
                .collect()
        });
        if markets.is_empty() {
            return Err(ConfigError::EmptyValue("RECORDER_MARKETS".to_string()));
        }

        let db_path = lookup("RECORDER_DB_PATH")
            .filter(|path| !path.is_empty())
            .map_or(defaults.db_path, PathBuf::from);

        let channel_capacity = parse_var(
            &lookup,
            "RECORDER_CHANNEL_CAPACITY",
            defaults.channel_capacity,
        );
        if channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RECORDER_CHANNEL_CAPACITY".to_string(),
                value: "0".to_string(),
            });
        }

        let metrics_port = parse_var(&lookup, "RECORDER_METRICS_PORT", defaults.metrics_port);

        Ok(Self {
            endpoint,
            realm,
            markets,
            db_path,
            channel_capacity,
            metrics_port,
            transport: defaults.transport,
        })
    }

    /// Topics in subscription order: `ticker`, then each market.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        topic_plan(&self.markets)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
