//! Settings types and compiled defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default server endpoint.
pub const DEFAULT_WS_URL: &str = "wss://casino-host.stmbl.dev/ws";
/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1000;
/// Default cap on consecutive reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 50;

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server connection and reconnection policy.
    pub connection: ConnectionSettings,
    /// Client-local persisted state.
    pub storage: StorageSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Server connection and reconnection policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// WebSocket endpoint.
    pub url: String,
    /// Reconnect automatically after the transport closes or fails to open.
    pub auto_reconnect: bool,
    /// Fixed delay between reconnect attempts, in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Attempts before giving up until the next explicit connect.
    pub max_reconnect_attempts: u32,
    /// Per-request timeout in milliseconds. `None` waits until response or disconnect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    /// Value sent as `clientType` when authenticating.
    pub client_type: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            auto_reconnect: true,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            request_timeout_ms: None,
            client_type: "sdk".to_string(),
        }
    }
}

impl ConnectionSettings {
    /// Reconnect interval as a [`Duration`].
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Request timeout as a [`Duration`], if configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// Client-local persisted state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Directory holding the token file. Empty means `~/.casino`.
    pub data_dir: String,
}

impl StorageSettings {
    /// Resolved data directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if self.data_dir.is_empty() {
            crate::loader::casino_home()
        } else {
            PathBuf::from(&self.data_dir)
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive (e.g. `info`, `casino_client=debug`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}
