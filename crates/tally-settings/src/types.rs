//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file only needs the keys it wants to change.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tally_core::BackoffConfig;

use crate::errors::{Result, SettingsError};

/// Root settings for both the server and the watch client.
///
/// ```json
/// {
///   "server": { "wsPort": 9090 },
///   "client": { "reconnect": { "maxAttempts": 10 } }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TallySettings {
    pub server: ServerSettings,
    pub client: ClientSettings,
}

/// Server process settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// HTTP API port.
    pub http_port: u16,
    /// WebSocket broadcast port.
    pub ws_port: u16,
    /// Upgrade path on the WebSocket port.
    pub ws_path: String,
    /// Liveness sweep interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Per-connection outbound queue depth. A full queue counts as a send failure.
    pub send_queue_capacity: usize,
    /// How long a computed results snapshot is served from cache.
    pub results_cache_ttl_ms: u64,
    /// SQLite path. Relative paths resolve against the settings directory.
    pub database_path: String,
    /// Session cookie lifetime in seconds.
    pub session_max_age_secs: u64,
    /// Poll options inserted on startup if absent.
    pub seed_options: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 3000,
            ws_port: 8080,
            ws_path: "/ws".to_string(),
            heartbeat_interval_ms: 30_000,
            send_queue_capacity: 64,
            results_cache_ttl_ms: 5_000,
            database_path: "tally.db".to_string(),
            session_max_age_secs: 24 * 60 * 60,
            seed_options: vec![
                "Option A".to_string(),
                "Option B".to_string(),
                "Option C".to_string(),
            ],
        }
    }
}

impl ServerSettings {
    /// Database path with relative values anchored at `base`.
    pub fn resolve_database_path(&self, base: &Path) -> PathBuf {
        let path = Path::new(&self.database_path);
        if path.is_absolute() || self.database_path == ":memory:" {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }
}

/// Watch client settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Broadcast server URL.
    pub ws_url: String,
    /// HTTP API base URL used for fallback polling.
    pub http_url: String,
    pub reconnect: BackoffConfig,
    /// Fallback polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Outbound command queue depth.
    pub command_buffer: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/ws".to_string(),
            http_url: "http://127.0.0.1:3000".to_string(),
            reconnect: BackoffConfig::default(),
            poll_interval_ms: 5_000,
            command_buffer: 32,
        }
    }
}

impl TallySettings {
    /// Reject combinations that cannot run.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.http_port != 0 && s.http_port == s.ws_port {
            return Err(SettingsError::PortClash { port: s.http_port });
        }
        if !s.ws_path.starts_with('/') {
            return Err(SettingsError::WsPath(s.ws_path.clone()));
        }
        let c = &self.client;
        for (field, value) in [
            ("server.heartbeatIntervalMs", s.heartbeat_interval_ms),
            ("server.sendQueueCapacity", s.send_queue_capacity as u64),
            ("client.pollIntervalMs", c.poll_interval_ms),
            ("client.commandBuffer", c.command_buffer as u64),
        ] {
            if value == 0 {
                return Err(SettingsError::NotPositive { field });
            }
        }
        if c.reconnect.factor < 1.0 {
            return Err(SettingsError::ShrinkingBackoff(c.reconnect.factor));
        }
        Ok(())
    }
}
