//! Connection states of the reconnecting client.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries exhausted. Stays here until an explicit reconnect.
    Failed,
    /// Transient; always followed by `Reconnecting` or `Failed`.
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the client's connection bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub last_error: Option<String>,
}

impl ClientStatus {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            max_reconnect_attempts,
            ..Self::default()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state == ConnectionState::Reconnecting
    }

    pub fn is_failed(&self) -> bool {
        self.state == ConnectionState::Failed
    }

    /// Whether the owner should be polling the results endpoint.
    ///
    /// The very first connect (and the first reconnect attempt) get a grace
    /// period; any later non-connected state polls.
    pub fn needs_fallback(&self) -> bool {
        match self.state {
            ConnectionState::Connected => false,
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                self.reconnect_attempts > 0
            }
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Error => {
                true
            }
        }
    }

    /// Flattened view with the derived predicates, for display and JSON output.
    pub fn report(&self) -> StatusReport {
        StatusReport {
            state: self.state,
            is_connected: self.is_connected(),
            is_connecting: self.is_connecting(),
            is_reconnecting: self.is_reconnecting(),
            is_failed: self.is_failed(),
            reconnect_attempts: self.reconnect_attempts,
            max_reconnect_attempts: self.max_reconnect_attempts,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub is_connecting: bool,
    pub is_reconnecting: bool,
    pub is_failed: bool,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub last_error: Option<String>,
}
