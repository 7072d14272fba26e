use std::time::Duration;

use tally_core::BackoffConfig;
use tally_settings::ClientSettings;

const DEFAULT_COMMAND_BUFFER: usize = 32;
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Runtime knobs for [`ReconnectingClient`](crate::ReconnectingClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub backoff: BackoffConfig,
    /// When `false` every abnormal close ends in `disconnected`.
    pub reconnect_enabled: bool,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            reconnect_enabled: true,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ClientConfig {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            backoff: settings.reconnect.clone(),
            command_buffer: settings.command_buffer.max(1),
            ..Self::default()
        }
    }
}

/// Interval for [`FallbackPoller`](crate::FallbackPoller) from settings.
pub fn poll_interval(settings: &ClientSettings) -> Duration {
    Duration::from_millis(settings.poll_interval_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_settings_copies_backoff() {
        let mut settings = ClientSettings::default();
        settings.reconnect.max_attempts = 9;
        settings.command_buffer = 0;
        let cfg = ClientConfig::from_settings(&settings);
        assert_eq!(cfg.backoff.max_attempts, 9);
        assert_eq!(cfg.command_buffer, 1);
        assert!(cfg.reconnect_enabled);
    }

    #[test]
    fn default_poll_interval_is_five_seconds() {
        assert_eq!(poll_interval(&ClientSettings::default()), Duration::from_secs(5));
    }
}
