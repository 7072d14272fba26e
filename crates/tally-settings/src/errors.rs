//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded or are unusable.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid settings JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Merged values no longer fit the settings shape.
    #[error("settings do not fit the expected shape: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("server.httpPort and server.wsPort are both {port}")]
    PortClash { port: u16 },

    #[error("server.wsPath must start with '/': {0}")]
    WsPath(String),

    #[error("{field} must be positive")]
    NotPositive { field: &'static str },

    #[error("client.reconnect.factor must be >= 1, got {0}")]
    ShrinkingBackoff(f64),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/tally.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "cannot read /etc/tally.json: denied");
    }

    #[test]
    fn port_clash_display() {
        let err = SettingsError::PortClash { port: 7000 };
        assert_eq!(
            err.to_string(),
            "server.httpPort and server.wsPort are both 7000"
        );
    }

    #[test]
    fn not_positive_display() {
        let err = SettingsError::NotPositive {
            field: "client.pollIntervalMs",
        };
        assert_eq!(err.to_string(), "client.pollIntervalMs must be positive");
    }
}
