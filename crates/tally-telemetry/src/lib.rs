use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output encoding for log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for terminals.
    #[default]
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "tally_server::websocket" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Pretty,
        }
    }
}

impl TelemetryConfig {
    /// Filter directive string used when RUST_LOG is unset.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Handle returned from [`init_telemetry`].
pub struct TelemetryGuard {
    effective_filter: String,
    module_levels: Arc<RwLock<Vec<(String, Level)>>>,
}

impl TelemetryGuard {
    /// The filter directives the subscriber was built with.
    pub fn effective_filter(&self) -> &str {
        &self.effective_filter
    }

    /// Per-module overrides from the config.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.module_levels.read().clone()
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// A second call leaves the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let fallback = config.filter_directives();
    let (env_filter, effective_filter) = match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            let text = filter.to_string();
            (filter, text)
        }
        Err(_) => (EnvFilter::new(&fallback), fallback),
    };

    let json_layer = (config.format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let pretty_layer = (config.format == LogFormat::Pretty)
        .then(|| tracing_subscriber::fmt::layer().with_target(true));

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
    {
        eprintln!("tally-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard {
        effective_filter,
        module_levels: Arc::new(RwLock::new(config.module_levels)),
    }
}
