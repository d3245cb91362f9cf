//! # vigil-telemetry
//!
//! Process-wide `tracing` subscriber setup. Logs go to stderr so command
//! output on stdout stays machine-readable.

#![deny(unsafe_code)]

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "vigil_ranking" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit one JSON object per line instead of compact text.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from a level name; unknown names fall back to `info`.
    pub fn from_level_name(level: &str, json: bool) -> Self {
        Self {
            log_level: Level::from_str(level).unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            json,
        }
    }

    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }
}

/// `EnvFilter` directives for a config, e.g. `info,vigil_store=debug`.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the global subscriber. Call once at startup; later calls are
/// reported on stderr and otherwise ignored.
pub fn init_telemetry(config: TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config)));

    let (json_layer, text_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter);
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter);
        (None, Some(layer))
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .try_init()
    {
        eprintln!("vigil-telemetry: subscriber already set: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let config = TelemetryConfig::default()
            .with_module_level("vigil_ranking", Level::DEBUG)
            .with_module_level("vigil_store", Level::WARN);
        assert_eq!(
            filter_directives(&config),
            "info,vigil_ranking=debug,vigil_store=warn"
        );
    }

    #[test]
    fn level_name_parsing() {
        assert_eq!(TelemetryConfig::from_level_name("debug", false).log_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::from_level_name("loud", true).log_level, Level::INFO);
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_telemetry(TelemetryConfig::default());
        init_telemetry(TelemetryConfig::from_level_name("warn", true));
    }
}
