//! Log output for the `mdquote` binary, configured by the `log:` section.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The `log:` section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for everything without its own entry in `components`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Per-crate levels, e.g. `mdquote-ws: debug`. Dashes are accepted.
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// One JSON object per line instead of plain text.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Filter directives, e.g. `"info,mdquote_ws=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }

    /// Reject levels `EnvFilter` cannot parse.
    pub fn check(&self) -> Result<(), String> {
        EnvFilter::try_new(self.directives())
            .map(drop)
            .map_err(|e| format!("log directives '{}': {e}", self.directives()))
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(self.directives()).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `config`;
/// a filter that fails to parse falls back to `info`. Call once.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.env_filter());
    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_components() {
        let mut cfg = LogConfig::default();
        cfg.components.insert("mdquote-ws".into(), "debug".into());
        cfg.components.insert("mdquote-core".into(), "trace".into());
        assert_eq!(cfg.directives(), "info,mdquote_core=trace,mdquote_ws=debug");
    }

    #[test]
    fn unknown_level_is_rejected() {
        let mut cfg = LogConfig::default();
        assert!(cfg.check().is_ok());
        cfg.components.insert("mdquote-ws".into(), "loud".into());
        assert!(cfg.check().is_err());
    }
}
