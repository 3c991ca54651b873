//! Structured logging setup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{Error, Result};

fn default_level() -> String {
    "info".to_string()
}

/// Log configuration. `RUST_LOG`, when set, overrides `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// An `EnvFilter` directive such as `"info"` or `"neurograph::dbs=trace"`.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_level(), thread_ids: false }
    }
}

impl LogConfig {
    pub fn filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| Error::ConfigError(format!("invalid log level '{}': {e}", self.level))),
        }
    }
}

/// Install the global fmt subscriber. A second call leaves the first
/// subscriber in place.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = config.filter()?;
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(config.thread_ids)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_repeat_init() {
        let config: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LogConfig::default());
        init(&config).unwrap();
        init(&config).unwrap();
    }

    #[test]
    fn test_bad_level_rejected() {
        let config = LogConfig { level: "neurograph=loud".into(), thread_ids: false };
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(matches!(config.filter(), Err(Error::ConfigError(_))));
        }
    }
}
