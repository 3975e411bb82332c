//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "pooltune.toml",
    "config.toml",
    "./config/pooltune.toml",
    "./config/config.toml",
    "/etc/pooltune/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides,
    /// then validate the result.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("POOLTUNE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Apply `POOLTUNE_*` overrides using the given variable lookup
    pub fn apply_overrides<F>(&self, config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // HTTP
        if let Some(port) = lookup("POOLTUNE_HTTP_PORT").and_then(|v| v.parse().ok()) {
            config.http.port = port;
        }
        if let Some(val) = lookup("POOLTUNE_HTTP_HOST") {
            config.http.host = val;
        }

        // Tuning
        if let Some(secs) = lookup("POOLTUNE_TUNING_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            config.tuning.interval_secs = secs;
        }
        if let Some(secs) = lookup("POOLTUNE_TUNING_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.tuning.timeout_secs = secs;
        }
        if let Some(secs) = lookup("POOLTUNE_TUNING_COOLDOWN_SECS").and_then(|v| v.parse().ok()) {
            config.tuning.cooldown_secs = secs;
        }
        if let Some(val) = lookup("POOLTUNE_TUNING_AUTO_START") {
            config.tuning.auto_start = val.parse().unwrap_or(false);
        }

        // Recorder
        if let Some(val) = lookup("POOLTUNE_RECORDER_ENABLED") {
            config.recorder.enabled = val.parse().unwrap_or(true);
        }
        if let Some(secs) = lookup("POOLTUNE_RECORDER_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            config.recorder.interval_secs = secs;
        }
        if let Some(retention) = lookup("POOLTUNE_RECORDER_RETENTION").and_then(|v| v.parse().ok()) {
            config.recorder.retention = retention;
        }
        if let Some(val) = lookup("POOLTUNE_RECORDER_SINK") {
            config.recorder.sink = val;
        }
        if let Some(val) = lookup("POOLTUNE_RECORDER_LOG_DIR") {
            config.recorder.log_dir = val;
        }

        // Metrics
        if let Some(val) = lookup("POOLTUNE_METRICS_ENABLED") {
            config.metrics.enabled = val.parse().unwrap_or(true);
        }

        // Recommendation
        if let Some(val) = lookup("POOLTUNE_RECOMMENDATION_ENDPOINT") {
            config.recommendation.endpoint = val;
        }
        if let Some(val) = lookup("POOLTUNE_RECOMMENDATION_MODEL") {
            config.recommendation.model = val;
        }
        if let Some(val) = lookup("POOLTUNE_RECOMMENDATION_API_KEY") {
            config.recommendation.api_key = val;
        }
        if let Some(secs) = lookup("POOLTUNE_RECOMMENDATION_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.recommendation.request_timeout_secs = secs;
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
