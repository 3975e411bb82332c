//! Pooltune Configuration System
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub tuning: TuningConfig,
    pub recorder: RecorderConfig,
    pub metrics: MetricsConfig,
    pub recommendation: RecommendationConfig,
    pub pools: Vec<PoolDefinition>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            tuning: TuningConfig::default(),
            recorder: RecorderConfig::default(),
            metrics: MetricsConfig::default(),
            recommendation: RecommendationConfig::default(),
            pools: vec![
                PoolDefinition {
                    name: "orderServicePool".to_string(),
                    min_core: 8,
                    max_core: 32,
                    max_queue: 500,
                    core: Some(8),
                    max: Some(32),
                    queue_capacity: Some(500),
                    keep_alive_secs: 60,
                },
                PoolDefinition {
                    name: "paymentServicePool".to_string(),
                    min_core: 2,
                    max_core: 16,
                    max_queue: 200,
                    core: Some(4),
                    max: Some(16),
                    queue_capacity: Some(100),
                    keep_alive_secs: 30,
                },
            ],
        }
    }
}

/// HTTP control server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Tuning loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Seconds between tuning cycles of one pool
    pub interval_secs: u64,
    /// Upper bound on a single recommendation fetch
    pub timeout_secs: u64,
    /// Minimum seconds between two applied adjustments (0 disables)
    pub cooldown_secs: u64,
    /// Start tuning every registered pool at startup
    pub auto_start: bool,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            timeout_secs: 10,
            cooldown_secs: 0,
            auto_start: false,
        }
    }
}

/// Metric history recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub enabled: bool,
    /// Sampling interval in seconds
    pub interval_secs: u64,
    /// Records kept per pool
    pub retention: usize,
    /// Sink type: file, memory
    pub sink: String,
    /// Directory for the file sink
    pub log_dir: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            retention: 60,
            sink: "file".to_string(),
            log_dir: "logs/threadpool".to_string(),
        }
    }
}

/// Gauge export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Gauge refresh interval in seconds
    pub refresh_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: 15,
        }
    }
}

/// Recommendation service configuration (OpenAI-compatible chat completions API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub endpoint: String,
    pub model: String,
    /// Bearer token, sent only when non-empty
    pub api_key: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deepseek.com/v1/chat/completions".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: String::new(),
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
        }
    }
}

/// A pool registered at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDefinition {
    pub name: String,
    pub min_core: u32,
    pub max_core: u32,
    #[serde(default = "default_max_queue")]
    pub max_queue: u32,
    /// Initial core size (defaults to min_core)
    #[serde(default)]
    pub core: Option<u32>,
    /// Initial max size (defaults to max_core)
    #[serde(default)]
    pub max: Option<u32>,
    /// Initial queue capacity (defaults to max_queue)
    #[serde(default)]
    pub queue_capacity: Option<u32>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_max_queue() -> u32 {
    200
}

fn default_keep_alive_secs() -> u64 {
    60
}

impl PoolDefinition {
    pub fn initial_core(&self) -> u32 {
        self.core.unwrap_or(self.min_core)
    }

    pub fn initial_max(&self) -> u32 {
        self.max.unwrap_or(self.max_core)
    }

    pub fn initial_queue_capacity(&self) -> u32 {
        self.queue_capacity.unwrap_or(self.max_queue)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tuning.interval_secs == 0 {
            return Err(ConfigError::ValidationError("tuning.interval_secs must be > 0".to_string()));
        }
        if self.tuning.timeout_secs == 0 {
            return Err(ConfigError::ValidationError("tuning.timeout_secs must be > 0".to_string()));
        }
        if self.recorder.enabled && self.recorder.interval_secs == 0 {
            return Err(ConfigError::ValidationError("recorder.interval_secs must be > 0".to_string()));
        }
        if self.recorder.retention == 0 {
            return Err(ConfigError::ValidationError("recorder.retention must be > 0".to_string()));
        }
        if !matches!(self.recorder.sink.as_str(), "file" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "recorder.sink must be 'file' or 'memory', got '{}'",
                self.recorder.sink
            )));
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            if pool.name.trim().is_empty() {
                return Err(ConfigError::ValidationError("pool name must not be empty".to_string()));
            }
            if !seen.insert(pool.name.as_str()) {
                return Err(ConfigError::ValidationError(format!("duplicate pool name '{}'", pool.name)));
            }
            if pool.min_core > pool.max_core {
                return Err(ConfigError::ValidationError(format!(
                    "pool '{}': min_core {} exceeds max_core {}",
                    pool.name, pool.min_core, pool.max_core
                )));
            }
            if pool.max_queue == 0 {
                return Err(ConfigError::ValidationError(format!("pool '{}': max_queue must be > 0", pool.name)));
            }
            if pool.initial_queue_capacity() > pool.max_queue {
                return Err(ConfigError::ValidationError(format!(
                    "pool '{}': queue_capacity {} exceeds max_queue {}",
                    pool.name,
                    pool.initial_queue_capacity(),
                    pool.max_queue
                )));
            }
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Pooltune Configuration
# Environment variables (POOLTUNE_*) override these settings

[http]
port = 8080
host = "0.0.0.0"

[tuning]
interval_secs = 5
timeout_secs = 10
cooldown_secs = 0
auto_start = false

[recorder]
enabled = true
interval_secs = 5
retention = 60
sink = "file"  # file, memory
log_dir = "logs/threadpool"

[metrics]
enabled = true
refresh_interval_secs = 15

[recommendation]
endpoint = "https://api.deepseek.com/v1/chat/completions"
model = "deepseek-chat"
api_key = ""
connect_timeout_secs = 30
request_timeout_secs = 60

[[pools]]
name = "orderServicePool"
min_core = 8
max_core = 32
max_queue = 500
core = 8
max = 32
queue_capacity = 500
keep_alive_secs = 60

[[pools]]
name = "paymentServicePool"
min_core = 2
max_core = 16
max_queue = 200
core = 4
max = 16
queue_capacity = 100
keep_alive_secs = 30
"#
        .to_string()
    }
}
