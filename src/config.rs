//! Configuration management for Riskgate.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::error::{Result, RiskgateError};
use crate::policy::PolicySet;
use crate::risk::RearmPolicy;

/// Prefix of environment variables that override file settings, e.g.
/// `RISKGATE__STORE__BACKEND=redis`.
const ENV_PREFIX: &str = "RISKGATE";

/// Main configuration for the Riskgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskgateConfig {
    /// Rate limiter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Risk scoring configuration
    #[serde(default)]
    pub risk: RiskConfig,

    /// Event queue configuration
    #[serde(default)]
    pub events: EventConfig,

    /// Admission policies
    #[serde(default)]
    pub policy: PolicySet,
}

/// Where rate limiter state lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In process memory, per instance
    #[default]
    Memory,
    /// Shared Redis server
    Redis,
}

/// Rate limiter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for every Redis key
    #[serde(default)]
    pub key_prefix: String,

    /// Upper bound on one Redis round trip in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: String::new(),
            operation_timeout_ms: default_operation_timeout(),
        }
    }
}

impl StoreConfig {
    /// Timeout for one remote store operation.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_operation_timeout() -> u64 {
    250
}

/// When a notified actor may be notified again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RearmMode {
    /// Notify at most once per actor
    Never,
    /// Re-arm once the score decays back to the threshold
    #[default]
    BelowThreshold,
    /// Re-arm after `rearm_cooldown_secs`
    Cooldown,
}

/// Risk scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Score above which the notifier fires
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    /// One point decays per interval, in milliseconds; 0 disables decay
    #[serde(default = "default_decay_interval")]
    pub decay_interval_ms: u64,

    /// Re-arm mode
    #[serde(default)]
    pub rearm: RearmMode,

    /// Cooldown for `RearmMode::Cooldown`, in seconds
    #[serde(default = "default_rearm_cooldown")]
    pub rearm_cooldown_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            decay_interval_ms: default_decay_interval(),
            rearm: RearmMode::default(),
            rearm_cooldown_secs: default_rearm_cooldown(),
        }
    }
}

impl RiskConfig {
    /// Interval after which one point of score decays.
    pub fn decay_interval(&self) -> Duration {
        Duration::from_millis(self.decay_interval_ms)
    }

    /// The configured re-arm policy.
    pub fn rearm_policy(&self) -> RearmPolicy {
        match self.rearm {
            RearmMode::Never => RearmPolicy::Never,
            RearmMode::BelowThreshold => RearmPolicy::BelowThreshold,
            RearmMode::Cooldown => {
                RearmPolicy::Cooldown(Duration::from_secs(self.rearm_cooldown_secs))
            }
        }
    }
}

fn default_threshold() -> u64 {
    5
}

fn default_decay_interval() -> u64 {
    30 * 60 * 1000
}

fn default_rearm_cooldown() -> u64 {
    300
}

/// Event queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Records buffered before new events are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

impl RiskgateConfig {
    /// Load configuration from an optional file, then apply `RISKGATE__*`
    /// environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| RiskgateError::Config(e.to_string()))
    }

    /// Load configuration from a file path, without environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RiskgateError::Config(e.to_string()))
    }
}
