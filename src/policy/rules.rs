//! Limit policy configuration and endpoint matching.
//!
//! A `PolicySet` holds the base limits, exact-match endpoint overrides and
//! the risk score at which actors are rejected outright.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::endpoint::EndpointKey;
use crate::error::{Result, RiskgateError};

/// Limits for both admission algorithms.
///
/// A zero `limit` or `window_secs` disables the sliding window, and a zero
/// `capacity` disables the token bucket. Missing fields are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPolicy {
    /// Sliding window length in seconds
    #[serde(default)]
    pub window_secs: u64,
    /// Requests admitted per window
    #[serde(default)]
    pub limit: u32,
    /// Token bucket capacity
    #[serde(default)]
    pub capacity: u32,
    /// Tokens refilled per interval
    #[serde(default)]
    pub tokens_per_interval: u32,
    /// Refill interval in milliseconds
    #[serde(default)]
    pub refill_interval_ms: u64,
}

impl LimitPolicy {
    /// 100 requests per minute, with bursts of 10 refilled at one per second.
    pub fn standard() -> Self {
        Self {
            window_secs: 60,
            limit: 100,
            capacity: 10,
            tokens_per_interval: 1,
            refill_interval_ms: 1000,
        }
    }

    /// Sliding window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Token bucket refill interval.
    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }
}

/// Limits that replace the base policy for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPolicy {
    /// HTTP method to match
    pub method: String,
    /// Exact path to match
    pub path: String,
    /// Limits applied instead of the base policy
    #[serde(default)]
    pub limits: LimitPolicy,
}

/// On-disk form of a `PolicySet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolicyFile {
    #[serde(default = "LimitPolicy::standard")]
    base: LimitPolicy,
    #[serde(default)]
    endpoints: Vec<EndpointPolicy>,
    #[serde(default)]
    deny_score: Option<u64>,
}

/// The complete set of admission policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "PolicyFile", into = "PolicyFile")]
pub struct PolicySet {
    base: LimitPolicy,
    overrides: HashMap<EndpointKey, LimitPolicy>,
    deny_score: Option<u64>,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::new(LimitPolicy::standard())
    }
}

impl From<PolicyFile> for PolicySet {
    fn from(file: PolicyFile) -> Self {
        let mut set = PolicySet::new(file.base);
        set.deny_score = file.deny_score;
        for endpoint in file.endpoints {
            let key = EndpointKey::new(&endpoint.method, &endpoint.path);
            if set.overrides.insert(key.clone(), endpoint.limits).is_some() {
                warn!(endpoint = %key, "Duplicate endpoint policy, keeping the last one");
            }
        }
        set
    }
}

impl From<PolicySet> for PolicyFile {
    fn from(set: PolicySet) -> Self {
        let mut endpoints: Vec<EndpointPolicy> = set
            .overrides
            .into_iter()
            .map(|(key, limits)| EndpointPolicy {
                method: key.method,
                path: key.path,
                limits,
            })
            .collect();
        endpoints.sort_by(|a, b| (&a.path, &a.method).cmp(&(&b.path, &b.method)));
        PolicyFile {
            base: set.base,
            endpoints,
            deny_score: set.deny_score,
        }
    }
}

impl PolicySet {
    /// Create a policy set with only a base policy.
    pub fn new(base: LimitPolicy) -> Self {
        Self {
            base,
            overrides: HashMap::new(),
            deny_score: None,
        }
    }

    /// Replace the limits for one endpoint.
    pub fn with_endpoint(mut self, key: EndpointKey, limits: LimitPolicy) -> Self {
        self.overrides.insert(key, limits);
        self
    }

    /// Reject actors whose risk score reaches `score`.
    pub fn with_deny_score(mut self, score: u64) -> Self {
        self.deny_score = Some(score);
        self
    }

    /// Load policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading admission policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RiskgateError::Config(format!("Failed to parse policy config: {}", e)))
    }

    /// The base policy.
    pub fn base(&self) -> &LimitPolicy {
        &self.base
    }

    /// The configured deny score, ignoring a contradictory zero.
    pub fn deny_score(&self) -> Option<u64> {
        self.deny_score.filter(|score| *score > 0)
    }

    /// The override for an endpoint, matched exactly on method and path.
    pub fn find_override(&self, endpoint: &EndpointKey) -> Option<&LimitPolicy> {
        self.overrides.get(endpoint)
    }

    /// Number of endpoint overrides.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}
