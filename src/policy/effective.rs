//! Effective policy for one request.
//!
//! Combines the base policy, an endpoint override and the actor's risk score
//! into the limits the store is actually asked to enforce.

use std::time::Duration;

use super::endpoint::EndpointKey;
use super::rules::{LimitPolicy, PolicySet};

/// Lowest fraction of the configured limits a risky actor is scaled down to.
const MIN_RISK_FACTOR: f64 = 0.1;
/// `MIN_RISK_FACTOR` as a divisor, for integer scaling.
const MIN_RISK_DIVISOR: u128 = 10;

/// Limits in force for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectivePolicy {
    /// Sliding window length
    pub window: Duration,
    /// Requests admitted per window
    pub limit: u32,
    /// Token bucket capacity
    pub capacity: u32,
    /// Tokens refilled per interval
    pub tokens_per_interval: u32,
    /// Token bucket refill interval
    pub refill_interval: Duration,
    /// Whether an endpoint override supplied these limits
    pub endpoint_override: bool,
    /// Factor the limits were scaled by, 1.0 when unscaled
    pub risk_factor: f64,
}

impl EffectivePolicy {
    fn from_limits(limits: &LimitPolicy, endpoint_override: bool) -> Self {
        Self {
            window: limits.window(),
            limit: limits.limit,
            capacity: limits.capacity,
            tokens_per_interval: limits.tokens_per_interval,
            refill_interval: limits.refill_interval(),
            endpoint_override,
            risk_factor: 1.0,
        }
    }

    /// Whether the sliding window applies.
    pub fn window_enabled(&self) -> bool {
        !self.window.is_zero() && self.limit > 0
    }

    /// Whether the token bucket applies.
    pub fn bucket_enabled(&self) -> bool {
        self.capacity > 0
    }

    fn scale(&mut self, score: u64, deny_score: u64) {
        self.limit = scale_value(self.limit, score, deny_score);
        self.capacity = scale_value(self.capacity, score, deny_score);
        self.risk_factor = risk_factor(score, deny_score);
    }
}

/// Outcome of policy resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// The actor's score reached the deny score
    Reject {
        /// The actor's score
        score: u64,
        /// The configured deny score
        deny_score: u64,
    },
    /// Enforce these limits
    Enforce(EffectivePolicy),
}

/// Fraction of the limits left to an actor with `score`.
pub fn risk_factor(score: u64, deny_score: u64) -> f64 {
    if deny_score == 0 {
        return 1.0;
    }
    (1.0 - score as f64 / deny_score as f64).max(MIN_RISK_FACTOR)
}

/// `floor(value * risk_factor(score, deny_score))` in exact integer
/// arithmetic. Zero stays zero; anything else floors at one.
fn scale_value(value: u32, score: u64, deny_score: u64) -> u32 {
    if value == 0 || deny_score == 0 {
        return value;
    }
    let value = u128::from(value);
    let deny = u128::from(deny_score);
    let remaining = deny.saturating_sub(u128::from(score));
    let scaled = (value * remaining / deny).max(value / MIN_RISK_DIVISOR);
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

impl PolicySet {
    /// Resolve the limits for a request to `endpoint` by an actor with
    /// `score`, if one is known.
    pub fn resolve(&self, endpoint: &EndpointKey, score: Option<u64>) -> Resolution {
        let mut effective = match self.find_override(endpoint) {
            Some(limits) => EffectivePolicy::from_limits(limits, true),
            None => EffectivePolicy::from_limits(self.base(), false),
        };

        if let (Some(score), Some(deny_score)) = (score, self.deny_score()) {
            if score >= deny_score {
                return Resolution::Reject { score, deny_score };
            }
            if score > 0 {
                effective.scale(score, deny_score);
            }
        }

        Resolution::Enforce(effective)
    }
}
