//! Admission events and their wire form.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// The request was admitted
    Allowed,
    /// Rejected by the sliding window
    DeniedWindow,
    /// Rejected by the token bucket
    DeniedBucket,
    /// Rejected outright because of the actor's risk score
    DeniedRisk,
}

impl Decision {
    /// Whether this decision rejected the request.
    pub fn is_denial(&self) -> bool {
        !matches!(self, Decision::Allowed)
    }

    /// Status code reported to the caller for this decision.
    pub fn status_code(&self) -> u16 {
        match self {
            Decision::Allowed => 200,
            Decision::DeniedWindow | Decision::DeniedBucket => 429,
            Decision::DeniedRisk => 403,
        }
    }

    /// Wire name of this decision.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed => "ALLOWED",
            Decision::DeniedWindow => "DENIED_WINDOW",
            Decision::DeniedBucket => "DENIED_BUCKET",
            Decision::DeniedRisk => "DENIED_RISK",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One access-log record, produced once per request.
///
/// Decoding also accepts the older field names (`ip`, `action`,
/// `useragent`, `statuscode`) so records from earlier producers still score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionEvent {
    /// Actor key the request was checked under
    #[serde(alias = "ip")]
    pub actor: String,
    /// Endpoint key, e.g. `"GET /ping"`
    #[serde(default)]
    pub endpoint: String,
    /// Admission outcome
    #[serde(alias = "action")]
    pub decision: Decision,
    /// Unix timestamp in nanoseconds
    #[serde(default)]
    pub timestamp: i64,
    /// Caller's user agent, if known
    #[serde(default, alias = "useragent")]
    pub user_agent: String,
    /// Status code returned to the caller
    #[serde(default, alias = "statuscode")]
    pub status_code: u16,
}

impl AdmissionEvent {
    /// Create an event stamped with the current time.
    pub fn new(actor: impl Into<String>, endpoint: impl Into<String>, decision: Decision) -> Self {
        let now = Utc::now();
        Self {
            actor: actor.into(),
            endpoint: endpoint.into(),
            decision,
            timestamp: now
                .timestamp_nanos_opt()
                .unwrap_or_else(|| now.timestamp().saturating_mul(1_000_000_000)),
            user_agent: String::new(),
            status_code: decision.status_code(),
        }
    }

    /// Attach the caller's user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Encode as an opaque record.
    pub fn encode(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an opaque record.
    pub fn decode(bytes: &[u8]) -> crate::error::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
