//! Request admission.
//!
//! The `Enforcer` resolves the effective policy for a request, runs the
//! enabled algorithms against the store and publishes one event per request
//! for risk scoring.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::policy::{EffectivePolicy, EndpointKey, PolicySet, Resolution};
use crate::ratelimit::RateLimiterStore;
use crate::risk::{AdmissionEvent, Decision, EventSink, NullSink, RiskEngine};

/// One request to admit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// Caller identity, typically the client address
    pub actor: String,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Caller's user agent, if known
    pub user_agent: Option<String>,
}

impl AdmissionRequest {
    /// Create a request without a user agent.
    pub fn new(actor: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            method: method.into(),
            path: path.into(),
            user_agent: None,
        }
    }

    /// Attach the caller's user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    /// Admission outcome
    pub decision: Decision,
    /// Status code to report to the caller
    pub status_code: u16,
}

impl Admission {
    fn from_decision(decision: Decision) -> Self {
        Self {
            decision,
            status_code: decision.status_code(),
        }
    }

    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        !self.decision.is_denial()
    }
}

/// Admits requests against a store under a policy set.
pub struct Enforcer {
    store: Arc<dyn RateLimiterStore>,
    policies: PolicySet,
    risk: Option<Arc<RiskEngine>>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("policies", &self.policies)
            .field("risk", &self.risk)
            .finish()
    }
}

impl Enforcer {
    /// Create an enforcer without risk scoring or event emission.
    pub fn new(store: Arc<dyn RateLimiterStore>, policies: PolicySet) -> Self {
        Self {
            store,
            policies,
            risk: None,
            sink: Arc::new(NullSink),
        }
    }

    /// Read risk scores from `engine` when resolving policies.
    pub fn with_risk(mut self, engine: Arc<RiskEngine>) -> Self {
        self.risk = Some(engine);
        self
    }

    /// Publish one event per request to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The policies in force.
    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Admit or deny one request.
    ///
    /// Never fails: store outages are admitted by the store, and events that
    /// cannot be delivered are dropped by the sink.
    pub async fn check(&self, request: &AdmissionRequest) -> Admission {
        let endpoint = EndpointKey::new(&request.method, &request.path);
        let score = self.risk.as_ref().map(|engine| engine.score(&request.actor));

        let decision = match self.policies.resolve(&endpoint, score) {
            Resolution::Reject { score, deny_score } => {
                debug!(
                    actor = %request.actor,
                    endpoint = %endpoint,
                    score,
                    deny_score,
                    "Rejecting request on risk score"
                );
                Decision::DeniedRisk
            }
            Resolution::Enforce(policy) => {
                let key = if policy.endpoint_override {
                    endpoint.scoped_actor_key(&request.actor)
                } else {
                    request.actor.clone()
                };
                self.enforce(&key, &policy).await
            }
        };

        trace!(
            actor = %request.actor,
            endpoint = %endpoint,
            decision = %decision,
            "Admission decided"
        );

        let mut event = AdmissionEvent::new(&request.actor, endpoint.to_string_key(), decision);
        if let Some(user_agent) = &request.user_agent {
            event = event.with_user_agent(user_agent.as_str());
        }
        self.sink.publish(&event);

        Admission::from_decision(decision)
    }

    async fn enforce(&self, key: &str, policy: &EffectivePolicy) -> Decision {
        if policy.window_enabled()
            && !self.store.admit_window(key, policy.window, policy.limit).await
        {
            debug!(key = %key, limit = policy.limit, "Sliding window limit exceeded");
            return Decision::DeniedWindow;
        }

        if policy.bucket_enabled()
            && !self
                .store
                .admit_bucket(
                    key,
                    policy.capacity,
                    policy.tokens_per_interval,
                    policy.refill_interval,
                )
                .await
        {
            debug!(key = %key, capacity = policy.capacity, "Token bucket exhausted");
            return Decision::DeniedBucket;
        }

        Decision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::LimitPolicy;
    use crate::ratelimit::MemoryStore;
    use crate::risk::event_queue;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Scores events as soon as they are published.
    struct EngineSink(Arc<RiskEngine>);

    impl EventSink for EngineSink {
        fn publish(&self, event: &AdmissionEvent) {
            self.0.process_event(event);
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<AdmissionEvent>>,
    }

    impl EventSink for CollectingSink {
        fn publish(&self, event: &AdmissionEvent) {
            self.events.lock().push(event.clone());
        }
    }

    fn enforcer(base: LimitPolicy) -> Enforcer {
        Enforcer::new(Arc::new(MemoryStore::new()), PolicySet::new(base))
    }

    fn get(actor: &str) -> AdmissionRequest {
        AdmissionRequest::new(actor, "GET", "/")
    }

    #[tokio::test]
    async fn test_both_algorithms() {
        let enforcer = enforcer(LimitPolicy {
            window_secs: 60,
            limit: 3,
            capacity: 2,
            tokens_per_interval: 1,
            refill_interval_ms: 60_000,
        });

        assert_eq!(enforcer.check(&get("a")).await.decision, Decision::Allowed);
        assert_eq!(enforcer.check(&get("a")).await.decision, Decision::Allowed);
        // Window admits the third, bucket is empty
        let third = enforcer.check(&get("a")).await;
        assert_eq!(third.decision, Decision::DeniedBucket);
        assert_eq!(third.status_code, 429);
        // Window is now full and checked first
        assert_eq!(enforcer.check(&get("a")).await.decision, Decision::DeniedWindow);
    }

    #[tokio::test]
    async fn test_window_only() {
        let enforcer = enforcer(LimitPolicy {
            window_secs: 60,
            limit: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            assert!(enforcer.check(&get("a")).await.is_allowed());
        }
        let denied = enforcer.check(&get("a")).await;
        assert_eq!(denied.decision, Decision::DeniedWindow);
        assert_eq!(denied.status_code, 429);
    }

    #[tokio::test]
    async fn test_bucket_only() {
        let enforcer = enforcer(LimitPolicy {
            capacity: 2,
            tokens_per_interval: 1,
            refill_interval_ms: 60_000,
            ..Default::default()
        });

        assert!(enforcer.check(&get("a")).await.is_allowed());
        assert!(enforcer.check(&get("a")).await.is_allowed());
        assert_eq!(enforcer.check(&get("a")).await.decision, Decision::DeniedBucket);
    }

    #[tokio::test]
    async fn test_nothing_configured_admits_everything() {
        let enforcer = enforcer(LimitPolicy::default());

        for _ in 0..50 {
            let admission = enforcer.check(&get("a")).await;
            assert_eq!(admission.decision, Decision::Allowed);
            assert_eq!(admission.status_code, 200);
        }
    }

    #[tokio::test]
    async fn test_actors_are_isolated() {
        let enforcer = enforcer(LimitPolicy {
            window_secs: 60,
            limit: 1,
            ..Default::default()
        });

        assert!(enforcer.check(&get("a")).await.is_allowed());
        assert!(!enforcer.check(&get("a")).await.is_allowed());
        assert!(enforcer.check(&get("b")).await.is_allowed());
    }

    #[tokio::test]
    async fn test_endpoint_override_uses_own_counter() {
        let policies = PolicySet::new(LimitPolicy {
            window_secs: 60,
            limit: 2,
            ..Default::default()
        })
        .with_endpoint(
            EndpointKey::new("POST", "/login"),
            LimitPolicy {
                capacity: 1,
                tokens_per_interval: 1,
                refill_interval_ms: 60_000,
                ..Default::default()
            },
        );
        let enforcer = Enforcer::new(Arc::new(MemoryStore::new()), policies);
        let login = AdmissionRequest::new("a", "post", "/login");

        assert!(enforcer.check(&login).await.is_allowed());
        assert_eq!(enforcer.check(&login).await.decision, Decision::DeniedBucket);

        // Other endpoints share the base counter for the actor
        assert!(enforcer.check(&AdmissionRequest::new("a", "GET", "/x")).await.is_allowed());
        assert!(enforcer.check(&AdmissionRequest::new("a", "GET", "/y")).await.is_allowed());
        assert_eq!(
            enforcer.check(&AdmissionRequest::new("a", "GET", "/z")).await.decision,
            Decision::DeniedWindow
        );
    }

    #[tokio::test]
    async fn test_every_request_publishes_event() {
        let sink = Arc::new(CollectingSink::default());
        let enforcer = enforcer(LimitPolicy {
            window_secs: 60,
            limit: 1,
            ..Default::default()
        })
        .with_sink(sink.clone());

        enforcer
            .check(&AdmissionRequest::new("10.0.0.1", "get", "/ping").with_user_agent("curl/8.0"))
            .await;
        enforcer.check(&AdmissionRequest::new("10.0.0.1", "GET", "/ping")).await;

        let events = sink.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].actor, "10.0.0.1");
        assert_eq!(events[0].endpoint, "GET /ping");
        assert_eq!(events[0].decision, Decision::Allowed);
        assert_eq!(events[0].user_agent, "curl/8.0");
        assert_eq!(events[0].status_code, 200);
        assert_eq!(events[1].decision, Decision::DeniedWindow);
        assert_eq!(events[1].status_code, 429);
        assert!(events[1].user_agent.is_empty());
    }

    #[tokio::test]
    async fn test_risk_feedback_loop() {
        let engine = Arc::new(RiskEngine::new(5, Duration::from_secs(1800)));
        let policies = PolicySet::new(LimitPolicy {
            window_secs: 60,
            limit: 1,
            ..Default::default()
        })
        .with_deny_score(3);
        let enforcer = Enforcer::new(Arc::new(MemoryStore::new()), policies)
            .with_risk(engine.clone())
            .with_sink(Arc::new(EngineSink(engine.clone())));

        assert_eq!(enforcer.check(&get("a")).await.decision, Decision::Allowed);
        assert_eq!(engine.score("a"), 0);

        for expected in 1..=3 {
            assert_eq!(enforcer.check(&get("a")).await.decision, Decision::DeniedWindow);
            assert_eq!(engine.score("a"), expected);
        }

        // Score reached the deny score, the store is no longer consulted
        let rejected = enforcer.check(&get("a")).await;
        assert_eq!(rejected.decision, Decision::DeniedRisk);
        assert_eq!(rejected.status_code, 403);

        // Other actors are unaffected
        assert_eq!(enforcer.check(&get("b")).await.decision, Decision::Allowed);
        assert_eq!(engine.score("b"), 0);
    }

    #[tokio::test]
    async fn test_risk_rejections_keep_scoring() {
        let decay = Duration::from_secs(1800);
        let engine = Arc::new(RiskEngine::new(5, decay));
        let policies = PolicySet::new(LimitPolicy::default()).with_deny_score(2);
        let enforcer = Enforcer::new(Arc::new(MemoryStore::new()), policies)
            .with_risk(engine.clone())
            .with_sink(Arc::new(EngineSink(engine.clone())));

        for _ in 0..2 {
            engine.process_event(&AdmissionEvent::new("a", "GET /", Decision::DeniedWindow));
        }

        // Each rejected retry is itself a denial and raises the score
        for expected in 3..=6 {
            assert_eq!(enforcer.check(&get("a")).await.decision, Decision::DeniedRisk);
            assert_eq!(engine.score("a"), expected);
        }

        // Backing off lets decay bring the actor under the deny score
        let later = std::time::Instant::now() + decay * 5;
        assert_eq!(engine.score_at("a", later), 1);
    }

    #[tokio::test]
    async fn test_risk_scaling_tightens_limits() {
        let engine = Arc::new(RiskEngine::new(100, Duration::ZERO));
        let policies = PolicySet::new(LimitPolicy {
            capacity: 10,
            tokens_per_interval: 1,
            refill_interval_ms: 60_000,
            ..Default::default()
        })
        .with_deny_score(10);
        let enforcer = Enforcer::new(Arc::new(MemoryStore::new()), policies).with_risk(engine.clone());

        for _ in 0..5 {
            engine.process_event(&AdmissionEvent::new("a", "GET /", Decision::DeniedBucket));
        }

        // Factor 0.5 halves the capacity to 5
        for _ in 0..5 {
            assert!(enforcer.check(&get("a")).await.is_allowed());
        }
        assert_eq!(enforcer.check(&get("a")).await.decision, Decision::DeniedBucket);

        for _ in 0..10 {
            assert!(enforcer.check(&get("b")).await.is_allowed());
        }
    }

    #[tokio::test]
    async fn test_events_flow_through_queue() {
        let (sink, mut records) = event_queue(16);
        let enforcer = enforcer(LimitPolicy {
            window_secs: 60,
            limit: 1,
            ..Default::default()
        })
        .with_sink(Arc::new(sink));
        let engine = RiskEngine::new(5, Duration::from_secs(1800));

        enforcer.check(&get("a")).await;
        enforcer.check(&get("a")).await;
        drop(enforcer);

        let mut processed = 0;
        while let Some(record) = records.next().await {
            engine.handle_record(&record);
            processed += 1;
        }

        assert_eq!(processed, 2);
        assert_eq!(engine.score("a"), 1);
    }
}
