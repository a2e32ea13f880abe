//! Per-actor risk scoring.
//!
//! A score counts recent denials for one actor. Each scored event first
//! decays the stored value by one point per elapsed decay interval (never
//! below zero) and then adds one. Crossing the threshold is edge-triggered:
//! the notifier fires once per excursion, and the `RearmPolicy` decides when
//! a new excursion may fire again.

use dashmap::DashMap;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::event::AdmissionEvent;
use super::notifier::ThresholdNotifier;
use crate::config::RiskConfig;

/// When an actor that already triggered a notification may trigger again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RearmPolicy {
    /// Never re-notify for the lifetime of the record.
    Never,
    /// Re-arm once the decayed score is back at or below the threshold.
    BelowThreshold,
    /// Re-arm once this long has passed since the last notification.
    Cooldown(Duration),
}

impl Default for RearmPolicy {
    fn default() -> Self {
        RearmPolicy::BelowThreshold
    }
}

/// Result of scoring one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreUpdate {
    /// Score after this event
    pub score: u64,
    /// Whether this event took the score above the threshold for the first
    /// time in the current excursion
    pub crossed: bool,
}

/// Counters reported when a consume loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    /// Records decoded and handed to the engine
    pub processed: u64,
    /// Records that could not be decoded
    pub skipped: u64,
}

#[derive(Debug)]
struct RiskScore {
    value: u64,
    last_updated: Instant,
    notified: bool,
    notified_at: Option<Instant>,
}

/// Maintains a decaying risk score per actor.
pub struct RiskEngine {
    /// Scores indexed by actor key, created on first denial
    scores: DashMap<String, Arc<Mutex<RiskScore>>>,
    threshold: u64,
    decay_interval: Duration,
    rearm: RearmPolicy,
    notifier: Option<Arc<dyn ThresholdNotifier>>,
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("threshold", &self.threshold)
            .field("decay_interval", &self.decay_interval)
            .field("rearm", &self.rearm)
            .field("tracked_actors", &self.scores.len())
            .finish()
    }
}

impl RiskEngine {
    /// Create an engine.
    ///
    /// A zero `decay_interval` disables decay.
    pub fn new(threshold: u64, decay_interval: Duration) -> Self {
        Self {
            scores: DashMap::new(),
            threshold,
            decay_interval,
            rearm: RearmPolicy::default(),
            notifier: None,
        }
    }

    /// Create an engine from the risk section of the service configuration.
    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(config.threshold, config.decay_interval()).with_rearm(config.rearm_policy())
    }

    /// Set the re-arm policy.
    pub fn with_rearm(mut self, rearm: RearmPolicy) -> Self {
        self.rearm = rearm;
        self
    }

    /// Register the observer for threshold crossings.
    pub fn with_notifier(mut self, notifier: Arc<dyn ThresholdNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// The configured threshold.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Number of actors with a score record.
    pub fn tracked_actors(&self) -> usize {
        self.scores.len()
    }

    fn decay_steps(&self, last_updated: Instant, now: Instant) -> u64 {
        if self.decay_interval.is_zero() {
            return 0;
        }
        let elapsed = now.saturating_duration_since(last_updated);
        let steps = elapsed.as_nanos() / self.decay_interval.as_nanos();
        u64::try_from(steps).unwrap_or(u64::MAX)
    }

    fn maybe_rearm(&self, score: &mut RiskScore, decayed: u64, now: Instant) {
        if !score.notified {
            return;
        }
        let rearmed = match self.rearm {
            RearmPolicy::Never => false,
            RearmPolicy::BelowThreshold => decayed <= self.threshold,
            RearmPolicy::Cooldown(cooldown) => score
                .notified_at
                .map_or(true, |at| now.saturating_duration_since(at) >= cooldown),
        };
        if rearmed {
            score.notified = false;
            score.notified_at = None;
        }
    }

    /// Score one event.
    pub fn process_event(&self, event: &AdmissionEvent) -> ScoreUpdate {
        self.process_event_at(event, Instant::now())
    }

    /// Score one event as of `now`.
    ///
    /// Only denials are scored; an admitted event reports the actor's current
    /// score and never crosses the threshold.
    pub fn process_event_at(&self, event: &AdmissionEvent, now: Instant) -> ScoreUpdate {
        if !event.decision.is_denial() {
            return ScoreUpdate {
                score: self.score_at(&event.actor, now),
                crossed: false,
            };
        }

        let record = self.record(&event.actor, now);
        let update = {
            let mut score = record.lock();
            let decayed = score
                .value
                .saturating_sub(self.decay_steps(score.last_updated, now));
            self.maybe_rearm(&mut score, decayed, now);

            score.value = decayed.saturating_add(1);
            score.last_updated = now;

            let crossed = score.value > self.threshold && !score.notified;
            if crossed {
                score.notified = true;
                score.notified_at = Some(now);
            }
            ScoreUpdate {
                score: score.value,
                crossed,
            }
        };

        debug!(
            actor = %event.actor,
            decision = %event.decision,
            score = update.score,
            "Scored admission event"
        );

        if update.crossed {
            info!(
                actor = %event.actor,
                score = update.score,
                threshold = self.threshold,
                "Actor crossed risk threshold"
            );
            if let Some(notifier) = &self.notifier {
                notifier.notify(&event.actor, update.score);
            }
        }

        update
    }

    fn record(&self, actor: &str, now: Instant) -> Arc<Mutex<RiskScore>> {
        if let Some(existing) = self.scores.get(actor) {
            return Arc::clone(&existing);
        }
        let entry = self.scores.entry(actor.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(RiskScore {
                value: 0,
                last_updated: now,
                notified: false,
                notified_at: None,
            }))
        });
        Arc::clone(&entry)
    }

    /// Current score for `actor`, with decay applied but not stored.
    pub fn score(&self, actor: &str) -> u64 {
        self.score_at(actor, Instant::now())
    }

    /// Score for `actor` as of `now`, without mutating it.
    pub fn score_at(&self, actor: &str, now: Instant) -> u64 {
        let Some(record) = self.scores.get(actor).map(|r| Arc::clone(&r)) else {
            return 0;
        };
        let score = record.lock();
        score
            .value
            .saturating_sub(self.decay_steps(score.last_updated, now))
    }

    /// Decode and score one encoded record.
    ///
    /// Returns `None`, after logging, when the record is malformed.
    pub fn handle_record(&self, record: &[u8]) -> Option<ScoreUpdate> {
        match AdmissionEvent::decode(record) {
            Ok(event) => Some(self.process_event(&event)),
            Err(e) => {
                warn!(error = %e, len = record.len(), "Skipping malformed admission event");
                None
            }
        }
    }

    /// Consume encoded records until the stream ends.
    pub async fn consume<S>(&self, records: S) -> ConsumeStats
    where
        S: Stream<Item = Vec<u8>>,
    {
        self.consume_with_shutdown(records, std::future::pending()).await
    }

    /// Consume encoded records until the stream ends or `shutdown` resolves.
    ///
    /// Shutdown is checked before each record; a record is only scored once
    /// it has been received in full.
    pub async fn consume_with_shutdown<S, F>(&self, records: S, shutdown: F) -> ConsumeStats
    where
        S: Stream<Item = Vec<u8>>,
        F: Future<Output = ()>,
    {
        tokio::pin!(records);
        tokio::pin!(shutdown);

        let mut stats = ConsumeStats::default();
        info!("Risk engine consuming admission events");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Risk engine consumer shutting down");
                    break;
                }
                record = records.next() => match record {
                    Some(record) => match self.handle_record(&record) {
                        Some(_) => stats.processed += 1,
                        None => stats.skipped += 1,
                    },
                    None => {
                        info!("Admission event stream closed");
                        break;
                    }
                },
            }
        }

        info!(
            processed = stats.processed,
            skipped = stats.skipped,
            "Risk engine consumer stopped"
        );
        stats
    }
}
