//! Threshold crossing notification.

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Receives one call per threshold excursion of an actor's risk score.
///
/// Called synchronously from event processing. Implementations that need
/// I/O should hand the notification off rather than block.
pub trait ThresholdNotifier: Send + Sync {
    /// `actor` has just risen above the configured threshold with `score`.
    fn notify(&self, actor: &str, score: u64);
}

/// Logs each crossing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl ThresholdNotifier for LoggingNotifier {
    fn notify(&self, actor: &str, score: u64) {
        info!(actor = %actor, score, "Risk threshold crossed");
    }
}

/// A threshold crossing handed off to another task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crossing {
    /// Actor whose score crossed the threshold
    pub actor: String,
    /// Score at the moment of crossing
    pub score: u64,
}

/// Forwards crossings over a bounded channel, e.g. to a policy writer.
///
/// Crossings are dropped with a warning when the receiver is behind.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<Crossing>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiver its crossings arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Crossing>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl ThresholdNotifier for ChannelNotifier {
    fn notify(&self, actor: &str, score: u64) {
        let crossing = Crossing {
            actor: actor.to_string(),
            score,
        };
        if let Err(e) = self.sender.try_send(crossing) {
            warn!(actor = %actor, score, error = %e, "Dropping threshold notification");
        }
    }
}
