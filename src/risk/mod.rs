//! Risk scoring fed by the admission event stream.

mod engine;
mod event;
mod notifier;
mod sink;

pub use engine::{ConsumeStats, RearmPolicy, RiskEngine, ScoreUpdate};
pub use event::{AdmissionEvent, Decision};
pub use notifier::{ChannelNotifier, Crossing, LoggingNotifier, ThresholdNotifier};
pub use sink::{event_queue, EventSink, NullSink, QueueSink};
