//! Event emission from the admission path.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::event::AdmissionEvent;

/// Destination for admission events.
///
/// `publish` is called on the request path and must never block or fail
/// the request; undeliverable events are dropped.
pub trait EventSink: Send + Sync {
    /// Hand off one event.
    fn publish(&self, event: &AdmissionEvent);
}

/// A sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &AdmissionEvent) {}
}

/// Bounded, drop-on-full queue of encoded events.
///
/// Created together with its consuming stream by [`event_queue`].
#[derive(Debug)]
pub struct QueueSink {
    sender: mpsc::Sender<Vec<u8>>,
    dropped: AtomicU64,
}

impl QueueSink {
    /// Events dropped because the queue was full, closed, or the event
    /// could not be encoded.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn drop_event(&self, event: &AdmissionEvent, reason: &'static str) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(actor = %event.actor, reason, dropped = total, "Dropping admission event");
    }
}

impl EventSink for QueueSink {
    fn publish(&self, event: &AdmissionEvent) {
        let record = match event.encode() {
            Ok(record) => record,
            Err(_) => {
                self.drop_event(event, "encode");
                return;
            }
        };

        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.drop_event(event, "full"),
            Err(TrySendError::Closed(_)) => self.drop_event(event, "closed"),
        }
    }
}

/// Create a bounded event queue holding at most `capacity` records.
///
/// The stream yields encoded records in publish order and ends once the
/// sink is dropped.
pub fn event_queue(capacity: usize) -> (QueueSink, ReceiverStream<Vec<u8>>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let sink = QueueSink {
        sender,
        dropped: AtomicU64::new(0),
    };
    (sink, ReceiverStream::new(receiver))
}
