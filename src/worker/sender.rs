//! Producer-side handles onto the worker queue.
//!
//! Neither handle ever waits: an event either fits in the queue right now
//! or it is handed back (`EventSender`) or dropped (`EventLogger`).

use std::sync::Arc;

use opentelemetry::KeyValue;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::model::Event;
use crate::telemetry::metrics;

use super::Shared;

/// Why an event was not enqueued. Carries the event back to the caller.
#[derive(Debug, Error)]
pub enum SendError {
    /// The queue is at capacity.
    #[error("event queue full")]
    Full(Event),
    /// The worker has stopped accepting events.
    #[error("event queue closed")]
    Closed(Event),
}

impl SendError {
    pub fn event(&self) -> &Event {
        match self {
            SendError::Full(event) | SendError::Closed(event) => event,
        }
    }

    pub fn into_event(self) -> Event {
        match self {
            SendError::Full(event) | SendError::Closed(event) => event,
        }
    }
}

/// Direct enqueue handle, for producers that want to know whether their
/// event was accepted.
#[derive(Clone)]
pub struct EventSender {
    /// `None` when the worker was built with zero capacity.
    tx: Option<mpsc::Sender<Event>>,
    shared: Arc<Shared>,
}

impl EventSender {
    pub(super) fn new(tx: Option<mpsc::Sender<Event>>, shared: Arc<Shared>) -> Self {
        Self { tx, shared }
    }

    /// Enqueue without waiting. The capacity check and the append are a
    /// single `try_send`.
    pub fn send(&self, event: Event) -> Result<(), SendError> {
        let category = event.category().to_string();

        let outcome = match &self.tx {
            Some(tx) => tx.try_send(event).map_err(|e| match e {
                TrySendError::Full(event) => SendError::Full(event),
                TrySendError::Closed(event) => SendError::Closed(event),
            }),
            None => Err(SendError::Full(event)),
        };

        let result = match &outcome {
            Ok(()) => {
                self.shared.counters.record_accepted();
                "accepted"
            }
            Err(SendError::Full(_)) => {
                self.shared.counters.record_dropped();
                "dropped"
            }
            Err(SendError::Closed(_)) => {
                self.shared.counters.record_dropped();
                "closed"
            }
        };
        metrics::events_enqueued().add(
            1,
            &[
                KeyValue::new("category", category),
                KeyValue::new("result", result),
            ],
        );

        outcome
    }

    /// Free slots right now. Always 0 for a zero-capacity worker.
    pub fn capacity(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.capacity())
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Fire-and-forget producer handle. Clone it into every request handler.
#[derive(Clone, Debug)]
pub struct EventLogger {
    sender: EventSender,
}

impl EventLogger {
    pub(super) fn new(sender: EventSender) -> Self {
        Self { sender }
    }

    /// Enqueue `event`, or drop it with a warning if the queue is full or
    /// the worker has stopped. Never blocks and never fails.
    pub fn log(&self, event: Event) {
        match self.sender.send(event) {
            Ok(()) => {}
            Err(SendError::Full(event)) => {
                warn!(
                    category = event.category(),
                    event_id = %event.id(),
                    "event queue full, dropping event"
                );
            }
            Err(SendError::Closed(event)) => {
                warn!(
                    category = event.category(),
                    event_id = %event.id(),
                    "event worker stopped, dropping event"
                );
            }
        }
    }
}
