//! The event worker: a bounded queue drained into an [`EventSink`] by a
//! single background task.
//!
//! ```text
//! EventLogger::log ──try_send──► [bounded queue] ──► consumer task ──► sink.persist
//!        (many producers)          (drop on full)      (exactly one)
//! ```
//!
//! Lifecycle: `Idle ─start─► Running ─shutdown─► Draining ─queue empty─► Stopped`.
//!
//! On shutdown the consumer closes the queue to new events, then persists
//! everything already accepted before it exits. Drain-phase persist calls
//! are never raced against the stop signal, and a persist that was in
//! flight when the signal arrived runs to completion.

mod sender;

pub use sender::{EventLogger, EventSender, SendError};

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info};

use crate::config::DEFAULT_EVENT_QUEUE_CAPACITY;
use crate::error::{Error, Result};
use crate::model::Event;
use crate::sink::EventSink;
use crate::telemetry::event::{record_persist_result, start_persist_span};
use crate::telemetry::metrics;

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of events waiting to be persisted.
    ///
    /// Zero is allowed. Tokio channels cannot hand an item directly to a
    /// waiting receiver, so a zero-capacity worker drops every event.
    pub capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    /// Constructed; events are accepted but nothing consumes them yet.
    Idle = 0,
    /// The consumer task is persisting events as they arrive.
    Running = 1,
    /// Shutdown requested; the queue is closed and being emptied.
    Draining = 2,
    /// The queue is empty and the consumer has exited.
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of the worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Events that made it into the queue.
    pub accepted: u64,
    /// Events turned away because the queue was full or closed.
    pub dropped: u64,
    /// Events the sink stored.
    pub persisted: u64,
    /// Events the sink rejected. Not retried.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the worker, its producer handles and the consumer.
struct Shared {
    state: AtomicU8,
    counters: Counters,
}

impl Shared {
    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Running,
    Draining,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Running => "running",
            Phase::Draining => "draining",
        }
    }
}

/// Asynchronous event pipeline with a single consumer.
///
/// Construct one per process, call [`start`](Self::start), hand
/// [`logger`](Self::logger) clones to producers, and call
/// [`shutdown`](Self::shutdown) before exit.
pub struct EventWorker {
    sink: Arc<dyn EventSink>,
    sender: EventSender,
    receiver: Option<mpsc::Receiver<Event>>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
    capacity: usize,
}

impl EventWorker {
    /// Allocate the queue. Nothing is consumed until [`start`](Self::start).
    pub fn new(sink: Arc<dyn EventSink>, config: WorkerConfig) -> Self {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(WorkerState::Idle as u8),
            counters: Counters::default(),
        });

        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        // Zero capacity: no producer ever gets a live sender.
        let tx = (config.capacity > 0).then_some(tx);

        let (stop, _) = watch::channel(false);

        Self {
            sink,
            sender: EventSender::new(tx, Arc::clone(&shared)),
            receiver: Some(rx),
            stop,
            task: None,
            shared,
            capacity: config.capacity,
        }
    }

    /// Spawn the consumer task on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] if the consumer was already spawned;
    /// [`Error::Worker`] outside a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Worker(format!("no tokio runtime: {e}")))?;
        let rx = self.receiver.take().ok_or(Error::AlreadyStarted)?;

        self.shared.set_state(WorkerState::Running);
        let consumer = Consumer {
            sink: Arc::clone(&self.sink),
            shared: Arc::clone(&self.shared),
        };
        let stop = self.stop.subscribe();
        self.task = Some(runtime.spawn(consumer.run(rx, stop)));

        info!(capacity = self.capacity, "event worker started");
        Ok(())
    }

    /// A cloneable fire-and-forget handle for producers.
    pub fn logger(&self) -> EventLogger {
        EventLogger::new(self.sender.clone())
    }

    /// Enqueue without blocking; drop and warn if the queue is full.
    pub fn log(&self, event: Event) {
        self.logger().log(event);
    }

    /// The direct enqueue handle. Same non-blocking semantics as
    /// [`log`](Self::log), but rejected events are handed back.
    pub fn event_channel(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn stats(&self) -> WorkerStats {
        self.shared.counters.snapshot()
    }

    /// Configured queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop intake, persist everything already queued, and wait for the
    /// consumer to exit. Returns the final counters.
    ///
    /// If the worker was never started, the queue is drained on the
    /// calling task instead.
    ///
    /// # Errors
    ///
    /// [`Error::Worker`] if the consumer task panicked.
    pub async fn shutdown(mut self) -> Result<WorkerStats> {
        // A send error only means the consumer already exited.
        let _ = self.stop.send(true);

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::Worker(format!("consumer task failed: {e}")))?;
        } else if let Some(rx) = self.receiver.take() {
            let consumer = Consumer {
                sink: Arc::clone(&self.sink),
                shared: Arc::clone(&self.shared),
            };
            consumer.drain(rx).await;
        }

        Ok(self.stats())
    }
}

impl std::fmt::Debug for EventWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWorker")
            .field("state", &self.state())
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Resolves once shutdown is requested, or once the worker is dropped
/// without calling shutdown.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// The consumer side, owned by the background task.
struct Consumer {
    sink: Arc<dyn EventSink>,
    shared: Arc<Shared>,
}

impl Consumer {
    async fn run(self, mut rx: mpsc::Receiver<Event>, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => break,
                received = rx.recv() => match received {
                    Some(event) => self.persist(event, Phase::Running).await,
                    None => {
                        // Zero capacity, no sender exists. Wait for shutdown.
                        stop_requested(&mut stop).await;
                        break;
                    }
                },
            }
        }

        self.drain(rx).await;
    }

    async fn drain(&self, mut rx: mpsc::Receiver<Event>) {
        self.shared.set_state(WorkerState::Draining);
        rx.close();
        info!(remaining = rx.len(), "draining events before shutdown");

        while let Some(event) = rx.recv().await {
            self.persist(event, Phase::Draining).await;
        }

        self.shared.set_state(WorkerState::Stopped);
        let stats = self.shared.counters.snapshot();
        info!(
            persisted = stats.persisted,
            failed = stats.failed,
            dropped = stats.dropped,
            "event worker stopped"
        );
    }

    /// One attempt, no retry. Failures are logged and counted only.
    ///
    /// The sink call runs in its own task, so a panicking sink fails this
    /// event and the queue keeps draining.
    async fn persist(&self, event: Event, phase: Phase) {
        let span = start_persist_span(&event, phase.as_str());
        let category = event.category().to_string();
        let event_id = event.id();
        let sink = Arc::clone(&self.sink);

        let started = Instant::now();
        let attempt =
            tokio::spawn(async move { sink.persist(&event).await }.instrument(span.clone()));
        let result = match attempt.await {
            Ok(result) => result,
            Err(e) => Err(Error::Worker(format!("sink panicked: {e}"))),
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        record_persist_result(&span, result.is_ok());
        metrics::persist_duration_ms().record(elapsed_ms, &[KeyValue::new("phase", phase.as_str())]);

        let outcome = match result {
            Ok(()) => {
                self.shared.counters.persisted.fetch_add(1, Ordering::Relaxed);
                debug!(category = category.as_str(), %event_id, elapsed_ms, "event persisted");
                "ok"
            }
            Err(e) => {
                self.shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    error = %e,
                    category = category.as_str(),
                    %event_id,
                    phase = phase.as_str(),
                    "failed to persist event"
                );
                "error"
            }
        };

        metrics::events_persisted().add(
            1,
            &[
                KeyValue::new("category", category),
                KeyValue::new("phase", phase.as_str()),
                KeyValue::new("result", outcome),
            ],
        );
    }
}
