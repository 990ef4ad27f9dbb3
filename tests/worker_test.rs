//! Integration tests for the event worker: ordering, drop-on-full,
//! drain on shutdown, and failure handling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ledger_events::error::{Error, Result};
use ledger_events::model::{Event, EventId};
use ledger_events::sink::{EventSink, MemorySink};
use ledger_events::worker::{EventWorker, SendError, WorkerConfig, WorkerState};
use serde_json::json;
use tokio::sync::{Notify, Semaphore};

/// Records every persist attempt. Events tagged `fail=true` are rejected
/// and events tagged `panic=true` panic; every call can be delayed and,
/// when gated, waits for a permit.
#[derive(Default)]
struct RecordingSink {
    attempts: Mutex<Vec<EventId>>,
    stored: Mutex<Vec<Event>>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    entered: Arc<Notify>,
}

impl RecordingSink {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn attempts(&self) -> Vec<EventId> {
        self.attempts.lock().unwrap().clone()
    }

    fn stored_ids(&self) -> Vec<EventId> {
        self.stored.lock().unwrap().iter().map(Event::id).collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn persist(&self, event: &Event) -> Result<()> {
        self.attempts.lock().unwrap().push(event.id());
        self.entered.notify_one();

        if let Some(ref gate) = self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if event.tags().get("panic").map(String::as_str) == Some("true") {
            panic!("sink panic on {}", event.id());
        }
        if event.tags().get("fail").map(String::as_str) == Some("true") {
            return Err(Error::Other(format!("rejected {}", event.id())));
        }
        self.stored.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn fetch_by_category(&self, category: &str) -> Result<Vec<Event>> {
        Ok(self
            .stored
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.category() == category)
            .cloned()
            .collect())
    }
}

fn event(n: usize) -> Event {
    Event::new("test.event", json!({ "n": n }))
}

fn worker_with(sink: Arc<RecordingSink>, capacity: usize) -> EventWorker {
    EventWorker::new(sink, WorkerConfig { capacity })
}

// ---------------------------------------------------------------------------
// Queue admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn capacity_two_accepts_two_and_drops_third() {
    let sink = Arc::new(RecordingSink::default());
    let mut worker = worker_with(Arc::clone(&sink), 2);
    worker.start().unwrap();

    // Current-thread runtime: the consumer cannot run until we yield.
    let (a, b, c) = (event(1), event(2), event(3));
    let (a_id, b_id, c_id) = (a.id(), b.id(), c.id());
    worker.log(a);
    worker.log(b);
    worker.log(c);

    let stats = worker.shutdown().await.unwrap();

    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.persisted, 2);
    assert_eq!(sink.attempts(), vec![a_id, b_id]);
    assert!(!sink.attempts().contains(&c_id));
}

#[tokio::test]
async fn c_plus_one_events_without_consumer_drop_exactly_one() {
    let sink = Arc::new(RecordingSink::default());
    let worker = worker_with(Arc::clone(&sink), 5);

    for n in 0..6 {
        worker.log(event(n));
    }
    assert_eq!(worker.stats().accepted, 5);
    assert_eq!(worker.stats().dropped, 1);
    assert_eq!(worker.state(), WorkerState::Idle);

    // Never started: shutdown drains on this task.
    let stats = worker.shutdown().await.unwrap();
    assert_eq!(stats.persisted, 5);
    assert_eq!(sink.attempts().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn log_returns_immediately_when_consumer_is_stuck() {
    let gate = Arc::new(Semaphore::new(0));
    let sink = Arc::new(RecordingSink::gated(Arc::clone(&gate)));
    let mut worker = worker_with(Arc::clone(&sink), 3);
    worker.start().unwrap();

    // First event is taken by the consumer, which then blocks in the sink.
    let entered = sink.entered.notified();
    worker.log(event(0));
    tokio::time::timeout(Duration::from_secs(5), entered)
        .await
        .expect("consumer never reached the sink");

    let started = Instant::now();
    for n in 1..=10 {
        worker.log(event(n));
    }
    assert!(
        started.elapsed() < Duration::from_millis(100),
        "log blocked for {:?}",
        started.elapsed()
    );

    let stats = worker.stats();
    assert_eq!(stats.accepted, 4);
    assert_eq!(stats.dropped, 7);

    gate.add_permits(100);
    let stats = worker.shutdown().await.unwrap();
    assert_eq!(stats.persisted, 4);
}

#[tokio::test]
async fn zero_capacity_drops_every_event() {
    let sink = Arc::new(RecordingSink::default());
    let mut worker = worker_with(Arc::clone(&sink), 0);
    worker.start().unwrap();

    for n in 0..3 {
        worker.log(event(n));
    }
    let rejected = worker.event_channel().send(event(99));
    assert!(matches!(rejected, Err(SendError::Full(_))));

    let stats = worker.shutdown().await.unwrap();
    assert_eq!(stats.accepted, 0);
    assert_eq!(stats.dropped, 4);
    assert!(sink.attempts().is_empty());
}

// ---------------------------------------------------------------------------
// Ordering and delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_producer_order_is_preserved() {
    let sink = Arc::new(RecordingSink::default());
    let mut worker = worker_with(Arc::clone(&sink), 64);
    worker.start().unwrap();
    let logger = worker.logger();

    let mut expected = Vec::new();
    for n in 0..50 {
        let e = event(n);
        expected.push(e.id());
        logger.log(e);
        if n % 7 == 0 {
            tokio::task::yield_now().await;
        }
    }

    let stats = worker.shutdown().await.unwrap();
    assert_eq!(stats.dropped, 0);
    assert_eq!(sink.stored_ids(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_keep_their_own_order() {
    let sink = Arc::new(RecordingSink::default());
    let mut worker = worker_with(Arc::clone(&sink), 1_000);
    worker.start().unwrap();

    let mut producers = Vec::new();
    for p in 0..8 {
        let logger = worker.logger();
        producers.push(tokio::spawn(async move {
            for seq in 0..100 {
                logger.log(
                    Event::new("test.concurrent", json!({ "seq": seq }))
                        .tag("producer", p.to_string())
                        .tag("seq", seq.to_string()),
                );
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    let stats = worker.shutdown().await.unwrap();
    assert_eq!(stats.accepted, 800);
    assert_eq!(stats.persisted, 800);

    let stored = sink.fetch_by_category("test.concurrent").await.unwrap();
    let mut last_seq: HashMap<String, i64> = HashMap::new();
    for e in stored {
        let producer = e.tags()["producer"].clone();
        let seq: i64 = e.tags()["seq"].parse().unwrap();
        let prev = last_seq.insert(producer, seq).unwrap_or(-1);
        assert_eq!(seq, prev + 1, "producer order broken");
    }
    assert_eq!(last_seq.len(), 8);
}

#[tokio::test]
async fn shutdown_waits_for_slow_drain() {
    let sink = Arc::new(RecordingSink::slow(Duration::from_millis(20)));
    let mut worker = worker_with(Arc::clone(&sink), 10);
    worker.start().unwrap();

    for n in 0..10 {
        worker.log(event(n));
    }

    let stats = worker.shutdown().await.unwrap();
    assert_eq!(stats.accepted, 10);
    assert_eq!(stats.persisted, 10);
    assert_eq!(sink.stored_ids().len(), 10);
}

#[tokio::test]
async fn failed_events_are_attempted_once_and_do_not_stop_the_pipeline() {
    let sink = Arc::new(RecordingSink::default());
    let mut worker = worker_with(Arc::clone(&sink), 16);
    worker.start().unwrap();

    let mut ids = Vec::new();
    for n in 0..10 {
        let mut e = event(n);
        if n % 3 == 0 {
            e = e.tag("fail", "true");
        }
        ids.push(e.id());
        worker.log(e);
        tokio::task::yield_now().await;
    }

    let stats = worker.shutdown().await.unwrap();
    assert_eq!(stats.failed, 4);
    assert_eq!(stats.persisted, 6);

    let attempts = sink.attempts();
    assert_eq!(attempts, ids);
    let mut seen = std::collections::HashSet::new();
    assert!(attempts.iter().all(|id| seen.insert(*id)));
}

#[tokio::test]
async fn drain_reports_each_failure_and_keeps_going() {
    let sink = Arc::new(RecordingSink::default());
    let mut worker = worker_with(Arc::clone(&sink), 6);
    worker.start().unwrap();

    // No yield: the consumer first runs after the stop signal, so every
    // event is persisted by the drain.
    let mut ids = Vec::new();
    for n in 0..6 {
        let mut e = event(n);
        if n % 2 == 0 {
            e = e.tag("fail", "true");
        }
        ids.push(e.id());
        worker.log(e);
    }
    assert!(sink.attempts().is_empty());

    let stats = worker.shutdown().await.unwrap();
    assert_eq!(stats.accepted, 6);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.persisted, 3);
    assert_eq!(sink.attempts(), ids);
    assert_eq!(sink.stored_ids(), vec![ids[1], ids[3], ids[5]]);
}

#[tokio::test]
async fn panicking_sink_fails_one_event_and_drain_continues() {
    let sink = Arc::new(RecordingSink::default());
    let mut worker = worker_with(Arc::clone(&sink), 4);
    worker.start().unwrap();

    let mut ids = Vec::new();
    for n in 0..4 {
        let mut e = event(n);
        if n == 1 {
            e = e.tag("panic", "true");
        }
        ids.push(e.id());
        worker.log(e);
    }

    let stats = worker.shutdown().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.persisted, 3);
    assert_eq!(sink.attempts(), ids);
    assert_eq!(sink.stored_ids(), vec![ids[0], ids[2], ids[3]]);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_twice_is_rejected() {
    let mut worker = EventWorker::new(Arc::new(MemorySink::new()), WorkerConfig::default());
    assert_eq!(worker.state(), WorkerState::Idle);
    worker.start().unwrap();
    assert_eq!(worker.state(), WorkerState::Running);
    assert!(matches!(worker.start(), Err(Error::AlreadyStarted)));
    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn sender_hands_back_events_when_full_and_after_shutdown() {
    let sink = Arc::new(RecordingSink::default());
    let worker = worker_with(Arc::clone(&sink), 1);
    let sender = worker.event_channel();

    sender.send(event(1)).unwrap();
    let full = event(2);
    let full_id = full.id();
    match sender.send(full) {
        Err(err @ SendError::Full(_)) => {
            assert_eq!(err.to_string(), "event queue full");
            assert_eq!(err.event().id(), full_id);
        }
        other => panic!("expected Full, got {other:?}"),
    }

    worker.shutdown().await.unwrap();

    let late = event(3);
    let late_id = late.id();
    let err = sender.send(late).unwrap_err();
    assert!(matches!(err, SendError::Closed(_)));
    assert_eq!(err.to_string(), "event queue closed");
    assert_eq!(err.into_event().id(), late_id);
    assert_eq!(sink.attempts().len(), 1);
}

#[tokio::test]
async fn logger_outliving_worker_drops_without_panicking() {
    let sink = Arc::new(MemorySink::new());
    let mut worker = EventWorker::new(Arc::clone(&sink) as Arc<dyn EventSink>, WorkerConfig::default());
    worker.start().unwrap();
    let logger = worker.logger();

    logger.log(event(1));
    worker.shutdown().await.unwrap();
    logger.log(event(2));

    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn dropping_the_worker_still_drains_in_background() {
    let sink = Arc::new(MemorySink::new());
    let mut worker = EventWorker::new(Arc::clone(&sink) as Arc<dyn EventSink>, WorkerConfig::default());
    worker.start().unwrap();
    for n in 0..5 {
        worker.log(event(n));
    }
    drop(worker);

    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.len() < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("dropped worker did not drain");
    assert_eq!(sink.len(), 5);
}
