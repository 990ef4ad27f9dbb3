//! Metric instruments for the event pipeline.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without one registered, the instruments are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter(super::SCOPE)
}

/// Counter: enqueue attempts.
/// Labels: `category`, `result` ("accepted" | "dropped" | "closed").
pub fn events_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("ledger_events.enqueued")
        .with_description("Events offered to the worker queue")
        .build()
}

/// Counter: persistence attempts.
/// Labels: `category`, `phase` ("running" | "draining"), `result` ("ok" | "error").
pub fn events_persisted() -> Counter<u64> {
    meter()
        .u64_counter("ledger_events.persisted")
        .with_description("Events handed to the sink")
        .build()
}

/// Histogram: sink persist latency in milliseconds.
/// Labels: `phase`.
pub fn persist_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("ledger_events.persist_duration_ms")
        .with_description("Sink persist latency")
        .with_unit("ms")
        .build()
}
