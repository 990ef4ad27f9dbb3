//! Span helpers for event persistence.

use tracing::Span;

use crate::model::Event;

/// Start a span covering one persist call.
///
/// `event.result` is declared empty and filled by [`record_persist_result`].
pub fn start_persist_span(event: &Event, phase: &str) -> Span {
    tracing::debug_span!(
        "event.persist",
        "event.id" = %event.id(),
        "event.category" = event.category(),
        "event.phase" = phase,
        "event.result" = tracing::field::Empty,
    )
}

pub fn record_persist_result(span: &Span, ok: bool) {
    span.record("event.result", if ok { "ok" } else { "error" });
}
