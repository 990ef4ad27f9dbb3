//! Durable storage for events.
//!
//! The worker depends on storage only through [`EventSink`]. Postgres is
//! provided by [`crate::db::Db`]; [`MemorySink`] keeps events in process.

pub mod memory;

pub use memory::MemorySink;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Event;

/// Append-only event storage, queryable by category.
///
/// `persist` is awaited to completion before the worker takes the next
/// event and is called exactly once per event. Implementations must not
/// rely on retries. A panic inside `persist` counts as a failure of that
/// one event; the worker keeps going.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Store one event.
    async fn persist(&self, event: &Event) -> Result<()>;

    /// All stored events of `category`, oldest first.
    async fn fetch_by_category(&self, category: &str) -> Result<Vec<Event>>;
}

#[async_trait]
impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    async fn persist(&self, event: &Event) -> Result<()> {
        (**self).persist(event).await
    }

    async fn fetch_by_category(&self, category: &str) -> Result<Vec<Event>> {
        (**self).fetch_by_category(category).await
    }
}
