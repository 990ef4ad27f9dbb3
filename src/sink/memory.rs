//! In-process sink for local development and tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::Event;

use super::EventSink;

/// Keeps every persisted event in memory, in persistence order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything persisted so far.
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn persist(&self, event: &Event) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| Error::Other("memory sink lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }

    async fn fetch_by_category(&self, category: &str) -> Result<Vec<Event>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Other("memory sink lock poisoned".to_string()))?;
        Ok(events
            .iter()
            .filter(|e| e.category() == category)
            .cloned()
            .collect())
    }
}
