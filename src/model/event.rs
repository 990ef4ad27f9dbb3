//! The event value handed from producers to the worker and on to a sink.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Newtype for event IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A domain occurrence, immutable once constructed.
///
/// Field names on the wire follow the `events` table: the category is
/// `event_type`, the payload `event_data` and the tags `event_metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,

    #[serde(rename = "event_type")]
    category: String,

    #[serde(rename = "event_data", default)]
    payload: serde_json::Value,

    #[serde(rename = "event_metadata", default)]
    tags: BTreeMap<String, String>,

    created_at: DateTime<Utc>,
}

impl Event {
    /// Create an event with no tags.
    pub fn new(category: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::with_tags(category, payload, BTreeMap::<String, String>::new())
    }

    /// Create an event carrying auxiliary string tags.
    pub fn with_tags<K, V>(
        category: impl Into<String>,
        payload: serde_json::Value,
        tags: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: EventId::new(),
            category: category.into(),
            payload,
            tags: tags
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            created_at: creation_time(),
        }
    }

    /// Create an event whose payload is the JSON form of `payload`.
    pub fn from_payload<T: Serialize + ?Sized>(
        category: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self::new(category, serde_json::to_value(payload)?))
    }

    /// Return this event with one more tag. Meant for chaining right after
    /// construction, before the event is handed to a worker.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Rebuild an event read back from storage.
    pub(crate) fn from_stored(
        id: EventId,
        category: String,
        payload: serde_json::Value,
        tags: BTreeMap<String, String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            category,
            payload,
            tags,
            created_at,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Last creation timestamp handed out, in microseconds since the epoch.
static LAST_CREATED_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Current time at microsecond precision (what `timestamptz` stores).
///
/// Strictly increasing within the process: if the clock has not advanced
/// (or went backwards) since the last event, the previous value plus one
/// microsecond is used, so `ORDER BY created_at` reproduces creation order.
fn creation_time() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let next = |last: i64| now.max(last.saturating_add(1));
    let previous = LAST_CREATED_MICROS
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(next(last)))
        .unwrap_or_else(|last| last);
    DateTime::from_timestamp_micros(next(previous)).unwrap_or_else(Utc::now)
}
