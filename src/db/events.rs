//! Event storage in the `events` table.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Event, EventId};
use crate::sink::EventSink;

impl super::Db {
    /// Insert one event.
    pub async fn insert_event(&self, event: &Event) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (id, event_type, event_data, event_metadata, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.id().0)
        .bind(event.category())
        .bind(event.payload())
        .bind(Json(event.tags()))
        .bind(event.created_at())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All events of a category, oldest first.
    pub async fn events_by_category(&self, category: &str) -> Result<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT id, event_type, event_data, event_metadata, created_at
             FROM events
             WHERE event_type = $1
             ORDER BY created_at, id",
        )
        .bind(category)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(Event::from).collect())
    }

    /// The most recent `limit` events of a category, newest first.
    pub async fn recent_events_by_category(&self, category: &str, limit: i64) -> Result<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT id, event_type, event_data, event_metadata, created_at
             FROM events
             WHERE event_type = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
        )
        .bind(category)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(Event::from).collect())
    }
}

#[async_trait]
impl EventSink for super::Db {
    async fn persist(&self, event: &Event) -> Result<()> {
        self.insert_event(event).await
    }

    async fn fetch_by_category(&self, category: &str) -> Result<Vec<Event>> {
        self.events_by_category(category).await
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    event_type: String,
    event_data: Option<serde_json::Value>,
    event_metadata: Option<Json<BTreeMap<String, String>>>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event::from_stored(
            EventId(row.id),
            row.event_type,
            row.event_data.unwrap_or(serde_json::Value::Null),
            row.event_metadata.map(|Json(tags)| tags).unwrap_or_default(),
            row.created_at,
        )
    }
}
