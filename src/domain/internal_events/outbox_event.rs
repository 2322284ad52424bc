//! Outbox row awaiting publication to the stream.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, EventId, Timestamp};

/// A row of the durable outbox table.
///
/// `published_at` stays `None` until the dispatcher has confirmed the
/// stream append. Once set, the row only waits for the retention sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub payload: JsonValue,
    pub created_at: Timestamp,
    pub published_at: Option<Timestamp>,
}

impl OutboxEvent {
    /// Creates a new unpublished row.
    ///
    /// The payload must be a JSON object and the event type non-empty.
    pub fn new(event_type: impl Into<String>, payload: JsonValue) -> Result<Self, DomainError> {
        let event_type = event_type.into();
        if event_type.trim().is_empty() {
            return Err(DomainError::validation(
                "event_type",
                "Event type cannot be empty",
            ));
        }
        if !payload.is_object() {
            return Err(DomainError::validation(
                "payload",
                "Event payload must be a JSON object",
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            event_type,
            payload,
            created_at: Timestamp::now(),
            published_at: None,
        })
    }

    /// Event id carried on the stream; stable across re-publication.
    pub fn event_id(&self) -> EventId {
        EventId::from(self.id)
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Marks the row as published at the given instant.
    pub fn mark_published(&mut self, at: Timestamp) {
        self.published_at = Some(at);
    }
}
