//! Wire representation of events on the stream.
//!
//! Every stream entry is a flat map of string fields:
//!
//! | Field        | Content                         |
//! |--------------|---------------------------------|
//! | `eventId`    | outbox row id                   |
//! | `eventType`  | routing key for handlers        |
//! | `payload`    | JSON-encoded payload            |
//! | `occurredAt` | ISO-8601 creation time          |
//! | `error`      | dead-letter entries only        |

use std::collections::HashMap;

use super::{InternalEvent, OutboxEvent};
use crate::domain::foundation::{DomainError, ErrorCode, EventId, Timestamp};

pub const FIELD_EVENT_ID: &str = "eventId";
pub const FIELD_EVENT_TYPE: &str = "eventType";
pub const FIELD_PAYLOAD: &str = "payload";
pub const FIELD_OCCURRED_AT: &str = "occurredAt";
pub const FIELD_ERROR: &str = "error";

/// Flat field list as appended to a stream.
pub type StreamFields = Vec<(String, String)>;

/// Encoded event as it travels through the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub event_id: EventId,
    pub event_type: String,
    pub payload: String,
    pub occurred_at: String,
}

impl StreamMessage {
    /// Encodes an outbox row for publication.
    pub fn from_outbox(row: &OutboxEvent) -> Result<Self, DomainError> {
        Ok(Self {
            event_id: row.event_id(),
            event_type: row.event_type.clone(),
            payload: serde_json::to_string(&row.payload)?,
            occurred_at: row.created_at.to_iso_string(),
        })
    }

    /// Re-encodes a decoded event, used when routing it to the dead-letter stream.
    pub fn from_event(event: &InternalEvent) -> Result<Self, DomainError> {
        Ok(Self {
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            payload: serde_json::to_string(&event.payload)?,
            occurred_at: event.occurred_at.to_iso_string(),
        })
    }

    /// Reads the message back from raw entry fields.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, DomainError> {
        Ok(Self {
            event_id: EventId::from_string(required(fields, FIELD_EVENT_ID)?),
            event_type: required(fields, FIELD_EVENT_TYPE)?.to_string(),
            payload: required(fields, FIELD_PAYLOAD)?.to_string(),
            occurred_at: required(fields, FIELD_OCCURRED_AT)?.to_string(),
        })
    }

    pub fn to_fields(&self) -> StreamFields {
        vec![
            (FIELD_EVENT_ID.to_string(), self.event_id.to_string()),
            (FIELD_EVENT_TYPE.to_string(), self.event_type.clone()),
            (FIELD_PAYLOAD.to_string(), self.payload.clone()),
            (FIELD_OCCURRED_AT.to_string(), self.occurred_at.clone()),
        ]
    }

    /// Decodes the JSON payload and timestamp into an [`InternalEvent`].
    pub fn decode(&self) -> Result<InternalEvent, DomainError> {
        let payload = serde_json::from_str(&self.payload).map_err(|e| {
            DomainError::new(
                ErrorCode::MalformedMessage,
                format!("Payload is not valid JSON: {}", e),
            )
            .with_detail("event_id", self.event_id.to_string())
        })?;

        Ok(InternalEvent {
            event_id: self.event_id.clone(),
            event_type: self.event_type.clone(),
            payload,
            occurred_at: Timestamp::parse_iso(&self.occurred_at)?,
        })
    }
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str, DomainError> {
    fields.get(name).map(String::as_str).ok_or_else(|| {
        DomainError::new(
            ErrorCode::MalformedMessage,
            format!("Stream entry is missing field '{}'", name),
        )
    })
}

/// Entry appended to the dead-letter stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    fields: StreamFields,
}

impl DeadLetter {
    /// Dead letter for an event whose handlers kept failing.
    pub fn for_event(event: &InternalEvent, error: impl Into<String>) -> Result<Self, DomainError> {
        let mut fields = StreamMessage::from_event(event)?.to_fields();
        fields.push((FIELD_ERROR.to_string(), error.into()));
        Ok(Self { fields })
    }

    /// Dead letter for an entry that could not be decoded at all.
    ///
    /// Raw fields are copied as-is (sorted by name) next to the error.
    pub fn for_raw_entry(raw: &HashMap<String, String>, error: impl Into<String>) -> Self {
        let mut fields: StreamFields = raw
            .iter()
            .filter(|(name, _)| name.as_str() != FIELD_ERROR)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        fields.sort();
        fields.push((FIELD_ERROR.to_string(), error.into()));
        Self { fields }
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn into_fields(self) -> StreamFields {
        self.fields
    }
}
