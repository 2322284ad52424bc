//! Decoded event handed to handlers.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::domain::foundation::{EventId, Timestamp};

/// An internal event as seen by consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub payload: JsonValue,
    pub occurred_at: Timestamp,
}

impl InternalEvent {
    /// Deserialize payload to a specific type.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
