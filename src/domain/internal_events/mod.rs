//! Internal events - outbox rows, decoded events and their stream encoding.

mod event;
mod outbox_event;
mod stream_message;

pub use event::InternalEvent;
pub use outbox_event::OutboxEvent;
pub use stream_message::{
    DeadLetter, StreamFields, StreamMessage, FIELD_ERROR, FIELD_EVENT_ID, FIELD_EVENT_TYPE,
    FIELD_OCCURRED_AT, FIELD_PAYLOAD,
};
