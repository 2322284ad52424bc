//! Domain layer containing the event types and their invariants.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (ids, timestamps, errors)
//! - `internal_events` - Outbox rows, decoded events, stream wire format

pub mod foundation;
pub mod internal_events;
