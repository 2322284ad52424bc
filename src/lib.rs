//! Internal Events - Transactional outbox relayed over Redis Streams.
//!
//! Domain code writes events to an outbox table inside its own transaction.
//! A dispatcher appends unpublished rows to a stream, and each service runs a
//! consumer group member that invokes registered handlers with at-least-once
//! delivery, idempotency markers, bounded retries and a dead-letter stream.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
