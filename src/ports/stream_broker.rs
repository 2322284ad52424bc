//! StreamBroker port - Interface to the log-structured stream broker.
//!
//! The broker provides append-only streams with consumer groups,
//! acknowledgement and reclaim of pending entries, plus a handful of
//! atomic key/value primitives used for idempotency and retry bookkeeping.
//!
//! ## Delivery Semantics
//!
//! Entries read through a consumer group stay *pending* until acknowledged.
//! A pending entry idle for longer than a threshold can be claimed by another
//! consumer of the same group. Together this gives at-least-once delivery.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::foundation::DomainError;

/// A single entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Broker-assigned entry id, used for ack and claim.
    pub id: String,

    /// Flat string fields of the entry.
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn new(id: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Port for stream and key/value operations on the broker.
///
/// Errors:
/// - `ConsumerGroupMissing` when the stream or group no longer exists
/// - `BrokerUnavailable` for connection and command failures
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Append an entry and return its id.
    ///
    /// With `max_len`, the stream is trimmed to roughly that many entries.
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_len: Option<u64>,
    ) -> Result<String, DomainError>;

    /// Create a consumer group positioned at the stream tail.
    ///
    /// Creates the stream if it does not exist. An existing group is not an error.
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), DomainError>;

    /// Read up to `count` never-delivered entries as `consumer`.
    ///
    /// Waits up to `block` for entries to arrive; `Duration::ZERO` does not wait.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, DomainError>;

    /// Transfer up to `count` entries pending longer than `min_idle` to `consumer`.
    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, DomainError>;

    /// Acknowledge an entry, removing it from the group's pending list.
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), DomainError>;

    /// Set `key` only if absent, with a time to live. Returns true if it was set.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError>;

    /// Current value of a key, `None` if missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Atomically increment an integer key and return the new value.
    async fn increment(&self, key: &str) -> Result<u64, DomainError>;

    /// Set a time to live on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), DomainError>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete_key(&self, key: &str) -> Result<(), DomainError>;

    /// Number of entries currently in a stream (0 if missing).
    async fn stream_len(&self, stream: &str) -> Result<u64, DomainError>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<(), DomainError> {
        Ok(())
    }
}
