//! OutboxStore port - Interface for the durable event outbox.
//!
//! This port implements the storage half of the Transactional Outbox Pattern:
//! domain code inserts rows in the same transaction as its own changes, the
//! dispatcher later publishes them and stamps `published_at`.
//!
//! ## Pattern Overview
//!
//! 1. Domain code inserts an event row alongside its domain mutation
//! 2. `OutboxDispatcher` selects unpublished rows, oldest first
//! 3. Each row is appended to the stream, then marked published
//! 4. `OutboxRetentionSweeper` deletes published rows past retention

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::internal_events::OutboxEvent;

/// Port for the outbox table.
///
/// Implementations must:
/// - Return rows from `fetch_unpublished` in insertion order
/// - Never return a row whose `published_at` is set
/// - Either durably store a row on `insert` or return an error
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new unpublished event and return the stored row.
    async fn insert(
        &self,
        event_type: &str,
        payload: JsonValue,
    ) -> Result<OutboxEvent, DomainError>;

    /// Up to `limit` unpublished rows, oldest first.
    async fn fetch_unpublished(&self, limit: u32) -> Result<Vec<OutboxEvent>, DomainError>;

    /// Stamp a row as published.
    async fn mark_published(&self, id: Uuid, at: Timestamp) -> Result<(), DomainError>;

    /// Delete rows published strictly before `cutoff`.
    ///
    /// Returns the number of rows deleted.
    async fn delete_published_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}

/// Port for writing outbox rows inside a caller-owned transaction.
///
/// `Tx` is the storage layer's transaction handle. The row becomes visible to
/// the dispatcher only when the caller commits, so the event is published if
/// and only if the domain change is.
#[async_trait]
pub trait TransactionalOutboxStore<Tx: Send>: Send + Sync {
    /// Insert a new unpublished event through `tx`.
    async fn insert_in(
        &self,
        tx: &mut Tx,
        event_type: &str,
        payload: JsonValue,
    ) -> Result<OutboxEvent, DomainError>;
}
