//! In-memory outbox store for testing and embedding.
//!
//! Rows are kept in insertion order, which is the order `fetch_unpublished`
//! returns them in.
//!
//! # Security Note
//!
//! This adapter is for **testing only** and should not be used in production.
//! It uses `.expect()` on lock operations which will panic if locks are poisoned.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::RwLock;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};
use crate::domain::internal_events::OutboxEvent;
use crate::ports::{OutboxStore, TransactionalOutboxStore};

/// In-memory outbox table.
///
/// # Example
///
/// ```ignore
/// let outbox = Arc::new(InMemoryOutboxStore::new());
/// outbox.insert("USER_CREATED", json!({"id": 42})).await?;
///
/// assert_eq!(outbox.unpublished_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    rows: RwLock<Vec<OutboxEvent>>,
}

impl InMemoryOutboxStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // === Test Helpers ===

    /// Snapshot of every row in insertion order.
    pub fn rows(&self) -> Vec<OutboxEvent> {
        self.rows
            .read()
            .expect("InMemoryOutboxStore: rows lock poisoned")
            .clone()
    }

    /// Row by id.
    pub fn get(&self, id: Uuid) -> Option<OutboxEvent> {
        self.rows().into_iter().find(|row| row.id == id)
    }

    pub fn unpublished_count(&self) -> usize {
        self.rows().iter().filter(|row| !row.is_published()).count()
    }

    pub fn published_count(&self) -> usize {
        self.rows().iter().filter(|row| row.is_published()).count()
    }

    /// Start a transaction. Dropping it without `commit` discards its rows.
    pub fn begin(&self) -> InMemoryTransaction {
        InMemoryTransaction::default()
    }

    /// Make the rows staged in `tx` visible, in insertion order.
    pub fn commit(&self, tx: InMemoryTransaction) {
        self.rows
            .write()
            .expect("InMemoryOutboxStore: rows lock poisoned")
            .extend(tx.staged);
    }
}

/// Rows written through [`TransactionalOutboxStore`] and not yet committed.
#[derive(Debug, Default)]
pub struct InMemoryTransaction {
    staged: Vec<OutboxEvent>,
}

impl InMemoryTransaction {
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }
}

#[async_trait]
impl TransactionalOutboxStore<InMemoryTransaction> for InMemoryOutboxStore {
    async fn insert_in(
        &self,
        tx: &mut InMemoryTransaction,
        event_type: &str,
        payload: JsonValue,
    ) -> Result<OutboxEvent, DomainError> {
        let row = OutboxEvent::new(event_type, payload)?;
        tx.staged.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(
        &self,
        event_type: &str,
        payload: JsonValue,
    ) -> Result<OutboxEvent, DomainError> {
        let row = OutboxEvent::new(event_type, payload)?;
        self.rows
            .write()
            .expect("InMemoryOutboxStore: rows lock poisoned")
            .push(row.clone());
        Ok(row)
    }

    async fn fetch_unpublished(&self, limit: u32) -> Result<Vec<OutboxEvent>, DomainError> {
        Ok(self
            .rows
            .read()
            .expect("InMemoryOutboxStore: rows lock poisoned")
            .iter()
            .filter(|row| !row.is_published())
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: Uuid, at: Timestamp) -> Result<(), DomainError> {
        let mut rows = self
            .rows
            .write()
            .expect("InMemoryOutboxStore: rows lock poisoned");
        let row = rows.iter_mut().find(|row| row.id == id).ok_or_else(|| {
            DomainError::new(
                ErrorCode::OutboxRowNotFound,
                format!("Outbox row {} not found", id),
            )
        })?;
        row.mark_published(at);
        Ok(())
    }

    async fn delete_published_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let mut rows = self
            .rows
            .write()
            .expect("InMemoryOutboxStore: rows lock poisoned");
        let before = rows.len();
        rows.retain(|row| !row.published_at.is_some_and(|at| at.is_before(&cutoff)));
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_rejects_non_object_payload() {
        let store = InMemoryOutboxStore::new();

        let err = store.insert("X", json!([1, 2])).await.unwrap_err();

        assert!(err.is(ErrorCode::ValidationFailed));
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn fetch_unpublished_is_oldest_first_and_limited() {
        let store = InMemoryOutboxStore::new();
        let first = store.insert("A", json!({"n": 1})).await.unwrap();
        let second = store.insert("B", json!({"n": 2})).await.unwrap();
        store.insert("C", json!({"n": 3})).await.unwrap();

        let rows = store.fetch_unpublished(2).await.unwrap();

        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn published_rows_are_not_fetched() {
        let store = InMemoryOutboxStore::new();
        let row = store.insert("A", json!({})).await.unwrap();

        store.mark_published(row.id, Timestamp::now()).await.unwrap();

        assert!(store.fetch_unpublished(10).await.unwrap().is_empty());
        assert_eq!(store.published_count(), 1);
    }

    #[tokio::test]
    async fn transaction_rows_appear_only_on_commit() {
        let store = InMemoryOutboxStore::new();
        let mut tx = store.begin();

        let row = store.insert_in(&mut tx, "A", json!({"n": 1})).await.unwrap();
        assert!(store.rows().is_empty());
        assert_eq!(tx.staged_count(), 1);

        store.commit(tx);
        assert_eq!(store.get(row.id), Some(row));
    }

    #[tokio::test]
    async fn dropped_transaction_writes_nothing() {
        let store = InMemoryOutboxStore::new();
        let mut tx = store.begin();
        store.insert_in(&mut tx, "A", json!({})).await.unwrap();

        drop(tx);

        assert!(store.fetch_unpublished(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_published_unknown_row_fails() {
        let store = InMemoryOutboxStore::new();

        let err = store
            .mark_published(Uuid::new_v4(), Timestamp::now())
            .await
            .unwrap_err();

        assert!(err.is(ErrorCode::OutboxRowNotFound));
    }

    #[tokio::test]
    async fn delete_published_before_keeps_recent_and_unpublished() {
        let store = InMemoryOutboxStore::new();
        let now = Timestamp::now();
        let old = store.insert("A", json!({})).await.unwrap();
        let recent = store.insert("B", json!({})).await.unwrap();
        let pending = store.insert("C", json!({})).await.unwrap();
        store.mark_published(old.id, now.minus_days(10)).await.unwrap();
        store.mark_published(recent.id, now).await.unwrap();

        let deleted = store.delete_published_before(now.minus_days(7)).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get(old.id).is_none());
        assert!(store.get(recent.id).is_some());
        assert!(store.get(pending.id).is_some());
    }
}
