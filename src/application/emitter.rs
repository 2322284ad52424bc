//! InternalEventsService - Entry point for domain code emitting events.
//!
//! Emitting writes an outbox row; publication happens later in the
//! dispatcher. `emit` either returns the stored row or fails. It never
//! drops an event silently.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::domain::foundation::DomainError;
use crate::domain::internal_events::OutboxEvent;
use crate::ports::{OutboxStore, TransactionalOutboxStore};

/// Service for emitting internal events.
pub struct InternalEventsService {
    outbox: Arc<dyn OutboxStore>,
    enabled: bool,
}

impl InternalEventsService {
    pub fn new(outbox: Arc<dyn OutboxStore>, enabled: bool) -> Self {
        Self { outbox, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Write an event to the outbox.
    ///
    /// # Errors
    ///
    /// - `FeatureDisabled` when internal events are switched off; nothing is written
    /// - `ValidationFailed` for an empty event type or a non-object payload
    /// - The store's error if the insert fails
    pub async fn emit(
        &self,
        event_type: &str,
        payload: JsonValue,
    ) -> Result<OutboxEvent, DomainError> {
        self.ensure_enabled()?;
        let row = self.outbox.insert(event_type, payload).await?;
        tracing::debug!(event_id = %row.id, event_type, "Emitted internal event");
        Ok(row)
    }

    /// Serialize a typed payload and emit it.
    pub async fn emit_serialized<P: Serialize + Sync>(
        &self,
        event_type: &str,
        payload: &P,
    ) -> Result<OutboxEvent, DomainError> {
        let payload = serde_json::to_value(payload)?;
        self.emit(event_type, payload).await
    }

    /// Write an event inside the caller's transaction.
    ///
    /// The row is published only if the caller commits.
    ///
    /// ```ignore
    /// let mut tx = pool.begin().await?;
    /// // domain writes through &mut *tx ...
    /// events.emit_in_tx(&outbox, &mut tx, "USER_CREATED", json!({"id": 42})).await?;
    /// tx.commit().await?;
    /// ```
    pub async fn emit_in_tx<Tx, W>(
        &self,
        outbox: &W,
        tx: &mut Tx,
        event_type: &str,
        payload: JsonValue,
    ) -> Result<OutboxEvent, DomainError>
    where
        Tx: Send,
        W: TransactionalOutboxStore<Tx> + ?Sized,
    {
        self.ensure_enabled()?;
        let row = outbox.insert_in(tx, event_type, payload).await?;
        tracing::debug!(event_id = %row.id, event_type, "Emitted internal event in transaction");
        Ok(row)
    }

    fn ensure_enabled(&self) -> Result<(), DomainError> {
        if self.enabled {
            Ok(())
        } else {
            Err(DomainError::feature_disabled())
        }
    }
}
