//! Broker-side bookkeeping for the consumer.
//!
//! Both pieces of state live in the broker's key space so that every process
//! of a service shares them, and every mutation is a single atomic command:
//!
//! - `processed:<service>:<eventId>` marks an event as processed (or in
//!   progress). Set only if absent, expires after the idempotency TTL.
//! - `internal-events:retries:<service>:<entryId>` counts handler failures
//!   for one stream entry. Refreshed to the same TTL on every failure.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::foundation::{DomainError, ErrorCode, EventId};
use crate::ports::StreamBroker;

/// Key of the processed marker for an event.
pub fn processed_key(service_name: &str, event_id: &EventId) -> String {
    format!("processed:{}:{}", service_name, event_id)
}

/// Key of the failure counter for a stream entry.
pub fn retry_key(service_name: &str, entry_id: &str) -> String {
    format!("internal-events:retries:{}:{}", service_name, entry_id)
}

/// Claims events for processing so each runs once per TTL window.
pub struct IdempotencyGuard {
    broker: Arc<dyn StreamBroker>,
    service_name: String,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        service_name: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            broker,
            service_name: service_name.into(),
            ttl,
        }
    }

    /// Set the processed marker.
    ///
    /// Returns `false` if the marker already existed, meaning the event was
    /// handled or is being handled elsewhere.
    pub async fn try_acquire(&self, event_id: &EventId) -> Result<bool, DomainError> {
        self.broker
            .set_if_absent(&processed_key(&self.service_name, event_id), "1", self.ttl)
            .await
    }

    /// Remove the marker so a later delivery may run the handlers again.
    pub async fn release(&self, event_id: &EventId) -> Result<(), DomainError> {
        self.broker
            .delete_key(&processed_key(&self.service_name, event_id))
            .await
    }
}

/// Counts handler failures per stream entry.
pub struct RetryTracker {
    broker: Arc<dyn StreamBroker>,
    service_name: String,
    ttl: Duration,
}

impl RetryTracker {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        service_name: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            broker,
            service_name: service_name.into(),
            ttl,
        }
    }

    /// Failures recorded so far for an entry.
    pub async fn attempts(&self, entry_id: &str) -> Result<u64, DomainError> {
        let key = retry_key(&self.service_name, entry_id);
        match self.broker.get(&key).await? {
            None => Ok(0),
            Some(value) => value.parse().map_err(|_| {
                DomainError::new(
                    ErrorCode::InternalError,
                    format!("Retry counter '{}' is not an integer", key),
                )
            }),
        }
    }

    /// Increment the failure count and refresh its expiry. Returns the new count.
    pub async fn record_failure(&self, entry_id: &str) -> Result<u64, DomainError> {
        let key = retry_key(&self.service_name, entry_id);
        let attempt = self.broker.increment(&key).await?;
        self.broker.expire(&key, self.ttl).await?;
        Ok(attempt)
    }

    pub async fn clear(&self, entry_id: &str) -> Result<(), DomainError> {
        self.broker
            .delete_key(&retry_key(&self.service_name, entry_id))
            .await
    }
}
