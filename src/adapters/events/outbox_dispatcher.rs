//! OutboxDispatcher - Background service moving outbox rows onto the stream.
//!
//! This service implements the second half of the Transactional Outbox Pattern:
//! 1. Domain code writes events to the outbox (same transaction as domain changes)
//! 2. **OutboxDispatcher polls the outbox and appends to the stream** ← This module
//!
//! ## Delivery
//!
//! A row is marked published only after the broker confirmed the append. If
//! an append fails the rest of the batch is left for the next tick, so rows
//! of one tick reach the stream in the order they were inserted.
//!
//! A crash between append and `mark_published` publishes the row twice.
//! Consumers deduplicate by event id.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 1000ms | How often to check for unpublished rows |
//! | `batch_size` | 100 | Max rows to publish per tick |
//! | `trim_max_len` | 100000 | Approximate stream length cap |
//!
//! ## Graceful Shutdown
//!
//! The service listens for a shutdown signal and publishes one final batch
//! before stopping.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::config::EventsConfig;
use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::internal_events::StreamMessage;
use crate::ports::{OutboxStore, StreamBroker};

/// Configuration for the OutboxDispatcher service.
#[derive(Debug, Clone)]
pub struct OutboxDispatcherConfig {
    /// Stream receiving the events.
    pub stream_name: String,

    /// How often to poll for unpublished rows.
    pub interval: Duration,

    /// Maximum rows to publish per tick.
    pub batch_size: u32,

    /// Approximate maximum stream length, `None` disables trimming.
    pub trim_max_len: Option<u64>,
}

impl Default for OutboxDispatcherConfig {
    fn default() -> Self {
        Self::from_events(&EventsConfig::default())
    }
}

impl OutboxDispatcherConfig {
    pub fn from_events(events: &EventsConfig) -> Self {
        Self {
            stream_name: events.stream_name.clone(),
            interval: events.dispatch_interval(),
            batch_size: events.dispatch_batch_size,
            trim_max_len: events.trim_max_len(),
        }
    }

    /// Create config with custom poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Create config with custom batch size.
    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_trim_max_len(mut self, max_len: Option<u64>) -> Self {
        self.trim_max_len = max_len;
        self
    }

    /// A zero interval or batch size turns the dispatcher into a no-op.
    pub fn is_active(&self) -> bool {
        !self.interval.is_zero() && self.batch_size > 0
    }
}

/// Background service that publishes rows from the outbox to the stream.
pub struct OutboxDispatcher {
    outbox: Arc<dyn OutboxStore>,
    broker: Arc<dyn StreamBroker>,
    config: OutboxDispatcherConfig,
}

impl OutboxDispatcher {
    /// Create a new OutboxDispatcher with default configuration.
    pub fn new(outbox: Arc<dyn OutboxStore>, broker: Arc<dyn StreamBroker>) -> Self {
        Self::with_config(outbox, broker, OutboxDispatcherConfig::default())
    }

    /// Create a new OutboxDispatcher with custom configuration.
    pub fn with_config(
        outbox: Arc<dyn OutboxStore>,
        broker: Arc<dyn StreamBroker>,
        config: OutboxDispatcherConfig,
    ) -> Self {
        Self {
            outbox,
            broker,
            config,
        }
    }

    pub fn config(&self) -> &OutboxDispatcherConfig {
        &self.config
    }

    /// Run the dispatch loop until shutdown signal is received.
    ///
    /// Errors of a single tick are logged and the next tick retries; the loop
    /// only ends on shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.is_active() {
            tracing::info!("Outbox dispatcher inactive (zero interval or batch size)");
            return;
        }

        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            stream = %self.config.stream_name,
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox dispatcher started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        // Publish what is ready, then exit
                        self.tick().await;
                        tracing::info!("Outbox dispatcher stopped");
                        return;
                    }
                }

                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        if let Err(e) = self.process_batch().await {
            tracing::warn!(error = %e, "Outbox dispatch tick failed");
        }
    }

    /// Publish a single batch of unpublished rows.
    ///
    /// Returns the number of rows published.
    pub async fn process_batch(&self) -> Result<usize, DomainError> {
        let rows = self.outbox.fetch_unpublished(self.config.batch_size).await?;
        let mut published = 0;

        for row in rows {
            let message = StreamMessage::from_outbox(&row)?;
            let entry_id = match self
                .broker
                .append(
                    &self.config.stream_name,
                    &message.to_fields(),
                    self.config.trim_max_len,
                )
                .await
            {
                Ok(entry_id) => entry_id,
                Err(e) => {
                    tracing::warn!(
                        event_id = %row.id,
                        event_type = %row.event_type,
                        error = %e,
                        "Failed to publish outbox event, retrying next tick"
                    );
                    break;
                }
            };

            self.outbox.mark_published(row.id, Timestamp::now()).await?;
            tracing::debug!(
                event_id = %row.id,
                event_type = %row.event_type,
                entry_id = %entry_id,
                "Published outbox event"
            );
            published += 1;
        }

        Ok(published)
    }

    /// Run exactly one poll cycle (for testing).
    pub async fn poll_once(&self) -> Result<usize, DomainError> {
        self.process_batch().await
    }
}
