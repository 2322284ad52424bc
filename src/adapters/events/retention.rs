//! OutboxRetentionSweeper - Deletes published outbox rows past retention.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::OutboxStore;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Periodically removes rows published more than `retention_days` ago.
///
/// Unpublished rows are never touched, however old.
pub struct OutboxRetentionSweeper {
    outbox: Arc<dyn OutboxStore>,
    retention_days: u32,
    interval: Duration,
}

impl OutboxRetentionSweeper {
    pub fn new(outbox: Arc<dyn OutboxStore>, retention_days: u32) -> Self {
        Self {
            outbox,
            retention_days,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Retention of zero days keeps rows forever.
    pub fn is_active(&self) -> bool {
        self.retention_days > 0 && !self.interval.is_zero()
    }

    /// Delete rows published before `now - retention_days`.
    ///
    /// Returns the number of rows deleted.
    pub async fn sweep_once(&self) -> Result<u64, DomainError> {
        if self.retention_days == 0 {
            return Ok(0);
        }
        let cutoff = Timestamp::now().minus_days(i64::from(self.retention_days));
        let deleted = self.outbox.delete_published_before(cutoff).await?;
        if deleted > 0 {
            tracing::info!(
                deleted,
                retention_days = self.retention_days,
                "Swept published outbox rows"
            );
        }
        Ok(deleted)
    }

    /// Sweep on every interval tick until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.is_active() {
            return;
        }

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }

                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::warn!(error = %e, "Outbox retention sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbox::InMemoryOutboxStore;
    use serde_json::json;

    async fn store_with_rows() -> Arc<InMemoryOutboxStore> {
        let store = Arc::new(InMemoryOutboxStore::new());
        let now = Timestamp::now();
        let old = store.insert("A", json!({})).await.unwrap();
        let recent = store.insert("B", json!({})).await.unwrap();
        store.insert("C", json!({})).await.unwrap();
        store.mark_published(old.id, now.minus_days(8)).await.unwrap();
        store.mark_published(recent.id, now.minus_days(1)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_published_rows() {
        let store = store_with_rows().await;
        let sweeper = OutboxRetentionSweeper::new(store.clone(), 7);

        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(store.rows().len(), 2);
        assert_eq!(store.unpublished_count(), 1);
    }

    #[tokio::test]
    async fn zero_retention_keeps_everything() {
        let store = store_with_rows().await;
        let sweeper = OutboxRetentionSweeper::new(store.clone(), 0);

        assert!(!sweeper.is_active());
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert_eq!(store.rows().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_sweeps_until_shutdown() {
        let store = store_with_rows().await;
        let sweeper = OutboxRetentionSweeper::new(store.clone(), 7)
            .with_interval(Duration::from_secs(60));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { sweeper.run(shutdown_rx).await });
        time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.rows().len(), 2);
    }
}
