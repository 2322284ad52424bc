//! In-memory stream broker for testing.
//!
//! Models the parts of Redis Streams the pipeline relies on: consumer groups
//! positioned at the tail, per-group pending lists with delivery timestamps,
//! idle-based claiming, acknowledgement, approximate trimming, and keys with
//! a time to live. Time is read from `tokio::time::Instant`, so tests can
//! pause and advance the clock.
//!
//! # Security Note
//!
//! This adapter is for **testing only** and should not be used in production.
//! It uses `.expect()` on lock operations which will panic if locks are poisoned.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{StreamBroker, StreamEntry};

#[derive(Debug, Clone)]
struct StoredEntry {
    seq: u64,
    id: String,
    fields: HashMap<String, String>,
}

impl StoredEntry {
    fn to_entry(&self) -> StreamEntry {
        StreamEntry::new(self.id.clone(), self.fields.clone())
    }
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

#[derive(Debug)]
struct GroupState {
    last_delivered: u64,
    pending: BTreeMap<u64, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: Vec<StoredEntry>,
    last_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug)]
struct StoredKey {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredKey {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    streams: HashMap<String, StreamState>,
    keys: HashMap<String, StoredKey>,
    next_seq: u64,
    failing_appends: usize,
    operations: u64,
}

impl BrokerState {
    fn group_mut(&mut self, stream: &str, group: &str) -> Result<&mut StreamState, DomainError> {
        match self.streams.get_mut(stream) {
            Some(state) if state.groups.contains_key(group) => Ok(state),
            _ => Err(group_missing(stream, group)),
        }
    }

    fn live_key(&mut self, key: &str, now: Instant) -> Option<&mut StoredKey> {
        if self.keys.get(key).is_some_and(|k| !k.is_live(now)) {
            self.keys.remove(key);
        }
        self.keys.get_mut(key)
    }
}

fn group_missing(stream: &str, group: &str) -> DomainError {
    DomainError::new(
        ErrorCode::ConsumerGroupMissing,
        format!(
            "NOGROUP No such key '{}' or consumer group '{}'",
            stream, group
        ),
    )
}

fn parse_seq(entry_id: &str) -> Result<u64, DomainError> {
    entry_id
        .split('-')
        .next()
        .and_then(|ms| ms.parse::<u64>().ok())
        .ok_or_else(|| DomainError::broker(format!("Invalid stream ID '{}'", entry_id)))
}

/// In-memory stream broker for testing.
///
/// # Example
///
/// ```ignore
/// let broker = Arc::new(InMemoryStreamBroker::new());
/// broker.create_group("internal-events", "svc").await?;
/// broker.append("internal-events", &fields, None).await?;
///
/// assert_eq!(broker.pending_count("internal-events", "svc"), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStreamBroker {
    state: Mutex<BrokerState>,
    appended: Notify,
}

impl InMemoryStreamBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .expect("InMemoryStreamBroker: state lock poisoned")
    }

    fn lock_counted(&self) -> MutexGuard<'_, BrokerState> {
        let mut state = self.lock();
        state.operations += 1;
        state
    }

    fn try_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, DomainError> {
        let mut state = self.lock();
        let stream_state = state.group_mut(stream, group)?;
        let StreamState {
            entries, groups, ..
        } = stream_state;
        let Some(group_state) = groups.get_mut(group) else {
            return Err(group_missing(stream, group));
        };

        let now = Instant::now();
        let last_delivered = group_state.last_delivered;
        let delivered: Vec<StreamEntry> = entries
            .iter()
            .filter(|entry| entry.seq > last_delivered)
            .take(count)
            .map(|entry| {
                group_state.pending.insert(
                    entry.seq,
                    PendingEntry {
                        consumer: consumer.to_string(),
                        delivered_at: now,
                        deliveries: 1,
                    },
                );
                group_state.last_delivered = entry.seq;
                entry.to_entry()
            })
            .collect();

        Ok(delivered)
    }

    // === Test Helpers ===

    /// Make the next `n` appends fail with a broker error.
    pub fn fail_next_appends(&self, n: usize) {
        self.lock().failing_appends = n;
    }

    /// Delete a stream together with its consumer groups.
    pub fn delete_stream(&self, stream: &str) {
        self.lock().streams.remove(stream);
    }

    /// Whether the consumer group exists on the stream.
    pub fn group_exists(&self, stream: &str, group: &str) -> bool {
        self.lock()
            .streams
            .get(stream)
            .is_some_and(|s| s.groups.contains_key(group))
    }

    /// All entries currently stored in a stream, oldest first.
    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.lock()
            .streams
            .get(stream)
            .map(|s| s.entries.iter().map(StoredEntry::to_entry).collect())
            .unwrap_or_default()
    }

    /// Number of delivered but unacknowledged entries in a group.
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.lock()
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    /// Consumer currently owning a pending entry and its delivery count.
    pub fn pending_owner(
        &self,
        stream: &str,
        group: &str,
        entry_id: &str,
    ) -> Option<(String, u32)> {
        let seq = parse_seq(entry_id).ok()?;
        self.lock()
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .and_then(|g| g.pending.get(&seq))
            .map(|p| (p.consumer.clone(), p.deliveries))
    }

    /// Whether a non-expired key exists.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock().live_key(key, now).is_some()
    }

    /// Number of port operations served so far.
    pub fn operation_count(&self) -> u64 {
        self.lock().operations
    }
}

#[async_trait]
impl StreamBroker for InMemoryStreamBroker {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_len: Option<u64>,
    ) -> Result<String, DomainError> {
        let id = {
            let mut state = self.lock_counted();
            if state.failing_appends > 0 {
                state.failing_appends -= 1;
                return Err(DomainError::broker("Simulated append failure"));
            }

            state.next_seq += 1;
            let seq = state.next_seq;
            let id = format!("{}-0", seq);

            let stream_state = state.streams.entry(stream.to_string()).or_default();
            stream_state.entries.push(StoredEntry {
                seq,
                id: id.clone(),
                fields: fields.iter().cloned().collect(),
            });
            stream_state.last_seq = seq;

            if let Some(max_len) = max_len {
                let max_len = usize::try_from(max_len).unwrap_or(usize::MAX);
                let excess = stream_state.entries.len().saturating_sub(max_len);
                stream_state.entries.drain(..excess);
            }
            id
        };

        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<(), DomainError> {
        let mut state = self.lock_counted();
        let stream_state = state.streams.entry(stream.to_string()).or_default();
        let tail = stream_state.last_seq;
        stream_state
            .groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState {
                last_delivered: tail,
                pending: BTreeMap::new(),
            });
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, DomainError> {
        self.lock_counted();
        let deadline = Instant::now() + block;

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.try_read_group(stream, group, consumer, count)?;
            if !entries.is_empty() || block.is_zero() {
                return Ok(entries);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, DomainError> {
        let mut state = self.lock_counted();
        let StreamState {
            entries, groups, ..
        } = state.group_mut(stream, group)?;
        let Some(group_state) = groups.get_mut(group) else {
            return Err(group_missing(stream, group));
        };

        let now = Instant::now();
        let idle: Vec<u64> = group_state
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.delivered_at) >= min_idle)
            .map(|(seq, _)| *seq)
            .take(count)
            .collect();

        let mut claimed = Vec::with_capacity(idle.len());
        for seq in idle {
            match entries.binary_search_by_key(&seq, |e| e.seq) {
                Ok(index) => {
                    if let Some(pending) = group_state.pending.get_mut(&seq) {
                        pending.consumer = consumer.to_string();
                        pending.delivered_at = now;
                        pending.deliveries += 1;
                    }
                    claimed.push(entries[index].to_entry());
                }
                // Trimmed away while pending
                Err(_) => {
                    group_state.pending.remove(&seq);
                }
            }
        }

        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), DomainError> {
        let seq = parse_seq(entry_id)?;
        let mut state = self.lock_counted();
        if let Some(group_state) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            group_state.pending.remove(&seq);
        }
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError> {
        let now = Instant::now();
        let mut state = self.lock_counted();
        if state.live_key(key, now).is_some() {
            return Ok(false);
        }
        state.keys.insert(
            key.to_string(),
            StoredKey {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        let now = Instant::now();
        let mut state = self.lock_counted();
        Ok(state.live_key(key, now).map(|stored| stored.value.clone()))
    }

    async fn increment(&self, key: &str) -> Result<u64, DomainError> {
        let now = Instant::now();
        let mut state = self.lock_counted();
        match state.live_key(key, now) {
            Some(stored) => {
                let current: u64 = stored.value.parse().map_err(|_| {
                    DomainError::broker("ERR value is not an integer or out of range")
                })?;
                let next = current + 1;
                stored.value = next.to_string();
                Ok(next)
            }
            None => {
                state.keys.insert(
                    key.to_string(),
                    StoredKey {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), DomainError> {
        let now = Instant::now();
        let mut state = self.lock_counted();
        if let Some(stored) = state.live_key(key, now) {
            stored.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), DomainError> {
        self.lock_counted().keys.remove(key);
        Ok(())
    }

    async fn stream_len(&self, stream: &str) -> Result<u64, DomainError> {
        Ok(self
            .lock_counted()
            .streams
            .get(stream)
            .map_or(0, |s| s.entries.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "events";
    const GROUP: &str = "svc";

    fn fields(event_id: &str) -> Vec<(String, String)> {
        vec![("eventId".to_string(), event_id.to_string())]
    }

    #[tokio::test]
    async fn group_created_at_tail_skips_existing_entries() {
        let broker = InMemoryStreamBroker::new();
        broker.append(STREAM, &fields("old"), None).await.unwrap();
        broker.create_group(STREAM, GROUP).await.unwrap();
        broker.append(STREAM, &fields("new"), None).await.unwrap();

        let entries = broker
            .read_group(STREAM, GROUP, "c1", 10, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].fields["eventId"], "new");
    }

    #[tokio::test]
    async fn create_group_is_idempotent_and_creates_stream() {
        let broker = InMemoryStreamBroker::new();

        broker.create_group(STREAM, GROUP).await.unwrap();
        broker.create_group(STREAM, GROUP).await.unwrap();

        assert!(broker.group_exists(STREAM, GROUP));
        assert_eq!(broker.stream_len(STREAM).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_marks_pending_until_ack() {
        let broker = InMemoryStreamBroker::new();
        broker.create_group(STREAM, GROUP).await.unwrap();
        broker.append(STREAM, &fields("a"), None).await.unwrap();

        let entries = broker
            .read_group(STREAM, GROUP, "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(broker.pending_count(STREAM, GROUP), 1);

        broker.ack(STREAM, GROUP, &entries[0].id).await.unwrap();
        assert_eq!(broker.pending_count(STREAM, GROUP), 0);
    }

    #[tokio::test]
    async fn read_without_group_reports_missing_group() {
        let broker = InMemoryStreamBroker::new();

        let err = broker
            .read_group(STREAM, GROUP, "c1", 10, Duration::ZERO)
            .await
            .unwrap_err();

        assert!(err.is(ErrorCode::ConsumerGroupMissing));
        assert!(err.message.contains("NOGROUP"));
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_read_times_out_empty() {
        let broker = InMemoryStreamBroker::new();
        broker.create_group(STREAM, GROUP).await.unwrap();

        let entries = broker
            .read_group(STREAM, GROUP, "c1", 10, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_append() {
        let broker = std::sync::Arc::new(InMemoryStreamBroker::new());
        broker.create_group(STREAM, GROUP).await.unwrap();

        let reader = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .read_group(STREAM, GROUP, "c1", 10, Duration::from_secs(30))
                    .await
            })
        };
        tokio::task::yield_now().await;
        broker.append(STREAM, &fields("a"), None).await.unwrap();

        let entries = reader.await.unwrap().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn claim_only_returns_entries_idle_long_enough() {
        let broker = InMemoryStreamBroker::new();
        broker.create_group(STREAM, GROUP).await.unwrap();
        broker.append(STREAM, &fields("a"), None).await.unwrap();
        let entries = broker
            .read_group(STREAM, GROUP, "c1", 10, Duration::ZERO)
            .await
            .unwrap();

        let early = broker
            .claim_pending(STREAM, GROUP, "c2", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(early.is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        let claimed = broker
            .claim_pending(STREAM, GROUP, "c2", Duration::from_secs(60), 10)
            .await
            .unwrap();

        assert_eq!(claimed, entries);
        assert_eq!(
            broker.pending_owner(STREAM, GROUP, &entries[0].id),
            Some(("c2".to_string(), 2))
        );
    }

    #[tokio::test]
    async fn append_trims_to_max_len() {
        let broker = InMemoryStreamBroker::new();
        for i in 0..5 {
            broker
                .append(STREAM, &fields(&i.to_string()), Some(3))
                .await
                .unwrap();
        }

        let entries = broker.entries(STREAM);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].fields["eventId"], "2");
    }

    #[tokio::test]
    async fn simulated_append_failures_are_consumed() {
        let broker = InMemoryStreamBroker::new();
        broker.fail_next_appends(1);

        assert!(broker.append(STREAM, &fields("a"), None).await.is_err());
        assert!(broker.append(STREAM, &fields("a"), None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_respects_ttl() {
        let broker = InMemoryStreamBroker::new();
        let ttl = Duration::from_secs(10);

        assert!(broker.set_if_absent("k", "1", ttl).await.unwrap());
        assert!(!broker.set_if_absent("k", "1", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!broker.contains_key("k"));
        assert!(broker.set_if_absent("k", "1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn increment_counts_from_one() {
        let broker = InMemoryStreamBroker::new();

        assert_eq!(broker.increment("n").await.unwrap(), 1);
        assert_eq!(broker.increment("n").await.unwrap(), 2);

        broker.delete_key("n").await.unwrap();
        assert_eq!(broker.increment("n").await.unwrap(), 1);
    }
}
