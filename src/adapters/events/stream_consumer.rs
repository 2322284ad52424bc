//! StreamConsumer - Consumer group worker dispatching stream entries to handlers.
//!
//! ## Loop
//!
//! Each iteration first reclaims entries that stayed pending longer than
//! `claim_after` (at most once per `claim_after`, checked against the time of
//! the last claim), then blocks for up to `block` waiting for new entries.
//! Every entry is processed to completion before the next one starts.
//!
//! A missing group or stream (deleted by an operator, or a flushed broker)
//! recreates the group. Any other loop error pauses for a second and
//! retries. The loop only ends on shutdown, and only between iterations: a
//! blocking read in flight returns on its own timeout.
//!
//! ## Per-Entry Processing
//!
//! 1. Decode fields into an [`InternalEvent`]. Undecodable entries are
//!    dead-lettered with their raw fields and acknowledged.
//! 2. An entry whose failure counter already reached `max_retries` (its
//!    dead-lettering failed earlier) goes straight to the dead-letter path.
//! 3. Set the processed marker for the event id. If it already exists the
//!    entry is a duplicate and is acknowledged without running handlers.
//! 4. Look up handlers. No handlers means nothing can ever succeed, so the
//!    entry is acknowledged with a warning.
//! 5. Run handlers one by one. All succeed: acknowledge.
//! 6. A handler fails: drop the marker and count the failure. Below
//!    `max_retries` the entry stays pending until reclaimed. At the limit it
//!    goes to the dead-letter stream with the error, is acknowledged, and its
//!    counter is deleted.
//!
//! Handlers of one event form a unit: if the second handler fails, the first
//! runs again on the next attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::EventsConfig;
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::internal_events::{DeadLetter, InternalEvent, StreamFields, StreamMessage};
use crate::ports::{InternalEventHandler, StreamBroker, StreamEntry};

use super::handler_registry::HandlerRegistry;
use super::idempotency::{IdempotencyGuard, RetryTracker};

/// Pause after a failed loop iteration.
pub const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Configuration for the StreamConsumer.
#[derive(Debug, Clone)]
pub struct StreamConsumerConfig {
    pub stream_name: String,

    /// Consumer group and idempotency namespace.
    pub service_name: String,

    /// Dead-letter stream, `None` drops permanently failed events.
    pub dlq_stream: Option<String>,

    /// Longest wait for new entries per read.
    pub block: Duration,

    /// Entries per read or claim.
    pub count: usize,

    pub idempotency_ttl: Duration,

    /// Handler failures of one entry before it is dead-lettered.
    pub max_retries: u32,

    /// Idle time after which a pending entry is reclaimed.
    pub claim_after: Duration,

    pub error_pause: Duration,
}

impl Default for StreamConsumerConfig {
    fn default() -> Self {
        Self::from_events(&EventsConfig::default())
    }
}

impl StreamConsumerConfig {
    pub fn from_events(events: &EventsConfig) -> Self {
        Self {
            stream_name: events.stream_name.clone(),
            service_name: events.service_name.clone(),
            dlq_stream: events.dlq_stream().map(str::to_string),
            block: events.consumer_block(),
            count: events.consumer_count,
            idempotency_ttl: events.idempotency_ttl(),
            max_retries: events.max_retries,
            claim_after: events.pending_claim_after(),
            error_pause: ERROR_PAUSE,
        }
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_dlq_stream(mut self, dlq_stream: Option<String>) -> Self {
        self.dlq_stream = dlq_stream;
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_claim_after(mut self, claim_after: Duration) -> Self {
        self.claim_after = claim_after;
        self
    }

    pub fn with_error_pause(mut self, pause: Duration) -> Self {
        self.error_pause = pause;
        self
    }
}

/// What happened to a single stream entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// All handlers succeeded, entry acknowledged.
    Handled,
    /// Processed marker already present, entry acknowledged.
    Duplicate,
    /// No handler registered for the type, entry acknowledged.
    Unhandled,
    /// A handler failed, entry left pending.
    RetryScheduled { attempt: u64 },
    /// A handler failed for the last time, entry dead-lettered and acknowledged.
    DeadLettered { attempt: u64 },
    /// Entry could not be decoded, dead-lettered and acknowledged.
    Malformed,
}

/// Unique consumer name for this process.
///
/// `<service>-<host>-<pid>-<random>`, stable for the life of the consumer.
pub fn consumer_name(service_name: &str) -> String {
    let host = gethostname::gethostname()
        .into_string()
        .ok()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}-{}",
        service_name,
        host,
        std::process::id(),
        &suffix[..8]
    )
}

/// Consumer group member processing entries of one stream.
pub struct StreamConsumer {
    broker: Arc<dyn StreamBroker>,
    registry: HandlerRegistry,
    config: StreamConsumerConfig,
    consumer_name: String,
    idempotency: IdempotencyGuard,
    retries: RetryTracker,
}

impl StreamConsumer {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        registry: HandlerRegistry,
        config: StreamConsumerConfig,
    ) -> Self {
        let consumer_name = consumer_name(&config.service_name);
        Self::with_name(broker, registry, config, consumer_name)
    }

    /// Create a consumer with an explicit consumer name.
    pub fn with_name(
        broker: Arc<dyn StreamBroker>,
        registry: HandlerRegistry,
        config: StreamConsumerConfig,
        consumer_name: impl Into<String>,
    ) -> Self {
        let idempotency = IdempotencyGuard::new(
            broker.clone(),
            config.service_name.clone(),
            config.idempotency_ttl,
        );
        let retries = RetryTracker::new(
            broker.clone(),
            config.service_name.clone(),
            config.idempotency_ttl,
        );

        Self {
            broker,
            registry,
            config,
            consumer_name: consumer_name.into(),
            idempotency,
            retries,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn config(&self) -> &StreamConsumerConfig {
        &self.config
    }

    /// Create the consumer group at the stream tail if it does not exist.
    pub async fn ensure_group(&self) -> Result<(), DomainError> {
        self.broker
            .create_group(&self.config.stream_name, &self.config.service_name)
            .await
    }

    /// Run the consumer loop until shutdown signal is received.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.config.count == 0 {
            tracing::info!("Stream consumer inactive (zero read count)");
            return;
        }

        if let Err(e) = self.ensure_group().await {
            tracing::warn!(error = %e, "Failed to create consumer group, retrying in loop");
        }
        tracing::info!(
            stream = %self.config.stream_name,
            group = %self.config.service_name,
            consumer = %self.consumer_name,
            handlers = ?self.registry,
            "Stream consumer started"
        );

        let mut last_claim: Option<Instant> = None;
        while !stop_requested(&shutdown) {
            match self.iterate(&mut last_claim).await {
                Ok(()) => {}
                Err(e) if e.is(ErrorCode::ConsumerGroupMissing) => {
                    tracing::warn!(error = %e, "Consumer group missing, recreating");
                    if let Err(e) = self.ensure_group().await {
                        tracing::warn!(error = %e, "Failed to recreate consumer group");
                    }
                    self.pause(&mut shutdown).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Stream consumer iteration failed");
                    self.pause(&mut shutdown).await;
                }
            }
        }

        tracing::info!(consumer = %self.consumer_name, "Stream consumer stopped");
    }

    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.error_pause) => {}
            _ = shutdown.changed() => {}
        }
    }

    async fn iterate(&self, last_claim: &mut Option<Instant>) -> Result<(), DomainError> {
        let claim_due = last_claim.map_or(true, |at| at.elapsed() >= self.config.claim_after);
        if claim_due {
            *last_claim = Some(Instant::now());
            self.claim_stale().await?;
        }
        self.read_new().await?;
        Ok(())
    }

    /// Reclaim and process entries idle longer than `claim_after`.
    ///
    /// Returns the number of entries claimed.
    pub async fn claim_stale(&self) -> Result<usize, DomainError> {
        let entries = self
            .broker
            .claim_pending(
                &self.config.stream_name,
                &self.config.service_name,
                &self.consumer_name,
                self.config.claim_after,
                self.config.count,
            )
            .await?;

        if !entries.is_empty() {
            tracing::info!(count = entries.len(), "Reclaimed pending entries");
        }
        self.process_all(&entries).await;
        Ok(entries.len())
    }

    /// Wait for and process new entries.
    ///
    /// Returns the number of entries read.
    pub async fn read_new(&self) -> Result<usize, DomainError> {
        let entries = self
            .broker
            .read_group(
                &self.config.stream_name,
                &self.config.service_name,
                &self.consumer_name,
                self.config.count,
                self.config.block,
            )
            .await?;

        self.process_all(&entries).await;
        Ok(entries.len())
    }

    async fn process_all(&self, entries: &[StreamEntry]) {
        for entry in entries {
            if let Err(e) = self.process_entry(entry).await {
                // Left pending, picked up again by a later claim
                tracing::warn!(entry_id = %entry.id, error = %e, "Failed to process stream entry");
            }
        }
    }

    /// Process a single stream entry.
    pub async fn process_entry(&self, entry: &StreamEntry) -> Result<EntryOutcome, DomainError> {
        let event = match StreamMessage::from_fields(&entry.fields).and_then(|m| m.decode()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    error = %e,
                    "Malformed stream entry, moving to dead-letter stream"
                );
                self.dead_letter(DeadLetter::for_raw_entry(&entry.fields, e.message).into_fields())
                    .await?;
                self.ack(&entry.id).await?;
                return Ok(EntryOutcome::Malformed);
            }
        };

        let attempts = self.retries.attempts(&entry.id).await?;
        if attempts >= self.retry_limit() {
            // A previous attempt hit the limit but could not finish dead-lettering
            tracing::error!(
                entry_id = %entry.id,
                event_id = %event.event_id,
                event_type = %event.event_type,
                attempt = attempts,
                "Retry limit already reached, moving to dead-letter stream"
            );
            let reason = format!("Retry limit reached after {} attempts", attempts);
            return self.exhaust(entry, &event, reason, attempts).await;
        }

        if !self.idempotency.try_acquire(&event.event_id).await? {
            tracing::debug!(
                entry_id = %entry.id,
                event_id = %event.event_id,
                "Duplicate delivery, acknowledging"
            );
            self.ack(&entry.id).await?;
            return Ok(EntryOutcome::Duplicate);
        }

        let handlers = self.registry.handlers_for(&event.event_type);
        if handlers.is_empty() {
            tracing::warn!(
                entry_id = %entry.id,
                event_id = %event.event_id,
                event_type = %event.event_type,
                "No handlers registered for event type"
            );
            self.ack(&entry.id).await?;
            return Ok(EntryOutcome::Unhandled);
        }

        match run_handlers(handlers, &event).await {
            Ok(()) => {
                self.ack(&entry.id).await?;
                tracing::debug!(
                    entry_id = %entry.id,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "Handled event"
                );
                Ok(EntryOutcome::Handled)
            }
            Err((handler, error)) => self.handle_failure(entry, &event, handler, error).await,
        }
    }

    async fn handle_failure(
        &self,
        entry: &StreamEntry,
        event: &InternalEvent,
        handler: &'static str,
        error: DomainError,
    ) -> Result<EntryOutcome, DomainError> {
        self.idempotency.release(&event.event_id).await?;
        let attempt = self.retries.record_failure(&entry.id).await?;

        if attempt < self.retry_limit() {
            tracing::warn!(
                entry_id = %entry.id,
                event_id = %event.event_id,
                event_type = %event.event_type,
                handler,
                attempt,
                max_retries = self.config.max_retries,
                error = %error,
                "Handler failed, entry left pending for retry"
            );
            return Ok(EntryOutcome::RetryScheduled { attempt });
        }

        tracing::error!(
            entry_id = %entry.id,
            event_id = %event.event_id,
            event_type = %event.event_type,
            handler,
            attempt,
            error = %error,
            "Handler failed permanently, moving to dead-letter stream"
        );
        self.exhaust(entry, event, error.message, attempt).await
    }

    /// Dead-letter, acknowledge and forget an entry that used up its retries.
    ///
    /// The counter is deleted last, so a failure before that point leaves the
    /// entry pending with its count intact and the next delivery returns here
    /// without running handlers.
    async fn exhaust(
        &self,
        entry: &StreamEntry,
        event: &InternalEvent,
        error: String,
        attempt: u64,
    ) -> Result<EntryOutcome, DomainError> {
        self.dead_letter(DeadLetter::for_event(event, error)?.into_fields())
            .await?;
        self.ack(&entry.id).await?;
        self.retries.clear(&entry.id).await?;
        Ok(EntryOutcome::DeadLettered { attempt })
    }

    /// Failures after which an entry is dead-lettered, at least one.
    fn retry_limit(&self) -> u64 {
        u64::from(self.config.max_retries.max(1))
    }

    async fn dead_letter(&self, fields: StreamFields) -> Result<(), DomainError> {
        match &self.config.dlq_stream {
            Some(dlq) => {
                self.broker.append(dlq, &fields, None).await?;
            }
            None => {
                tracing::warn!("No dead-letter stream configured, dropping entry");
            }
        }
        Ok(())
    }

    async fn ack(&self, entry_id: &str) -> Result<(), DomainError> {
        self.broker
            .ack(&self.config.stream_name, &self.config.service_name, entry_id)
            .await
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    // A dropped sender also stops the loop
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

async fn run_handlers(
    handlers: &[Arc<dyn InternalEventHandler>],
    event: &InternalEvent,
) -> Result<(), (&'static str, DomainError)> {
    for handler in handlers {
        handler
            .handle(event)
            .await
            .map_err(|e| (handler.name(), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stream::InMemoryStreamBroker;
    use crate::domain::foundation::{EventId, Timestamp};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STREAM: &str = "internal-events";
    const DLQ: &str = "internal-events:dlq";
    const SERVICE: &str = "svc";

    /// Handler that counts invocations and optionally fails.
    struct CountingHandler {
        name: &'static str,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingHandler {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InternalEventHandler for CountingHandler {
        fn event_types(&self) -> &[&'static str] {
            &["USER_CREATED"]
        }

        async fn handle(&self, _: &InternalEvent) -> Result<(), DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DomainError::new(ErrorCode::HandlerFailed, "downstream unavailable"));
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    fn config() -> StreamConsumerConfig {
        StreamConsumerConfig::default()
            .with_service_name(SERVICE)
            .with_max_retries(3)
            .with_block(Duration::ZERO)
    }

    fn consumer(
        broker: &Arc<InMemoryStreamBroker>,
        handlers: Vec<Arc<dyn InternalEventHandler>>,
        config: StreamConsumerConfig,
    ) -> StreamConsumer {
        StreamConsumer::with_name(broker.clone(), HandlerRegistry::new(handlers), config, "c1")
    }

    fn message(event_id: &str) -> StreamFields {
        StreamMessage {
            event_id: EventId::from_string(event_id),
            event_type: "USER_CREATED".to_string(),
            payload: json!({"id": 42}).to_string(),
            occurred_at: Timestamp::now().to_iso_string(),
        }
        .to_fields()
    }

    /// Append a message and deliver it to the consumer as a pending entry.
    async fn deliver(broker: &InMemoryStreamBroker, fields: &[(String, String)]) -> StreamEntry {
        broker.create_group(STREAM, SERVICE).await.unwrap();
        broker.append(STREAM, fields, None).await.unwrap();
        broker
            .read_group(STREAM, SERVICE, "c1", 1, Duration::ZERO)
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn successful_handlers_ack_entry() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let first = CountingHandler::ok("first");
        let second = CountingHandler::ok("second");
        let consumer = consumer(&broker, vec![first.clone(), second.clone()], config());
        let entry = deliver(&broker, &message("evt-1")).await;

        let outcome = consumer.process_entry(&entry).await.unwrap();

        assert_eq!(outcome, EntryOutcome::Handled);
        assert_eq!((first.calls(), second.calls()), (1, 1));
        assert_eq!(broker.pending_count(STREAM, SERVICE), 0);
        assert!(broker.contains_key("processed:svc:evt-1"));
    }

    #[tokio::test]
    async fn duplicate_event_is_acked_without_handlers() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let handler = CountingHandler::ok("h");
        let consumer = consumer(&broker, vec![handler.clone()], config());
        let entry = deliver(&broker, &message("evt-1")).await;
        consumer.process_entry(&entry).await.unwrap();

        let again = deliver(&broker, &message("evt-1")).await;
        let outcome = consumer.process_entry(&again).await.unwrap();

        assert_eq!(outcome, EntryOutcome::Duplicate);
        assert_eq!(handler.calls(), 1);
        assert_eq!(broker.pending_count(STREAM, SERVICE), 0);
    }

    #[tokio::test]
    async fn unhandled_event_type_is_acked() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let consumer = consumer(&broker, vec![], config());
        let entry = deliver(&broker, &message("evt-1")).await;

        let outcome = consumer.process_entry(&entry).await.unwrap();

        assert_eq!(outcome, EntryOutcome::Unhandled);
        assert_eq!(broker.pending_count(STREAM, SERVICE), 0);
    }

    #[tokio::test]
    async fn failure_below_limit_leaves_entry_pending_and_releases_marker() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let handler = CountingHandler::failing("h");
        let consumer = consumer(&broker, vec![handler.clone()], config());
        let entry = deliver(&broker, &message("evt-1")).await;

        let outcome = consumer.process_entry(&entry).await.unwrap();

        assert_eq!(outcome, EntryOutcome::RetryScheduled { attempt: 1 });
        assert_eq!(broker.pending_count(STREAM, SERVICE), 1);
        assert!(!broker.contains_key("processed:svc:evt-1"));
        assert!(broker.contains_key(&format!("internal-events:retries:svc:{}", entry.id)));
    }

    #[tokio::test]
    async fn failure_at_limit_dead_letters_and_acks() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let handler = CountingHandler::failing("h");
        let consumer = consumer(&broker, vec![handler.clone()], config());
        let entry = deliver(&broker, &message("evt-1")).await;

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(consumer.process_entry(&entry).await.unwrap());
        }

        assert_eq!(
            outcomes,
            vec![
                EntryOutcome::RetryScheduled { attempt: 1 },
                EntryOutcome::RetryScheduled { attempt: 2 },
                EntryOutcome::DeadLettered { attempt: 3 },
            ]
        );
        assert_eq!(handler.calls(), 3);
        assert_eq!(broker.pending_count(STREAM, SERVICE), 0);
        assert!(!broker.contains_key(&format!("internal-events:retries:svc:{}", entry.id)));

        let dead = broker.entries(DLQ);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].fields["eventId"], "evt-1");
        assert_eq!(dead[0].fields["eventType"], "USER_CREATED");
        assert_eq!(dead[0].fields["payload"], r#"{"id":42}"#);
        assert_eq!(dead[0].fields["error"], "downstream unavailable");
    }

    #[tokio::test]
    async fn failed_dead_letter_append_does_not_run_handlers_again() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let handler = CountingHandler::failing("h");
        let consumer = consumer(&broker, vec![handler.clone()], config());
        let entry = deliver(&broker, &message("evt-1")).await;
        consumer.process_entry(&entry).await.unwrap();
        consumer.process_entry(&entry).await.unwrap();

        broker.fail_next_appends(1);
        let err = consumer.process_entry(&entry).await.unwrap_err();
        assert!(err.is(ErrorCode::BrokerUnavailable));
        assert_eq!(broker.pending_count(STREAM, SERVICE), 1);

        let outcome = consumer.process_entry(&entry).await.unwrap();

        assert_eq!(outcome, EntryOutcome::DeadLettered { attempt: 3 });
        assert_eq!(handler.calls(), 3);
        assert_eq!(broker.pending_count(STREAM, SERVICE), 0);
        assert!(!broker.contains_key(&format!("internal-events:retries:svc:{}", entry.id)));

        let dead = broker.entries(DLQ);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].fields["eventId"], "evt-1");
        assert!(dead[0].fields["error"].contains("Retry limit"));
    }

    #[tokio::test]
    async fn failing_second_handler_reruns_first_on_retry() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let first = CountingHandler::ok("first");
        let second = CountingHandler::failing("second");
        let consumer = consumer(&broker, vec![first.clone(), second.clone()], config());
        let entry = deliver(&broker, &message("evt-1")).await;

        consumer.process_entry(&entry).await.unwrap();
        consumer.process_entry(&entry).await.unwrap();

        assert_eq!(first.calls(), 2);
        assert_eq!(second.calls(), 2);
    }

    #[tokio::test]
    async fn malformed_entry_is_dead_lettered_and_acked() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let handler = CountingHandler::ok("h");
        let consumer = consumer(&broker, vec![handler.clone()], config());
        let fields = vec![("eventId".to_string(), "evt-1".to_string())];
        let entry = deliver(&broker, &fields).await;

        let outcome = consumer.process_entry(&entry).await.unwrap();

        assert_eq!(outcome, EntryOutcome::Malformed);
        assert_eq!(handler.calls(), 0);
        assert_eq!(broker.pending_count(STREAM, SERVICE), 0);
        let dead = broker.entries(DLQ);
        assert_eq!(dead[0].fields["eventId"], "evt-1");
        assert!(dead[0].fields["error"].contains("eventType"));
    }

    #[tokio::test]
    async fn invalid_payload_json_is_malformed() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let consumer = consumer(&broker, vec![], config());
        let mut fields: HashMap<String, String> = message("evt-1").into_iter().collect();
        fields.insert("payload".to_string(), "{not json".to_string());
        let fields: StreamFields = fields.into_iter().collect();
        let entry = deliver(&broker, &fields).await;

        let outcome = consumer.process_entry(&entry).await.unwrap();

        assert_eq!(outcome, EntryOutcome::Malformed);
    }

    #[tokio::test]
    async fn without_dlq_permanent_failure_is_still_acked() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let consumer = consumer(
            &broker,
            vec![CountingHandler::failing("h")],
            config().with_max_retries(1).with_dlq_stream(None),
        );
        let entry = deliver(&broker, &message("evt-1")).await;

        let outcome = consumer.process_entry(&entry).await.unwrap();

        assert_eq!(outcome, EntryOutcome::DeadLettered { attempt: 1 });
        assert_eq!(broker.pending_count(STREAM, SERVICE), 0);
        assert_eq!(broker.stream_len(DLQ).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn claim_stale_reprocesses_abandoned_entry() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let handler = CountingHandler::ok("h");
        let claim_after = Duration::from_secs(60);
        let consumer = StreamConsumer::with_name(
            broker.clone(),
            HandlerRegistry::new(vec![handler.clone()]),
            config().with_claim_after(claim_after),
            "c2",
        );
        // Delivered to c1, which never acknowledges
        deliver(&broker, &message("evt-1")).await;

        assert_eq!(consumer.claim_stale().await.unwrap(), 0);

        tokio::time::advance(claim_after).await;
        assert_eq!(consumer.claim_stale().await.unwrap(), 1);
        assert_eq!(handler.calls(), 1);
        assert_eq!(broker.pending_count(STREAM, SERVICE), 0);
    }

    #[tokio::test]
    async fn read_without_group_reports_missing_group() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let consumer = consumer(&broker, vec![], config());

        let err = consumer.read_new().await.unwrap_err();

        assert!(err.is(ErrorCode::ConsumerGroupMissing));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let broker = Arc::new(InMemoryStreamBroker::new());
        let handler = CountingHandler::ok("h");
        let consumer = consumer(
            &broker,
            vec![handler.clone()],
            config().with_block(Duration::from_millis(20)),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { consumer.run(shutdown_rx).await });
        while !broker.group_exists(STREAM, SERVICE) {
            tokio::task::yield_now().await;
        }
        broker.append(STREAM, &message("evt-1"), None).await.unwrap();
        while handler.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(broker.pending_count(STREAM, SERVICE), 0);
    }

    #[test]
    fn consumer_name_has_service_pid_and_suffix() {
        let name = consumer_name("billing");
        let parts: Vec<&str> = name.rsplitn(3, '-').collect();

        assert!(name.starts_with("billing-"));
        assert_eq!(parts[0].len(), 8);
        if let Ok(host) = gethostname::gethostname().into_string() {
            if !host.is_empty() {
                assert!(name.starts_with(&format!("billing-{}-", host)));
            }
        }
        assert_eq!(parts[1], std::process::id().to_string());
        assert_ne!(consumer_name("billing"), name);
    }

    #[test]
    fn config_follows_events_config() {
        let events = EventsConfig {
            dlq_stream_name: String::new(),
            ..EventsConfig::default()
        };
        let config = StreamConsumerConfig::from_events(&events);

        assert_eq!(config.service_name, "app");
        assert_eq!(config.dlq_stream, None);
        assert_eq!(config.block, Duration::from_millis(5000));
        assert_eq!(config.claim_after, Duration::from_millis(60_000));
        assert_eq!(config.max_retries, 5);
    }
}
