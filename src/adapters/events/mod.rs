//! Internal event pipeline adapters.
//!
//! - `OutboxDispatcher` - Background service moving outbox rows onto the stream
//! - `StreamConsumer` - Consumer group worker running handlers per entry
//! - `HandlerRegistry` - Event type to handler lookup built at startup
//! - `IdempotencyGuard` / `RetryTracker` - Broker-side consumer bookkeeping
//! - `OutboxRetentionSweeper` - Deletes published rows past retention

mod handler_registry;
mod idempotency;
mod outbox_dispatcher;
mod retention;
mod stream_consumer;

pub use handler_registry::{HandlerRegistry, HandlerRegistryBuilder};
pub use idempotency::{processed_key, retry_key, IdempotencyGuard, RetryTracker};
pub use outbox_dispatcher::{OutboxDispatcher, OutboxDispatcherConfig};
pub use retention::{OutboxRetentionSweeper, DEFAULT_SWEEP_INTERVAL};
pub use stream_consumer::{
    consumer_name, EntryOutcome, StreamConsumer, StreamConsumerConfig, ERROR_PAUSE,
};
