//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the event pipeline to external systems:
//! - `events` - Dispatcher, consumer and their bookkeeping
//! - `outbox` - Outbox stores (PostgreSQL, in-memory)
//! - `stream` - Stream brokers (Redis, in-memory)

pub mod events;
pub mod outbox;
pub mod stream;

pub use events::{
    EntryOutcome, HandlerRegistry, OutboxDispatcher, OutboxDispatcherConfig,
    OutboxRetentionSweeper, StreamConsumer, StreamConsumerConfig,
};
pub use outbox::{InMemoryOutboxStore, PostgresOutboxStore};
pub use stream::{InMemoryStreamBroker, RedisStreamBroker};
