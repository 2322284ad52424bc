//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the event pipeline and the outside world. Adapters implement these ports.
//!
//! - `OutboxStore` - Durable outbox table written by domain code
//! - `TransactionalOutboxStore` - Outbox writes inside a caller transaction
//! - `StreamBroker` - Stream broker with consumer groups and key/value primitives
//! - `InternalEventHandler` - Business reaction to an event type

mod event_handler;
mod outbox_store;
mod stream_broker;

pub use event_handler::InternalEventHandler;
pub use outbox_store::{OutboxStore, TransactionalOutboxStore};
pub use stream_broker::{StreamBroker, StreamEntry};
