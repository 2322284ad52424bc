//! Outbox store adapters.
//!
//! - `PostgresOutboxStore` - Production table written inside domain transactions
//! - `InMemoryOutboxStore` - Process-local store for tests

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryOutboxStore, InMemoryTransaction};
pub use postgres::{PostgresOutboxStore, MIGRATOR};
