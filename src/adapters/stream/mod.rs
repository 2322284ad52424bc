//! Stream broker adapters.
//!
//! - `redis` - Redis Streams over a single reconnecting connection
//! - `in_memory` - Process-local broker for tests

mod error_throttle;
mod in_memory;
mod reconnect;
mod redis;

pub use error_throttle::{ErrorLogThrottle, ThrottleDecision};
pub use in_memory::InMemoryStreamBroker;
pub use reconnect::ReconnectPolicy;
pub use self::redis::RedisStreamBroker;
