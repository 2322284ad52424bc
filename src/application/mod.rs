//! Application layer - Emitting events and running the pipeline workers.
//!
//! - `InternalEventsService` - Writes events to the outbox
//! - `InternalEventsRuntime` - Spawns and stops dispatcher, consumer and sweeper

mod emitter;
mod runtime;

pub use emitter::InternalEventsService;
pub use runtime::{InternalEventsRuntime, RuntimeOptions};
