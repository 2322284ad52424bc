//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers and error types
//! shared by the internal events pipeline.

mod errors;
mod ids;
mod timestamp;

pub use errors::{DomainError, ErrorCode};
pub use ids::EventId;
pub use timestamp::Timestamp;
