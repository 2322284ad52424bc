//! InternalEventHandler port - Interface for reacting to internal events.
//!
//! Handlers declare the event types they react to and are collected into a
//! [`HandlerRegistry`](crate::adapters::HandlerRegistry) once at startup.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::internal_events::InternalEvent;

/// Handler for processing internal events.
///
/// Implementations should be:
/// - **Idempotent** - Redelivery after a failure re-runs every handler of the event
/// - **Bounded** - The consumer awaits handlers one by one, a slow handler delays the batch
///
/// # Example
///
/// ```ignore
/// struct WelcomeMailer { /* ... */ }
///
/// #[async_trait]
/// impl InternalEventHandler for WelcomeMailer {
///     fn event_types(&self) -> &[&'static str] {
///         &["USER_CREATED"]
///     }
///
///     async fn handle(&self, event: &InternalEvent) -> Result<(), DomainError> {
///         let user: UserCreated = event.payload_as()?;
///         // Send mail...
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "WelcomeMailer"
///     }
/// }
/// ```
#[async_trait]
pub trait InternalEventHandler: Send + Sync {
    /// Event types this handler is registered for.
    fn event_types(&self) -> &[&'static str];

    /// Process an event. Any error fails the whole entry.
    async fn handle(&self, event: &InternalEvent) -> Result<(), DomainError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}
