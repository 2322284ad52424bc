//! HandlerRegistry - Immutable event type to handler lookup.
//!
//! Built once at startup from an explicit list of handlers and handed to the
//! consumer. Each handler is registered under every event type it declares,
//! in the order handlers were supplied.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ports::InternalEventHandler;

/// Lookup table from event type to the handlers that react to it.
///
/// # Example
///
/// ```ignore
/// let registry = HandlerRegistry::builder()
///     .register(Arc::new(WelcomeMailer::new(mailer)))
///     .register(Arc::new(AuditTrail::new(repo)))
///     .build();
///
/// assert_eq!(registry.handlers_for("USER_CREATED").len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn InternalEventHandler>>>,
}

impl HandlerRegistry {
    /// Build a registry from a list of handlers.
    pub fn new(handlers: Vec<Arc<dyn InternalEventHandler>>) -> Self {
        handlers
            .into_iter()
            .fold(Self::builder(), HandlerRegistryBuilder::register)
            .build()
    }

    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Handlers for an event type, in registration order.
    ///
    /// Returns an empty slice when nothing is registered.
    pub fn handlers_for(&self, event_type: &str) -> &[Arc<dyn InternalEventHandler>] {
        self.handlers
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Event types with at least one handler, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for event_type in self.event_types() {
            let names: Vec<&str> = self
                .handlers_for(event_type)
                .iter()
                .map(|h| h.name())
                .collect();
            map.entry(&event_type, &names);
        }
        map.finish()
    }
}

/// Collects handlers before freezing them into a [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Vec<Arc<dyn InternalEventHandler>>>,
}

impl HandlerRegistryBuilder {
    /// Register a handler under each event type it declares.
    pub fn register(mut self, handler: Arc<dyn InternalEventHandler>) -> Self {
        for event_type in handler.event_types() {
            let slot = self.handlers.entry((*event_type).to_string()).or_default();
            // A handler declaring the same type twice runs once
            if !slot.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                slot.push(handler.clone());
            }
        }
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
