//! Error types for the domain layer.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// Error codes organized by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Validation errors
    ValidationFailed,
    FeatureDisabled,

    // Encoding errors
    SerializationFailed,
    MalformedMessage,

    // Broker errors
    BrokerUnavailable,
    ConsumerGroupMissing,

    // Handler errors
    HandlerFailed,

    // Outbox errors
    OutboxRowNotFound,

    // Infrastructure errors
    DatabaseError,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::FeatureDisabled => "FEATURE_DISABLED",
            ErrorCode::SerializationFailed => "SERIALIZATION_FAILED",
            ErrorCode::MalformedMessage => "MALFORMED_MESSAGE",
            ErrorCode::BrokerUnavailable => "BROKER_UNAVAILABLE",
            ErrorCode::ConsumerGroupMissing => "CONSUMER_GROUP_MISSING",
            ErrorCode::HandlerFailed => "HANDLER_FAILED",
            ErrorCode::OutboxRowNotFound => "OUTBOX_ROW_NOT_FOUND",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Standard domain error with code, message, and optional details.
#[derive(Debug, Clone)]
pub struct DomainError {
    pub code: ErrorCode,
    pub message: String,
    pub details: HashMap<String, String>,
}

impl DomainError {
    /// Creates a new domain error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Creates a validation error for a specific field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message).with_detail("field", field.into())
    }

    /// Error returned by every entry point while the feature is switched off.
    pub fn feature_disabled() -> Self {
        Self::new(ErrorCode::FeatureDisabled, "Internal events are disabled")
    }

    /// Creates a broker error.
    pub fn broker(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BrokerUnavailable, message)
    }

    /// Adds a detail to the error.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Returns true if this error carries the given code.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for DomainError {}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::new(ErrorCode::SerializationFailed, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_displays_code_and_message() {
        let err = DomainError::new(ErrorCode::ConsumerGroupMissing, "NOGROUP no such key");
        assert_eq!(
            format!("{}", err),
            "[CONSUMER_GROUP_MISSING] NOGROUP no such key"
        );
    }

    #[test]
    fn domain_error_with_detail_adds_detail() {
        let err = DomainError::new(ErrorCode::HandlerFailed, "Handler failed")
            .with_detail("handler", "UserCreatedProjector");

        assert_eq!(
            err.details.get("handler"),
            Some(&"UserCreatedProjector".to_string())
        );
    }

    #[test]
    fn validation_error_records_field() {
        let err = DomainError::validation("event_type", "Event type cannot be empty");

        assert!(err.is(ErrorCode::ValidationFailed));
        assert_eq!(err.details.get("field"), Some(&"event_type".to_string()));
    }

    #[test]
    fn feature_disabled_has_dedicated_code() {
        assert!(DomainError::feature_disabled().is(ErrorCode::FeatureDisabled));
    }

    #[test]
    fn serde_errors_convert_to_serialization_failed() {
        let err: DomainError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();

        assert!(err.is(ErrorCode::SerializationFailed));
    }
}
