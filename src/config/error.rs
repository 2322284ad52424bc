//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("Dead-letter stream must differ from the main stream")]
    DlqStreamSameAsStream,

    #[error("{0} must be greater than zero while internal events are enabled")]
    MustBePositive(&'static str),

    #[error("max_retries_per_request must be -1 (unlimited) or a non-negative number")]
    InvalidRetriesPerRequest,

    #[error("retry_step_ms must not exceed retry_max_ms")]
    InvalidRetryBackoff,
}
