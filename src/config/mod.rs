//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `INTERNAL_EVENTS` prefix and nested values use double underscores as separators.
//!
//! Configuration is read once at startup; components receive their slice of it
//! by value and never consult the environment afterwards.
//!
//! # Example
//!
//! ```no_run
//! use internal_events::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Publishing to {}", config.events.stream_name);
//! ```

mod database;
mod error;
mod events;
mod logging;
mod redis;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use events::EventsConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use redis::RedisConfig;

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration (outbox table)
    pub database: DatabaseConfig,

    /// Redis configuration (stream broker)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Dispatcher and consumer tunables
    #[serde(default)]
    pub events: EventsConfig,

    /// Log filter and format
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `INTERNAL_EVENTS` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    /// 5. Forces dispatch/consumer tunables to zero if the feature is disabled
    ///
    /// # Environment Variable Format
    ///
    /// - `INTERNAL_EVENTS__EVENTS__ENABLE=true` -> `events.enable = true`
    /// - `INTERNAL_EVENTS__REDIS__URL=...` -> `redis.url = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required environment variables are missing
    /// - Values cannot be parsed into expected types
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config: AppConfig = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("INTERNAL_EVENTS")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.events = config.events.resolved();
        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.redis.validate()?;
        self.events.validate()?;
        Ok(())
    }

    /// Whether the internal events feature is switched on
    pub fn events_enabled(&self) -> bool {
        self.events.enable
    }
}
