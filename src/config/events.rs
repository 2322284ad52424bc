//! Internal events configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Tunables for the outbox dispatcher and the stream consumer.
///
/// Always go through [`EventsConfig::resolved`] before handing the values to
/// components: a disabled feature zeroes every dispatch/consumer tunable.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Master switch for emitting, dispatching and consuming
    #[serde(default)]
    pub enable: bool,

    /// Consumer group name and idempotency namespace
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_stream_name")]
    pub stream_name: String,

    /// Dead-letter stream; empty disables dead-lettering
    #[serde(default = "default_dlq_stream_name")]
    pub dlq_stream_name: String,

    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    #[serde(default = "default_dispatch_batch_size")]
    pub dispatch_batch_size: u32,

    /// Published rows older than this are deleted; 0 keeps them forever
    #[serde(default = "default_outbox_retention_days")]
    pub outbox_retention_days: u32,

    #[serde(default = "default_consumer_block_ms")]
    pub consumer_block_ms: u64,

    /// Entries requested per read
    #[serde(default = "default_consumer_count")]
    pub consumer_count: usize,

    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_pending_claim_after_ms")]
    pub pending_claim_after_ms: u64,

    /// Approximate stream length cap; 0 disables trimming
    #[serde(default = "default_stream_trim_max_len")]
    pub stream_trim_max_len: u64,
}

impl EventsConfig {
    /// Returns the configuration with tunables forced to no-op values when disabled.
    pub fn resolved(mut self) -> Self {
        if !self.enable {
            self.dispatch_interval_ms = 0;
            self.dispatch_batch_size = 0;
            self.consumer_block_ms = 0;
            self.consumer_count = 0;
            self.pending_claim_after_ms = 0;
            self.max_retries = 0;
        }
        self
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn consumer_block(&self) -> Duration {
        Duration::from_millis(self.consumer_block_ms)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_seconds)
    }

    pub fn pending_claim_after(&self) -> Duration {
        Duration::from_millis(self.pending_claim_after_ms)
    }

    pub fn dlq_stream(&self) -> Option<&str> {
        if self.dlq_stream_name.is_empty() {
            None
        } else {
            Some(&self.dlq_stream_name)
        }
    }

    pub fn trim_max_len(&self) -> Option<u64> {
        if self.stream_trim_max_len == 0 {
            None
        } else {
            Some(self.stream_trim_max_len)
        }
    }

    /// Validate internal events configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.service_name.trim().is_empty() {
            return Err(ValidationError::MissingRequired("SERVICE_NAME"));
        }
        if self.stream_name.trim().is_empty() {
            return Err(ValidationError::MissingRequired("STREAM_NAME"));
        }
        if self.dlq_stream_name == self.stream_name {
            return Err(ValidationError::DlqStreamSameAsStream);
        }
        if !self.enable {
            return Ok(());
        }
        if self.dispatch_interval_ms == 0 {
            return Err(ValidationError::MustBePositive("dispatch_interval_ms"));
        }
        if self.dispatch_batch_size == 0 {
            return Err(ValidationError::MustBePositive("dispatch_batch_size"));
        }
        if self.consumer_count == 0 {
            return Err(ValidationError::MustBePositive("consumer_count"));
        }
        if self.max_retries == 0 {
            return Err(ValidationError::MustBePositive("max_retries"));
        }
        if self.idempotency_ttl_seconds == 0 {
            return Err(ValidationError::MustBePositive("idempotency_ttl_seconds"));
        }
        Ok(())
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            service_name: default_service_name(),
            stream_name: default_stream_name(),
            dlq_stream_name: default_dlq_stream_name(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            dispatch_batch_size: default_dispatch_batch_size(),
            outbox_retention_days: default_outbox_retention_days(),
            consumer_block_ms: default_consumer_block_ms(),
            consumer_count: default_consumer_count(),
            idempotency_ttl_seconds: default_idempotency_ttl_seconds(),
            max_retries: default_max_retries(),
            pending_claim_after_ms: default_pending_claim_after_ms(),
            stream_trim_max_len: default_stream_trim_max_len(),
        }
    }
}

fn default_service_name() -> String {
    "app".to_string()
}

fn default_stream_name() -> String {
    "internal-events".to_string()
}

fn default_dlq_stream_name() -> String {
    "internal-events:dlq".to_string()
}

fn default_dispatch_interval_ms() -> u64 {
    1000
}

fn default_dispatch_batch_size() -> u32 {
    100
}

fn default_outbox_retention_days() -> u32 {
    7
}

fn default_consumer_block_ms() -> u64 {
    5000
}

fn default_consumer_count() -> usize {
    10
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_max_retries() -> u32 {
    5
}

fn default_pending_claim_after_ms() -> u64 {
    60_000
}

fn default_stream_trim_max_len() -> u64 {
    100_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> EventsConfig {
        EventsConfig {
            enable: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = EventsConfig::default();
        assert!(!config.enable);
        assert_eq!(config.stream_name, "internal-events");
        assert_eq!(config.dlq_stream(), Some("internal-events:dlq"));
        assert_eq!(config.dispatch_interval(), Duration::from_secs(1));
        assert_eq!(config.idempotency_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.trim_max_len(), Some(100_000));
    }

    #[test]
    fn test_resolved_disabled_zeroes_tunables() {
        let config = EventsConfig::default().resolved();

        assert_eq!(config.dispatch_interval_ms, 0);
        assert_eq!(config.dispatch_batch_size, 0);
        assert_eq!(config.consumer_block_ms, 0);
        assert_eq!(config.consumer_count, 0);
        assert_eq!(config.pending_claim_after_ms, 0);
        assert_eq!(config.max_retries, 0);
        // Naming is untouched
        assert_eq!(config.stream_name, "internal-events");
    }

    #[test]
    fn test_resolved_enabled_keeps_tunables() {
        let config = enabled().resolved();
        assert_eq!(config.dispatch_batch_size, 100);
        assert_eq!(config.consumer_count, 10);
    }

    #[test]
    fn test_disabled_config_validates_after_resolution() {
        assert!(EventsConfig::default().resolved().validate().is_ok());
    }

    #[test]
    fn test_empty_dlq_disables_dead_lettering() {
        let config = EventsConfig {
            dlq_stream_name: String::new(),
            ..enabled()
        };
        assert_eq!(config.dlq_stream(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_trim_disables_trimming() {
        let config = EventsConfig {
            stream_trim_max_len: 0,
            ..enabled()
        };
        assert_eq!(config.trim_max_len(), None);
    }

    #[test]
    fn test_validation_rules() {
        let config = EventsConfig {
            dlq_stream_name: "internal-events".to_string(),
            ..enabled()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::DlqStreamSameAsStream)
        );

        let config = EventsConfig {
            service_name: " ".to_string(),
            ..enabled()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingRequired("SERVICE_NAME"))
        );

        let config = EventsConfig {
            max_retries: 0,
            ..enabled()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::MustBePositive("max_retries"))
        );
    }
}
