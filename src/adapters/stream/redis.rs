//! Redis Streams implementation of the stream broker.
//!
//! One multiplexed connection is shared by every caller in the process. It is
//! opened on first use and re-opened after transport failures, with the delay
//! between attempts taken from [`ReconnectPolicy`]. Repeated identical
//! transport errors are logged once per window through [`ErrorLogThrottle`].
//!
//! Blocking reads travel over the same connection, so other commands issued
//! while an `XREADGROUP ... BLOCK` is outstanding wait for it to return.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamReadReply;
use redis::{FromRedisValue, RedisError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::RedisConfig;
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{StreamBroker, StreamEntry};

use super::error_throttle::{ErrorLogThrottle, ThrottleDecision};
use super::reconnect::ReconnectPolicy;

/// Redis error code for a missing stream or consumer group.
const NOGROUP: &str = "NOGROUP";

/// Redis error code for a consumer group that already exists.
const BUSYGROUP: &str = "BUSYGROUP";

/// Stream broker backed by Redis Streams.
pub struct RedisStreamBroker {
    client: redis::Client,
    connection: AsyncMutex<Option<MultiplexedConnection>>,
    policy: ReconnectPolicy,
    throttle: Mutex<ErrorLogThrottle>,
    connected: AtomicBool,
    enabled: bool,
}

impl RedisStreamBroker {
    /// Create a broker for the configured URL.
    ///
    /// No connection is opened until the first command.
    pub fn new(config: &RedisConfig, enabled: bool) -> Result<Self, DomainError> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            DomainError::new(ErrorCode::ValidationFailed, "Invalid Redis URL")
                .with_detail("reason", e.to_string())
        })?;

        Ok(Self {
            client,
            connection: AsyncMutex::new(None),
            policy: ReconnectPolicy::from_config(config),
            throttle: Mutex::new(ErrorLogThrottle::default()),
            connected: AtomicBool::new(false),
            enabled,
        })
    }

    /// Whether the feature is on and a connection is currently held.
    pub fn is_ready(&self) -> bool {
        self.enabled && self.connected.load(Ordering::Acquire)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, RedisError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_tokio_connection().await?;
        *guard = Some(conn.clone());
        self.connected.store(true, Ordering::Release);
        tracing::info!("Connected to stream broker");
        Ok(conn)
    }

    async fn drop_connection(&self) {
        let mut guard = self.connection.lock().await;
        if guard.take().is_some() {
            tracing::debug!("Dropped stream broker connection");
        }
        self.connected.store(false, Ordering::Release);
    }

    fn throttle(&self) -> MutexGuard<'_, ErrorLogThrottle> {
        match self.throttle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn log_transient(&self, operation: &'static str, err: &RedisError) {
        let message = err.to_string();
        match self.throttle().record(&message, Instant::now()) {
            ThrottleDecision::Emit => {
                tracing::warn!(operation, error = %message, "Stream broker error");
            }
            ThrottleDecision::EmitAfterSuppressed(suppressed) => {
                tracing::warn!(
                    operation,
                    error = %message,
                    suppressed,
                    "Stream broker error (repeated)"
                );
            }
            ThrottleDecision::Suppress => {}
        }
    }

    fn log_recovery(&self) {
        if let Some(suppressed) = self.throttle().recover() {
            tracing::info!(suppressed, "Stream broker recovered");
        }
    }

    /// Run a command, reconnecting and retrying on transport failures.
    async fn execute<T: FromRedisValue>(
        &self,
        operation: &'static str,
        cmd: &redis::Cmd,
    ) -> Result<T, RedisError> {
        let mut failures: u32 = 0;
        loop {
            let result = match self.connection().await {
                Ok(mut conn) => cmd.query_async::<_, T>(&mut conn).await,
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(value) => {
                    self.log_recovery();
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_transient(&err) {
                return Err(err);
            }

            self.drop_connection().await;
            self.log_transient(operation, &err);
            failures = failures.saturating_add(1);
            if !self.policy.may_retry(failures) {
                return Err(err);
            }

            let delay = self.policy.delay(failures);
            tracing::debug!(
                operation,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to stream broker"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn run<T: FromRedisValue>(
        &self,
        operation: &'static str,
        cmd: &redis::Cmd,
    ) -> Result<T, DomainError> {
        if !self.enabled {
            return Err(DomainError::feature_disabled());
        }
        self.execute(operation, cmd)
            .await
            .map_err(|e| map_redis_error(operation, e))
    }
}

fn is_transient(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}

/// Matches the server error code, or the message for errors built without one.
fn has_error_code(err: &RedisError, code: &str) -> bool {
    err.code() == Some(code) || err.to_string().contains(code)
}

fn map_redis_error(operation: &'static str, err: RedisError) -> DomainError {
    let code = if has_error_code(&err, NOGROUP) {
        ErrorCode::ConsumerGroupMissing
    } else {
        ErrorCode::BrokerUnavailable
    };
    DomainError::new(code, err.to_string()).with_detail("operation", operation)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_stream_read(reply: Option<StreamReadReply>) -> Vec<StreamEntry> {
    reply
        .into_iter()
        .flat_map(|reply| reply.keys)
        .flat_map(|key| key.ids)
        .map(|id| {
            let fields = id
                .map
                .iter()
                .filter_map(|(k, v)| {
                    redis::from_redis_value::<String>(v)
                        .ok()
                        .map(|v| (k.clone(), v))
                })
                .collect();
            StreamEntry::new(id.id, fields)
        })
        .collect()
}

type ClaimedEntry = Option<(String, Option<HashMap<String, String>>)>;

fn parse_autoclaim(reply: &[redis::Value]) -> Result<Vec<StreamEntry>, DomainError> {
    let Some(claimed) = reply.get(1) else {
        return Ok(Vec::new());
    };
    let claimed: Vec<ClaimedEntry> = redis::from_redis_value(claimed)
        .map_err(|e| map_redis_error("XAUTOCLAIM", e))?;

    // Entries deleted from the stream come back without fields
    Ok(claimed
        .into_iter()
        .flatten()
        .filter_map(|(id, fields)| fields.map(|fields| StreamEntry::new(id, fields)))
        .collect())
}

#[async_trait]
impl StreamBroker for RedisStreamBroker {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_len: Option<u64>,
    ) -> Result<String, DomainError> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream);
        if let Some(max_len) = max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*");
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        self.run("XADD", &cmd).await
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<(), DomainError> {
        if !self.enabled {
            return Err(DomainError::feature_disabled());
        }

        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM");

        match self.execute::<()>("XGROUP CREATE", &cmd).await {
            Ok(()) => {
                tracing::info!(stream, group, "Created consumer group");
                Ok(())
            }
            Err(e) if has_error_code(&e, BUSYGROUP) => {
                tracing::debug!(stream, group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(map_redis_error("XGROUP CREATE", e)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, DomainError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(millis(block));
        }
        cmd.arg("STREAMS").arg(stream).arg(">");

        let reply: Option<StreamReadReply> = self.run("XREADGROUP", &cmd).await?;
        Ok(parse_stream_read(reply))
    }

    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, DomainError> {
        let mut cmd = redis::cmd("XAUTOCLAIM");
        cmd.arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(millis(min_idle))
            .arg("0-0")
            .arg("COUNT")
            .arg(count);

        let reply: Vec<redis::Value> = self.run("XAUTOCLAIM", &cmd).await?;
        parse_autoclaim(&reply)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), DomainError> {
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group).arg(entry_id);
        let _: i64 = self.run("XACK", &cmd).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl).max(1));
        let reply: Option<String> = self.run("SET NX", &cmd).await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run("GET", &cmd).await
    }

    async fn increment(&self, key: &str) -> Result<u64, DomainError> {
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);
        self.run("INCR", &cmd).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), DomainError> {
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key).arg(millis(ttl).max(1));
        let _: i64 = self.run("PEXPIRE", &cmd).await?;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), DomainError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let _: i64 = self.run("DEL", &cmd).await?;
        Ok(())
    }

    async fn stream_len(&self, stream: &str) -> Result<u64, DomainError> {
        let mut cmd = redis::cmd("XLEN");
        cmd.arg(stream);
        self.run("XLEN", &cmd).await
    }

    async fn close(&self) -> Result<(), DomainError> {
        let mut guard = self.connection.lock().await;
        let Some(mut conn) = guard.take() else {
            return Ok(());
        };
        self.connected.store(false, Ordering::Release);

        let result: Result<(), RedisError> = redis::cmd("QUIT").query_async(&mut conn).await;
        match result {
            Ok(()) => tracing::info!("Closed stream broker connection"),
            // The server closes the socket right after replying
            Err(e) if is_transient(&e) => tracing::debug!("Stream broker closed during QUIT"),
            Err(e) => return Err(map_redis_error("QUIT", e)),
        }
        Ok(())
    }
}
