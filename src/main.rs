//! internal-events-relay - Publishes outbox rows to the stream.
//!
//! Runs the dispatcher and the retention sweeper until Ctrl-C. Consumers are
//! embedded in each service through the library.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use internal_events::adapters::{PostgresOutboxStore, RedisStreamBroker};
use internal_events::application::{InternalEventsRuntime, RuntimeOptions};
use internal_events::config::AppConfig;
use internal_events::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    telemetry::init(&config.logging);
    config.validate()?;

    tracing::info!(
        enabled = config.events_enabled(),
        stream = %config.events.stream_name,
        "Starting internal events relay"
    );

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect_lazy(&config.database.url)?;
    let outbox = PostgresOutboxStore::new(pool);
    if config.database.run_migrations {
        outbox.migrate().await?;
        tracing::info!("Outbox migrations applied");
    }

    let broker = RedisStreamBroker::new(&config.redis, config.events_enabled())?;
    let runtime = InternalEventsRuntime::start(
        &config.events,
        Arc::new(outbox),
        Arc::new(broker),
        RuntimeOptions::relay(),
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Unable to listen for shutdown signal"),
    }

    runtime.shutdown().await?;
    tracing::info!("Internal events relay exited");
    Ok(())
}
