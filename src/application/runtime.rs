//! InternalEventsRuntime - Starts and stops the background workers.
//!
//! With the feature enabled the runtime spawns the dispatcher, the consumer
//! (when a handler registry is supplied) and the retention sweeper. All of
//! them watch one shutdown channel. With the feature disabled nothing is
//! spawned and the broker is never contacted.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapters::events::{
    HandlerRegistry, OutboxDispatcher, OutboxDispatcherConfig, OutboxRetentionSweeper,
    StreamConsumer, StreamConsumerConfig, DEFAULT_SWEEP_INTERVAL,
};
use crate::config::EventsConfig;
use crate::domain::foundation::DomainError;
use crate::ports::{OutboxStore, StreamBroker};

/// Which workers a process runs.
#[derive(Clone, Default)]
pub struct RuntimeOptions {
    /// Handlers to consume with, `None` runs no consumer.
    pub registry: Option<HandlerRegistry>,

    pub run_dispatcher: bool,

    pub run_sweeper: bool,

    /// Time between retention sweeps.
    pub sweep_interval: Option<Duration>,
}

impl RuntimeOptions {
    /// Dispatcher, sweeper and a consumer with the given handlers.
    pub fn all(registry: HandlerRegistry) -> Self {
        Self {
            registry: Some(registry),
            run_dispatcher: true,
            run_sweeper: true,
            sweep_interval: None,
        }
    }

    /// Dispatcher and sweeper only.
    pub fn relay() -> Self {
        Self {
            registry: None,
            run_dispatcher: true,
            run_sweeper: true,
            sweep_interval: None,
        }
    }

    /// Consumer only.
    pub fn consumer(registry: HandlerRegistry) -> Self {
        Self {
            registry: Some(registry),
            ..Self::default()
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }
}

/// Handle on the running background workers.
pub struct InternalEventsRuntime {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    broker: Option<Arc<dyn StreamBroker>>,
}

impl InternalEventsRuntime {
    /// Spawn the workers selected by `options`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        events: &EventsConfig,
        outbox: Arc<dyn OutboxStore>,
        broker: Arc<dyn StreamBroker>,
        options: RuntimeOptions,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if !events.enable {
            tracing::info!("Internal events disabled, no workers started");
            return Self {
                shutdown_tx,
                tasks: Vec::new(),
                broker: None,
            };
        }

        let mut tasks = Vec::new();

        if options.run_dispatcher {
            let dispatcher = OutboxDispatcher::with_config(
                outbox.clone(),
                broker.clone(),
                OutboxDispatcherConfig::from_events(events),
            );
            let rx = shutdown_rx.clone();
            tasks.push((
                "dispatcher",
                tokio::spawn(async move { dispatcher.run(rx).await }),
            ));
        }

        if let Some(registry) = options.registry {
            let consumer = StreamConsumer::new(
                broker.clone(),
                registry,
                StreamConsumerConfig::from_events(events),
            );
            let rx = shutdown_rx.clone();
            tasks.push((
                "consumer",
                tokio::spawn(async move { consumer.run(rx).await }),
            ));
        }

        if options.run_sweeper && events.outbox_retention_days > 0 {
            let sweeper = OutboxRetentionSweeper::new(outbox, events.outbox_retention_days)
                .with_interval(options.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL));
            let rx = shutdown_rx.clone();
            tasks.push((
                "retention-sweeper",
                tokio::spawn(async move { sweeper.run(rx).await }),
            ));
        }

        tracing::info!(workers = tasks.len(), "Internal events runtime started");
        Self {
            shutdown_tx,
            tasks,
            broker: Some(broker),
        }
    }

    /// Number of spawned workers.
    pub fn worker_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Signal shutdown, wait for every worker to finish its current unit of
    /// work, then close the broker connection.
    pub async fn shutdown(self) -> Result<(), DomainError> {
        // Receivers may already be gone if every worker exited early
        let _ = self.shutdown_tx.send(true);

        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        for (name, result) in names.into_iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                tracing::error!(worker = name, error = %e, "Worker terminated abnormally");
            }
        }

        if let Some(broker) = self.broker {
            broker.close().await?;
        }
        tracing::info!("Internal events runtime stopped");
        Ok(())
    }
}
