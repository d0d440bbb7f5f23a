//! The Carrot facade and the components behind it.
//!
//! [`Carrot`] is the primary interface: it owns the lifecycle, the
//! scheduler and the handler registry, and starts or stops the engine that
//! drives them.

use crate::broker::{InMemoryBroker, MessageSource, SharedBroker};
use crate::config::CarrotConfig;
use crate::error::{CarrotError, CarrotResult};
use crate::schedule::{DefinitionId, ScheduledTaskDefinition};
use crate::store::{InMemoryStore, RecordFilter, SharedStore, StoreStats};
use crate::task::{Invocation, Routing, TaskId, TaskOutcome, TaskRecord};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod consumer;
pub mod engine;
pub mod lifecycle;
pub mod registry;
pub mod scheduler;

pub use consumer::{Consumer, ConsumerStats};
pub use engine::CarrotEngine;
pub use lifecycle::TaskLifecycle;
pub use registry::{FnHandler, TaskFailure, TaskHandler, TaskRegistry};
pub use scheduler::{IntervalScheduler, ScheduleEntry};

/// The main Carrot handle.
///
/// # Examples
///
/// ```rust
/// use carrotq::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> CarrotResult<()> {
///     let carrot = Carrot::new(CarrotConfig::testing())?;
///     carrot
///         .register_fn("app.tasks.ping", |_invocation: Invocation| async move {
///             Ok("pong".to_string())
///         })
///         .await;
///
///     carrot.start().await?;
///     let record = carrot
///         .publish(Routing::queue("default"), Invocation::new("app.tasks.ping"), 0)
///         .await?;
///     assert_eq!(record.status, TaskStatus::Published);
///     carrot.stop().await?;
///     Ok(())
/// }
/// ```
pub struct Carrot {
    engine: RwLock<Option<CarrotEngine>>,
    lifecycle: Arc<TaskLifecycle>,
    scheduler: Arc<IntervalScheduler>,
    registry: Arc<TaskRegistry>,
    source: Option<Arc<dyn MessageSource>>,
    config: CarrotConfig,
}

impl Carrot {
    /// Create a Carrot backed by the in-memory store and broker.
    pub fn new(config: CarrotConfig) -> CarrotResult<Self> {
        let broker = Arc::new(InMemoryBroker::new());
        Self::with_backends(
            config,
            Arc::new(InMemoryStore::new()),
            broker.clone(),
            Some(broker),
        )
    }

    /// Create a Carrot over explicit backends.
    ///
    /// Pass `None` as `source` for a process that only publishes; its
    /// outcomes are then reported by whoever consumes the broker.
    pub fn with_backends(
        config: CarrotConfig,
        store: SharedStore,
        broker: SharedBroker,
        source: Option<Arc<dyn MessageSource>>,
    ) -> CarrotResult<Self> {
        config
            .validate()
            .map_err(|errors| CarrotError::config(errors.join("; ")))?;

        let lifecycle = Arc::new(TaskLifecycle::new(store, broker, config.lifecycle.clone()));
        let scheduler = Arc::new(IntervalScheduler::new(
            Arc::clone(&lifecycle),
            config.scheduler.default_priority,
        ));

        Ok(Self {
            engine: RwLock::new(None),
            lifecycle,
            scheduler,
            registry: Arc::new(TaskRegistry::new()),
            source,
            config,
        })
    }

    /// Start the engine (scheduler, sweep and consumer loops).
    ///
    /// Returns immediately; use [`wait_for_shutdown`](Self::wait_for_shutdown)
    /// to block.
    pub async fn start(&self) -> CarrotResult<()> {
        let mut engine_guard = self.engine.write().await;
        if engine_guard.is_some() {
            return Err(CarrotError::AlreadyRunning);
        }

        let mut engine = CarrotEngine::new(
            self.config.clone(),
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.registry),
            self.source.clone(),
        );
        engine.start().await?;
        *engine_guard = Some(engine);

        tracing::info!(
            "🥕 Carrot started with {} consumers",
            if self.source.is_some() {
                self.config.consumers.num_consumers
            } else {
                0
            }
        );
        Ok(())
    }

    /// Stop the engine and wait for its loops to finish.
    pub async fn stop(&self) -> CarrotResult<()> {
        let mut engine = self
            .engine
            .write()
            .await
            .take()
            .ok_or(CarrotError::NotRunning)?;
        engine.shutdown().await?;

        tracing::info!("🥕 Carrot stopped");
        Ok(())
    }

    /// Check if the engine is running.
    pub async fn is_running(&self) -> bool {
        self.engine.read().await.is_some()
    }

    /// Block until Ctrl+C, then stop.
    pub async fn wait_for_shutdown(&self) -> CarrotResult<()> {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Could not listen for Ctrl+C: {}", e);
        } else {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        self.stop().await
    }

    /// Register a handler for a task reference.
    pub async fn register_task(&self, task: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.registry.register(task, handler).await;
    }

    /// Register an async closure for a task reference.
    pub async fn register_fn<F, Fut>(&self, task: impl Into<String>, handler: F)
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, TaskFailure>> + Send + 'static,
    {
        self.registry.register_fn(task, handler).await;
    }

    /// Publish a task. See [`TaskLifecycle::publish`].
    pub async fn publish(
        &self,
        routing: Routing,
        invocation: Invocation,
        priority: u32,
    ) -> CarrotResult<TaskRecord> {
        self.lifecycle.publish(routing, invocation, priority).await
    }

    /// Record a successful run.
    pub async fn mark_completed(&self, id: &TaskId, output: impl Into<String>) -> CarrotResult<()> {
        self.lifecycle.mark_completed(id, output).await
    }

    /// Record a failed run.
    pub async fn mark_failed(
        &self,
        id: &TaskId,
        exception: impl Into<String>,
        traceback: impl Into<String>,
        log: impl Into<String>,
    ) -> CarrotResult<()> {
        self.lifecycle.mark_failed(id, exception, traceback, log).await
    }

    /// Apply an outcome reported by an external consumer.
    pub async fn on_result(&self, id: &TaskId, outcome: TaskOutcome) -> CarrotResult<()> {
        self.lifecycle.on_result(id, outcome).await
    }

    /// Replace a failed record with a fresh one.
    pub async fn requeue(&self, id: &TaskId) -> CarrotResult<TaskRecord> {
        self.lifecycle.requeue(id).await
    }

    /// Delete a record in any status.
    pub async fn delete(&self, id: &TaskId) -> CarrotResult<()> {
        self.lifecycle.delete(id).await
    }

    /// Run one retention sweep with the configured window.
    pub async fn sweep_expired(&self) -> CarrotResult<u64> {
        self.lifecycle
            .sweep_expired(self.config.retention.window())
            .await
    }

    /// Get a record by ID.
    pub async fn get(&self, id: &TaskId) -> CarrotResult<TaskRecord> {
        self.lifecycle.get(id).await
    }

    /// List records, highest priority first.
    pub async fn list(&self, filter: &RecordFilter) -> CarrotResult<Vec<TaskRecord>> {
        self.lifecycle.list(filter).await
    }

    /// Record counts per status.
    pub async fn stats(&self) -> CarrotResult<StoreStats> {
        self.lifecycle.stats().await
    }

    /// Consumer statistics (if running).
    pub async fn consumer_stats(&self) -> Option<ConsumerStats> {
        match self.engine.read().await.as_ref() {
            Some(engine) => Some(engine.consumer_stats().await),
            None => None,
        }
    }

    /// Add a scheduled task definition.
    pub async fn schedule(&self, definition: ScheduledTaskDefinition) -> CarrotResult<DefinitionId> {
        self.scheduler.create(definition).await
    }

    /// Remove a scheduled task definition.
    pub async fn unschedule(&self, id: &DefinitionId) -> CarrotResult<()> {
        self.scheduler.delete(id).await
    }

    /// Fire a scheduled task definition now.
    pub async fn publish_now(&self, id: &DefinitionId, priority: u32) -> CarrotResult<TaskRecord> {
        self.scheduler.publish_now(id, priority).await
    }

    /// Run one scheduler tick, for callers that drive time themselves.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<TaskRecord> {
        self.scheduler.tick(now).await
    }

    /// The record lifecycle.
    pub fn lifecycle(&self) -> &Arc<TaskLifecycle> {
        &self.lifecycle
    }

    /// The interval scheduler, for definition management.
    pub fn scheduler(&self) -> &Arc<IntervalScheduler> {
        &self.scheduler
    }

    /// The handler registry.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Get the configuration used by this Carrot.
    pub fn config(&self) -> &CarrotConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerError;
    use crate::schedule::IntervalUnit;
    use crate::task::TaskStatus;
    use std::time::Duration;
    use tokio::time::sleep;
    use tokio_test::assert_ok;

    async fn wait_for(carrot: &Carrot, id: &TaskId, status: TaskStatus) -> TaskRecord {
        for _ in 0..200 {
            if let Ok(record) = carrot.get(id).await {
                if record.status == status {
                    return record;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("record {id} never reached {status}");
    }

    #[tokio::test]
    async fn test_carrot_lifecycle() {
        let carrot = Carrot::new(CarrotConfig::testing()).unwrap();
        assert!(!carrot.is_running().await);
        assert!(carrot.consumer_stats().await.is_none());

        assert_ok!(carrot.start().await);
        assert!(carrot.is_running().await);
        assert!(matches!(carrot.start().await, Err(CarrotError::AlreadyRunning)));

        assert_ok!(carrot.stop().await);
        assert!(!carrot.is_running().await);
        assert!(matches!(carrot.stop().await, Err(CarrotError::NotRunning)));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = CarrotConfig::testing();
        config.consumers.queues.clear();
        assert!(matches!(
            Carrot::new(config),
            Err(CarrotError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_fail_then_requeue_then_complete() {
        let carrot = Carrot::new(CarrotConfig::testing()).unwrap();
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = attempts.clone();
        carrot
            .register_fn("app.flaky", move |_inv: Invocation| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                        Err(TaskFailure::new("ConnectionError"))
                    } else {
                        Ok("recovered".to_string())
                    }
                }
            })
            .await;
        carrot.start().await.unwrap();

        let record = carrot
            .publish(
                Routing::queue("default").with_exchange("default"),
                Invocation::new("app.flaky"),
                3,
            )
            .await
            .unwrap();
        let failed = wait_for(&carrot, &record.id, TaskStatus::Failed).await;
        assert_eq!(failed.exception.as_deref(), Some("ConnectionError"));

        let replacement = carrot.requeue(&record.id).await.unwrap();
        assert_ne!(replacement.id, record.id);
        assert_eq!(replacement.priority, 3);
        assert_eq!(replacement.routing.exchange.as_deref(), Some(""));
        assert!(carrot.get(&record.id).await.is_err());

        let done = wait_for(&carrot, &replacement.id, TaskStatus::Completed).await;
        assert_eq!(done.output.as_deref(), Some("recovered"));
        carrot.stop().await.unwrap();

        let stats = carrot.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_external_consumer_reports() {
        let broker = Arc::new(InMemoryBroker::new());
        let carrot = Carrot::with_backends(
            CarrotConfig::testing(),
            Arc::new(InMemoryStore::new()),
            broker.clone(),
            None,
        )
        .unwrap();

        let record = carrot
            .publish(Routing::queue("default"), Invocation::new("app.remote"), 0)
            .await
            .unwrap();
        let delivered = broker
            .consume(&["default".to_string()], Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.record_id, record.id);

        carrot
            .on_result(
                &record.id,
                TaskOutcome::Completed {
                    output: "ok".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(carrot.get(&record.id).await.unwrap().status, TaskStatus::Completed);

        // Terminal records take no further outcomes
        assert!(matches!(
            carrot.mark_failed(&record.id, "late", "", "").await,
            Err(CarrotError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_publish_failure_surfaces() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_available(false);
        let carrot = Carrot::with_backends(
            CarrotConfig::testing(),
            Arc::new(InMemoryStore::new()),
            broker,
            None,
        )
        .unwrap();

        let err = carrot
            .publish(Routing::queue("default"), Invocation::new("app.x"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CarrotError::Broker(BrokerError::Unavailable(_))));
        assert!(carrot.list(&RecordFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_and_publish_now() {
        let carrot = Carrot::new(CarrotConfig::testing()).unwrap();
        let id = carrot
            .schedule(
                ScheduledTaskDefinition::every(1, IntervalUnit::Days, "app.digest")
                    .with_routing(Routing::queue("default")),
            )
            .await
            .unwrap();

        // Not due yet
        assert!(carrot.tick(Utc::now()).await.is_empty());
        assert_eq!(
            carrot
                .tick(Utc::now() + chrono::Duration::days(1))
                .await
                .len(),
            1
        );

        let record = carrot.publish_now(&id, 5).await.unwrap();
        assert_eq!(record.priority, 5);

        carrot.unschedule(&id).await.unwrap();
        assert!(carrot.scheduler().list().await.is_empty());
    }
}
