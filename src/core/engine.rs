//! The Carrot engine: drives the periodic parts of the system.
//!
//! The engine is responsible for coordinating:
//! - The scheduler tick loop
//! - The retention sweep loop
//! - The consumer pool

use crate::broker::MessageSource;
use crate::config::CarrotConfig;
use crate::core::consumer::{Consumer, ConsumerStats};
use crate::core::lifecycle::TaskLifecycle;
use crate::core::registry::TaskRegistry;
use crate::core::scheduler::IntervalScheduler;
use crate::error::{CarrotError, CarrotResult};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};

/// Orchestrates the scheduler, sweep and consumer loops.
pub struct CarrotEngine {
    config: CarrotConfig,
    lifecycle: Arc<TaskLifecycle>,
    scheduler: Arc<IntervalScheduler>,
    registry: Arc<TaskRegistry>,
    source: Option<Arc<dyn MessageSource>>,
    stats: Arc<Mutex<ConsumerStats>>,
    /// Control flags
    is_running: Arc<AtomicBool>,
    is_shutting_down: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    /// Component handles
    handles: Vec<JoinHandle<()>>,
    start_time: Option<Instant>,
}

impl CarrotEngine {
    /// Create an engine; nothing runs until [`start`](Self::start).
    ///
    /// Without a message source no consumers are spawned and the engine only
    /// publishes.
    pub fn new(
        config: CarrotConfig,
        lifecycle: Arc<TaskLifecycle>,
        scheduler: Arc<IntervalScheduler>,
        registry: Arc<TaskRegistry>,
        source: Option<Arc<dyn MessageSource>>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);

        Self {
            config,
            lifecycle,
            scheduler,
            registry,
            source,
            stats: Arc::new(Mutex::new(ConsumerStats::default())),
            is_running: Arc::new(AtomicBool::new(false)),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            stop_tx,
            handles: Vec::new(),
            start_time: None,
        }
    }

    /// Start every enabled loop.
    pub async fn start(&mut self) -> CarrotResult<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Err(CarrotError::AlreadyRunning);
        }

        tracing::info!("Starting Carrot engine");
        self.is_shutting_down.store(false, Ordering::Relaxed);
        self.stop_tx.send_replace(false);

        if self.config.scheduler.enabled {
            let handle = self.start_scheduler();
            self.handles.push(handle);
        }

        if let Some(window) = self.config.retention.window() {
            let handle = self.start_sweeper(window);
            self.handles.push(handle);
        }

        match &self.source {
            Some(source) => {
                for consumer_id in 0..self.config.consumers.num_consumers {
                    let handle = self.spawn_consumer(consumer_id, Arc::clone(source));
                    self.handles.push(handle);
                }
            }
            None if self.config.consumers.num_consumers > 0 => {
                tracing::warn!("No message source configured, consumers not started");
            }
            None => {}
        }

        self.is_running.store(true, Ordering::Relaxed);
        self.start_time = Some(Instant::now());

        tracing::info!("Carrot engine started ({} loops)", self.handles.len());
        Ok(())
    }

    /// Stop every loop, waiting up to the configured shutdown timeout.
    ///
    /// Loops finish the unit of work they are in (a tick, a sweep, a delivery)
    /// before exiting. Loops still running at the deadline are aborted.
    pub async fn shutdown(&mut self) -> CarrotResult<()> {
        if !self.is_running.load(Ordering::Relaxed) {
            return Err(CarrotError::NotRunning);
        }

        tracing::info!("Shutting down Carrot engine...");
        self.is_shutting_down.store(true, Ordering::Relaxed);
        self.stop_tx.send_replace(true);

        let handles = std::mem::take(&mut self.handles);
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let limit = Duration::from_secs(self.config.engine.shutdown_timeout_secs);

        match timeout(limit, join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::error!("Engine loop ended abnormally: {}", e);
                    }
                }
            }
            Err(_) => {
                tracing::warn!("Shutdown timed out after {:?}, aborting remaining loops", limit);
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        self.is_running.store(false, Ordering::Relaxed);
        self.is_shutting_down.store(false, Ordering::Relaxed);

        tracing::info!("Carrot engine shutdown complete");
        Ok(())
    }

    fn start_scheduler(&self) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let mut stop_rx = self.stop_tx.subscribe();
        let period = Duration::from_millis(self.config.scheduler.tick_interval_ms.max(1));

        tokio::spawn(async move {
            tracing::info!("Scheduler loop started (every {:?})", period);

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }

                let fired = scheduler.tick(Utc::now()).await;
                if !fired.is_empty() {
                    tracing::debug!("Scheduler fired {} tasks", fired.len());
                }
            }

            tracing::info!("Scheduler loop stopped");
        })
    }

    fn start_sweeper(&self, window: Duration) -> JoinHandle<()> {
        let lifecycle = Arc::clone(&self.lifecycle);
        let mut stop_rx = self.stop_tx.subscribe();
        let period = Duration::from_secs(self.config.retention.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            tracing::info!("Retention sweep started (window {:?})", window);

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }

                if let Err(e) = lifecycle.sweep_expired(Some(window)).await {
                    tracing::error!("Retention sweep failed: {}", e);
                }
            }

            tracing::info!("Retention sweep stopped");
        })
    }

    fn spawn_consumer(&self, consumer_id: usize, source: Arc<dyn MessageSource>) -> JoinHandle<()> {
        let consumer = Consumer::new(
            consumer_id,
            source,
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.registry),
            self.config.consumers.clone(),
            Arc::clone(&self.stats),
        );
        let shutdown = Arc::clone(&self.is_shutting_down);

        tokio::spawn(async move { consumer.run(shutdown).await })
    }

    /// Aggregated consumer statistics
    pub async fn consumer_stats(&self) -> ConsumerStats {
        self.stats.lock().await.clone()
    }

    /// Get engine uptime
    pub fn uptime(&self) -> Option<Duration> {
        self.start_time.map(|start| start.elapsed())
    }

    /// Check if engine is running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Check if engine is shutting down
    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::config::RetentionConfig;
    use crate::schedule::{IntervalUnit, ScheduledTaskDefinition};
    use crate::store::{InMemoryStore, RecordFilter};
    use crate::task::{Invocation, Routing, TaskStatus};
    use tokio::time::sleep;
    use tokio_test::{assert_err, assert_ok};

    fn engine(config: CarrotConfig) -> (CarrotEngine, Arc<TaskLifecycle>, Arc<IntervalScheduler>) {
        let broker = Arc::new(InMemoryBroker::new());
        let lifecycle = Arc::new(TaskLifecycle::new(
            Arc::new(InMemoryStore::new()),
            broker.clone(),
            config.lifecycle.clone(),
        ));
        let scheduler = Arc::new(IntervalScheduler::new(
            lifecycle.clone(),
            config.scheduler.default_priority,
        ));
        let registry = Arc::new(TaskRegistry::new());
        let engine = CarrotEngine::new(
            config,
            lifecycle.clone(),
            scheduler.clone(),
            registry,
            Some(broker),
        );
        (engine, lifecycle, scheduler)
    }

    #[tokio::test]
    async fn test_engine_lifecycle() {
        let (mut engine, _, _) = engine(CarrotConfig::testing());
        assert!(!engine.is_running());
        assert!(engine.uptime().is_none());

        assert_ok!(engine.start().await);
        assert!(engine.is_running());
        assert!(matches!(engine.start().await, Err(CarrotError::AlreadyRunning)));

        assert_ok!(engine.shutdown().await);
        assert!(!engine.is_running());
        assert!(matches!(engine.shutdown().await, Err(CarrotError::NotRunning)));

        // Restartable
        assert_ok!(engine.start().await);
        assert_ok!(engine.shutdown().await);
    }

    #[tokio::test]
    async fn test_scheduled_task_runs_end_to_end() {
        let (mut engine, lifecycle, scheduler) = engine(CarrotConfig::testing());
        engine
            .registry
            .register_fn("app.ping", |_inv: Invocation| async move { Ok("pong".to_string()) })
            .await;

        let definition = ScheduledTaskDefinition::every(1, IntervalUnit::Hours, "app.ping")
            .with_routing(Routing::queue("default"));
        assert_ok!(
            scheduler
                .create_at(definition, Utc::now() - chrono::Duration::hours(2))
                .await
        );

        engine.start().await.unwrap();

        let mut completed = Vec::new();
        for _ in 0..200 {
            completed = lifecycle
                .list(&RecordFilter::status(TaskStatus::Completed))
                .await
                .unwrap();
            if !completed.is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        engine.shutdown().await.unwrap();

        // Fired once: the next firing is an hour away
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].output.as_deref(), Some("pong"));
        assert_eq!(engine.consumer_stats().await.tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_publish_only_without_source() {
        let config = CarrotConfig::testing();
        let broker = Arc::new(InMemoryBroker::new());
        let lifecycle = Arc::new(TaskLifecycle::new(
            Arc::new(InMemoryStore::new()),
            broker.clone(),
            config.lifecycle.clone(),
        ));
        let scheduler = Arc::new(IntervalScheduler::new(lifecycle.clone(), 0));
        let mut engine = CarrotEngine::new(
            config,
            lifecycle.clone(),
            scheduler,
            Arc::new(TaskRegistry::new()),
            None,
        );

        engine.start().await.unwrap();
        let record = lifecycle
            .publish(Routing::queue("default"), Invocation::new("app.ping"), 0)
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        engine.shutdown().await.unwrap();

        // Nobody consumed it
        assert_eq!(broker.depth("default").await, 1);
        assert_eq!(lifecycle.get(&record.id).await.unwrap().status, TaskStatus::Published);
    }

    #[tokio::test]
    async fn test_sweeper_runs_on_start() {
        let mut config = CarrotConfig::testing();
        config.retention = RetentionConfig {
            enabled: true,
            window_secs: 0,
            sweep_interval_secs: 3600,
        };
        config.consumers.num_consumers = 0;
        let (mut engine, lifecycle, _) = engine(config);

        let record = lifecycle
            .publish(Routing::queue("default"), Invocation::new("app.ping"), 0)
            .await
            .unwrap();
        lifecycle.mark_completed(&record.id, "done").await.unwrap();
        sleep(Duration::from_millis(5)).await;

        engine.start().await.unwrap();
        for _ in 0..100 {
            if lifecycle.get(&record.id).await.is_err() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_err!(lifecycle.get(&record.id).await);

        // The hour-long sweep period does not hold up shutdown
        timeout(Duration::from_secs(1), engine.shutdown())
            .await
            .unwrap()
            .unwrap();
    }
}
