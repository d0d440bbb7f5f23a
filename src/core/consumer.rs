//! Consumers: the result-callback path of the lifecycle.
//!
//! A consumer takes deliveries from a [`MessageSource`], runs the registered
//! handler and reports the outcome through [`TaskLifecycle::on_result`]. It
//! runs on its own tokio task, concurrently with publishers.

use crate::broker::{Dispatch, MessageSource};
use crate::config::ConsumerConfig;
use crate::core::lifecycle::TaskLifecycle;
use crate::core::registry::{TaskFailure, TaskRegistry};
use crate::error::CarrotError;
use crate::task::{TaskId, TaskOutcome, TaskStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

/// Statistics about consumer performance
#[derive(Debug, Clone, Default)]
pub struct ConsumerStats {
    /// Deliveries whose handler succeeded
    pub tasks_completed: u64,
    /// Deliveries whose handler failed, panicked or timed out
    pub tasks_failed: u64,
    /// Outcomes that could not be written back to the record
    pub reports_dropped: u64,
    /// Average handler run time
    pub avg_task_duration: Option<Duration>,
}

/// Single consumer loop
pub struct Consumer {
    id: usize,
    source: Arc<dyn MessageSource>,
    lifecycle: Arc<TaskLifecycle>,
    registry: Arc<TaskRegistry>,
    config: ConsumerConfig,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl Consumer {
    /// Create a consumer with the given ID
    pub fn new(
        id: usize,
        source: Arc<dyn MessageSource>,
        lifecycle: Arc<TaskLifecycle>,
        registry: Arc<TaskRegistry>,
        config: ConsumerConfig,
        stats: Arc<Mutex<ConsumerStats>>,
    ) -> Self {
        Self {
            id,
            source,
            lifecycle,
            registry,
            config,
            stats,
        }
    }

    /// Consume until `shutdown` is set.
    ///
    /// A delivery already taken is always run and reported before the flag is
    /// checked again.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        tracing::info!("🥕 Consumer {} started on {:?}", self.id, self.config.queues);
        let idle = Duration::from_millis(self.config.idle_timeout_ms);

        while !shutdown.load(Ordering::Relaxed) {
            match self.source.consume(&self.config.queues, idle).await {
                Ok(Some(dispatch)) => self.process(dispatch).await,
                Ok(None) => {
                    tracing::trace!("Consumer {} idle", self.id);
                }
                Err(e) => {
                    tracing::error!("Consumer {} could not consume: {}", self.id, e);
                    sleep(idle).await;
                }
            }
        }

        tracing::info!("🥕 Consumer {} stopped", self.id);
    }

    /// Run one delivery and report its outcome.
    pub async fn process(&self, dispatch: Dispatch) {
        let record_id = dispatch.record_id;
        tracing::debug!(
            "Consumer {} running {} (record {})",
            self.id,
            dispatch.invocation.task,
            record_id
        );

        let started = Instant::now();
        let outcome = self.execute(dispatch).await;
        self.update_stats(&outcome, started.elapsed()).await;

        self.report(record_id, outcome).await;
    }

    async fn execute(&self, dispatch: Dispatch) -> TaskOutcome {
        let task = dispatch.invocation.task.clone();
        let Some(handler) = self.registry.get(&task).await else {
            tracing::warn!("No handler registered for task {}", task);
            return TaskFailure::new(format!("TaskNotRegistered: no handler for '{task}'")).into();
        };

        let limit = Duration::from_secs(self.config.task_timeout_secs);
        let invocation = dispatch.invocation;
        let mut handle = tokio::spawn(async move { handler.run(&invocation).await });

        match timeout(limit, &mut handle).await {
            Ok(Ok(Ok(output))) => TaskOutcome::Completed { output },
            Ok(Ok(Err(failure))) => {
                tracing::debug!("Task {} failed: {}", task, failure.exception);
                failure.into()
            }
            Ok(Err(join_error)) => {
                tracing::error!("Task {} panicked: {}", task, join_error);
                TaskFailure::new(format!("Task panicked: {join_error}")).into()
            }
            Err(_) => {
                handle.abort();
                tracing::error!("Task {} timed out after {:?}", task, limit);
                TaskFailure::new(format!("TimeoutError: task exceeded {limit:?}")).into()
            }
        }
    }

    /// Write the outcome back. The broker may deliver before the publisher
    /// has stored `PUBLISHED`, so an `UNPUBLISHED` record is retried briefly.
    async fn report(&self, record_id: TaskId, outcome: TaskOutcome) {
        let attempts = self.config.report_attempts.max(1);
        let delay = Duration::from_millis(self.config.report_retry_delay_ms);

        for attempt in 1..=attempts {
            match self.lifecycle.on_result(&record_id, outcome.clone()).await {
                Ok(()) => return,
                Err(CarrotError::InvalidTransition {
                    status: TaskStatus::Unpublished,
                    ..
                }) if attempt < attempts => sleep(delay).await,
                Err(e) => {
                    tracing::warn!("Dropping outcome for record {}: {}", record_id, e);
                    break;
                }
            }
        }

        self.stats.lock().await.reports_dropped += 1;
    }

    async fn update_stats(&self, outcome: &TaskOutcome, duration: Duration) {
        let mut stats = self.stats.lock().await;

        match outcome {
            TaskOutcome::Completed { .. } => stats.tasks_completed += 1,
            TaskOutcome::Failed { .. } => stats.tasks_failed += 1,
        }

        // Simple moving average
        stats.avg_task_duration = Some(match stats.avg_task_duration {
            Some(avg) => (avg + duration) / 2,
            None => duration,
        });
    }
}
