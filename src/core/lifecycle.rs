//! Task record state machine.
//!
//! ```text
//! UNPUBLISHED --ack--> PUBLISHED --consumer--> COMPLETED
//!                                 \-consumer--> FAILED --requeue--> (deleted, new record)
//! ```
//!
//! Every status change goes through a compare-and-set on the record store, so
//! a record cannot be both completed and failed, whichever consumer reports
//! first wins.

use crate::broker::{BrokerClient, Dispatch};
use crate::config::LifecycleConfig;
use crate::error::{BrokerError, CarrotError, CarrotResult};
use crate::store::{RecordFilter, StoreStats, TaskRecordStore};
use crate::task::{Invocation, Routing, TaskId, TaskOutcome, TaskRecord, TaskStatus};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::timeout;

/// Owns every status and timestamp change of task records.
pub struct TaskLifecycle {
    store: Arc<dyn TaskRecordStore>,
    broker: Arc<dyn BrokerClient>,
    config: LifecycleConfig,
    requeues_in_flight: Mutex<HashSet<TaskId>>,
}

impl TaskLifecycle {
    /// Create a lifecycle over a store and a broker.
    pub fn new(
        store: Arc<dyn TaskRecordStore>,
        broker: Arc<dyn BrokerClient>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            broker,
            config,
            requeues_in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Create a record and hand it to the broker.
    ///
    /// The record is stored as `UNPUBLISHED` before the broker call and only
    /// becomes `PUBLISHED` once the broker acknowledges within the publish
    /// timeout. On a broker error the `UNPUBLISHED` row is deleted (unless the
    /// configuration retains it) and the error is returned.
    pub async fn publish(
        &self,
        routing: Routing,
        invocation: Invocation,
        priority: u32,
    ) -> CarrotResult<TaskRecord> {
        let mut record = TaskRecord::new(routing, invocation, priority);
        self.store.insert(record.clone()).await?;

        let dispatch = Dispatch::for_record(&record);
        let ack = match timeout(self.config.publish_timeout(), self.broker.publish(&dispatch)).await
        {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout {
                timeout_ms: self.config.publish_timeout_ms,
            }),
        };

        if let Err(error) = ack {
            tracing::warn!(
                "Publishing {} (record {}) failed: {}",
                record.invocation.task,
                record.id,
                error
            );
            self.discard_unpublished(&record.id).await;
            return Err(error.into());
        }

        record.status = TaskStatus::Published;
        record.publish_time = Some(Utc::now());
        self.store.update(&record, TaskStatus::Unpublished).await?;

        tracing::debug!(
            "Published {} as record {} (priority {})",
            record.invocation.task,
            record.id,
            record.priority
        );
        Ok(record)
    }

    /// Record a successful run of a `PUBLISHED` task.
    pub async fn mark_completed(&self, id: &TaskId, output: impl Into<String>) -> CarrotResult<()> {
        let mut record = self.published_record(id, "complete").await?;

        record.status = TaskStatus::Completed;
        record.completion_time = Some(Utc::now());
        record.output = Some(output.into());
        self.store.update(&record, TaskStatus::Published).await?;

        tracing::debug!("Record {} completed", id);
        Ok(())
    }

    /// Record a failed run of a `PUBLISHED` task.
    pub async fn mark_failed(
        &self,
        id: &TaskId,
        exception: impl Into<String>,
        traceback: impl Into<String>,
        log: impl Into<String>,
    ) -> CarrotResult<()> {
        let mut record = self.published_record(id, "fail").await?;

        record.status = TaskStatus::Failed;
        record.failure_time = Some(Utc::now());
        record.exception = Some(exception.into());
        record.traceback = Some(traceback.into());
        record.log = Some(log.into());
        self.store.update(&record, TaskStatus::Published).await?;

        tracing::debug!(
            "Record {} failed: {}",
            id,
            record.exception.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    /// Apply an outcome reported by a consumer.
    pub async fn on_result(&self, id: &TaskId, outcome: TaskOutcome) -> CarrotResult<()> {
        match outcome {
            TaskOutcome::Completed { output } => self.mark_completed(id, output).await,
            TaskOutcome::Failed {
                exception,
                traceback,
                log,
            } => self.mark_failed(id, exception, traceback, log).await,
        }
    }

    /// Replace a `FAILED` record with a freshly published equivalent.
    ///
    /// The replacement is published first and the failed record deleted only
    /// afterwards: if publishing fails, the failed record is left untouched.
    /// If the trailing delete fails, both records remain and a warning is
    /// logged; the delete can be retried with [`delete`](Self::delete).
    pub async fn requeue(&self, id: &TaskId) -> CarrotResult<TaskRecord> {
        let Some(_claim) = RequeueClaim::acquire(&self.requeues_in_flight, *id) else {
            let current = self.store.get(id).await?;
            tracing::warn!("Record {} is already being requeued", id);
            return Err(CarrotError::invalid_transition(*id, current.status, "requeue"));
        };

        let failed = self.store.get(id).await?;
        if failed.status != TaskStatus::Failed {
            return Err(CarrotError::invalid_transition(*id, failed.status, "requeue"));
        }

        let replacement = self
            .publish(
                failed.routing.clone().normalized(),
                failed.invocation.clone(),
                failed.priority,
            )
            .await?;

        match self.store.delete(id).await {
            Ok(_) => tracing::info!("Requeued record {} as {}", id, replacement.id),
            Err(e) => tracing::warn!(
                "Requeued record {} as {} but the original could not be deleted: {}",
                id,
                replacement.id,
                e
            ),
        }

        Ok(replacement)
    }

    /// Operator delete of a record in any status.
    pub async fn delete(&self, id: &TaskId) -> CarrotResult<()> {
        if self.store.delete(id).await? {
            tracing::debug!("Deleted record {}", id);
            Ok(())
        } else {
            Err(CarrotError::record_not_found(id))
        }
    }

    /// Delete `COMPLETED` records that finished more than `retention` ago.
    ///
    /// `None` disables the sweep. Records in any other status are never touched.
    pub async fn sweep_expired(&self, retention: Option<Duration>) -> CarrotResult<u64> {
        let Some(window) = retention else {
            return Ok(0);
        };
        let window = chrono::Duration::from_std(window)
            .map_err(|_| CarrotError::config("retention window out of range"))?;
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .ok_or_else(|| CarrotError::config("retention window out of range"))?;

        let completed = self
            .store
            .list(&RecordFilter::status(TaskStatus::Completed))
            .await?;

        let mut deleted = 0;
        for record in completed
            .iter()
            .filter(|record| record.completion_time.is_some_and(|at| at < cutoff))
        {
            if self.store.delete(&record.id).await? {
                deleted += 1;
            }
        }

        if deleted > 0 {
            tracing::info!("Swept {} completed records older than {}", deleted, cutoff);
        }
        Ok(deleted)
    }

    /// Get a record by ID.
    pub async fn get(&self, id: &TaskId) -> CarrotResult<TaskRecord> {
        self.store.get(id).await
    }

    /// List records, highest priority first.
    pub async fn list(&self, filter: &RecordFilter) -> CarrotResult<Vec<TaskRecord>> {
        self.store.list(filter).await
    }

    /// Record counts per status.
    pub async fn stats(&self) -> CarrotResult<StoreStats> {
        self.store.stats().await
    }

    async fn published_record(
        &self,
        id: &TaskId,
        operation: &'static str,
    ) -> CarrotResult<TaskRecord> {
        let record = self.store.get(id).await?;
        if record.status != TaskStatus::Published {
            return Err(CarrotError::invalid_transition(*id, record.status, operation));
        }
        Ok(record)
    }

    async fn discard_unpublished(&self, id: &TaskId) {
        if self.config.retain_unpublished_on_failure {
            return;
        }
        if let Err(e) = self.store.delete(id).await {
            tracing::warn!("Could not discard unpublished record {}: {}", id, e);
        }
    }
}

/// Marks a record as being requeued until dropped.
struct RequeueClaim<'a> {
    in_flight: &'a Mutex<HashSet<TaskId>>,
    id: TaskId,
}

impl<'a> RequeueClaim<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<TaskId>>, id: TaskId) -> Option<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        inserted.then_some(Self { in_flight, id })
    }
}

impl Drop for RequeueClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
