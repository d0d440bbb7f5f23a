//! Interval scheduler: fires scheduled task definitions when they are due.
//!
//! Due-time bookkeeping (`created_at`, `last_fired`) lives in the scheduler,
//! next to each definition. Ticks are serialized by an internal lock; a tick
//! that overlaps another waits for it to finish.

use crate::core::lifecycle::TaskLifecycle;
use crate::error::{CarrotError, CarrotResult};
use crate::schedule::{DefinitionId, ScheduledTaskDefinition, compute_interval_seconds};
use crate::task::TaskRecord;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// A definition together with the scheduler's bookkeeping for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Definition identifier
    pub id: DefinitionId,
    /// The dispatch rule
    pub definition: ScheduledTaskDefinition,
    /// When the definition was created
    pub created_at: DateTime<Utc>,
    /// When the scheduler last fired it
    pub last_fired: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    /// Earliest instant at which the definition fires again.
    pub fn next_due(&self) -> CarrotResult<DateTime<Utc>> {
        let interval = compute_interval_seconds(&self.definition)?;
        let interval = i64::try_from(interval)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| CarrotError::config("interval too large"))?;
        self.last_fired
            .unwrap_or(self.created_at)
            .checked_add_signed(interval)
            .ok_or_else(|| CarrotError::config("interval too large"))
    }

    /// Whether an active definition should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> CarrotResult<bool> {
        Ok(self.definition.active && now >= self.next_due()?)
    }
}

/// Owns scheduled task definitions and decides when they fire.
pub struct IntervalScheduler {
    lifecycle: Arc<TaskLifecycle>,
    entries: RwLock<BTreeMap<DefinitionId, ScheduleEntry>>,
    default_priority: u32,
    tick_lock: Mutex<()>,
}

impl IntervalScheduler {
    /// Create a scheduler publishing through `lifecycle`.
    pub fn new(lifecycle: Arc<TaskLifecycle>, default_priority: u32) -> Self {
        Self {
            lifecycle,
            entries: RwLock::new(BTreeMap::new()),
            default_priority,
            tick_lock: Mutex::new(()),
        }
    }

    /// Publish every due definition and return the records created.
    ///
    /// Each definition is handled on its own: a publish failure is logged and
    /// the definition stays due, so the next tick retries it.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<TaskRecord> {
        let _serialized = self.tick_lock.lock().await;

        let due: Vec<ScheduleEntry> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|entry| match entry.is_due(now) {
                    Ok(due) => due,
                    Err(e) => {
                        tracing::warn!("Skipping scheduled task {}: {}", entry.id, e);
                        false
                    }
                })
                .cloned()
                .collect()
        };

        let mut fired = Vec::with_capacity(due.len());
        for entry in due {
            match self.fire(&entry.definition, self.default_priority).await {
                Ok(record) => {
                    if let Some(stored) = self.entries.write().await.get_mut(&entry.id) {
                        stored.last_fired = Some(now);
                    }
                    tracing::debug!(
                        "Scheduled task {} ({}) fired as record {}",
                        entry.id,
                        entry.definition,
                        record.id
                    );
                    fired.push(record);
                }
                Err(e) => {
                    tracing::warn!(
                        "Scheduled task {} ({}) failed to fire: {}",
                        entry.id,
                        entry.definition,
                        e
                    );
                }
            }
        }

        fired
    }

    /// Publish a definition immediately, outside its interval.
    ///
    /// The firing is not recorded, so the regular schedule is unaffected.
    pub async fn publish_now(&self, id: &DefinitionId, priority: u32) -> CarrotResult<TaskRecord> {
        let entry = self.get(id).await?;
        self.fire(&entry.definition, priority).await
    }

    /// Add a definition created now.
    pub async fn create(&self, definition: ScheduledTaskDefinition) -> CarrotResult<DefinitionId> {
        self.create_at(definition, Utc::now()).await
    }

    /// Add a definition with an explicit creation instant; it first fires one
    /// interval after `created_at`.
    pub async fn create_at(
        &self,
        definition: ScheduledTaskDefinition,
        created_at: DateTime<Utc>,
    ) -> CarrotResult<DefinitionId> {
        definition.validate()?;

        let id = Uuid::new_v4();
        tracing::info!("Scheduled {} every {} {}", definition, definition.interval_count, definition.interval_unit);
        self.entries.write().await.insert(
            id,
            ScheduleEntry {
                id,
                definition,
                created_at,
                last_fired: None,
            },
        );
        Ok(id)
    }

    /// Replace a definition, keeping its due-time bookkeeping.
    pub async fn update(
        &self,
        id: &DefinitionId,
        definition: ScheduledTaskDefinition,
    ) -> CarrotResult<()> {
        definition.validate()?;

        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| CarrotError::definition_not_found(id))?;
        entry.definition = definition;
        Ok(())
    }

    /// Activate or deactivate a definition.
    pub async fn set_active(&self, id: &DefinitionId, active: bool) -> CarrotResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| CarrotError::definition_not_found(id))?;
        entry.definition.active = active;
        Ok(())
    }

    /// Remove a definition.
    pub async fn delete(&self, id: &DefinitionId) -> CarrotResult<()> {
        self.entries
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CarrotError::definition_not_found(id))
    }

    /// Get a definition and its bookkeeping.
    pub async fn get(&self, id: &DefinitionId) -> CarrotResult<ScheduleEntry> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CarrotError::definition_not_found(id))
    }

    /// All definitions.
    pub async fn list(&self) -> Vec<ScheduleEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    async fn fire(
        &self,
        definition: &ScheduledTaskDefinition,
        priority: u32,
    ) -> CarrotResult<TaskRecord> {
        let invocation = definition.invocation()?;
        self.lifecycle
            .publish(definition.dispatch_routing(), invocation, priority)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerClient, Dispatch, InMemoryBroker};
    use crate::config::LifecycleConfig;
    use crate::error::BrokerError;
    use crate::schedule::IntervalUnit;
    use crate::store::InMemoryStore;
    use crate::task::{Routing, TaskStatus};
    use async_trait::async_trait;
    use serde_json::json;

    /// Broker that refuses anything routed to the "broken" queue.
    struct PickyBroker(InMemoryBroker);

    #[async_trait]
    impl BrokerClient for PickyBroker {
        async fn publish(&self, dispatch: &Dispatch) -> Result<(), BrokerError> {
            if dispatch.target_queue() == "broken" {
                return Err(BrokerError::Rejected("no route".to_string()));
            }
            self.0.publish(dispatch).await
        }
    }

    fn scheduler() -> IntervalScheduler {
        scheduler_with_priority(0)
    }

    fn scheduler_with_priority(priority: u32) -> IntervalScheduler {
        let lifecycle = Arc::new(TaskLifecycle::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(PickyBroker(InMemoryBroker::new())),
            LifecycleConfig::default(),
        ));
        IntervalScheduler::new(lifecycle, priority)
    }

    fn hourly(task: &str, queue: &str) -> ScheduledTaskDefinition {
        ScheduledTaskDefinition::every(1, IntervalUnit::Hours, task).with_routing(Routing {
            exchange: None,
            queue: Some(queue.to_string()),
            routing_key: None,
        })
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_fires_once_per_interval() {
        let scheduler = scheduler();
        let t0 = epoch();
        let id = scheduler
            .create_at(hourly("app.report", "reports"), t0)
            .await
            .unwrap();

        assert!(scheduler.tick(t0 + Duration::minutes(59)).await.is_empty());

        let fired = scheduler.tick(t0 + Duration::hours(1)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].status, TaskStatus::Published);
        assert_eq!(fired[0].priority, 0);
        assert_eq!(
            scheduler.get(&id).await.unwrap().last_fired,
            Some(t0 + Duration::hours(1))
        );

        // Same window: no duplicate
        assert!(
            scheduler
                .tick(t0 + Duration::hours(1) + Duration::seconds(30))
                .await
                .is_empty()
        );
        assert_eq!(scheduler.tick(t0 + Duration::hours(2)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_definitions() {
        let scheduler = scheduler();
        let t0 = epoch();
        let broken = scheduler
            .create_at(hourly("app.broken", "broken"), t0)
            .await
            .unwrap();
        scheduler
            .create_at(hourly("app.report", "reports"), t0)
            .await
            .unwrap();

        let fired = scheduler.tick(t0 + Duration::hours(1)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].invocation.task, "app.report");

        // The failed definition stays due
        let entry = scheduler.get(&broken).await.unwrap();
        assert!(entry.last_fired.is_none());
        assert!(entry.is_due(t0 + Duration::hours(1)).unwrap());
    }

    #[tokio::test]
    async fn test_inactive_definitions_never_fire() {
        let scheduler = scheduler();
        let t0 = epoch();
        let id = scheduler
            .create_at(hourly("app.report", "reports").with_active(false), t0)
            .await
            .unwrap();

        assert!(scheduler.tick(t0 + Duration::days(3)).await.is_empty());

        scheduler.set_active(&id, true).await.unwrap();
        assert_eq!(scheduler.tick(t0 + Duration::days(3)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_shape() {
        let scheduler = scheduler_with_priority(7);
        let t0 = epoch();
        scheduler
            .create_at(
                ScheduledTaskDefinition::every(30, IntervalUnit::Seconds, "app.sync")
                    .with_routing(Routing {
                        exchange: None,
                        queue: Some("sync".to_string()),
                        routing_key: None,
                    })
                    .with_args("eu, ,us")
                    .with_kwargs(r#"{"full": false}"#),
                t0,
            )
            .await
            .unwrap();

        let fired = scheduler.tick(t0 + Duration::seconds(30)).await;
        let record = &fired[0];
        assert_eq!(record.priority, 7);
        assert_eq!(record.routing.exchange.as_deref(), Some(""));
        assert_eq!(record.routing.routing_key.as_deref(), Some("sync"));
        assert_eq!(record.invocation.args, vec![json!("eu"), json!("us")]);
        assert_eq!(record.invocation.kwargs["full"], json!(false));
    }

    #[tokio::test]
    async fn test_invalid_definitions_rejected() {
        let scheduler = scheduler();

        let zero = ScheduledTaskDefinition::every(0, IntervalUnit::Minutes, "app.x");
        assert!(matches!(
            scheduler.create(zero).await,
            Err(CarrotError::InvalidConfiguration { .. })
        ));

        let bad_kwargs = hourly("app.x", "q").with_kwargs("not json");
        assert!(scheduler.create(bad_kwargs).await.is_err());
        assert!(scheduler.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_due_time_skipped() {
        let scheduler = scheduler();
        let t0 = epoch();

        assert!(matches!(
            scheduler
                .create(ScheduledTaskDefinition::every(u32::MAX, IntervalUnit::Days, "app.x"))
                .await,
            Err(CarrotError::InvalidConfiguration { .. })
        ));

        // Next due time lies past the last representable instant
        let stuck = scheduler
            .create_at(hourly("app.stuck", "stuck"), DateTime::<Utc>::MAX_UTC)
            .await
            .unwrap();
        assert!(scheduler.get(&stuck).await.unwrap().next_due().is_err());
        scheduler
            .create_at(hourly("app.report", "reports"), t0)
            .await
            .unwrap();

        let fired = scheduler.tick(t0 + Duration::hours(1)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].invocation.task, "app.report");
    }

    #[tokio::test]
    async fn test_crud() {
        let scheduler = scheduler();
        let t0 = epoch();
        let id = scheduler
            .create_at(hourly("app.report", "reports"), t0)
            .await
            .unwrap();
        scheduler.tick(t0 + Duration::hours(1)).await;

        // Editing keeps bookkeeping; the new interval applies from the last firing
        let every_two = ScheduledTaskDefinition::every(2, IntervalUnit::Hours, "app.report");
        scheduler.update(&id, every_two.clone()).await.unwrap();
        let entry = scheduler.get(&id).await.unwrap();
        assert_eq!(entry.definition, every_two);
        assert_eq!(entry.next_due().unwrap(), t0 + Duration::hours(3));

        let missing = Uuid::new_v4();
        assert!(matches!(
            scheduler.update(&missing, every_two).await,
            Err(CarrotError::NotFound { .. })
        ));

        scheduler.delete(&id).await.unwrap();
        assert!(scheduler.get(&id).await.is_err());
        assert!(scheduler.delete(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_now_leaves_schedule_alone() {
        let scheduler = scheduler();
        let t0 = epoch();
        let id = scheduler
            .create_at(hourly("app.report", "reports"), t0)
            .await
            .unwrap();

        let record = scheduler.publish_now(&id, 9).await.unwrap();
        assert_eq!(record.priority, 9);
        assert!(scheduler.get(&id).await.unwrap().last_fired.is_none());

        let broken = scheduler
            .create_at(hourly("app.broken", "broken"), t0)
            .await
            .unwrap();
        assert!(scheduler.publish_now(&broken, 0).await.unwrap_err().is_broker());
    }
}
