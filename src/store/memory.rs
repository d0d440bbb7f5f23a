//! In-memory record store for carrotq.
//!
//! Records live in a single map behind an async-friendly lock, so every
//! compare-and-set update is atomic with respect to other writers. Nothing
//! survives a restart.

use super::{RecordFilter, StoreStats, TaskRecordStore, listing_order};
use crate::error::{CarrotError, CarrotResult};
use crate::task::{TaskId, TaskRecord, TaskStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory record store implementation
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    /// Records indexed by ID
    records: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TaskRecordStore for InMemoryStore {
    async fn insert(&self, record: TaskRecord) -> CarrotResult<()> {
        let mut records = self.records.write().await;

        if records.contains_key(&record.id) {
            return Err(CarrotError::store(format!(
                "Record {} already exists",
                record.id
            )));
        }

        tracing::debug!("Inserted record {} ({})", record.id, record.status);
        records.insert(record.id, record);
        Ok(())
    }

    async fn update(&self, record: &TaskRecord, expected: TaskStatus) -> CarrotResult<()> {
        let mut records = self.records.write().await;

        let stored = records
            .get_mut(&record.id)
            .ok_or_else(|| CarrotError::record_not_found(&record.id))?;

        if stored.status != expected {
            return Err(CarrotError::invalid_transition(
                record.id,
                stored.status,
                record.status.operation(),
            ));
        }

        *stored = record.clone();
        tracing::debug!("Updated record {}: {} -> {}", record.id, expected, record.status);
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> CarrotResult<bool> {
        let removed = self.records.write().await.remove(id).is_some();
        if removed {
            tracing::debug!("Deleted record {}", id);
        }
        Ok(removed)
    }

    async fn get(&self, id: &TaskId) -> CarrotResult<TaskRecord> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CarrotError::record_not_found(id))
    }

    async fn list(&self, filter: &RecordFilter) -> CarrotResult<Vec<TaskRecord>> {
        let records = self.records.read().await;
        let mut result: Vec<TaskRecord> = records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();

        result.sort_by(listing_order);

        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }

        Ok(result)
    }

    async fn stats(&self) -> CarrotResult<StoreStats> {
        let records = self.records.read().await;
        let mut stats = StoreStats::default();

        for record in records.values() {
            match record.status {
                TaskStatus::Unpublished => stats.unpublished += 1,
                TaskStatus::Published => stats.published += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Completed => stats.completed += 1,
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Invocation, Routing};

    fn create_test_record(priority: u32) -> TaskRecord {
        TaskRecord::new(
            Routing::queue("default"),
            Invocation::new("app.tasks.ping"),
            priority,
        )
    }

    #[tokio::test]
    async fn test_insert_get_delete() {
        let store = InMemoryStore::new();
        let record = create_test_record(0);
        let id = record.id;

        store.insert(record.clone()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), record);

        // Duplicate identity is rejected
        assert!(matches!(
            store.insert(record).await,
            Err(CarrotError::Store { .. })
        ));

        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(matches!(
            store.get(&id).await,
            Err(CarrotError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_is_compare_and_set() {
        let store = InMemoryStore::new();
        let mut record = create_test_record(0);
        store.insert(record.clone()).await.unwrap();

        record.status = TaskStatus::Published;
        store.update(&record, TaskStatus::Unpublished).await.unwrap();

        // Stale expectation loses
        record.status = TaskStatus::Completed;
        let err = store
            .update(&record, TaskStatus::Unpublished)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CarrotError::InvalidTransition {
                status: TaskStatus::Published,
                ..
            }
        ));
        assert_eq!(
            store.get(&record.id).await.unwrap().status,
            TaskStatus::Published
        );
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = InMemoryStore::new();
        let record = create_test_record(0);

        let err = store
            .update(&record, TaskStatus::Unpublished)
            .await
            .unwrap_err();
        assert!(matches!(err, CarrotError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_filter_and_order() {
        let store = InMemoryStore::new();
        for priority in [1, 7, 3] {
            store.insert(create_test_record(priority)).await.unwrap();
        }
        let mut failed = create_test_record(10);
        failed.status = TaskStatus::Failed;
        store.insert(failed).await.unwrap();

        let unpublished = store
            .list(&RecordFilter::status(TaskStatus::Unpublished))
            .await
            .unwrap();
        let priorities: Vec<u32> = unpublished.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![7, 3, 1]);

        let top = store.list(&RecordFilter::all().with_limit(2)).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].priority, 10);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.unpublished, 3);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_concurrent_terminal_updates_single_winner() {
        let store = InMemoryStore::new();
        let mut record = create_test_record(0);
        record.status = TaskStatus::Published;
        store.insert(record.clone()).await.unwrap();

        let mut completed = record.clone();
        completed.status = TaskStatus::Completed;
        let mut failed = record.clone();
        failed.status = TaskStatus::Failed;

        let (a, b) = tokio::join!(
            store.update(&completed, TaskStatus::Published),
            store.update(&failed, TaskStatus::Published)
        );
        assert!(a.is_ok() ^ b.is_ok());
    }
}
