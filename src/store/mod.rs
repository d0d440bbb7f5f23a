//! Record store backends for task records.
//!
//! The lifecycle never touches persistence directly; it goes through
//! [`TaskRecordStore`]. carrotq ships an in-memory backend, suitable for
//! development, tests and single-process deployments. Anything that can do an
//! atomic per-record compare-and-set can back the trait.
//!
//! # Examples
//!
//! ```rust
//! use carrotq::prelude::*;
//!
//! # async fn demo() -> CarrotResult<()> {
//! let store = InMemoryStore::new();
//! let failed = store.list(&RecordFilter::status(TaskStatus::Failed)).await?;
//! assert!(failed.is_empty());
//! # Ok(())
//! # }
//! ```

use crate::error::CarrotResult;
use crate::task::{TaskId, TaskRecord, TaskStatus};
use async_trait::async_trait;
use std::cmp::Ordering;

pub mod memory;
pub use memory::InMemoryStore;

/// Which records to return from [`TaskRecordStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Only records in this status
    pub status: Option<TaskStatus>,
    /// Maximum number of records
    pub limit: Option<usize>,
}

impl RecordFilter {
    /// Every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Records in one status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            limit: None,
        }
    }

    /// Cap the number of records returned.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record passes the filter (limit aside).
    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.status.is_none_or(|status| record.status == status)
    }
}

/// Listing order for records: priority descending, then identity ascending.
pub fn listing_order(a: &TaskRecord, b: &TaskRecord) -> Ordering {
    b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id))
}

/// Counts of records per status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Records waiting for a broker acknowledgment
    pub unpublished: u64,
    /// Records waiting for a consumer
    pub published: u64,
    /// Records that failed
    pub failed: u64,
    /// Records that completed
    pub completed: u64,
}

/// Trait that all record store backends must implement
#[async_trait]
pub trait TaskRecordStore: Send + Sync {
    /// Insert a new record. Fails if the identity is already taken.
    async fn insert(&self, record: TaskRecord) -> CarrotResult<()>;

    /// Overwrite every field of a stored record, atomically, provided it is
    /// still in `expected` status.
    ///
    /// Fails with `NotFound` when the record no longer exists and with
    /// `InvalidTransition` when its stored status differs from `expected`.
    async fn update(&self, record: &TaskRecord, expected: TaskStatus) -> CarrotResult<()>;

    /// Delete a record. Returns `false` if it was already gone.
    async fn delete(&self, id: &TaskId) -> CarrotResult<bool>;

    /// Get a record by ID, `NotFound` if missing.
    async fn get(&self, id: &TaskId) -> CarrotResult<TaskRecord>;

    /// Records matching `filter`, in [`listing_order`].
    async fn list(&self, filter: &RecordFilter) -> CarrotResult<Vec<TaskRecord>>;

    /// Get store statistics
    async fn stats(&self) -> CarrotResult<StoreStats>;
}

/// Convenient type alias for a shared store backend
pub type SharedStore = std::sync::Arc<dyn TaskRecordStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Invocation, Routing};

    fn record(priority: u32) -> TaskRecord {
        TaskRecord::new(Routing::queue("default"), Invocation::new("app.ping"), priority)
    }

    #[test]
    fn test_listing_order() {
        let mut records = vec![record(0), record(5), record(0), record(9)];
        records.sort_by(listing_order);

        let priorities: Vec<u32> = records.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![9, 5, 0, 0]);
        assert!(records[2].id < records[3].id);
    }

    #[test]
    fn test_filter_matches() {
        let r = record(1);
        assert!(RecordFilter::all().matches(&r));
        assert!(RecordFilter::status(TaskStatus::Unpublished).matches(&r));
        assert!(!RecordFilter::status(TaskStatus::Failed).matches(&r));
    }
}
