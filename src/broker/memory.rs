//! In-memory broker for carrotq.
//!
//! Every exchange behaves as a direct exchange: a dispatch lands in the queue
//! returned by [`Dispatch::target_queue`]. Within a queue, deliveries come out
//! by priority, then in publish order.

use super::{BrokerClient, Dispatch, MessageSource};
use crate::error::BrokerError;
use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, timeout};

#[derive(Debug)]
struct Queued {
    sequence: u64,
    dispatch: Dispatch,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher priority first, then lower sequence first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.dispatch
            .priority
            .cmp(&other.dispatch.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// In-memory broker implementation
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    queues: Arc<Mutex<HashMap<String, BinaryHeap<Queued>>>>,
    notify: Arc<Notify>,
    sequence: Arc<AtomicU64>,
    available: Arc<AtomicBool>,
}

impl InMemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            sequence: Arc::new(AtomicU64::new(0)),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the broker going down (publishes fail with `Unavailable`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of deliveries waiting in a queue
    pub async fn depth(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map_or(0, BinaryHeap::len)
    }

    /// Total number of dispatches ever accepted
    pub fn published_count(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    async fn pop(&self, queues: &[String]) -> Option<Dispatch> {
        let mut guard = self.queues.lock().await;

        // Highest-priority head across all requested queues
        let name = queues
            .iter()
            .filter_map(|name| guard.get(name).and_then(|heap| heap.peek()).map(|q| (name, q)))
            .max_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(name, _)| name.clone())?;

        guard
            .get_mut(&name)
            .and_then(BinaryHeap::pop)
            .map(|queued| queued.dispatch)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn publish(&self, dispatch: &Dispatch) -> Result<(), BrokerError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable(
                "in-memory broker is offline".to_string(),
            ));
        }

        let queue = dispatch.target_queue().to_string();
        {
            let mut queues = self.queues.lock().await;
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
            queues.entry(queue.clone()).or_default().push(Queued {
                sequence,
                dispatch: dispatch.clone(),
            });
        }
        self.notify.notify_waiters();

        tracing::debug!(
            "Published {} for record {} to queue '{}'",
            dispatch.invocation.task,
            dispatch.record_id,
            queue
        );
        Ok(())
    }
}

#[async_trait]
impl MessageSource for InMemoryBroker {
    async fn consume(
        &self,
        queues: &[String],
        wait: Duration,
    ) -> Result<Option<Dispatch>, BrokerError> {
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before looking, so a publish in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(dispatch) = self.pop(queues).await {
                return Ok(Some(dispatch));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}
