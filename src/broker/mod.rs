//! Broker abstractions for carrotq.
//!
//! The broker transport is external. The lifecycle needs two things from it:
//! - [`BrokerClient`]: publish a task invocation and report an acknowledgment
//! - [`MessageSource`]: hand published invocations to consumers
//!
//! [`InMemoryBroker`] implements both within a single process.

use crate::error::BrokerError;
use crate::task::{Invocation, Routing, TaskId, TaskRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod memory;
pub use memory::InMemoryBroker;

/// A task invocation as handed to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dispatch {
    /// Record that tracks this invocation; consumers report outcomes against it
    pub record_id: TaskId,
    /// Exchange/queue/routing key
    pub routing: Routing,
    /// Task reference and arguments
    pub invocation: Invocation,
    /// Higher is delivered first
    pub priority: u32,
}

impl Dispatch {
    /// The dispatch for a record.
    pub fn for_record(record: &TaskRecord) -> Self {
        Self {
            record_id: record.id,
            routing: record.routing.clone(),
            invocation: record.invocation.clone(),
            priority: record.priority,
        }
    }

    /// Queue the dispatch lands in on a direct exchange: the queue name,
    /// falling back to the routing key, then `"default"`.
    pub fn target_queue(&self) -> &str {
        [&self.routing.queue, &self.routing.routing_key]
            .into_iter()
            .filter_map(|name| name.as_deref())
            .find(|name| !name.is_empty())
            .unwrap_or("default")
    }
}

/// Publishing half of the broker
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Publish a dispatch; `Ok` means the broker acknowledged it.
    async fn publish(&self, dispatch: &Dispatch) -> Result<(), BrokerError>;
}

/// Consuming half of the broker
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Take the next delivery from any of `queues`, waiting up to `wait`.
    ///
    /// Returns `None` if nothing arrived in time.
    async fn consume(
        &self,
        queues: &[String],
        wait: Duration,
    ) -> Result<Option<Dispatch>, BrokerError>;
}

/// Convenient type alias for a shared broker client
pub type SharedBroker = std::sync::Arc<dyn BrokerClient>;
