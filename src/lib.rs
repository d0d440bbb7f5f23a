//! # CarrotQ
//!
//! Broker task lifecycle tracking and interval scheduling for Rust
//! applications.
//!
//! Every task handed to a message broker gets a persistent record that moves
//! through `UNPUBLISHED → PUBLISHED → {COMPLETED, FAILED}`. Failed records can
//! be requeued, old completed records are swept, and scheduled task
//! definitions fire on fixed intervals.
//!
//! ## Features
//!
//! - **Race-free records**: every status change is a compare-and-set
//! - **Bounded publishing**: broker calls run under a timeout
//! - **Interval scheduling**: "every N seconds/minutes/hours/days" definitions
//! - **Consumers**: run registered handlers and report outcomes back
//! - **Graceful shutdown**: in-flight work finishes before the engine stops
//!
//! ## Quick Start
//!
//! ```rust
//! use carrotq::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> CarrotResult<()> {
//!     let carrot = Carrot::new(CarrotConfig::testing())?;
//!
//!     carrot
//!         .register_fn("app.tasks.report", |invocation: Invocation| async move {
//!             Ok(format!("report for {:?}", invocation.args))
//!         })
//!         .await;
//!
//!     carrot
//!         .schedule(
//!             ScheduledTaskDefinition::every(1, IntervalUnit::Hours, "app.tasks.report")
//!                 .with_routing(Routing::queue("default"))
//!                 .with_args("eu, us"),
//!         )
//!         .await?;
//!
//!     carrot.start().await?;
//!     carrot.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod core;
pub mod error;
pub mod presentation;
pub mod schedule;
pub mod store;
pub mod task;

pub mod prelude {
    pub use crate::broker::{BrokerClient, Dispatch, InMemoryBroker, MessageSource};
    pub use crate::config::*;
    pub use crate::core::{Carrot, TaskFailure, TaskHandler, TaskRegistry};
    pub use crate::error::{BrokerError, CarrotError, CarrotResult};
    pub use crate::schedule::{DefinitionId, IntervalUnit, ScheduledTaskDefinition};
    pub use crate::store::{InMemoryStore, RecordFilter, TaskRecordStore};
    pub use crate::task::{Invocation, Routing, TaskId, TaskOutcome, TaskRecord, TaskStatus};
    pub use async_trait::async_trait;
}

pub use crate::broker::{BrokerClient, Dispatch, InMemoryBroker, MessageSource};
pub use crate::config::*;
pub use crate::core::{Carrot, CarrotEngine, TaskFailure, TaskHandler, TaskLifecycle, TaskRegistry};
pub use crate::error::{BrokerError, CarrotError, CarrotResult};
pub use crate::schedule::{
    DefinitionId, IntervalUnit, ScheduledTaskDefinition, compute_interval_seconds,
    parse_positional_arguments,
};
pub use crate::store::{InMemoryStore, RecordFilter, StoreStats, TaskRecordStore};
pub use crate::task::{Invocation, Routing, TaskId, TaskOutcome, TaskRecord, TaskStatus};
pub use async_trait::async_trait;
