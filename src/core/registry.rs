//! Task handler registry.
//!
//! Consumers look up the handler for a delivery by its task reference. The
//! registry is an ordinary value shared through an `Arc`; there is no
//! process-wide registry.
//!
//! # Examples
//!
//! ```rust
//! use carrotq::prelude::*;
//!
//! # async fn demo() {
//! let registry = TaskRegistry::new();
//! registry
//!     .register_fn("app.tasks.echo", |invocation: Invocation| async move {
//!         Ok(format!("{:?}", invocation.args))
//!     })
//!     .await;
//! assert!(registry.is_registered("app.tasks.echo").await);
//! # }
//! ```

use crate::task::{Invocation, TaskOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Failure details a handler reports; stored on the `FAILED` record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Exception summary
    pub exception: String,
    /// Stack trace text
    pub traceback: String,
    /// Captured log text
    pub log: String,
}

impl TaskFailure {
    /// A failure with only an exception summary.
    pub fn new(exception: impl Into<String>) -> Self {
        Self {
            exception: exception.into(),
            ..Default::default()
        }
    }

    /// Attach a stack trace.
    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = traceback.into();
        self
    }

    /// Attach captured log text.
    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = log.into();
        self
    }
}

impl<E: std::error::Error> From<E> for TaskFailure {
    fn from(error: E) -> Self {
        let mut traceback = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            traceback.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self::new(error.to_string()).with_traceback(traceback.join("\n"))
    }
}

impl From<TaskFailure> for TaskOutcome {
    fn from(failure: TaskFailure) -> Self {
        TaskOutcome::Failed {
            exception: failure.exception,
            traceback: failure.traceback,
            log: failure.log,
        }
    }
}

/// Runs the work behind a task reference.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the invocation; `Ok` carries the captured output.
    async fn run(&self, invocation: &Invocation) -> Result<String, TaskFailure>;
}

/// Adapter turning an async closure into a [`TaskHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, TaskFailure>> + Send,
{
    async fn run(&self, invocation: &Invocation) -> Result<String, TaskFailure> {
        (self.0)(invocation.clone()).await
    }
}

/// Maps task references to handlers.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same reference.
    pub async fn register(&self, task: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task = task.into();
        tracing::info!("Registering task handler: {}", task);

        if self.handlers.write().await.insert(task.clone(), handler).is_some() {
            tracing::warn!("Task handler {} replaced", task);
        }
    }

    /// Register an async closure as a handler.
    pub async fn register_fn<F, Fut>(&self, task: impl Into<String>, handler: F)
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, TaskFailure>> + Send + 'static,
    {
        self.register(task, Arc::new(FnHandler(handler))).await;
    }

    /// Handler for a task reference.
    pub async fn get(&self, task: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(task).cloned()
    }

    /// Check if a task reference has a handler.
    pub async fn is_registered(&self, task: &str) -> bool {
        self.handlers.read().await.contains_key(task)
    }

    /// All registered task references, sorted.
    pub async fn registered_tasks(&self) -> Vec<String> {
        let mut tasks: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        tasks.sort();
        tasks
    }
}
