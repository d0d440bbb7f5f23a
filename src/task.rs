//! Task record types: the persisted lifecycle of a single dispatched task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a task record
pub type TaskId = Uuid;

/// Status of a task record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, broker call not yet acknowledged
    Unpublished,
    /// Acknowledged by the broker, waiting for a consumer
    Published,
    /// Consumer reported a failure
    Failed,
    /// Consumer reported success
    Completed,
}

impl TaskStatus {
    /// `Completed` and `Failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// The lifecycle operation that moves a record into this status.
    pub(crate) fn operation(self) -> &'static str {
        match self {
            TaskStatus::Unpublished => "reset",
            TaskStatus::Published => "publish",
            TaskStatus::Failed => "fail",
            TaskStatus::Completed => "complete",
        }
    }

    /// Human-readable label, as shown to operators.
    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Unpublished => "Not yet published",
            TaskStatus::Published => "Published",
            TaskStatus::Failed => "Failed",
            TaskStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Unpublished => "UNPUBLISHED",
            TaskStatus::Published => "PUBLISHED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// Where a task is sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Routing {
    /// Exchange name; `""` is the broker's default exchange
    pub exchange: Option<String>,
    /// Queue name
    pub queue: Option<String>,
    /// Routing key
    pub routing_key: Option<String>,
}

impl Routing {
    /// Routing straight to a named queue on the default exchange.
    pub fn queue(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            exchange: Some(String::new()),
            routing_key: Some(name.clone()),
            queue: Some(name),
        }
    }

    /// Set the exchange.
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Set the routing key.
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    /// The exchange name `"default"` refers to the broker's default exchange,
    /// which is addressed by the empty name.
    pub fn normalized(mut self) -> Self {
        if self.exchange.as_deref() == Some("default") {
            self.exchange = Some(String::new());
        }
        self
    }
}

/// What a consumer should run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Invocation {
    /// Reference identifying the work to perform
    pub task: String,
    /// Positional arguments
    pub args: Vec<Value>,
    /// Keyword arguments
    pub kwargs: Map<String, Value>,
}

impl Invocation {
    /// An invocation of `task` without arguments.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }
}

/// The persisted record of one dispatched task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    /// Unique record identifier
    pub id: TaskId,
    /// Current status
    pub status: TaskStatus,
    /// Exchange/queue/routing key
    pub routing: Routing,
    /// Task reference and arguments
    pub invocation: Invocation,
    /// Higher is dispatched and listed first
    pub priority: u32,
    /// Exception summary, set on failure
    pub exception: Option<String>,
    /// Stack trace text, set on failure
    pub traceback: Option<String>,
    /// Task output, set on completion
    pub output: Option<String>,
    /// Captured log text, set on failure
    pub log: Option<String>,
    /// When the broker acknowledged the publish
    pub publish_time: Option<DateTime<Utc>>,
    /// When the consumer reported failure
    pub failure_time: Option<DateTime<Utc>>,
    /// When the consumer reported success
    pub completion_time: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// A fresh `UNPUBLISHED` record with a new identity.
    pub fn new(routing: Routing, invocation: Invocation, priority: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Unpublished,
            routing,
            invocation,
            priority,
            exception: None,
            traceback: None,
            output: None,
            log: None,
            publish_time: None,
            failure_time: None,
            completion_time: None,
        }
    }

    /// The time the record entered its terminal status, if it has.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.completion_time.or(self.failure_time)
    }
}

impl fmt::Display for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.invocation.task)
    }
}

/// Outcome a consumer reports for a delivered task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The task ran to completion
    Completed {
        /// Captured output
        output: String,
    },
    /// The task raised
    Failed {
        /// Exception summary
        exception: String,
        /// Stack trace text
        traceback: String,
        /// Captured log text
        log: String,
    },
}
