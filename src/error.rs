//! Error types for carrotq operations.

use crate::task::{TaskId, TaskStatus};
use thiserror::Error;

/// Result type used throughout carrotq.
pub type CarrotResult<T> = Result<T, CarrotError>;

/// Main error type for carrotq operations.
#[derive(Error, Debug)]
pub enum CarrotError {
    /// A task record or scheduled definition does not exist
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// What was looked up ("task record", "scheduled task")
        kind: &'static str,
        /// The identifier that wasn't found
        id: String,
    },

    /// A lifecycle operation was attempted from a status that does not allow it
    #[error("Cannot {operation} task {id}: current status is {status}")]
    InvalidTransition {
        /// The record the operation targeted
        id: TaskId,
        /// Status the record was in when the operation was rejected
        status: TaskStatus,
        /// The rejected operation
        operation: &'static str,
    },

    /// Bad interval unit/count or malformed scheduled task arguments
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// The broker refused, failed or timed out on a publish
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record store backend error
    #[error("Store error: {message}")]
    Store {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The engine is already running
    #[error("Carrot is already running")]
    AlreadyRunning,

    /// The engine is not running
    #[error("Carrot is not running")]
    NotRunning,
}

/// Failures reported by a [`BrokerClient`](crate::broker::BrokerClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the message
    #[error("publish rejected: {0}")]
    Rejected(String),

    /// No acknowledgment arrived in time
    #[error("publish timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        timeout_ms: u64,
    },
}

impl CarrotError {
    /// Create a not-found error for a task record
    pub fn record_not_found(id: &TaskId) -> Self {
        Self::NotFound {
            kind: "task record",
            id: id.to_string(),
        }
    }

    /// Create a not-found error for a scheduled task definition
    pub fn definition_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "scheduled task",
            id: id.to_string(),
        }
    }

    /// Create an invalid transition error
    pub fn invalid_transition(id: TaskId, status: TaskStatus, operation: &'static str) -> Self {
        Self::InvalidTransition {
            id,
            status,
            operation,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a store error without an underlying cause
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Whether this error came from the broker (publish failure or timeout)
    pub fn is_broker(&self) -> bool {
        matches!(self, Self::Broker(_))
    }
}
