//! Configuration types for carrotq.
//!
//! This module contains all configuration structures used throughout carrotq,
//! including publish timeouts, retention, scheduler ticking and the consumer pool.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for carrotq.
///
/// # Examples
///
/// ```rust
/// use carrotq::config::{CarrotConfig, ConsumerConfig, RetentionConfig};
///
/// // Use default configuration
/// let config = CarrotConfig::default();
///
/// // Custom configuration
/// let config = CarrotConfig {
///     consumers: ConsumerConfig {
///         num_consumers: 8,
///         ..Default::default()
///     },
///     retention: RetentionConfig::disabled(),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarrotConfig {
    /// Publish behaviour of the task lifecycle
    pub lifecycle: LifecycleConfig,

    /// Retention sweep of completed records
    pub retention: RetentionConfig,

    /// Interval scheduler driver
    pub scheduler: SchedulerConfig,

    /// Consumer pool
    pub consumers: ConsumerConfig,

    /// Engine-level configuration
    pub engine: EngineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Publish behaviour of [`TaskLifecycle`](crate::core::TaskLifecycle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Upper bound on a single broker publish (in milliseconds)
    pub publish_timeout_ms: u64,

    /// Keep the `UNPUBLISHED` row when the broker call fails instead of deleting it
    pub retain_unpublished_on_failure: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            publish_timeout_ms: 5000,
            retain_unpublished_on_failure: false,
        }
    }
}

impl LifecycleConfig {
    /// Set the publish timeout.
    pub fn with_publish_timeout(mut self, timeout_ms: u64) -> Self {
        self.publish_timeout_ms = timeout_ms;
        self
    }

    /// Keep or delete the `UNPUBLISHED` row after a failed publish.
    pub fn with_retain_unpublished(mut self, retain: bool) -> Self {
        self.retain_unpublished_on_failure = retain;
        self
    }

    pub(crate) fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Longest retention window `validate` accepts.
pub const MAX_RETENTION_SECS: u64 = 100 * 365 * 86400;

/// Retention sweep of `COMPLETED` records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Whether completed records are swept at all
    pub enabled: bool,

    /// Age after completion at which a record is deleted (in seconds)
    pub window_secs: u64,

    /// How often the sweep runs (in seconds)
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 3 * 86400, // 3 days
            sweep_interval_secs: 3600,
        }
    }
}

impl RetentionConfig {
    /// Never sweep completed records.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// The retention window, or `None` when the sweep is disabled.
    pub fn window(&self) -> Option<Duration> {
        self.enabled.then(|| Duration::from_secs(self.window_secs))
    }
}

/// Interval scheduler driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the engine drives the scheduler
    pub enabled: bool,

    /// Time between ticks (in milliseconds)
    pub tick_interval_ms: u64,

    /// Priority given to records fired by the scheduler
    pub default_priority: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: 1000,
            default_priority: 0,
        }
    }
}

/// Consumer pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Number of consumer tasks to spawn (0 = publish only)
    pub num_consumers: usize,

    /// Queues consumers read from
    pub queues: Vec<String>,

    /// Maximum time a task handler may run (in seconds)
    pub task_timeout_secs: u64,

    /// How long a consumer waits for a delivery before polling again (in milliseconds)
    pub idle_timeout_ms: u64,

    /// Attempts to report an outcome for a record that is not yet `PUBLISHED`
    pub report_attempts: u32,

    /// Delay between report attempts (in milliseconds)
    pub report_retry_delay_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            num_consumers: num_cpus::get().max(1),
            queues: vec!["default".to_string()],
            task_timeout_secs: 300,  // 5 minutes
            idle_timeout_ms: 1000,   // 1 second
            report_attempts: 5,
            report_retry_delay_ms: 50,
        }
    }
}

impl ConsumerConfig {
    /// Create a consumer configuration with a specific number of consumers.
    pub fn with_consumers(num_consumers: usize) -> Self {
        Self {
            num_consumers,
            ..Default::default()
        }
    }

    /// Set the queues to consume from.
    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    /// Set the task timeout.
    pub fn with_task_timeout(mut self, timeout_secs: u64) -> Self {
        self.task_timeout_secs = timeout_secs;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }
}

/// Engine-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum time to wait for background loops on shutdown (in seconds)
    pub shutdown_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: LogLevel,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Enable colored output (ignored if json_format is true)
    pub colored: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            colored: true,
            include_targets: false,
        }
    }
}

impl LoggingConfig {
    /// Install a global `tracing` subscriber for this configuration.
    ///
    /// Returns `false` if a subscriber was already installed.
    pub fn init(&self) -> bool {
        let builder = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::from(self.level.clone()))
            .with_target(self.include_targets);

        if self.json_format {
            builder.json().try_init().is_ok()
        } else {
            builder.with_ansi(self.colored).try_init().is_ok()
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl CarrotConfig {
    /// Create a new configuration optimized for development.
    pub fn development() -> Self {
        Self {
            consumers: ConsumerConfig {
                num_consumers: 2,
                task_timeout_secs: 60,
                ..Default::default()
            },
            retention: RetentionConfig {
                window_secs: 3600,
                sweep_interval_secs: 300,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: true,
                include_targets: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a new configuration optimized for production.
    pub fn production() -> Self {
        Self {
            lifecycle: LifecycleConfig {
                publish_timeout_ms: 10_000,
                ..Default::default()
            },
            consumers: ConsumerConfig {
                num_consumers: num_cpus::get() * 2,
                ..Default::default()
            },
            engine: EngineConfig {
                shutdown_timeout_secs: 120,
            },
            logging: LoggingConfig {
                level: LogLevel::Info,
                json_format: true,
                colored: false,
                include_targets: false,
            },
            ..Default::default()
        }
    }

    /// Create a configuration for testing.
    pub fn testing() -> Self {
        Self {
            lifecycle: LifecycleConfig {
                publish_timeout_ms: 200,
                ..Default::default()
            },
            retention: RetentionConfig::disabled(),
            scheduler: SchedulerConfig {
                tick_interval_ms: 20,
                ..Default::default()
            },
            consumers: ConsumerConfig {
                num_consumers: 1,
                task_timeout_secs: 5,
                idle_timeout_ms: 20,
                report_retry_delay_ms: 10,
                ..Default::default()
            },
            engine: EngineConfig {
                shutdown_timeout_secs: 5,
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: false,
                include_targets: true,
                ..Default::default()
            },
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.lifecycle.publish_timeout_ms == 0 {
            errors.push("Publish timeout must be greater than 0".to_string());
        }

        if self.retention.enabled && self.retention.window_secs == 0 {
            errors.push("Retention window must be greater than 0".to_string());
        }

        if self.retention.enabled && self.retention.window_secs > MAX_RETENTION_SECS {
            errors.push("Retention window must not exceed 100 years".to_string());
        }

        if self.retention.enabled && self.retention.sweep_interval_secs == 0 {
            errors.push("Sweep interval must be greater than 0".to_string());
        }

        if self.scheduler.enabled && self.scheduler.tick_interval_ms == 0 {
            errors.push("Scheduler tick interval must be greater than 0".to_string());
        }

        if self.consumers.num_consumers > 1000 {
            errors.push("Number of consumers should not exceed 1000".to_string());
        }

        if self.consumers.num_consumers > 0 && self.consumers.queues.is_empty() {
            errors.push("Consumers need at least one queue".to_string());
        }

        if self.consumers.task_timeout_secs == 0 {
            errors.push("Task timeout must be greater than 0".to_string());
        }

        if self.consumers.report_attempts == 0 {
            errors.push("Report attempts must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
