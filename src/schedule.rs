//! Scheduled task definitions: recurring dispatch rules.

use crate::error::{CarrotError, CarrotResult};
use crate::task::{Invocation, Routing};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a scheduled task definition
pub type DefinitionId = Uuid;

/// Longest accepted interval: 100 years.
pub const MAX_INTERVAL_SECONDS: u64 = 100 * 365 * 86400;

/// Unit an interval count is expressed in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    /// 1 second
    #[default]
    Seconds,
    /// 60 seconds
    Minutes,
    /// 3600 seconds
    Hours,
    /// 86400 seconds
    Days,
}

impl IntervalUnit {
    /// Seconds in one unit.
    pub fn multiplier(self) -> u64 {
        match self {
            IntervalUnit::Seconds => 1,
            IntervalUnit::Minutes => 60,
            IntervalUnit::Hours => 60 * 60,
            IntervalUnit::Days => 86400,
        }
    }

    /// Plural name, as used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            IntervalUnit::Seconds => "seconds",
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Hours => "hours",
            IntervalUnit::Days => "days",
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntervalUnit {
    type Err = CarrotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "seconds" => Ok(IntervalUnit::Seconds),
            "minutes" => Ok(IntervalUnit::Minutes),
            "hours" => Ok(IntervalUnit::Hours),
            "days" => Ok(IntervalUnit::Days),
            other => Err(CarrotError::config(format!(
                "unrecognized interval unit '{other}'"
            ))),
        }
    }
}

/// A rule for dispatching a task every `interval_count` `interval_unit`s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledTaskDefinition {
    /// Interval unit
    pub interval_unit: IntervalUnit,
    /// Number of units between firings, at least 1
    pub interval_count: u32,
    /// Exchange/queue/routing key
    pub routing: Routing,
    /// Reference identifying the work to perform
    pub task: String,
    /// Comma-separated positional arguments
    pub task_args: Option<String>,
    /// Keyword arguments as a JSON object
    pub task_kwargs: Option<String>,
    /// Inactive definitions never fire
    pub active: bool,
}

impl ScheduledTaskDefinition {
    /// An active definition firing `task` every `count` `unit`s.
    pub fn every(count: u32, unit: IntervalUnit, task: impl Into<String>) -> Self {
        Self {
            interval_unit: unit,
            interval_count: count,
            routing: Routing::default(),
            task: task.into(),
            task_args: None,
            task_kwargs: None,
            active: true,
        }
    }

    /// Set the routing.
    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    /// Set the raw positional argument string.
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.task_args = Some(args.into());
        self
    }

    /// Set the raw keyword argument JSON.
    pub fn with_kwargs(mut self, kwargs: impl Into<String>) -> Self {
        self.task_kwargs = Some(kwargs.into());
        self
    }

    /// Set the active flag.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Positional arguments, parsed from `task_args`.
    pub fn positional_arguments(&self) -> Vec<String> {
        parse_positional_arguments(self.task_args.as_deref())
    }

    /// Keyword arguments, parsed from `task_kwargs`; `{}` if absent.
    pub fn keyword_arguments(&self) -> CarrotResult<Map<String, Value>> {
        let raw = match self.task_kwargs.as_deref().map(str::trim) {
            None | Some("") => return Ok(Map::new()),
            Some(raw) => raw,
        };

        match serde_json::from_str(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(CarrotError::config(
                "keyword arguments must be a JSON object",
            )),
            Err(e) => Err(CarrotError::config(format!(
                "keyword arguments are not valid JSON: {e}"
            ))),
        }
    }

    /// Routing used when firing: exchange defaults to the default exchange
    /// and the routing key to the queue name.
    pub fn dispatch_routing(&self) -> Routing {
        Routing {
            exchange: Some(self.routing.exchange.clone().unwrap_or_default()),
            queue: self.routing.queue.clone(),
            routing_key: self
                .routing
                .routing_key
                .clone()
                .or_else(|| self.routing.queue.clone()),
        }
    }

    /// The invocation a firing publishes.
    pub fn invocation(&self) -> CarrotResult<Invocation> {
        Ok(Invocation {
            task: self.task.clone(),
            args: self
                .positional_arguments()
                .into_iter()
                .map(Value::String)
                .collect(),
            kwargs: self.keyword_arguments()?,
        })
    }

    /// Check interval and arguments without firing.
    pub fn validate(&self) -> CarrotResult<()> {
        if self.task.trim().is_empty() {
            return Err(CarrotError::config("task reference must not be empty"));
        }
        let interval = compute_interval_seconds(self)?;
        if interval > MAX_INTERVAL_SECONDS {
            return Err(CarrotError::config(format!(
                "interval of {interval}s exceeds the maximum of {MAX_INTERVAL_SECONDS}s"
            )));
        }
        self.keyword_arguments()?;
        Ok(())
    }
}

impl fmt::Display for ScheduledTaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.task)
    }
}

/// Seconds between firings of `definition`.
///
/// Fails with `InvalidConfiguration` when the interval count is below 1.
pub fn compute_interval_seconds(definition: &ScheduledTaskDefinition) -> CarrotResult<u64> {
    if definition.interval_count < 1 {
        return Err(CarrotError::config(format!(
            "interval count must be at least 1, got {}",
            definition.interval_count
        )));
    }
    Ok(u64::from(definition.interval_count) * definition.interval_unit.multiplier())
}

/// Split a comma-separated argument string, trimming each entry and dropping
/// empty ones.
pub fn parse_positional_arguments(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|arg| !arg.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}
