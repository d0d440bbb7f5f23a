//! Display helpers for operator-facing views of records and definitions.

use crate::error::CarrotResult;
use crate::schedule::ScheduledTaskDefinition;
use crate::task::TaskRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

/// Format used for every displayed timestamp, e.g. `2024-03-01 02:30 PM`.
pub const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %I:%M %p";

/// Format a timestamp for display; `None` stays `None`.
pub fn display_time(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(|time| time.format(DISPLAY_TIME_FORMAT).to_string())
}

/// Keyword arguments as indented JSON. `Map` keeps keys ordered, so nested
/// objects come out sorted as well.
pub fn parsed_content(kwargs: &Map<String, Value>) -> CarrotResult<String> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    kwargs.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Human-readable interval, e.g. `Every 3 hours` or `Every 1 hour`.
pub fn interval_display(definition: &ScheduledTaskDefinition) -> String {
    let unit = definition.interval_unit.as_str();
    let unit = if definition.interval_count == 1 {
        unit.strip_suffix('s').unwrap_or(unit)
    } else {
        unit
    };
    format!("Every {} {}", definition.interval_count, unit)
}

impl TaskRecord {
    /// Publish time, formatted for display.
    pub fn display_publish_time(&self) -> Option<String> {
        display_time(self.publish_time)
    }

    /// Completion time, formatted for display.
    pub fn display_completion_time(&self) -> Option<String> {
        display_time(self.completion_time)
    }

    /// Failure time, formatted for display.
    pub fn display_failure_time(&self) -> Option<String> {
        display_time(self.failure_time)
    }

    /// Keyword arguments, pretty-printed.
    pub fn parsed_content(&self) -> CarrotResult<String> {
        parsed_content(&self.invocation.kwargs)
    }
}

impl ScheduledTaskDefinition {
    /// Human-readable interval.
    pub fn interval_display(&self) -> String {
        interval_display(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::IntervalUnit;
    use crate::task::{Invocation, Routing};
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_display_time() {
        let afternoon = Utc.with_ymd_and_hms(2024, 3, 1, 14, 5, 0).unwrap();
        assert_eq!(display_time(Some(afternoon)).as_deref(), Some("2024-03-01 02:05 PM"));

        let midnight = Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).unwrap();
        assert_eq!(display_time(Some(midnight)).as_deref(), Some("2024-03-01 12:30 AM"));

        assert_eq!(display_time(None), None);
    }

    #[test]
    fn test_record_display_times() {
        let mut record = TaskRecord::new(Routing::queue("default"), Invocation::new("t"), 0);
        assert!(record.display_publish_time().is_none());

        record.failure_time = Some(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 0).unwrap());
        assert_eq!(
            record.display_failure_time().as_deref(),
            Some("2023-12-31 11:59 PM")
        );
        assert!(record.display_completion_time().is_none());
    }

    #[test]
    fn test_parsed_content() {
        let invocation = Invocation::new("t")
            .kwarg("zeta", 1)
            .kwarg("alpha", json!({"b": true, "a": [1, 2]}));
        let record = TaskRecord::new(Routing::queue("default"), invocation, 0);

        let expected = "{\n    \"alpha\": {\n        \"a\": [\n            1,\n            2\n        ],\n        \"b\": true\n    },\n    \"zeta\": 1\n}";
        assert_eq!(record.parsed_content().unwrap(), expected);

        assert_eq!(parsed_content(&Map::new()).unwrap(), "{}");
    }

    #[test]
    fn test_parsed_content_sorts_objects_inside_arrays() {
        let invocation = Invocation::new("t").kwarg("rows", json!([{"y": 2, "x": 1}]));

        let expected = "{\n    \"rows\": [\n        {\n            \"x\": 1,\n            \"y\": 2\n        }\n    ]\n}";
        assert_eq!(parsed_content(&invocation.kwargs).unwrap(), expected);
    }

    #[test]
    fn test_interval_display() {
        let def = ScheduledTaskDefinition::every(3, IntervalUnit::Hours, "t");
        assert_eq!(def.interval_display(), "Every 3 hours");

        let def = ScheduledTaskDefinition::every(1, IntervalUnit::Hours, "t");
        assert_eq!(def.interval_display(), "Every 1 hour");

        let def = ScheduledTaskDefinition::every(1, IntervalUnit::Days, "t");
        assert_eq!(interval_display(&def), "Every 1 day");
    }
}
