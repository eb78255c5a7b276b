pub mod calendar;
pub mod error;
pub mod query;
pub mod storage;

pub use calendar::{BucketGrid, CalendarSettings, Interval, TimeRange, WeekStart};
pub use error::{TrendsError, TrendsResult};
pub use query::aggregation::{AggregationOptions, DistinctCountMode};
pub use query::breakdown::{BreakdownOptions, BreakdownOverflow, Slice};
pub use query::engine::TrendsEngine;
pub use query::response::TrendResult;
pub use query::{EntitySpec, QueryPlan, QuerySpec, Series};
pub use storage::{EventStore, MemoryEventStore};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::warn;

/// A single recorded event.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub distinct_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Event {
    pub fn new(event: impl Into<String>, distinct_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event: event.into(),
            distinct_id: distinct_id.into(),
            timestamp,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct TrendsConfig {
    /// Maximum number of breakdown slices; 0 disables the cap.
    pub breakdown_limit: usize,
    pub breakdown_overflow: BreakdownOverflow,
    pub week_start: WeekStart,
    pub utc_offset_seconds: i32,
    pub distinct_count_mode: DistinctCountMode,
    /// Used when a query omits `date_from`.
    pub default_date_from: String,
    pub parallel_slices: bool,
    // Server configuration
    pub bind_address: String,
    pub events_file: Option<String>,
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            breakdown_limit: 25,
            breakdown_overflow: BreakdownOverflow::Other,
            week_start: WeekStart::Sunday,
            utc_offset_seconds: 0,
            distinct_count_mode: DistinctCountMode::PerBucket,
            default_date_from: "-7d".to_string(),
            parallel_slices: true,
            bind_address: "0.0.0.0:8080".to_string(),
            events_file: None,
        }
    }
}

impl TrendsConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(limit) = env_parse("BREAKDOWN_LIMIT") {
            config.breakdown_limit = limit;
        }

        if let Some(overflow) = env_parse("BREAKDOWN_OVERFLOW") {
            config.breakdown_overflow = overflow;
        }

        if let Some(week_start) = env_parse("WEEK_START") {
            config.week_start = week_start;
        }

        if let Some(offset) = env_parse("UTC_OFFSET_SECONDS") {
            config.utc_offset_seconds = offset;
        }

        if let Some(mode) = env_parse("DISTINCT_COUNT_MODE") {
            config.distinct_count_mode = mode;
        }

        if let Ok(date_from) = std::env::var("DEFAULT_DATE_FROM") {
            config.default_date_from = date_from;
        }

        if let Some(parallel) = env_parse("PARALLEL_SLICES") {
            config.parallel_slices = parallel;
        }

        if let Ok(bind_addr) = std::env::var("BIND_ADDRESS") {
            config.bind_address = bind_addr;
        }

        if let Ok(events_file) = std::env::var("EVENTS_FILE") {
            config.events_file = Some(events_file).filter(|f| !f.is_empty());
        }

        config
    }

    pub fn calendar_settings(&self) -> TrendsResult<CalendarSettings> {
        CalendarSettings::new(self.utc_offset_seconds, self.week_start)
    }

    pub fn aggregation_options(&self) -> AggregationOptions {
        AggregationOptions {
            distinct_count_mode: self.distinct_count_mode,
        }
    }

    pub fn breakdown_options(&self) -> BreakdownOptions {
        BreakdownOptions {
            limit: self.breakdown_limit,
            overflow: self.breakdown_overflow,
        }
    }
}

/// Unparseable values are logged and ignored so the default stays in effect.
fn env_parse<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {}={}: {}", name, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_deserializes_with_defaults() {
        let event: Event =
            serde_json::from_str(r#"{"event": "signup", "timestamp": "2020-01-02T13:01:01Z"}"#).unwrap();
        assert_eq!(event.event, "signup");
        assert_eq!(event.distinct_id, "");
        assert!(event.properties.is_empty());
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2020, 1, 2, 13, 1, 1).unwrap());
    }

    #[test]
    fn test_config_defaults() {
        let config = TrendsConfig::default();
        assert_eq!(config.breakdown_options(), BreakdownOptions::default());
        assert_eq!(config.aggregation_options(), AggregationOptions::default());
        assert_eq!(config.calendar_settings().unwrap(), CalendarSettings::default());
    }

    #[test]
    fn test_out_of_range_offset_is_rejected() {
        let config = TrendsConfig {
            utc_offset_seconds: 90_000,
            ..TrendsConfig::default()
        };
        assert!(matches!(config.calendar_settings(), Err(TrendsError::InvalidRange(_))));
    }
}
