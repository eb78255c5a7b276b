pub mod aggregation;
pub mod breakdown;
pub mod engine;
pub mod filter;
pub mod formula;
pub mod response;

use crate::calendar::{grid_for, BucketGrid, CalendarSettings, DateBound, Interval, TimeRange};
use crate::error::{TrendsError, TrendsResult};
use crate::TrendsConfig;
use chrono::{DateTime, Utc};
use filter::{Predicate, PropertySpec};
use formula::Formula;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathType {
    Count,
    DistinctCount,
    Sum,
    Avg,
    Min,
    Max,
    Median,
    P90,
    P95,
    P99,
}

impl MathType {
    pub fn requires_property(&self) -> bool {
        !matches!(self, MathType::Count | MathType::DistinctCount)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MathType::Count => "total",
            MathType::DistinctCount => "dau",
            MathType::Sum => "sum",
            MathType::Avg => "avg",
            MathType::Min => "min",
            MathType::Max => "max",
            MathType::Median => "median",
            MathType::P90 => "p90",
            MathType::P95 => "p95",
            MathType::P99 => "p99",
        }
    }
}

impl FromStr for MathType {
    type Err = TrendsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total" | "count" => Ok(MathType::Count),
            "dau" | "distinct_count" | "unique" => Ok(MathType::DistinctCount),
            "sum" => Ok(MathType::Sum),
            "avg" => Ok(MathType::Avg),
            "min" => Ok(MathType::Min),
            "max" => Ok(MathType::Max),
            "median" => Ok(MathType::Median),
            "p90" => Ok(MathType::P90),
            "p95" => Ok(MathType::P95),
            "p99" => Ok(MathType::P99),
            other => Err(TrendsError::InvalidMetric(format!("unknown math '{}'", other))),
        }
    }
}

/// One requested metric as it arrives in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math_property: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EntitySpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            math: None,
            math_property: None,
            properties: Vec::new(),
            name: None,
        }
    }

    pub fn with_math(mut self, math: impl Into<String>) -> Self {
        self.math = Some(math.into());
        self
    }

    pub fn with_math_property(mut self, property: impl Into<String>) -> Self {
        self.math_property = Some(property.into());
        self
    }

    pub fn with_property(mut self, property: PropertySpec) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A trends request. Everything stays a string until `QueryPlan::build` validates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub events: Vec<EntitySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, entity: EntitySpec) -> Self {
        self.events.push(entity);
        self
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_breakdown(mut self, key: impl Into<String>) -> Self {
        self.breakdown = Some(key.into());
        self
    }

    pub fn with_property(mut self, property: PropertySpec) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_date_from(mut self, date_from: impl Into<String>) -> Self {
        self.date_from = Some(date_from.into());
        self
    }

    pub fn with_date_to(mut self, date_to: impl Into<String>) -> Self {
        self.date_to = Some(date_to.into());
        self
    }

    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());
        self
    }
}

/// A validated metric, lettered by its position in the request.
#[derive(Debug, Clone)]
pub struct MetricSpec {
    pub order: usize,
    pub event: String,
    pub math: MathType,
    pub math_property: Option<String>,
    pub predicates: Vec<Predicate>,
    pub name: Option<String>,
}

impl MetricSpec {
    pub fn from_entity(order: usize, entity: &EntitySpec) -> TrendsResult<Self> {
        if entity.id.trim().is_empty() {
            return Err(TrendsError::InvalidMetric(format!("metric {} has no event id", letter(order))));
        }

        let math = match entity.math.as_deref() {
            Some(math) => math.parse()?,
            None => MathType::Count,
        };
        let math_property = entity.math_property.clone().filter(|p| !p.is_empty());
        if math.requires_property() && math_property.is_none() {
            return Err(TrendsError::InvalidMetric(format!(
                "math '{}' on '{}' requires math_property",
                math.as_str(),
                entity.id
            )));
        }

        let predicates = entity
            .properties
            .iter()
            .map(Predicate::from_spec)
            .collect::<TrendsResult<Vec<_>>>()?;

        Ok(Self {
            order,
            event: entity.id.clone(),
            math,
            math_property,
            predicates,
            name: entity.name.clone(),
        })
    }

    pub fn letter(&self) -> char {
        letter(self.order)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.event)
    }
}

pub(crate) fn letter(order: usize) -> char {
    (b'A' + (order % 26) as u8) as char
}

/// A numeric series aligned to a bucket grid. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    label: Option<String>,
    data: Vec<f64>,
}

impl Series {
    pub fn new(data: Vec<f64>) -> Self {
        Self { label: None, data }
    }

    pub fn zeros(len: usize) -> Self {
        Self::new(vec![0.0; len])
    }

    pub fn labeled(self, label: Option<String>) -> Self {
        Self { label, data: self.data }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sum of all buckets; 0 if it overflows.
    pub fn total(&self) -> f64 {
        formula::finite_or_zero(self.data.iter().sum())
    }

    pub fn into_parts(self) -> (Option<String>, Vec<f64>) {
        (self.label, self.data)
    }
}

/// Everything a request needs, validated up front so execution never fails on input.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub metrics: Vec<MetricSpec>,
    pub formula: Option<Formula>,
    pub breakdown: Option<String>,
    pub predicates: Vec<Predicate>,
    pub range: TimeRange,
    pub grid: Arc<BucketGrid>,
}

impl QueryPlan {
    pub fn build(spec: &QuerySpec, now: DateTime<Utc>, config: &TrendsConfig) -> TrendsResult<Self> {
        let settings = config.calendar_settings()?;

        if spec.events.is_empty() {
            return Err(TrendsError::InvalidMetric("query has no events".to_string()));
        }
        if spec.events.len() > 26 {
            return Err(TrendsError::InvalidMetric(format!(
                "at most 26 events can be combined, got {}",
                spec.events.len()
            )));
        }
        let metrics = spec
            .events
            .iter()
            .enumerate()
            .map(|(order, entity)| MetricSpec::from_entity(order, entity))
            .collect::<TrendsResult<Vec<_>>>()?;

        let formula = match spec.formula.as_deref().map(str::trim) {
            Some(source) if !source.is_empty() => {
                let formula = Formula::parse(source)?;
                formula.check_references(metrics.len())?;
                Some(formula)
            }
            _ => None,
        };

        let predicates = spec
            .properties
            .iter()
            .map(Predicate::from_spec)
            .collect::<TrendsResult<Vec<_>>>()?;

        let range = resolve_range(spec, now, config, &settings)?;
        let grid = Arc::new(grid_for(&range, &settings));

        Ok(Self {
            metrics,
            formula,
            breakdown: spec.breakdown.clone().filter(|key| !key.is_empty()),
            predicates,
            range,
            grid,
        })
    }
}

fn resolve_range(
    spec: &QuerySpec,
    now: DateTime<Utc>,
    config: &TrendsConfig,
    settings: &CalendarSettings,
) -> TrendsResult<TimeRange> {
    let interval = match spec.interval.as_deref() {
        Some(interval) => interval.parse()?,
        None => Interval::Day,
    };
    let date_from: DateBound = spec
        .date_from
        .as_deref()
        .unwrap_or(config.default_date_from.as_str())
        .parse()?;
    let date_to = spec.date_to.as_deref().map(DateBound::from_str).transpose()?;

    TimeRange::resolve(&date_from, date_to.as_ref(), interval, now, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 4, 13, 1, 1).unwrap()
    }

    fn session_spec() -> QuerySpec {
        QuerySpec::new()
            .with_event(
                EntitySpec::new("session start")
                    .with_math("sum")
                    .with_math_property("session duration"),
            )
            .with_event(
                EntitySpec::new("session start")
                    .with_math("avg")
                    .with_math_property("session duration"),
            )
    }

    #[test]
    fn test_math_parsing() {
        assert_eq!("total".parse::<MathType>().unwrap(), MathType::Count);
        assert_eq!("dau".parse::<MathType>().unwrap(), MathType::DistinctCount);
        assert_eq!("p95".parse::<MathType>().unwrap(), MathType::P95);
        assert!(matches!("mode".parse::<MathType>(), Err(TrendsError::InvalidMetric(_))));
        assert!(MathType::Avg.requires_property());
        assert!(!MathType::DistinctCount.requires_property());
    }

    #[test]
    fn test_plan_defaults() {
        let plan = QueryPlan::build(&session_spec(), now(), &TrendsConfig::default()).unwrap();
        assert_eq!(plan.metrics.len(), 2);
        assert_eq!(plan.metrics[1].letter(), 'B');
        assert_eq!(plan.range.interval, Interval::Day);
        assert_eq!(plan.grid.len(), 8);
        assert!(plan.formula.is_none());
        assert!(plan.breakdown.is_none());
    }

    #[test]
    fn test_plan_rejects_missing_math_property() {
        let spec = QuerySpec::new().with_event(EntitySpec::new("session start").with_math("sum"));
        let err = QueryPlan::build(&spec, now(), &TrendsConfig::default()).unwrap_err();
        assert!(matches!(err, TrendsError::InvalidMetric(_)));
    }

    #[test]
    fn test_series_total_stays_finite() {
        assert_eq!(Series::new(vec![1.5, 2.5]).total(), 4.0);
        assert_eq!(Series::new(vec![f64::MAX, f64::MAX]).total(), 0.0);
    }

    #[test]
    fn test_plan_rejects_empty_events() {
        let err = QueryPlan::build(&QuerySpec::new(), now(), &TrendsConfig::default()).unwrap_err();
        assert!(matches!(err, TrendsError::InvalidMetric(_)));
    }

    #[test]
    fn test_plan_rejects_undefined_formula_letter() {
        let spec = session_spec().with_formula("A + C");
        let err = QueryPlan::build(&spec, now(), &TrendsConfig::default()).unwrap_err();
        assert!(matches!(err, TrendsError::FormulaError(_)));
    }

    #[test]
    fn test_plan_rejects_bad_range() {
        let spec = session_spec().with_date_from("-3q");
        assert!(matches!(
            QueryPlan::build(&spec, now(), &TrendsConfig::default()),
            Err(TrendsError::InvalidRange(_))
        ));

        let spec = session_spec().with_interval("decade");
        assert!(matches!(
            QueryPlan::build(&spec, now(), &TrendsConfig::default()),
            Err(TrendsError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_plan_inverted_range_is_not_an_error() {
        let spec = session_spec().with_date_from("2020-01-05").with_date_to("2020-01-01");
        let plan = QueryPlan::build(&spec, now(), &TrendsConfig::default()).unwrap();
        assert!(plan.grid.is_empty());
    }

    #[test]
    fn test_blank_formula_is_ignored() {
        let plan = QueryPlan::build(&session_spec().with_formula("  "), now(), &TrendsConfig::default()).unwrap();
        assert!(plan.formula.is_none());
    }

    #[test]
    fn test_query_spec_from_json() {
        let spec: QuerySpec = serde_json::from_str(
            r#"{
                "events": [{"id": "session start", "math": "sum", "math_property": "session duration"}],
                "formula": "A * 2",
                "properties": [{"key": "$current_url", "value": "http://example.org"}],
                "date_from": "-3d",
                "interval": "day"
            }"#,
        )
        .unwrap();
        assert_eq!(spec.events[0].math.as_deref(), Some("sum"));
        assert_eq!(spec.properties[0].operator, None);

        let plan = QueryPlan::build(&spec, now(), &TrendsConfig::default()).unwrap();
        assert_eq!(plan.predicates.len(), 1);
        assert!(plan.formula.is_some());
    }

    #[test]
    fn test_series_accessors() {
        let series = Series::new(vec![1.0, 2.0, 3.5]).labeled(Some("A".to_string()));
        assert_eq!(series.label(), Some("A"));
        assert_eq!(series.total(), 6.5);
        assert_eq!(Series::zeros(3).data(), &[0.0, 0.0, 0.0]);
    }
}
