use crate::calendar::BucketGrid;
use crate::error::TrendsResult;
use crate::query::breakdown::Slice;
use crate::query::filter::Predicate;
use crate::query::formula::finite_or_zero;
use crate::query::{MathType, MetricSpec, Series};
use crate::storage::{EventRow, EventStore, FetchRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::debug;

/// Reduces the rows of one bucket to a number. Empty input gives 0.
pub type Aggregator = fn(&[&EventRow]) -> f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistinctCountMode {
    /// Distinct entities within each bucket.
    PerBucket,
    /// Distinct entities from the grid start through the end of each bucket.
    Cumulative,
}

impl FromStr for DistinctCountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_bucket" => Ok(DistinctCountMode::PerBucket),
            "cumulative" => Ok(DistinctCountMode::Cumulative),
            other => Err(format!("unknown distinct count mode '{}'", other)),
        }
    }
}

impl MathType {
    pub fn aggregator(&self) -> Aggregator {
        match self {
            MathType::Count => count,
            MathType::DistinctCount => distinct_count,
            MathType::Sum => sum,
            MathType::Avg => avg,
            MathType::Min => min,
            MathType::Max => max,
            MathType::Median => median,
            MathType::P90 => p90,
            MathType::P95 => p95,
            MathType::P99 => p99,
        }
    }
}

fn values<'a>(rows: &'a [&'a EventRow]) -> impl Iterator<Item = f64> + 'a {
    rows.iter().filter_map(|row| row.value)
}

fn count(rows: &[&EventRow]) -> f64 {
    rows.len() as f64
}

fn distinct_count(rows: &[&EventRow]) -> f64 {
    rows.iter()
        .map(|row| row.distinct_id.as_str())
        .collect::<HashSet<_>>()
        .len() as f64
}

fn sum(rows: &[&EventRow]) -> f64 {
    values(rows).sum()
}

fn avg(rows: &[&EventRow]) -> f64 {
    let (total, n) = values(rows).fold((0.0, 0usize), |(total, n), v| (total + v, n + 1));
    if n == 0 {
        0.0
    } else {
        total / n as f64
    }
}

fn min(rows: &[&EventRow]) -> f64 {
    values(rows).reduce(f64::min).unwrap_or(0.0)
}

fn max(rows: &[&EventRow]) -> f64 {
    values(rows).reduce(f64::max).unwrap_or(0.0)
}

fn median(rows: &[&EventRow]) -> f64 {
    percentile(rows, 0.5)
}

fn p90(rows: &[&EventRow]) -> f64 {
    percentile(rows, 0.9)
}

fn p95(rows: &[&EventRow]) -> f64 {
    percentile(rows, 0.95)
}

fn p99(rows: &[&EventRow]) -> f64 {
    percentile(rows, 0.99)
}

/// Linear interpolation between closest ranks.
fn percentile(rows: &[&EventRow], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values(rows).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = q * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationOptions {
    pub distinct_count_mode: DistinctCountMode,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            distinct_count_mode: DistinctCountMode::PerBucket,
        }
    }
}

/// Computes one series for `metric` restricted to `slice`, aligned to `grid`.
pub async fn aggregate(
    store: &dyn EventStore,
    metric: &MetricSpec,
    global: &[Predicate],
    grid: &BucketGrid,
    slice: &Slice,
    options: AggregationOptions,
) -> TrendsResult<Series> {
    let Some((start, end)) = grid.span() else {
        return Ok(Series::zeros(0));
    };

    let mut predicates = global.to_vec();
    predicates.extend(metric.predicates.iter().cloned());

    let request = FetchRequest::new(metric.event.clone(), start, end)
        .with_predicates(predicates)
        .with_dimension(slice.dimension().map(str::to_string))
        .with_property(metric.math_property.clone());
    let rows = store.fetch(&request).await?;

    let mut per_bucket: Vec<Vec<&EventRow>> = vec![Vec::new(); grid.len()];
    for row in rows.iter().filter(|row| slice.contains(&row.dimension)) {
        if let Some(index) = grid.index_of(row.timestamp) {
            per_bucket[index].push(row);
        }
    }

    debug!(
        "Aggregated {} rows for {}({}) over {} buckets",
        rows.len(),
        metric.math.as_str(),
        metric.event,
        grid.len()
    );

    let data = if metric.math == MathType::DistinctCount
        && options.distinct_count_mode == DistinctCountMode::Cumulative
    {
        cumulative_distinct(&per_bucket)
    } else {
        let aggregator = metric.math.aggregator();
        per_bucket
            .iter()
            .map(|bucket| finite_or_zero(aggregator(bucket.as_slice())))
            .collect()
    };

    Ok(Series::new(data))
}

fn cumulative_distinct(per_bucket: &[Vec<&EventRow>]) -> Vec<f64> {
    let mut seen = HashSet::new();
    per_bucket
        .iter()
        .map(|bucket| {
            seen.extend(bucket.iter().map(|row| row.distinct_id.as_str()));
            seen.len() as f64
        })
        .collect()
}
