use crate::calendar::BucketGrid;
use crate::query::breakdown::Slice;
use crate::query::{MetricSpec, Series};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricInfo {
    pub id: String,
    pub math: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math_property: Option<String>,
    pub order: usize,
}

impl From<&MetricSpec> for MetricInfo {
    fn from(metric: &MetricSpec) -> Self {
        Self {
            id: metric.event.clone(),
            math: metric.math.as_str().to_string(),
            math_property: metric.math_property.clone(),
            order: metric.order,
        }
    }
}

/// One entry of the response list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub data: Vec<f64>,
    pub labels: Vec<String>,
    pub days: Vec<String>,
    pub count: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<MetricInfo>,
}

/// Series computed by the engine, before labeling.
#[derive(Debug, Clone)]
pub enum SliceOutputs {
    /// One combined series per slice, in slice order.
    Formula(Vec<Series>),
    /// One series per (metric, slice), metric-major: index `metric * slices + slice`.
    PerMetric(Vec<Series>),
}

/// Orders and labels the final output.
///
/// With a formula there is one result per slice and the label is the breakdown label, if any.
/// Without one, results are grouped by metric then by slice rank and labeled
/// `"<name>"` or `"<name> - <breakdown label>"`.
pub fn assemble(
    grid: &BucketGrid,
    metrics: &[MetricSpec],
    slices: &[Slice],
    outputs: SliceOutputs,
) -> Vec<TrendResult> {
    let labels = grid.labels();
    let days = grid.days();
    let build = |series: Series, label: Option<String>, slice: &Slice, metric: Option<&MetricSpec>| {
        let count = series.total();
        let (_, data) = series.into_parts();
        debug_assert_eq!(data.len(), grid.len());
        TrendResult {
            label,
            data,
            labels: labels.clone(),
            days: days.clone(),
            count,
            breakdown_value: slice.label().map(str::to_string),
            metric: metric.map(MetricInfo::from),
        }
    };

    match outputs {
        SliceOutputs::Formula(series) => series
            .into_iter()
            .zip(slices)
            .map(|(series, slice)| {
                let label = slice.label().map(str::to_string);
                build(series, label, slice, None)
            })
            .collect(),
        SliceOutputs::PerMetric(series) => {
            if slices.is_empty() {
                return Vec::new();
            }
            series
                .into_iter()
                .enumerate()
                .filter_map(|(index, series)| {
                    let metric = metrics.get(index / slices.len())?;
                    let slice = &slices[index % slices.len()];
                    let label = match slice.label() {
                        Some(value) => format!("{} - {}", metric.display_name(), value),
                        None => metric.display_name().to_string(),
                    };
                    Some(build(series, Some(label), slice, Some(metric)))
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{grid_for, CalendarSettings, Interval, TimeRange};
    use crate::query::EntitySpec;
    use crate::storage::DimensionKey;
    use chrono::{TimeZone, Utc};

    fn grid() -> BucketGrid {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 2, 12, 0, 0).unwrap(),
            Interval::Day,
        );
        grid_for(&range, &CalendarSettings::default())
    }

    fn metrics() -> Vec<MetricSpec> {
        vec![
            MetricSpec::from_entity(0, &EntitySpec::new("signup")).unwrap(),
            MetricSpec::from_entity(1, &EntitySpec::new("purchase").with_name("Purchases")).unwrap(),
        ]
    }

    fn cities() -> Vec<Slice> {
        vec![
            Slice::single("city", DimensionKey::Value("London".to_string()), 5),
            Slice::single("city", DimensionKey::None, 2),
        ]
    }

    #[test]
    fn test_formula_without_breakdown_is_unlabeled() {
        let results = assemble(
            &grid(),
            &metrics(),
            &[Slice::Total],
            SliceOutputs::Formula(vec![Series::new(vec![1.0, 2.0])]),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, None);
        assert_eq!(results[0].count, 3.0);
        assert_eq!(results[0].labels, vec!["1-Jan-2020", "2-Jan-2020"]);
        assert_eq!(results[0].days, vec!["2020-01-01", "2020-01-02"]);
        assert!(results[0].metric.is_none());
    }

    #[test]
    fn test_formula_with_breakdown_uses_breakdown_labels() {
        let results = assemble(
            &grid(),
            &metrics(),
            &cities(),
            SliceOutputs::Formula(vec![Series::new(vec![1.0, 0.0]), Series::new(vec![0.0, 4.0])]),
        );
        let labels: Vec<_> = results.iter().map(|r| r.label.as_deref()).collect();
        assert_eq!(labels, vec![Some("London"), Some("none")]);
        assert_eq!(results[1].breakdown_value.as_deref(), Some("none"));
    }

    #[test]
    fn test_per_metric_order_and_labels() {
        let series = (0..4).map(|i| Series::new(vec![i as f64, 0.0])).collect();
        let results = assemble(&grid(), &metrics(), &cities(), SliceOutputs::PerMetric(series));

        let labels: Vec<_> = results.iter().map(|r| r.label.clone().unwrap()).collect();
        assert_eq!(
            labels,
            vec![
                "signup - London",
                "signup - none",
                "Purchases - London",
                "Purchases - none",
            ]
        );
        assert_eq!(results[2].data, vec![2.0, 0.0]);
        assert_eq!(results[3].metric.as_ref().unwrap().order, 1);
        assert_eq!(results[3].metric.as_ref().unwrap().math, "total");
    }

    #[test]
    fn test_per_metric_without_breakdown() {
        let series = vec![Series::new(vec![1.0, 1.0]), Series::new(vec![0.0, 3.0])];
        let results = assemble(&grid(), &metrics(), &[Slice::Total], SliceOutputs::PerMetric(series));
        assert_eq!(results[0].label.as_deref(), Some("signup"));
        assert_eq!(results[1].label.as_deref(), Some("Purchases"));
        assert_eq!(results[1].breakdown_value, None);
    }

    #[test]
    fn test_serialized_shape() {
        let results = assemble(
            &grid(),
            &metrics(),
            &[Slice::Total],
            SliceOutputs::Formula(vec![Series::new(vec![1.0, 2.0])]),
        );
        let json = serde_json::to_value(&results[0]).unwrap();
        assert!(json.get("label").is_none());
        assert_eq!(json["count"], serde_json::json!(3.0));
        assert_eq!(json["data"], serde_json::json!([1.0, 2.0]));
    }
}
