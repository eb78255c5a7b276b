use crate::calendar::BucketGrid;
use crate::error::TrendsResult;
use crate::query::filter::Predicate;
use crate::storage::{DimensionKey, EventStore, FetchRequest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use tracing::debug;

pub const OTHER_LABEL: &str = "Other";

/// One dimension value to split by, or the folded remainder of values past the cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakdownValue {
    pub dimension: String,
    pub label: String,
    pub keys: BTreeSet<DimensionKey>,
    /// Matching events seen in the window when the value was resolved.
    pub volume: u64,
    pub is_other: bool,
}

/// The unit of independent computation: one breakdown value, or everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slice {
    Total,
    Breakdown(BreakdownValue),
}

impl Slice {
    pub fn single(dimension: impl Into<String>, key: DimensionKey, volume: u64) -> Self {
        Slice::Breakdown(BreakdownValue {
            dimension: dimension.into(),
            label: key.label().to_string(),
            keys: BTreeSet::from([key]),
            volume,
            is_other: false,
        })
    }

    pub fn dimension(&self) -> Option<&str> {
        match self {
            Slice::Total => None,
            Slice::Breakdown(value) => Some(&value.dimension),
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Slice::Total => None,
            Slice::Breakdown(value) => Some(&value.label),
        }
    }

    pub fn contains(&self, key: &DimensionKey) -> bool {
        match self {
            Slice::Total => true,
            Slice::Breakdown(value) => value.keys.contains(key),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownOverflow {
    /// Values past the cap fold into a single "Other" slice that takes the last slot.
    Other,
    /// Values past the cap are left out.
    Drop,
}

impl FromStr for BreakdownOverflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "other" => Ok(BreakdownOverflow::Other),
            "drop" => Ok(BreakdownOverflow::Drop),
            other => Err(format!("unknown breakdown overflow policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakdownOptions {
    /// Maximum number of slices returned; 0 disables the cap.
    pub limit: usize,
    pub overflow: BreakdownOverflow,
}

impl Default for BreakdownOptions {
    fn default() -> Self {
        Self {
            limit: 25,
            overflow: BreakdownOverflow::Other,
        }
    }
}

/// Enumerates the slices for a query. Without a dimension this is exactly one `Slice::Total`.
///
/// Values come from in-window events of `events` that match `predicates`, ranked by volume
/// (ties in first-seen order).
pub async fn resolve(
    store: &dyn EventStore,
    dimension: Option<&str>,
    events: &[String],
    predicates: &[Predicate],
    grid: &BucketGrid,
    options: BreakdownOptions,
) -> TrendsResult<Vec<Slice>> {
    let Some(dimension) = dimension else {
        return Ok(vec![Slice::Total]);
    };
    let Some((start, end)) = grid.span() else {
        return Ok(Vec::new());
    };

    let mut fetched = HashSet::new();
    let mut rows = Vec::new();
    for event in events {
        if !fetched.insert(event.as_str()) {
            continue;
        }
        let request = FetchRequest::new(event.clone(), start, end)
            .with_predicates(predicates.to_vec())
            .with_dimension(Some(dimension.to_string()));
        rows.extend(store.fetch(&request).await?);
    }
    rows.sort_by_key(|row| row.timestamp);

    let mut volumes: HashMap<DimensionKey, (u64, usize)> = HashMap::new();
    for (seen_at, row) in rows.iter().enumerate() {
        volumes.entry(row.dimension.clone()).or_insert((0, seen_at)).0 += 1;
    }

    let mut ranked: Vec<(DimensionKey, u64, usize)> = volumes
        .into_iter()
        .map(|(key, (volume, first_seen))| (key, volume, first_seen))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    debug!(
        "Breakdown on '{}' found {} distinct values in {} rows",
        dimension,
        ranked.len(),
        rows.len()
    );

    Ok(cap(dimension, ranked, options))
}

fn cap(dimension: &str, ranked: Vec<(DimensionKey, u64, usize)>, options: BreakdownOptions) -> Vec<Slice> {
    let within_cap = options.limit == 0 || ranked.len() <= options.limit;
    let keep = match (within_cap, options.overflow) {
        (true, _) => ranked.len(),
        (false, BreakdownOverflow::Drop) => options.limit,
        (false, BreakdownOverflow::Other) => options.limit - 1,
    };

    let mut ranked = ranked.into_iter();
    let mut slices: Vec<Slice> = ranked
        .by_ref()
        .take(keep)
        .map(|(key, volume, _)| Slice::single(dimension, key, volume))
        .collect();

    if !within_cap && options.overflow == BreakdownOverflow::Other {
        let (keys, volume) = ranked.fold((BTreeSet::new(), 0), |(mut keys, volume), (key, v, _)| {
            keys.insert(key);
            (keys, volume + v)
        });
        slices.push(Slice::Breakdown(BreakdownValue {
            dimension: dimension.to_string(),
            label: OTHER_LABEL.to_string(),
            keys,
            volume,
            is_other: true,
        }));
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{grid_for, CalendarSettings, Interval, TimeRange};
    use crate::storage::MemoryEventStore;
    use crate::Event;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, day, h, 0, 0).unwrap()
    }

    fn grid() -> BucketGrid {
        let range = TimeRange::new(at(1, 0), at(4, 0), Interval::Day);
        grid_for(&range, &CalendarSettings::default())
    }

    fn visit(day: u32, h: u32, location: Option<&str>) -> Event {
        let event = Event::new("visit", "u", at(day, h));
        match location {
            Some(location) => event.with_property("location", location),
            None => event,
        }
    }

    fn store() -> MemoryEventStore {
        MemoryEventStore::from_events(vec![
            visit(1, 1, Some("Paris")),
            visit(1, 2, Some("Berlin")),
            visit(2, 1, Some("London")),
            visit(2, 2, Some("London")),
            visit(2, 3, None),
            visit(3, 1, Some("Paris")),
            visit(3, 2, Some("London")),
            visit(3, 3, Some("Berlin")),
            visit(3, 4, Some("Rome")),
            // outside the grid
            visit(9, 1, Some("Madrid")),
        ])
    }

    fn labels(slices: &[Slice]) -> Vec<&str> {
        slices.iter().filter_map(|s| s.label()).collect()
    }

    async fn run(options: BreakdownOptions) -> Vec<Slice> {
        resolve(
            &store(),
            Some("location"),
            &["visit".to_string()],
            &[],
            &grid(),
            options,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_no_dimension_is_single_total_slice() {
        let slices = resolve(&store(), None, &["visit".to_string()], &[], &grid(), BreakdownOptions::default())
            .await
            .unwrap();
        assert_eq!(slices, vec![Slice::Total]);
        assert_eq!(slices[0].label(), None);
    }

    #[tokio::test]
    async fn test_ranked_by_volume_then_first_seen() {
        let slices = run(BreakdownOptions::default()).await;
        // London 3, Paris 2, Berlin 2 (Paris seen first), none 1, Rome 1
        assert_eq!(labels(&slices), vec!["London", "Paris", "Berlin", "none", "Rome"]);
        assert!(slices[3].contains(&DimensionKey::None));
    }

    #[tokio::test]
    async fn test_cap_folds_into_other() {
        let options = BreakdownOptions {
            limit: 3,
            overflow: BreakdownOverflow::Other,
        };
        let slices = run(options).await;
        assert_eq!(labels(&slices), vec!["London", "Paris", OTHER_LABEL]);

        let Slice::Breakdown(other) = &slices[2] else {
            panic!("expected a breakdown slice");
        };
        assert!(other.is_other);
        assert_eq!(other.volume, 4);
        assert!(slices[2].contains(&DimensionKey::Value("Rome".to_string())));
        assert!(!slices[2].contains(&DimensionKey::Value("London".to_string())));
    }

    #[tokio::test]
    async fn test_cap_drop_policy() {
        let options = BreakdownOptions {
            limit: 2,
            overflow: BreakdownOverflow::Drop,
        };
        assert_eq!(labels(&run(options).await), vec!["London", "Paris"]);
    }

    #[tokio::test]
    async fn test_duplicate_events_counted_once() {
        let slices = resolve(
            &store(),
            Some("location"),
            &["visit".to_string(), "visit".to_string()],
            &[],
            &grid(),
            BreakdownOptions::default(),
        )
        .await
        .unwrap();
        let Slice::Breakdown(london) = &slices[0] else {
            panic!("expected a breakdown slice");
        };
        assert_eq!(london.volume, 3);
    }

    #[tokio::test]
    async fn test_predicates_limit_values() {
        let only_paris = vec![Predicate::exact("location", "Paris").unwrap()];
        let slices = resolve(
            &store(),
            Some("location"),
            &["visit".to_string()],
            &only_paris,
            &grid(),
            BreakdownOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(labels(&slices), vec!["Paris"]);
    }

    #[tokio::test]
    async fn test_empty_grid_has_no_slices() {
        let range = TimeRange::new(at(4, 0), at(1, 0), Interval::Day);
        let empty = grid_for(&range, &CalendarSettings::default());
        let slices = resolve(&store(), Some("location"), &["visit".to_string()], &[], &empty, BreakdownOptions::default())
            .await
            .unwrap();
        assert!(slices.is_empty());
    }
}
