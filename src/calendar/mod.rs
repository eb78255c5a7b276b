pub mod date_expr;

pub use date_expr::{DateBound, RelativeDate, RelativeUnit};

use crate::error::{TrendsError, TrendsResult};
use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDateTime, NaiveTime, Offset, Timelike, Utc};
use date_expr::{from_local, to_local};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute => "minute",
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        }
    }

    fn is_sub_daily(&self) -> bool {
        matches!(self, Interval::Minute | Interval::Hour)
    }
}

impl FromStr for Interval {
    type Err = TrendsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(Interval::Minute),
            "hour" => Ok(Interval::Hour),
            "day" => Ok(Interval::Day),
            "week" => Ok(Interval::Week),
            "month" => Ok(Interval::Month),
            other => Err(TrendsError::InvalidRange(format!("unknown interval '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    Sunday,
    Monday,
}

impl FromStr for WeekStart {
    type Err = TrendsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sunday" => Ok(WeekStart::Sunday),
            "monday" => Ok(WeekStart::Monday),
            other => Err(TrendsError::InvalidRange(format!("unknown week start '{}'", other))),
        }
    }
}

/// Where bucket boundaries fall: the local offset for "midnight" and the first day of a week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarSettings {
    pub offset: FixedOffset,
    pub week_start: WeekStart,
}

impl CalendarSettings {
    pub fn new(utc_offset_seconds: i32, week_start: WeekStart) -> TrendsResult<Self> {
        let offset = FixedOffset::east_opt(utc_offset_seconds).ok_or_else(|| {
            TrendsError::InvalidRange(format!("UTC offset {}s out of range", utc_offset_seconds))
        })?;
        Ok(Self { offset, week_start })
    }
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
            week_start: WeekStart::Sunday,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: Interval,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, interval: Interval) -> Self {
        Self { start, end, interval }
    }

    /// Resolves both bounds against `now`. A missing `date_to` means `now`.
    pub fn resolve(
        date_from: &DateBound,
        date_to: Option<&DateBound>,
        interval: Interval,
        now: DateTime<Utc>,
        settings: &CalendarSettings,
    ) -> TrendsResult<Self> {
        let start = date_from.resolve(now, settings.offset)?;
        let end = match date_to {
            Some(bound) => bound.resolve(now, settings.offset)?,
            None => now,
        };
        Ok(Self::new(start, end, interval))
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

/// Bucket boundaries for one range. Holds `len() + 1` boundaries when non-empty,
/// so bucket `i` covers `[boundaries[i], boundaries[i + 1])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketGrid {
    interval: Interval,
    offset: FixedOffset,
    boundaries: Vec<DateTime<Utc>>,
}

impl BucketGrid {
    pub fn empty(interval: Interval, offset: FixedOffset) -> Self {
        Self {
            interval,
            offset,
            boundaries: Vec::new(),
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.boundaries.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn starts(&self) -> &[DateTime<Utc>] {
        &self.boundaries[..self.len()]
    }

    pub fn bucket(&self, index: usize) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if index >= self.len() {
            return None;
        }
        Some((self.boundaries[index], self.boundaries[index + 1]))
    }

    /// Half-open span covered by the whole grid.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.boundaries.first(), self.boundaries.last()) {
            (Some(first), Some(last)) if self.len() > 0 => Some((*first, *last)),
            _ => None,
        }
    }

    pub fn index_of(&self, timestamp: DateTime<Utc>) -> Option<usize> {
        let (first, last) = self.span()?;
        if timestamp < first || timestamp >= last {
            return None;
        }
        Some(self.boundaries.partition_point(|b| *b <= timestamp) - 1)
    }

    /// Display label per bucket, e.g. `2-Jan-2020` or `2-Jan-2020 13:00`.
    pub fn labels(&self) -> Vec<String> {
        let format = if self.interval.is_sub_daily() {
            "%-d-%b-%Y %H:%M"
        } else {
            "%-d-%b-%Y"
        };
        self.format_starts(format)
    }

    /// ISO date (or date-time for sub-daily intervals) per bucket.
    pub fn days(&self) -> Vec<String> {
        let format = if self.interval.is_sub_daily() {
            "%Y-%m-%d %H:%M:%S"
        } else {
            "%Y-%m-%d"
        };
        self.format_starts(format)
    }

    fn format_starts(&self, format: &str) -> Vec<String> {
        self.starts()
            .iter()
            .map(|start| to_local(*start, self.offset).format(format).to_string())
            .collect()
    }
}

/// Builds the bucket grid for a request. Pure in its inputs: `now` is never read from the clock.
pub fn buckets(
    date_from: &DateBound,
    date_to: Option<&DateBound>,
    interval: Interval,
    now: DateTime<Utc>,
    settings: &CalendarSettings,
) -> TrendsResult<BucketGrid> {
    let range = TimeRange::resolve(date_from, date_to, interval, now, settings)?;
    Ok(grid_for(&range, settings))
}

pub fn grid_for(range: &TimeRange, settings: &CalendarSettings) -> BucketGrid {
    if range.is_empty() {
        return BucketGrid::empty(range.interval, settings.offset);
    }

    let end_local = to_local(range.end, settings.offset);
    let mut cursor = align(to_local(range.start, settings.offset), range.interval, settings.week_start);
    let mut boundaries = Vec::new();

    while cursor <= end_local {
        boundaries.push(from_local(cursor, settings.offset));
        match advance(cursor, range.interval) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    // closing boundary of the trailing (possibly partial) bucket
    boundaries.push(from_local(cursor, settings.offset));

    BucketGrid {
        interval: range.interval,
        offset: settings.offset,
        boundaries,
    }
}

fn align(local: NaiveDateTime, interval: Interval, week_start: WeekStart) -> NaiveDateTime {
    let midnight = local.date().and_time(NaiveTime::MIN);
    match interval {
        Interval::Minute => midnight + Duration::minutes((local.hour() * 60 + local.minute()) as i64),
        Interval::Hour => midnight + Duration::hours(local.hour() as i64),
        Interval::Day => midnight,
        Interval::Week => {
            let into_week = match week_start {
                WeekStart::Sunday => local.weekday().num_days_from_sunday(),
                WeekStart::Monday => local.weekday().num_days_from_monday(),
            };
            midnight - Duration::days(into_week as i64)
        }
        Interval::Month => midnight - Duration::days(local.day0() as i64),
    }
}

fn advance(bucket_start: NaiveDateTime, interval: Interval) -> Option<NaiveDateTime> {
    match interval {
        Interval::Minute => bucket_start.checked_add_signed(Duration::minutes(1)),
        Interval::Hour => bucket_start.checked_add_signed(Duration::hours(1)),
        Interval::Day => bucket_start.checked_add_signed(Duration::days(1)),
        Interval::Week => bucket_start.checked_add_signed(Duration::weeks(1)),
        Interval::Month => bucket_start.checked_add_months(Months::new(1)),
    }
}
