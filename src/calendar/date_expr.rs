use crate::error::{TrendsError, TrendsResult};
use chrono::{DateTime, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeUnit {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl RelativeUnit {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'h' => Some(RelativeUnit::Hour),
            'd' => Some(RelativeUnit::Day),
            'w' => Some(RelativeUnit::Week),
            'm' => Some(RelativeUnit::Month),
            'y' => Some(RelativeUnit::Year),
            _ => None,
        }
    }

    fn as_char(&self) -> char {
        match self {
            RelativeUnit::Hour => 'h',
            RelativeUnit::Day => 'd',
            RelativeUnit::Week => 'w',
            RelativeUnit::Month => 'm',
            RelativeUnit::Year => 'y',
        }
    }
}

/// `-<magnitude><unit>`, anchored on the caller's `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeDate {
    pub magnitude: u32,
    pub unit: RelativeUnit,
}

impl RelativeDate {
    pub fn new(magnitude: u32, unit: RelativeUnit) -> Self {
        Self { magnitude, unit }
    }

    /// Hours keep the time of day; every other unit snaps to local midnight.
    pub fn resolve(&self, now: DateTime<Utc>, offset: FixedOffset) -> TrendsResult<DateTime<Utc>> {
        let today = to_local(now, offset).date();
        let day = match self.unit {
            RelativeUnit::Hour => {
                return now
                    .checked_sub_signed(Duration::hours(self.magnitude as i64))
                    .ok_or_else(|| TrendsError::InvalidRange(format!("relative date {} out of range", self)))
            }
            RelativeUnit::Day => today.checked_sub_signed(Duration::days(self.magnitude as i64)),
            RelativeUnit::Week => today.checked_sub_signed(Duration::weeks(self.magnitude as i64)),
            RelativeUnit::Month => today.checked_sub_months(Months::new(self.magnitude)),
            RelativeUnit::Year => self
                .magnitude
                .checked_mul(12)
                .and_then(|months| today.checked_sub_months(Months::new(months))),
        };

        day.map(|d| from_local(d.and_time(NaiveTime::MIN), offset))
            .ok_or_else(|| TrendsError::InvalidRange(format!("relative date {} out of range", self)))
    }
}

impl fmt::Display for RelativeDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-{}{}", self.magnitude, self.unit.as_char())
    }
}

impl FromStr for RelativeDate {
    type Err = TrendsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TrendsError::InvalidRange(format!("malformed relative date '{}'", s));

        let body = s.trim().strip_prefix('-').ok_or_else(invalid)?;
        let unit_char = body.chars().last().ok_or_else(invalid)?;
        let unit = RelativeUnit::from_char(unit_char).ok_or_else(invalid)?;
        let digits = &body[..body.len() - unit_char.len_utf8()];
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let magnitude = digits.parse::<u32>().map_err(|_| invalid())?;

        Ok(RelativeDate::new(magnitude, unit))
    }
}

/// One end of a requested date range, parsed once at the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    /// Carries its own offset (RFC 3339).
    Instant(DateTime<Utc>),
    /// Wall-clock time in the configured local offset.
    Local(NaiveDateTime),
    Relative(RelativeDate),
}

impl DateBound {
    pub fn resolve(&self, now: DateTime<Utc>, offset: FixedOffset) -> TrendsResult<DateTime<Utc>> {
        match self {
            DateBound::Instant(instant) => Ok(*instant),
            DateBound::Local(naive) => Ok(from_local(*naive, offset)),
            DateBound::Relative(relative) => relative.resolve(now, offset),
        }
    }
}

impl FromStr for DateBound {
    type Err = TrendsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.starts_with('-') {
            return trimmed.parse::<RelativeDate>().map(DateBound::Relative);
        }

        if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(DateBound::Instant(instant.with_timezone(&Utc)));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
            return Ok(DateBound::Local(naive));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
            return Ok(DateBound::Local(naive));
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Ok(DateBound::Local(date.and_time(NaiveTime::MIN)));
        }

        Err(TrendsError::InvalidRange(format!("unrecognised date '{}'", s)))
    }
}

pub(crate) fn to_local(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    instant.with_timezone(&offset).naive_local()
}

pub(crate) fn from_local(naive: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    let utc = naive - Duration::seconds(offset.local_minus_utc() as i64);
    Utc.from_utc_datetime(&utc)
}
