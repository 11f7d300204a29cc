//! Time-encoded tracker keys
//!
//! A key is the entity id followed by a zero-padded `YYMM` (users, monthly
//! grain) or `YYMMDD` (posts and comments, daily grain). For a fixed entity id
//! lexicographic key order is chronological order, which is what makes the
//! range scans in [`crate::resolver`] work.

use crate::error::{Result, TrackingError};
use crate::types::TrackerKind;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Two-digit years only sort correctly inside one century
const FIRST_YEAR: i32 = 2000;
const LAST_YEAR: i32 = 2099;

/// Address of one tracker document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackerKey {
    kind: TrackerKind,
    entity_id: String,
    period_start: NaiveDate,
    day_of_month: u32,
    id: String,
}

impl TrackerKey {
    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// First day of the bucket (the day itself for daily trackers)
    pub fn period_start(&self) -> NaiveDate {
        self.period_start
    }

    /// Day of the event inside the bucket; addresses a user tracker's day slot
    pub fn day_of_month(&self) -> u32 {
        self.day_of_month
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of day slots a monthly tracker at this key carries
    pub fn days_in_month(&self) -> u32 {
        days_in_month(self.period_start)
    }
}

impl std::fmt::Display for TrackerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Build the key of the tracker that covers `at` for an entity
pub fn build_key(kind: TrackerKind, entity_id: &str, at: NaiveDate) -> Result<TrackerKey> {
    if entity_id.is_empty() {
        return Err(TrackingError::InvalidArgument(format!(
            "cannot build a {} tracker key for an empty id",
            kind
        )));
    }

    if !(FIRST_YEAR..=LAST_YEAR).contains(&at.year()) {
        return Err(TrackingError::InvalidArgument(format!(
            "date {} is outside the supported range {}..={}",
            at, FIRST_YEAR, LAST_YEAR
        )));
    }

    let yy = at.year() % 100;
    let (period_start, id) = if kind.is_monthly() {
        let first = at.with_day(1).ok_or_else(|| {
            TrackingError::InvalidArgument(format!("no first day for month of {}", at))
        })?;
        (first, format!("{}{:02}{:02}", entity_id, yy, at.month()))
    } else {
        (
            at,
            format!("{}{:02}{:02}{:02}", entity_id, yy, at.month(), at.day()),
        )
    };

    Ok(TrackerKey {
        kind,
        entity_id: entity_id.to_string(),
        period_start,
        day_of_month: at.day(),
        id,
    })
}

/// Whether two dates fall into the same bucket for a tracker kind
pub fn same_period(kind: TrackerKind, a: NaiveDate, b: NaiveDate) -> bool {
    if kind.is_monthly() {
        a.year() == b.year() && a.month() == b.month()
    } else {
        a == b
    }
}

/// Number of days in the month containing `date`
pub fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    match (
        NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
        NaiveDate::from_ymd_opt(year, month, 1),
    ) {
        (Some(first), Some(next)) => next.signed_duration_since(first).num_days() as u32,
        // Only reachable at the very end of chrono's calendar
        _ => 31,
    }
}

/// Parse a compact `yyMMdd` or `yyMM` date as used by read requests.
///
/// `yyMM` resolves to the first of the month. Years map to 2000..=2099.
pub fn parse_stats_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    if !(value.len() == 4 || value.len() == 6) || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TrackingError::InvalidRequest(format!(
            "date '{}' must be yyMMdd or yyMM",
            value
        )));
    }

    let field = |range: std::ops::Range<usize>| -> Result<u32> {
        value[range]
            .parse::<u32>()
            .map_err(|e| TrackingError::InvalidRequest(format!("date '{}': {}", value, e)))
    };

    let year = FIRST_YEAR + field(0..2)? as i32;
    let month = field(2..4)?;
    let day = if value.len() == 6 { field(4..6)? } else { 1 };

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        TrackingError::InvalidRequest(format!("date '{}' is not a calendar date", value))
    })
}
