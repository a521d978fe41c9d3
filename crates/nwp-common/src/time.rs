//! Forecast time handling: initialization times and lead-time offsets.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{NwpError, NwpResult};

/// Format used for path-safe init time keys, e.g. `20240115T1200`.
const KEY_FORMAT: &str = "%Y%m%dT%H%M";

/// The UTC instant a forecast run started.
///
/// Init times are the partition key of the store. They are kept at minute
/// precision so that the key form round-trips exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InitTime(DateTime<Utc>);

impl InitTime {
    /// Create an init time, truncating anything below whole minutes.
    pub fn new(datetime: DateTime<Utc>) -> Self {
        let secs = datetime.timestamp().div_euclid(60) * 60;
        Utc.timestamp_opt(secs, 0)
            .single()
            .map(Self)
            .unwrap_or(Self(datetime))
    }

    /// Create an init time from calendar components.
    pub fn from_ymd_h(year: i32, month: u32, day: u32, hour: u32) -> NwpResult<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .map(Self)
            .ok_or_else(|| {
                NwpError::InvalidTime(format!("{:04}-{:02}-{:02} {:02}h", year, month, day, hour))
            })
    }

    /// Parse an init time from user input.
    ///
    /// Accepts RFC 3339 (`2024-01-15T12:00:00Z`), `2024-01-15T12:00`,
    /// the key form `20240115T1200`, the compact cycle form `2024011512`
    /// and a bare date (`2024-01-15`, meaning 00Z).
    pub fn parse(s: &str) -> NwpResult<Self> {
        let s = s.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::new(dt.with_timezone(&Utc)));
        }

        for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", KEY_FORMAT] {
            if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(Self::new(Utc.from_utc_datetime(&ndt)));
            }
        }

        if s.len() == 10 && s.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(date) = NaiveDate::parse_from_str(&s[..8], "%Y%m%d") {
                let hour: u32 = s[8..]
                    .parse()
                    .map_err(|_| NwpError::InvalidTime(s.to_string()))?;
                return Self::from_ymd_h(date.year(), date.month(), date.day(), hour);
            }
        }

        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Self::from_ymd_h(date.year(), date.month(), date.day(), 0);
        }

        Err(NwpError::InvalidTime(s.to_string()))
    }

    /// Parse the path-safe key produced by [`InitTime::key`].
    pub fn from_key(key: &str) -> NwpResult<Self> {
        NaiveDateTime::parse_from_str(key, KEY_FORMAT)
            .map(|ndt| Self(Utc.from_utc_datetime(&ndt)))
            .map_err(|_| NwpError::InvalidTime(format!("not an init time key: {}", key)))
    }

    /// The latest cycle at or before `t`, for models that run every `cycle_hours`.
    pub fn floor_to_cycle(t: DateTime<Utc>, cycle_hours: u32) -> Self {
        let cycle_hours = cycle_hours.max(1);
        let hour = t.hour() - t.hour() % cycle_hours;
        let floored = Utc
            .with_ymd_and_hms(t.year(), t.month(), t.day(), hour, 0, 0)
            .single()
            .unwrap_or(t);
        Self::new(floored)
    }

    /// The cycle `n` runs before this one.
    pub fn cycles_back(&self, n: u32, cycle_hours: u32) -> Self {
        Self(self.0 - Duration::hours(i64::from(n) * i64::from(cycle_hours.max(1))))
    }

    /// The next cycle after this one.
    pub fn next_cycle(&self, cycle_hours: u32) -> Self {
        Self(self.0 + Duration::hours(i64::from(cycle_hours.max(1))))
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Path-safe representation used in store object keys.
    pub fn key(&self) -> String {
        self.0.format(KEY_FORMAT).to_string()
    }

    /// Compact `YYYYMMDDHH` form used by raw-file mirrors.
    pub fn cycle_dir(&self) -> String {
        self.0.format("%Y%m%d%H").to_string()
    }

    /// Valid time of a forecast step from this run.
    pub fn valid_time(&self, step: StepOffset) -> DateTime<Utc> {
        self.0 + step.as_duration()
    }
}

impl fmt::Display for InitTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%MZ"))
    }
}

impl From<DateTime<Utc>> for InitTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::new(dt)
    }
}

/// Lead time of a forecast step, stored in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepOffset(u32);

impl StepOffset {
    pub const ZERO: StepOffset = StepOffset(0);

    pub fn from_minutes(minutes: u32) -> Self {
        Self(minutes)
    }

    /// Saturates at `u32::MAX` minutes; use [`StepOffset::checked_from_hours`]
    /// for untrusted input.
    pub fn from_hours(hours: u32) -> Self {
        Self(hours.saturating_mul(60))
    }

    /// `None` when the offset does not fit in whole minutes.
    pub fn checked_from_hours(hours: u32) -> Option<Self> {
        hours.checked_mul(60).map(Self)
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }

    /// Whole hours, if the offset falls on an hour boundary.
    pub fn whole_hours(&self) -> Option<u32> {
        (self.0 % 60 == 0).then_some(self.0 / 60)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.0))
    }

    /// Parse `6`, `6h`, `90m` or `1h30m`. A bare number means hours.
    pub fn parse(s: &str) -> NwpResult<Self> {
        let s = s.trim();
        let invalid = || NwpError::InvalidStep(s.to_string());

        if let Ok(hours) = s.parse::<u32>() {
            return Self::checked_from_hours(hours).ok_or_else(invalid);
        }

        let (hours, rest) = match s.split_once('h') {
            Some((h, rest)) => (h.parse::<u32>().map_err(|_| invalid())?, rest),
            None => (0, s),
        };
        let minutes = match rest.strip_suffix('m') {
            Some(m) => m.parse::<u32>().map_err(|_| invalid())?,
            None if rest.is_empty() => 0,
            None => return Err(invalid()),
        };

        hours
            .checked_mul(60)
            .and_then(|m| m.checked_add(minutes))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for StepOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.whole_hours() {
            Some(h) => write!(f, "{}h", h),
            None => write!(f, "{}h{:02}m", self.0 / 60, self.0 % 60),
        }
    }
}
