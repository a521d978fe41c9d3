//! Which init times a run consumes.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use nwp_common::InitTime;

use crate::error::SelectionError;

/// Init time selection policy supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum InitTimeSelection {
    /// The most recent `n` cycles
    Latest(u32),
    /// Exactly these init times
    Explicit(Vec<InitTime>),
    /// Every cycle from `start` to `end`, inclusive
    Range { start: InitTime, end: InitTime },
    /// Every cycle of a calendar month (backfill)
    Month { year: i32, month: u32 },
}

impl InitTimeSelection {
    /// Expand into ascending, de-duplicated init times.
    pub fn resolve(&self, now: DateTime<Utc>, cycle_hours: u32) -> Result<Vec<InitTime>, SelectionError> {
        let mut times = match self {
            Self::Latest(0) => {
                return Err(SelectionError("latest needs at least one cycle".to_string()))
            }
            Self::Latest(n) => {
                let latest = InitTime::floor_to_cycle(now, cycle_hours);
                (0..*n).map(|i| latest.cycles_back(i, cycle_hours)).collect()
            }
            Self::Explicit(times) if times.is_empty() => {
                return Err(SelectionError("no init times given".to_string()))
            }
            Self::Explicit(times) => times.clone(),
            Self::Range { start, end } => {
                if end < start {
                    return Err(SelectionError(format!("range end {} is before start {}", end, start)));
                }
                cycles_between(*start, *end, cycle_hours)
            }
            Self::Month { year, month } => {
                let first = NaiveDate::from_ymd_opt(*year, *month, 1)
                    .ok_or_else(|| SelectionError(format!("invalid month {}-{:02}", year, month)))?;
                let next = if *month == 12 {
                    NaiveDate::from_ymd_opt(year + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(*year, month + 1, 1)
                }
                .ok_or_else(|| SelectionError(format!("invalid month {}-{:02}", year, month)))?;

                let start = InitTime::from_ymd_h(first.year(), first.month(), first.day(), 0)
                    .map_err(|e| SelectionError(e.to_string()))?;
                let end = InitTime::from_ymd_h(next.year(), next.month(), next.day(), 0)
                    .map_err(|e| SelectionError(e.to_string()))?
                    .cycles_back(1, cycle_hours);
                cycles_between(start, end, cycle_hours)
            }
        };

        times.sort();
        times.dedup();
        Ok(times)
    }
}

fn cycles_between(start: InitTime, end: InitTime, cycle_hours: u32) -> Vec<InitTime> {
    let mut times = Vec::new();
    let mut t = start;
    while t <= end {
        times.push(t);
        t = t.next_cycle(cycle_hours);
    }
    times
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(y: i32, m: u32, d: u32, h: u32) -> InitTime {
        InitTime::from_ymd_h(y, m, d, h).unwrap()
    }

    #[test]
    fn test_latest() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 7, 30, 0).unwrap();
        let times = InitTimeSelection::Latest(3).resolve(now, 6).unwrap();
        assert_eq!(times, vec![t(2024, 1, 1, 18), t(2024, 1, 2, 0), t(2024, 1, 2, 6)]);
    }

    #[test]
    fn test_latest_zero_rejected() {
        assert!(InitTimeSelection::Latest(0).resolve(Utc::now(), 6).is_err());
    }

    #[test]
    fn test_explicit_sorted_and_deduped() {
        let sel = InitTimeSelection::Explicit(vec![t(2024, 1, 2, 0), t(2024, 1, 1, 0), t(2024, 1, 2, 0)]);
        assert_eq!(
            sel.resolve(Utc::now(), 6).unwrap(),
            vec![t(2024, 1, 1, 0), t(2024, 1, 2, 0)]
        );
    }

    #[test]
    fn test_range_inclusive() {
        let sel = InitTimeSelection::Range {
            start: t(2024, 1, 1, 0),
            end: t(2024, 1, 1, 12),
        };
        assert_eq!(sel.resolve(Utc::now(), 6).unwrap().len(), 3);

        let backwards = InitTimeSelection::Range {
            start: t(2024, 1, 2, 0),
            end: t(2024, 1, 1, 0),
        };
        assert!(backwards.resolve(Utc::now(), 6).is_err());
    }

    #[test]
    fn test_month_backfill() {
        let times = InitTimeSelection::Month { year: 2024, month: 2 }
            .resolve(Utc::now(), 6)
            .unwrap();
        // 2024 is a leap year
        assert_eq!(times.len(), 29 * 4);
        assert_eq!(times[0], t(2024, 2, 1, 0));
        assert_eq!(times[times.len() - 1], t(2024, 2, 29, 18));

        let december = InitTimeSelection::Month { year: 2023, month: 12 }
            .resolve(Utc::now(), 12)
            .unwrap();
        assert_eq!(december.last(), Some(&t(2023, 12, 31, 12)));

        assert!(InitTimeSelection::Month { year: 2024, month: 13 }
            .resolve(Utc::now(), 6)
            .is_err());
    }
}
