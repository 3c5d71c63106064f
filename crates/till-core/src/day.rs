//! # Business Day Boundaries
//!
//! The one place where "today" is decided.
//!
//! ```text
//!   instant (UTC) ──► wall clock in the configured zone ──► local date
//!                                                               │
//!   [start, end) in UTC ◄── local midnight .. next local midnight
//! ```
//!
//! Every query that filters by day (aggregation, the closing idempotency
//! guard, the closed-period lookup, payment sequence numbers, hub
//! snapshots) takes its bounds from [`BusinessDay`], so a register in
//! Córdoba closes its day at local midnight rather than at 21:00 when UTC
//! rolls over.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{ValidationError, ValidationResult};
use crate::SEQUENCE_DIGITS;

/// A local calendar day and its half-open UTC interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessDay {
    /// Local calendar date.
    pub date: NaiveDate,
    /// First instant of the day (inclusive).
    pub start: DateTime<Utc>,
    /// First instant of the next day (exclusive).
    pub end: DateTime<Utc>,
}

impl BusinessDay {
    /// The local day `instant` falls in.
    pub fn containing(instant: DateTime<Utc>, tz: Tz) -> Self {
        let date = instant.with_timezone(&tz).date_naive();
        Self::of(date, tz)
    }

    /// Bounds of a given local date.
    pub fn of(date: NaiveDate, tz: Tz) -> Self {
        let next = date.succ_opt().unwrap_or(NaiveDate::MAX);
        BusinessDay {
            date,
            start: local_midnight(date, tz),
            end: local_midnight(next, tz),
        }
    }

    /// True when `instant` is inside `[start, end)`.
    #[inline]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// `YYYYMMDD`, the prefix of payment sequence numbers.
    pub fn compact_date(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    /// Sequence number following `last` (the highest one issued today).
    ///
    /// ## Example
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use till_core::BusinessDay;
    ///
    /// let day = BusinessDay::containing(
    ///     Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap(),
    ///     chrono_tz::America::Argentina::Cordoba,
    /// );
    /// assert_eq!(day.next_sequence(None), "20240305-0001");
    /// assert_eq!(day.next_sequence(Some("20240305-0041")), "20240305-0042");
    /// ```
    pub fn next_sequence(&self, last: Option<&str>) -> String {
        let prefix = self.compact_date();
        let last_n = last
            .and_then(|s| s.strip_prefix(prefix.as_str()))
            .and_then(|s| s.strip_prefix('-'))
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0);
        format!("{}-{:0width$}", prefix, last_n + 1, width = SEQUENCE_DIGITS)
    }
}

/// First valid local instant of `date`, as UTC.
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Midnight skipped by a DST jump: the day starts at the first wall
        // clock minute that exists.
        LocalResult::None => first_valid_after(midnight, tz)
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight)),
    }
}

fn first_valid_after(local: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    (1..=180).find_map(|minute| {
        tz.from_local_datetime(&(local + TimeDelta::minutes(minute)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Parses an IANA zone name such as `America/Argentina/Cordoba`.
pub fn parse_timezone(name: &str) -> ValidationResult<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| ValidationError::InvalidFormat {
            field: "timezone".to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Argentina::Cordoba;
    use chrono_tz::America::Santiago;

    #[test]
    fn test_day_uses_local_wall_clock() {
        // 01:30 UTC on the 6th is still 22:30 on the 5th in Córdoba (UTC-3)
        let instant = Utc.with_ymd_and_hms(2024, 3, 6, 1, 30, 0).unwrap();
        let day = BusinessDay::containing(instant, Cordoba);

        assert_eq!(day.date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(day.start, Utc.with_ymd_and_hms(2024, 3, 5, 3, 0, 0).unwrap());
        assert_eq!(day.end, Utc.with_ymd_and_hms(2024, 3, 6, 3, 0, 0).unwrap());
        assert!(day.contains(instant));
        assert!(!day.contains(day.end));
        assert!(day.contains(day.start));
    }

    #[test]
    fn test_utc_day_differs_from_local_day() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 6, 1, 30, 0).unwrap();
        let utc_day = BusinessDay::containing(instant, chrono_tz::UTC);
        let local_day = BusinessDay::containing(instant, Cordoba);
        assert_ne!(utc_day.date, local_day.date);
    }

    #[test]
    fn test_day_with_dst_gap_at_midnight() {
        // Chile springs forward at local midnight; 2023-09-03 00:00 does not exist
        let date = NaiveDate::from_ymd_opt(2023, 9, 3).unwrap();
        let day = BusinessDay::of(date, Santiago);
        assert!(day.start < day.end);
        assert_eq!(day.start.with_timezone(&Santiago).date_naive(), date);
        // 23 hour day
        assert_eq!(day.end - day.start, TimeDelta::hours(23));
    }

    #[test]
    fn test_sequence_numbers() {
        let day = BusinessDay::of(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(), Cordoba);
        assert_eq!(day.compact_date(), "20240305");
        assert_eq!(day.next_sequence(None), "20240305-0001");
        assert_eq!(day.next_sequence(Some("20240305-0009")), "20240305-0010");
        // Yesterday's numbers do not continue into today
        assert_eq!(day.next_sequence(Some("20240304-0099")), "20240305-0001");
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone(crate::DEFAULT_TIMEZONE).unwrap(), Cordoba);
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }
}
