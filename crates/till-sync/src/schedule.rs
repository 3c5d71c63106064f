//! Daily cron schedule (`M H * * *`) evaluated in the ledger timezone.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

use crate::error::SyncError;

/// A once-a-day wall-clock trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    minute: u32,
    hour: u32,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32) -> Result<Self, SyncError> {
        if hour > 23 || minute > 59 {
            return Err(SyncError::InvalidConfig(format!(
                "schedule time out of range: {hour:02}:{minute:02}"
            )));
        }
        Ok(DailySchedule { minute, hour })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// Next firing instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        now.with_timezone(&tz)
            .date_naive()
            .iter_days()
            .take(3)
            .filter_map(|date| self.on(date, tz))
            .find(|at| *at > now)
            .unwrap_or(now + TimeDelta::days(1))
    }

    /// Firing instant on a local date. A time skipped by a DST jump fires
    /// one hour later; a repeated time fires on its first occurrence.
    fn on(&self, date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
        let time = NaiveTime::from_hms_opt(self.hour, self.minute, 0)?;
        let local = date.and_time(time);
        tz.from_local_datetime(&local)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(local + TimeDelta::hours(1))).earliest())
            .map(|at| at.with_timezone(&Utc))
    }
}

impl FromStr for DailySchedule {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            SyncError::InvalidConfig(format!(
                "Unsupported schedule '{s}'. Expected a daily cron expression 'M H * * *'"
            ))
        };

        let fields: Vec<&str> = s.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(invalid());
        };
        if [dom, month, dow].iter().any(|f| **f != "*") {
            return Err(invalid());
        }

        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        DailySchedule::new(hour, minute)
    }
}

impl std::fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} * * *", self.minute, self.hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Argentina::Cordoba;
    use chrono_tz::Europe::Madrid;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse() {
        let schedule: DailySchedule = "59 23 * * *".parse().unwrap();
        assert_eq!((schedule.hour(), schedule.minute()), (23, 59));
        assert_eq!(schedule.to_string(), "59 23 * * *");

        assert!("60 23 * * *".parse::<DailySchedule>().is_err());
        assert!("0 24 * * *".parse::<DailySchedule>().is_err());
        assert!("0 23 * * 1".parse::<DailySchedule>().is_err());
        assert!("*/5 * * * *".parse::<DailySchedule>().is_err());
        assert!("0 23".parse::<DailySchedule>().is_err());
    }

    #[test]
    fn test_next_after_in_local_time() {
        let schedule = DailySchedule::new(23, 59).unwrap();
        // 12:00 local (UTC-3) fires the same local day at 23:59, 02:59Z next day.
        let next = schedule.next_after(utc("2024-03-05T15:00:00Z"), Cordoba);
        assert_eq!(next, utc("2024-03-06T02:59:00Z"));

        // Exactly at the firing instant moves to the following day.
        let again = schedule.next_after(next, Cordoba);
        assert_eq!(again, utc("2024-03-07T02:59:00Z"));
    }

    #[test]
    fn test_next_after_when_utc_date_is_ahead() {
        let schedule = DailySchedule::new(22, 0).unwrap();
        // 01:00Z on the 6th is still the 5th in Cordoba, 22:00 local already passed.
        let next = schedule.next_after(utc("2024-03-06T01:30:00Z"), Cordoba);
        assert_eq!(next, utc("2024-03-07T01:00:00Z"));
    }

    #[test]
    fn test_skipped_local_time_fires_an_hour_later() {
        // Madrid skips 02:00-03:00 on 2024-03-31.
        let schedule = DailySchedule::new(2, 30).unwrap();
        let next = schedule.next_after(utc("2024-03-30T12:00:00Z"), Madrid);
        assert_eq!(next, utc("2024-03-31T01:30:00Z"));
    }
}
