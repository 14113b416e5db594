//! Calendar-aware timestamps for gridded climate data.
//!
//! Model output arrives on one of several idealized calendars (360-day,
//! no-leap) in addition to the real-world Gregorian and Julian calendars.
//! [`CalTime`] is a plain calendar timestamp that carries its calendar and
//! supports the day-number arithmetic the rebinner and subset engine need.
//! CF-convention time axes ("days since 1850-01-01") are decoded through
//! [`CfTimeUnits`].

use std::cmp::Ordering;
use std::fmt;

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};

/// Cumulative days before each month in a non-leap year.
const CUM_DAYS: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

/// Supported dataset calendars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Calendar {
    /// Standard mixed Gregorian (treated as proleptic for arithmetic).
    Gregorian,
    /// Proleptic Gregorian.
    ProlepticGregorian,
    /// Julian calendar (every fourth year leap).
    Julian,
    /// 365-day calendar, no leap years.
    NoLeap,
    /// Idealized 360-day calendar, twelve 30-day months.
    Day360,
}

impl Calendar {
    /// Parse a CF calendar attribute value (case-insensitive).
    pub fn parse(name: &str) -> EvalResult<Self> {
        match name.to_lowercase().as_str() {
            "standard" | "gregorian" => Ok(Calendar::Gregorian),
            "proleptic_gregorian" => Ok(Calendar::ProlepticGregorian),
            "julian" => Ok(Calendar::Julian),
            "noleap" | "365_day" => Ok(Calendar::NoLeap),
            "360_day" => Ok(Calendar::Day360),
            other => Err(EvalError::CalendarUnsupported(other.to_string())),
        }
    }

    /// CF name of this calendar.
    pub fn as_str(&self) -> &'static str {
        match self {
            Calendar::Gregorian => "standard",
            Calendar::ProlepticGregorian => "proleptic_gregorian",
            Calendar::Julian => "julian",
            Calendar::NoLeap => "noleap",
            Calendar::Day360 => "360_day",
        }
    }

    /// Whether `year` is a leap year in this calendar.
    pub fn is_leap_year(&self, year: i32) -> bool {
        match self {
            Calendar::Gregorian | Calendar::ProlepticGregorian => {
                (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
            }
            Calendar::Julian => year % 4 == 0,
            Calendar::NoLeap | Calendar::Day360 => false,
        }
    }

    /// Number of days in `month` of `year`.
    pub fn days_in_month(&self, year: i32, month: u32) -> u32 {
        if *self == Calendar::Day360 {
            return 30;
        }
        match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            2 => {
                if self.is_leap_year(year) {
                    29
                } else {
                    28
                }
            }
            _ => 0,
        }
    }

    /// Days in a full year of this calendar.
    pub fn days_in_year(&self, year: i32) -> i64 {
        match self {
            Calendar::Day360 => 360,
            Calendar::NoLeap => 365,
            _ => {
                if self.is_leap_year(year) {
                    366
                } else {
                    365
                }
            }
        }
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A calendar timestamp: date and time-of-day on a specific [`Calendar`].
///
/// Ordering and equality compare the timestamp fields only; the calendar is
/// metadata. Collections stacked for metric calculation are required to
/// share one calendar before any comparison matters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalTime {
    pub calendar: Calendar,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl CalTime {
    /// Create a timestamp, validating the date against the calendar.
    pub fn new(
        calendar: Calendar,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> EvalResult<Self> {
        let valid = (1..=12).contains(&month)
            && day >= 1
            && day <= calendar.days_in_month(year, month)
            && hour < 24
            && minute < 60
            && second < 60;
        if !valid {
            return Err(EvalError::CalendarMismatch {
                timestamp: format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                ),
                calendar: calendar.as_str().to_string(),
            });
        }
        Ok(Self {
            calendar,
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    /// Midnight on the given date.
    pub fn from_ymd(calendar: Calendar, year: i32, month: u32, day: u32) -> EvalResult<Self> {
        Self::new(calendar, year, month, day, 0, 0, 0)
    }

    /// Parse an ISO 8601 date or datetime string onto `calendar`.
    ///
    /// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS`, and the space-separated
    /// variant.
    pub fn from_iso(calendar: Calendar, s: &str) -> EvalResult<Self> {
        let s = s.trim().trim_end_matches('Z');
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return Self::new(
                calendar,
                ndt.year(),
                ndt.month(),
                ndt.day(),
                ndt.hour(),
                ndt.minute(),
                ndt.second(),
            );
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Self::new(
                calendar,
                ndt.year(),
                ndt.month(),
                ndt.day(),
                ndt.hour(),
                ndt.minute(),
                ndt.second(),
            );
        }
        // Date-only: parse fields by hand so idealized-calendar dates that
        // chrono rejects (e.g. 360-day Feb 30) still round-trip.
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() == 3 {
            let year: i32 = parts[0]
                .parse()
                .map_err(|_| EvalError::ConfigInvalid(format!("bad date: {}", s)))?;
            let month: u32 = parts[1]
                .parse()
                .map_err(|_| EvalError::ConfigInvalid(format!("bad date: {}", s)))?;
            let day: u32 = parts[2]
                .parse()
                .map_err(|_| EvalError::ConfigInvalid(format!("bad date: {}", s)))?;
            return Self::from_ymd(calendar, year, month, day);
        }
        Err(EvalError::ConfigInvalid(format!(
            "unrecognized timestamp: {}",
            s
        )))
    }

    /// Day count since 0001-01-01 of this calendar.
    pub fn day_number(&self) -> i64 {
        let days_before_year = match self.calendar {
            Calendar::Day360 => 360 * (self.year as i64 - 1),
            Calendar::NoLeap => 365 * (self.year as i64 - 1),
            Calendar::Julian => {
                let y = self.year as i64 - 1;
                365 * y + y.div_euclid(4)
            }
            Calendar::Gregorian | Calendar::ProlepticGregorian => {
                let y = self.year as i64 - 1;
                365 * y + y.div_euclid(4) - y.div_euclid(100) + y.div_euclid(400)
            }
        };
        let days_before_month = match self.calendar {
            Calendar::Day360 => 30 * (self.month as i64 - 1),
            _ => {
                let mut d = CUM_DAYS[(self.month - 1) as usize];
                if self.month > 2 && self.calendar.is_leap_year(self.year) {
                    d += 1;
                }
                d
            }
        };
        days_before_year + days_before_month + self.day as i64 - 1
    }

    /// Seconds elapsed since this calendar's day 0, midnight.
    pub fn second_number(&self) -> i64 {
        self.day_number() * 86_400
            + self.hour as i64 * 3600
            + self.minute as i64 * 60
            + self.second as i64
    }

    /// Rebuild a timestamp from a day count (inverse of [`day_number`]).
    ///
    /// [`day_number`]: CalTime::day_number
    pub fn from_day_number(calendar: Calendar, days: i64) -> Self {
        // Locate the year by stepping from an estimate; idealized calendars
        // resolve exactly, real ones within a couple of iterations.
        let approx_len = match calendar {
            Calendar::Day360 => 360.0,
            Calendar::NoLeap => 365.0,
            _ => 365.2425,
        };
        let mut year = (days as f64 / approx_len).floor() as i32 + 1;
        loop {
            let start = CalTime {
                calendar,
                year,
                month: 1,
                day: 1,
                hour: 0,
                minute: 0,
                second: 0,
            }
            .day_number();
            if days < start {
                year -= 1;
            } else if days >= start + calendar.days_in_year(year) {
                year += 1;
            } else {
                let mut rem = days - start;
                let mut month = 1u32;
                while rem >= calendar.days_in_month(year, month) as i64 {
                    rem -= calendar.days_in_month(year, month) as i64;
                    month += 1;
                }
                return CalTime {
                    calendar,
                    year,
                    month,
                    day: rem as u32 + 1,
                    hour: 0,
                    minute: 0,
                    second: 0,
                };
            }
        }
    }

    /// Offset this timestamp by a (possibly negative) number of seconds.
    pub fn add_seconds(&self, secs: i64) -> Self {
        let total = self.second_number() + secs;
        let days = total.div_euclid(86_400);
        let rem = total.rem_euclid(86_400);
        let date = Self::from_day_number(self.calendar, days);
        CalTime {
            hour: (rem / 3600) as u32,
            minute: (rem % 3600 / 60) as u32,
            second: (rem % 60) as u32,
            ..date
        }
    }
}

impl PartialEq for CalTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CalTime {}

impl PartialOrd for CalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CalTime {
    fn cmp(&self, other: &Self) -> Ordering {
        (
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        )
            .cmp(&(
                other.year,
                other.month,
                other.day,
                other.hour,
                other.minute,
                other.second,
            ))
    }
}

impl fmt::Display for CalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Decoded CF time-axis descriptor: "<unit> since <epoch>" plus a calendar.
#[derive(Debug, Clone)]
pub struct CfTimeUnits {
    pub seconds_per_step: f64,
    pub epoch: CalTime,
}

impl CfTimeUnits {
    /// Parse a CF units string like `"days since 1850-01-01 00:00:00"`.
    pub fn parse(units: &str, calendar: Calendar) -> EvalResult<Self> {
        let mut parts = units.splitn(3, ' ');
        let unit = parts.next().unwrap_or("");
        let since = parts.next().unwrap_or("");
        let epoch_str = parts.next().unwrap_or("");
        if !since.eq_ignore_ascii_case("since") || epoch_str.is_empty() {
            return Err(EvalError::ConfigInvalid(format!(
                "unrecognized time units: '{}'",
                units
            )));
        }
        let seconds_per_step = match unit.to_lowercase().as_str() {
            "seconds" | "second" | "secs" | "s" => 1.0,
            "minutes" | "minute" | "mins" => 60.0,
            "hours" | "hour" | "hrs" | "h" => 3600.0,
            "days" | "day" | "d" => 86_400.0,
            other => {
                return Err(EvalError::ConfigInvalid(format!(
                    "unsupported time unit '{}' in '{}'",
                    other, units
                )))
            }
        };
        let epoch = CalTime::from_iso(calendar, epoch_str)?;
        Ok(Self {
            seconds_per_step,
            epoch,
        })
    }

    /// Decode raw axis offsets into timestamps.
    pub fn decode(&self, offsets: &[f64]) -> Vec<CalTime> {
        offsets
            .iter()
            .map(|&o| {
                self.epoch
                    .add_seconds((o * self.seconds_per_step).round() as i64)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calendar_parse() {
        assert_eq!(Calendar::parse("standard").unwrap(), Calendar::Gregorian);
        assert_eq!(Calendar::parse("360_DAY").unwrap(), Calendar::Day360);
        assert_eq!(Calendar::parse("noleap").unwrap(), Calendar::NoLeap);
        assert!(Calendar::parse("lunar").is_err());
    }

    #[test]
    fn test_feb_30_only_valid_in_360_day() {
        assert!(CalTime::from_ymd(Calendar::Day360, 2000, 2, 30).is_ok());
        assert!(CalTime::from_ymd(Calendar::Gregorian, 2000, 2, 30).is_err());
        assert!(CalTime::from_ymd(Calendar::NoLeap, 2000, 2, 29).is_err());
        assert!(CalTime::from_ymd(Calendar::Gregorian, 2000, 2, 29).is_ok());
    }

    #[test]
    fn test_day_number_round_trip() {
        for cal in [
            Calendar::Gregorian,
            Calendar::Julian,
            Calendar::NoLeap,
            Calendar::Day360,
        ] {
            let t = CalTime::from_ymd(cal, 1999, 12, 31).unwrap();
            let back = CalTime::from_day_number(cal, t.day_number());
            assert_eq!(back, t, "round trip failed for {}", cal);
        }
    }

    #[test]
    fn test_gregorian_day_number_matches_chrono() {
        use chrono::NaiveDate;
        let t = CalTime::from_ymd(Calendar::Gregorian, 2024, 3, 1).unwrap();
        let nd = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(t.day_number(), nd.num_days_from_ce() as i64 - 1);
    }

    #[test]
    fn test_add_seconds_crosses_month_in_360_day() {
        let t = CalTime::from_ymd(Calendar::Day360, 2000, 1, 30).unwrap();
        let next = t.add_seconds(86_400);
        assert_eq!((next.month, next.day), (2, 1));
        // and a full idealized year is exactly 360 days
        let next_year = t.add_seconds(360 * 86_400);
        assert_eq!((next_year.year, next_year.month, next_year.day), (2001, 1, 30));
    }

    #[test]
    fn test_cf_units_decode() {
        let units = CfTimeUnits::parse("days since 2000-01-01", Calendar::Gregorian).unwrap();
        let times = units.decode(&[0.0, 31.0, 60.0]);
        assert_eq!(times[0], CalTime::from_ymd(Calendar::Gregorian, 2000, 1, 1).unwrap());
        assert_eq!(times[1], CalTime::from_ymd(Calendar::Gregorian, 2000, 2, 1).unwrap());
        // 2000 is a leap year
        assert_eq!(times[2], CalTime::from_ymd(Calendar::Gregorian, 2000, 3, 1).unwrap());
    }

    #[test]
    fn test_cf_units_hours() {
        let units =
            CfTimeUnits::parse("hours since 1990-01-01 06:00:00", Calendar::NoLeap).unwrap();
        let times = units.decode(&[0.0, 18.0]);
        assert_eq!(times[0].hour, 6);
        assert_eq!(times[1].day, 2);
        assert_eq!(times[1].hour, 0);
    }

    #[test]
    fn test_ordering_ignores_calendar() {
        let a = CalTime::from_ymd(Calendar::Gregorian, 2000, 6, 1).unwrap();
        let b = CalTime::from_ymd(Calendar::NoLeap, 2000, 6, 1).unwrap();
        assert_eq!(a, b);
        let c = CalTime::from_ymd(Calendar::NoLeap, 2000, 6, 2).unwrap();
        assert!(a < c);
    }
}
