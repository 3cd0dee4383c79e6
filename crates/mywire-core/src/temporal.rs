//! Validated calendar and duration types.
//!
//! MySQL allows "zero" dates (`0000-00-00`) and partially-zero dates, so
//! [`Date`] accepts a zero month or day. Non-zero components are checked
//! against their ranges and, when both month and day are set, against the
//! length of the month.

#![allow(clippy::cast_possible_truncation)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ClientErrorKind, Error, Result};

/// A calendar date as stored by MySQL `DATE` columns.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Date {
    year: u16,
    month: u8,
    day: u8,
}

impl Date {
    pub const MAX_YEAR: u16 = 9999;
    pub const MAX_MONTH: u8 = 12;
    pub const MAX_DAY: u8 = 31;

    /// Create a date, checking each component.
    ///
    /// A zero month or day is accepted (MySQL zero-date sentinel). A date
    /// whose month and day are both non-zero must exist in the calendar.
    pub fn new(year: u16, month: u8, day: u8) -> Result<Self> {
        if year > Self::MAX_YEAR || month > Self::MAX_MONTH || day > Self::MAX_DAY {
            return Err(invalid_value(format!(
                "date {year:04}-{month:02}-{day:02} is out of range"
            )));
        }
        if month != 0 && day != 0 && day > days_in_month(year, month) {
            return Err(invalid_value(format!(
                "date {year:04}-{month:02}-{day:02} does not exist"
            )));
        }
        Ok(Self { year, month, day })
    }

    /// The all-zero date `0000-00-00`.
    pub const fn zero() -> Self {
        Self {
            year: 0,
            month: 0,
            day: 0,
        }
    }

    pub const fn year(&self) -> u16 {
        self.year
    }

    pub const fn month(&self) -> u8 {
        self.month
    }

    pub const fn day(&self) -> u8 {
        self.day
    }

    /// True if every component is zero.
    pub const fn is_zero(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }

    /// True if this names a real calendar day (no zero month or day).
    pub fn is_calendar_date(&self) -> bool {
        self.month != 0 && self.day != 0 && self.day <= days_in_month(self.year, self.month)
    }

    /// Days since 1970-01-01, or `None` for zero-month/zero-day dates.
    pub fn days_since_epoch(&self) -> Option<i32> {
        if !self.is_calendar_date() {
            return None;
        }
        // Howard Hinnant's days_from_civil
        let y = i32::from(self.year) - i32::from(self.month <= 2);
        let era = (if y >= 0 { y } else { y - 399 }) / 400;
        let yoe = y - era * 400;
        let m = i32::from(self.month);
        let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i32::from(self.day) - 1;
        let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
        Some(era * 146_097 + doe - 719_468)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// A date plus a time of day with microsecond resolution.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct DateTime {
    date: Date,
    hour: u8,
    minute: u8,
    second: u8,
    microsecond: u32,
}

impl DateTime {
    pub const MAX_HOUR: u8 = 23;
    pub const MAX_MINUTE: u8 = 59;
    pub const MAX_SECOND: u8 = 59;
    pub const MAX_MICROSECOND: u32 = 999_999;

    /// Create a datetime, validating the date and the time-of-day part.
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        microsecond: u32,
    ) -> Result<Self> {
        let date = Date::new(year, month, day)?;
        Self::from_date_time(date, hour, minute, second, microsecond)
    }

    /// Attach a time of day to an already validated date.
    pub fn from_date_time(
        date: Date,
        hour: u8,
        minute: u8,
        second: u8,
        microsecond: u32,
    ) -> Result<Self> {
        if hour > Self::MAX_HOUR
            || minute > Self::MAX_MINUTE
            || second > Self::MAX_SECOND
            || microsecond > Self::MAX_MICROSECOND
        {
            return Err(invalid_value(format!(
                "time of day {hour:02}:{minute:02}:{second:02}.{microsecond:06} is out of range"
            )));
        }
        Ok(Self {
            date,
            hour,
            minute,
            second,
            microsecond,
        })
    }

    pub const fn date(&self) -> Date {
        self.date
    }

    pub const fn hour(&self) -> u8 {
        self.hour
    }

    pub const fn minute(&self) -> u8 {
        self.minute
    }

    pub const fn second(&self) -> u8 {
        self.second
    }

    pub const fn microsecond(&self) -> u32 {
        self.microsecond
    }

    /// True if the time-of-day part is exactly midnight.
    pub const fn is_midnight(&self) -> bool {
        self.hour == 0 && self.minute == 0 && self.second == 0 && self.microsecond == 0
    }
}

impl From<Date> for DateTime {
    fn from(date: Date) -> Self {
        Self {
            date,
            ..Self::default()
        }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}:{:02}.{:06}",
            self.date, self.hour, self.minute, self.second, self.microsecond
        )
    }
}

/// A signed duration, as stored by MySQL `TIME` columns.
///
/// Unlike a time of day this may be negative and may exceed 24 hours.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Time {
    micros: i64,
}

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

impl Time {
    /// Largest representable magnitude, 2^31 - 1 seconds.
    pub const MAX_MICROS: i64 = (i32::MAX as i64) * MICROS_PER_SECOND + 999_999;

    pub fn from_micros(micros: i64) -> Result<Self> {
        if micros.unsigned_abs() > Self::MAX_MICROS.unsigned_abs() {
            return Err(invalid_value(format!("time of {micros}us is out of range")));
        }
        Ok(Self { micros })
    }

    /// Build a duration from its components.
    pub fn new(
        negative: bool,
        hours: u32,
        minutes: u8,
        seconds: u8,
        microseconds: u32,
    ) -> Result<Self> {
        if hours > i32::MAX.unsigned_abs() / 3600
            || minutes > 59
            || seconds > 59
            || microseconds > 999_999
        {
            return Err(invalid_value(format!(
                "time {hours}:{minutes:02}:{seconds:02}.{microseconds:06} is out of range"
            )));
        }
        let magnitude = i64::from(hours) * MICROS_PER_HOUR
            + i64::from(minutes) * MICROS_PER_MINUTE
            + i64::from(seconds) * MICROS_PER_SECOND
            + i64::from(microseconds);
        Self::from_micros(if negative { -magnitude } else { magnitude })
    }

    pub const fn zero() -> Self {
        Self { micros: 0 }
    }

    pub const fn as_micros(&self) -> i64 {
        self.micros
    }

    pub const fn is_negative(&self) -> bool {
        self.micros < 0
    }

    fn magnitude(&self) -> u64 {
        self.micros.unsigned_abs()
    }

    /// Whole days in the magnitude.
    pub fn days(&self) -> u32 {
        (self.magnitude() / MICROS_PER_DAY.unsigned_abs()) as u32
    }

    /// Hours in the magnitude, including those that make up whole days.
    pub fn total_hours(&self) -> u64 {
        self.magnitude() / MICROS_PER_HOUR.unsigned_abs()
    }

    /// Hours within the current day (0-23).
    pub fn hours(&self) -> u8 {
        (self.total_hours() % 24) as u8
    }

    pub fn minutes(&self) -> u8 {
        ((self.magnitude() / MICROS_PER_MINUTE.unsigned_abs()) % 60) as u8
    }

    pub fn seconds(&self) -> u8 {
        ((self.magnitude() / MICROS_PER_SECOND.unsigned_abs()) % 60) as u8
    }

    pub fn microseconds(&self) -> u32 {
        (self.magnitude() % MICROS_PER_SECOND.unsigned_abs()) as u32
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.is_negative() { "-" } else { "" };
        write!(
            f,
            "{sign}{:02}:{:02}:{:02}.{:06}",
            self.total_hours(),
            self.minutes(),
            self.seconds(),
            self.microseconds()
        )
    }
}

/// Number of days in a month, honoring Gregorian leap years.
pub fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

pub fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn invalid_value(message: String) -> Error {
    Error::client(ClientErrorKind::InvalidValue, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_validation() {
        assert!(Date::new(2024, 2, 29).is_ok());
        assert!(Date::new(2023, 2, 29).is_err());
        assert!(Date::new(2021, 13, 1).is_err());
        assert!(Date::new(2021, 4, 31).is_err());
        assert!(Date::new(10000, 1, 1).is_err());
        // Zero sentinels are allowed
        assert!(Date::new(0, 0, 0).is_ok());
        assert!(Date::new(2021, 0, 15).is_ok());
        assert!(Date::new(2021, 6, 0).is_ok());
    }

    #[test]
    fn test_date_calendar_flags() {
        assert!(Date::zero().is_zero());
        assert!(!Date::zero().is_calendar_date());
        assert!(!Date::new(2021, 6, 0).unwrap().is_calendar_date());
        assert!(Date::new(2021, 6, 15).unwrap().is_calendar_date());
    }

    #[test]
    fn test_days_since_epoch() {
        assert_eq!(Date::new(1970, 1, 1).unwrap().days_since_epoch(), Some(0));
        assert_eq!(Date::new(2000, 3, 1).unwrap().days_since_epoch(), Some(11_017));
        assert_eq!(Date::new(1969, 12, 31).unwrap().days_since_epoch(), Some(-1));
        assert_eq!(Date::zero().days_since_epoch(), None);
    }

    #[test]
    fn test_datetime_validation() {
        let dt = DateTime::new(1998, 1, 1, 21, 3, 5, 12).unwrap();
        assert_eq!(dt.to_string(), "1998-01-01 21:03:05.000012");
        assert!(DateTime::new(1998, 1, 1, 24, 0, 0, 0).is_err());
        assert!(DateTime::new(1998, 1, 1, 0, 60, 0, 0).is_err());
        assert!(DateTime::new(1998, 1, 1, 0, 0, 0, 1_000_000).is_err());
    }

    #[test]
    fn test_datetime_ordering() {
        let a = DateTime::new(2020, 1, 1, 10, 0, 0, 0).unwrap();
        let b = DateTime::new(2020, 1, 1, 10, 0, 0, 1).unwrap();
        let c = DateTime::new(2020, 1, 2, 0, 0, 0, 0).unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_time_components() {
        let t = Time::new(true, 838, 59, 58, 999_999).unwrap();
        assert!(t.is_negative());
        assert_eq!(t.days(), 34);
        assert_eq!(t.hours(), 22);
        assert_eq!(t.total_hours(), 838);
        assert_eq!(t.minutes(), 59);
        assert_eq!(t.seconds(), 58);
        assert_eq!(t.microseconds(), 999_999);
        assert_eq!(t.to_string(), "-838:59:58.999999");
    }

    #[test]
    fn test_time_range() {
        assert!(Time::from_micros(Time::MAX_MICROS).is_ok());
        assert!(Time::from_micros(-Time::MAX_MICROS).is_ok());
        assert!(Time::from_micros(Time::MAX_MICROS + 1).is_err());
        assert!(Time::new(false, 1, 60, 0, 0).is_err());
        assert!(Time::from_micros(-1).unwrap() < Time::zero());
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(1900, 2), 28);
        assert_eq!(days_in_month(2000, 2), 29);
        assert_eq!(days_in_month(2021, 11), 30);
        assert_eq!(days_in_month(2021, 13), 0);
    }
}
