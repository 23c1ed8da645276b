//! Calendar math: civil dates, Julian days, and true solar time.
//!
//! Everything here is pure. Inputs are validated once, at construction of
//! `CivilDate` / `ClockTime` / `BirthInput`; the arithmetic functions below
//! assume well-formed values.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::constants::{
    MINUTES_PER_DAY, MINUTES_PER_DEGREE, SPRING_BOUNDARY_DAY, STANDARD_MERIDIAN_DEG,
};
use crate::error::{BaziError, Result};
use crate::time::days_from_civil;

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").unwrap());
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").unwrap());

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// A proleptic Gregorian calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CivilDate {
    year: i32,
    month: u32,
    day: u32,
}

impl CivilDate {
    pub fn new(year: i32, month: u32, day: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(BaziError::Input(format!("month {month} out of range")));
        }
        if day == 0 || day > days_in_month(year, month) {
            return Err(BaziError::Input(format!(
                "day {day} out of range for {year:04}-{month:02}"
            )));
        }
        Ok(Self { year, month, day })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    /// Days since the Unix epoch (negative before 1970).
    pub fn epoch_days(&self) -> i64 {
        days_from_civil(self.year as i64, self.month as u64, self.day as u64)
    }

    /// The following calendar day.
    pub fn succ(&self) -> Self {
        if self.day < days_in_month(self.year, self.month) {
            Self { day: self.day + 1, ..*self }
        } else if self.month < 12 {
            Self { month: self.month + 1, day: 1, ..*self }
        } else {
            Self { year: self.year + 1, month: 1, day: 1 }
        }
    }
}

impl fmt::Display for CivilDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for CivilDate {
    type Err = BaziError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BaziError::Input("birth date is missing".into()));
        }
        let caps = DATE_RE
            .captures(s)
            .ok_or_else(|| BaziError::Input(format!("unparseable date '{s}', expected YYYY-MM-DD")))?;
        let num = |i: usize| caps[i].parse::<u32>().unwrap_or(0);
        CivilDate::new(num(1) as i32, num(2), num(3))
    }
}

/// Wall-clock time of day, 24h.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockTime {
    hour: u32,
    minute: u32,
}

impl ClockTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(BaziError::Input(format!(
                "clock time {hour:02}:{minute:02} out of range"
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn minutes_since_midnight(&self) -> u32 {
        self.hour * 60 + self.minute
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ClockTime {
    type Err = BaziError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let caps = TIME_RE
            .captures(s)
            .ok_or_else(|| BaziError::Input(format!("unparseable time '{s}', expected HH:mm")))?;
        let num = |i: usize| caps[i].parse::<u32>().unwrap_or(u32::MAX);
        ClockTime::new(num(1), num(2))
    }
}

/// The identity triple a four-pillar record is derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BirthInput {
    pub date: CivilDate,
    pub time: ClockTime,
    /// Decimal degrees, east positive.
    pub longitude: f64,
}

impl BirthInput {
    pub fn new(date: CivilDate, time: ClockTime, longitude: f64) -> Result<Self> {
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(BaziError::Input(format!("longitude {longitude} out of range")));
        }
        Ok(Self { date, time, longitude })
    }

    pub fn parse(date: &str, time: &str, longitude: f64) -> Result<Self> {
        Self::new(date.parse()?, time.parse()?, longitude)
    }
}

/// Julian day of a Gregorian date and time of day (Meeus, ch. 7).
pub fn julian_day(date: CivilDate, hour: u32, minute: u32) -> f64 {
    let (mut y, mut m) = (date.year() as f64, date.month() as f64);
    if m <= 2.0 {
        y -= 1.0;
        m += 12.0;
    }
    let a = (y / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();
    let day_fraction = (hour as f64 * 60.0 + minute as f64) / MINUTES_PER_DAY;
    (365.25 * (y + 4716.0)).floor() + (30.6001 * (m + 1.0)).floor() + date.day() as f64 + b
        - 1524.5
        + day_fraction
}

/// Apparent minus mean solar time, in minutes, at Julian day `jd`.
pub fn equation_of_time(jd: f64) -> f64 {
    let n = jd - 2_451_545.0;
    let to_rad = PI / 180.0;
    let mean_longitude = (280.460 + 0.985_647_4 * n).rem_euclid(360.0);
    let mean_anomaly = ((357.528 + 0.985_600_3 * n).rem_euclid(360.0)) * to_rad;
    let ecliptic_longitude = (mean_longitude
        + 1.915 * mean_anomaly.sin()
        + 0.020 * (2.0 * mean_anomaly).sin())
        * to_rad;
    let obliquity = (23.439 - 0.000_000_4 * n) * to_rad;
    let right_ascension = (obliquity.cos() * ecliptic_longitude.sin())
        .atan2(ecliptic_longitude.cos())
        / to_rad;
    let diff = (mean_longitude - right_ascension + 180.0).rem_euclid(360.0) - 180.0;
    diff * MINUTES_PER_DEGREE
}

/// Clock time at `longitude` corrected to local apparent solar time,
/// as minutes since midnight in `[0, 1440)`.
pub fn to_true_solar_minutes(date: CivilDate, time: ClockTime, longitude: f64) -> f64 {
    let clock = time.minutes_since_midnight() as f64;
    let zone_offset = STANDARD_MERIDIAN_DEG * MINUTES_PER_DEGREE;
    let ut_minutes = clock - zone_offset;
    let jd = julian_day(date, 0, 0) + ut_minutes / MINUTES_PER_DAY;

    let longitude_correction = (longitude - STANDARD_MERIDIAN_DEG) * MINUTES_PER_DEGREE;
    (clock + longitude_correction + equation_of_time(jd)).rem_euclid(MINUTES_PER_DAY)
}

/// Whether the date falls on or after the (approximate) spring boundary,
/// i.e. already belongs to the sexagenary year numbered `year`.
pub fn is_on_or_after_spring_boundary(_year: i32, month: u32, day: u32) -> bool {
    match month {
        1 => false,
        2 => day >= SPRING_BOUNDARY_DAY,
        _ => true,
    }
}

/// Whole days from `from` to `to` (negative when `to` is earlier).
pub fn days_between(from: CivilDate, to: CivilDate) -> i64 {
    to.epoch_days() - from.epoch_days()
}
