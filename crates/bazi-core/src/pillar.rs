//! Four-pillar calculation.
//!
//! Year, month and day pillars depend only on the civil date; the hour pillar
//! depends on true solar time and the day stem. All functions are pure and
//! deterministic.

use crate::calendar::{
    BirthInput, CivilDate, days_between, is_on_or_after_spring_boundary, to_true_solar_minutes,
};
use crate::constants::{DAY_ANCHOR, DAY_ANCHOR_INDEX, MAX_SUPPORTED_YEAR, YEAR_ANCHOR};
use crate::error::{BaziError, Result};
use crate::ganzhi::{Branch, Sexagenary, Shichen, Stem};

/// Half-month buckets: slot `2·(month−1)` precedes that month's sectional
/// term, slot `2·(month−1)+1` follows it. Values are branch indices.
///
/// Readings produced by the older mid-month split (bucket `day / 15`, with
/// January mapped to 寅 and the month stem offset by the raw branch index)
/// disagree with this table. For 1990-01-01 that split gives 戊寅 where this
/// one gives 丙子. Migrated records keep their stored pillars; only fresh
/// calculations and recomputed repairs use this table.
pub const MONTH_BRANCH_TABLE: [u8; 24] = [
    0, 1, // Jan: 子 → 丑 at 小寒
    1, 2, // Feb: 丑 → 寅 at 立春
    2, 3, // Mar: 寅 → 卯 at 惊蛰
    3, 4, // Apr: 卯 → 辰 at 清明
    4, 5, // May: 辰 → 巳 at 立夏
    5, 6, // Jun: 巳 → 午 at 芒种
    6, 7, // Jul: 午 → 未 at 小暑
    7, 8, // Aug: 未 → 申 at 立秋
    8, 9, // Sep: 申 → 酉 at 白露
    9, 10, // Oct: 酉 → 戌 at 寒露
    10, 11, // Nov: 戌 → 亥 at 立冬
    11, 0, // Dec: 亥 → 子 at 大雪
];

/// Fixed day-of-month on which each month's sectional term is taken to fall.
/// An approximation: the real term drifts by a day or two between years.
pub const SECTIONAL_TERM_DAY: [u32; 12] = [6, 4, 6, 5, 6, 6, 8, 8, 8, 9, 8, 8];

/// Stem of the 寅 month, indexed by year stem (甲/己 years open on 丙寅, …).
pub const MONTH_STEM_ORIGIN: [u8; 10] = [2, 4, 6, 8, 0, 2, 4, 6, 8, 0];

/// Stem of the 子 hour, indexed by day stem (甲/己 days open on 甲子, …).
pub const HOUR_STEM_ORIGIN: [u8; 10] = [0, 2, 4, 6, 8, 0, 2, 4, 6, 8];

/// A (stem, branch) pair assigned to a year, month, day or hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pillar(Sexagenary);

impl Pillar {
    pub const fn new(index: Sexagenary) -> Self {
        Self(index)
    }

    pub const fn index(self) -> Sexagenary {
        self.0
    }

    pub const fn stem(self) -> Stem {
        self.0.stem()
    }

    pub const fn branch(self) -> Branch {
        self.0.branch()
    }

    pub const fn label(self) -> &'static str {
        self.0.label()
    }
}

/// The complete four-pillar reading for one birth instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourPillars {
    pub year: Pillar,
    pub month: Pillar,
    pub day: Pillar,
    pub hour: Pillar,
    pub shichen: Shichen,
}

impl FourPillars {
    pub fn calculate(input: &BirthInput) -> Result<Self> {
        ensure_supported(input.date)?;
        let year = year_pillar(input.date)?;
        let month = month_pillar(input.date)?;
        let day = day_pillar(input.date)?;
        let minutes = to_true_solar_minutes(input.date, input.time, input.longitude);
        let (hour, shichen) = hour_pillar(minutes, day.stem())?;
        tracing::debug!(
            date = %input.date,
            time = %input.time,
            longitude = input.longitude,
            true_solar_minutes = minutes,
            "calculated four pillars"
        );
        Ok(Self { year, month, day, hour, shichen })
    }

    pub fn pillars(&self) -> [Pillar; 4] {
        [self.year, self.month, self.day, self.hour]
    }
}

fn ensure_supported(date: CivilDate) -> Result<()> {
    let (y, m, d) = DAY_ANCHOR;
    let anchor = CivilDate::new(y, m, d)?;
    if date < anchor {
        return Err(BaziError::Calculation(format!(
            "{date} precedes the supported range starting {anchor}"
        )));
    }
    if date.year() > MAX_SUPPORTED_YEAR {
        return Err(BaziError::Calculation(format!(
            "{date} is past the supported range ending {MAX_SUPPORTED_YEAR}-12-31"
        )));
    }
    Ok(())
}

fn combine(stem: u8, branch: u8) -> Result<Pillar> {
    Sexagenary::from_parts(Stem::from_index(stem), Branch::from_index(branch))
        .map(Pillar::new)
        .ok_or_else(|| {
            BaziError::Calculation(format!("stem {stem} and branch {branch} differ in parity"))
        })
}

/// The sexagenary year in effect on `date`.
pub fn sexagenary_year(date: CivilDate) -> i32 {
    if is_on_or_after_spring_boundary(date.year(), date.month(), date.day()) {
        date.year()
    } else {
        date.year() - 1
    }
}

pub fn year_pillar(date: CivilDate) -> Result<Pillar> {
    let offset = sexagenary_year(date) - YEAR_ANCHOR;
    combine(offset.rem_euclid(10) as u8, offset.rem_euclid(12) as u8)
}

pub fn month_branch(date: CivilDate) -> Branch {
    let m = date.month() as usize - 1;
    let after_term = date.day() >= SECTIONAL_TERM_DAY[m];
    let slot = m * 2 + usize::from(after_term);
    Branch::from_index(MONTH_BRANCH_TABLE[slot])
}

pub fn month_pillar(date: CivilDate) -> Result<Pillar> {
    let year = year_pillar(date)?;
    let branch = month_branch(date);
    let origin = MONTH_STEM_ORIGIN[year.stem().index() as usize];
    // months count from 寅
    let position = (branch.index() + 12 - Branch::Yin.index()) % 12;
    combine((origin + position) % 10, branch.index())
}

pub fn day_pillar(date: CivilDate) -> Result<Pillar> {
    let (y, m, d) = DAY_ANCHOR;
    let diff = days_between(CivilDate::new(y, m, d)?, date);
    if diff < 0 {
        return Err(BaziError::Calculation(format!(
            "day pillar undefined for {date}, before {y:04}-{m:02}-{d:02}"
        )));
    }
    let anchor = Sexagenary::new(DAY_ANCHOR_INDEX)
        .ok_or_else(|| BaziError::Calculation("day anchor index out of range".into()))?;
    Ok(Pillar::new(anchor.offset(diff)))
}

/// Two-hour bucket of a true-solar minute count. 子 covers 23:00–01:00;
/// a value exactly on a boundary belongs to the later bucket.
pub fn shichen_of(true_solar_minutes: f64) -> Shichen {
    let minutes = true_solar_minutes.rem_euclid(1440.0);
    let bucket = ((minutes + 60.0) / 120.0).floor() as u8 % 12;
    Shichen::from_branch(Branch::from_index(bucket))
}

pub fn hour_pillar(true_solar_minutes: f64, day_stem: Stem) -> Result<(Pillar, Shichen)> {
    let shichen = shichen_of(true_solar_minutes);
    let origin = HOUR_STEM_ORIGIN[day_stem.index() as usize];
    let branch = shichen.branch().index();
    let pillar = combine((origin + branch) % 10, branch)?;
    Ok((pillar, shichen))
}
