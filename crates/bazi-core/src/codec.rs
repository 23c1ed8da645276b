//! Numeric ⇄ label encoding for pillars and shichen.
//!
//! This module is the single source of truth for the dual encoding. Lookups
//! return `None` for anything outside the tables so callers can treat an
//! unknown label as repairable data.

use crate::ganzhi::{SEXAGENARY_LABELS, SHICHEN_LABELS, Sexagenary, Shichen};
use crate::pillar::{FourPillars, Pillar};
use crate::record::{ChinesePillars, NumericPillars};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// 60-entry stem+branch table.
    Pillar,
    /// 12-entry two-hour period table.
    Shichen,
}

impl TableKind {
    pub fn table(self) -> &'static [&'static str] {
        match self {
            TableKind::Pillar => &SEXAGENARY_LABELS,
            TableKind::Shichen => &SHICHEN_LABELS,
        }
    }

    /// Number of entries in the table.
    pub fn size(self) -> usize {
        self.table().len()
    }
}

pub fn numeric_to_label(kind: TableKind, index: i64) -> Option<&'static str> {
    usize::try_from(index)
        .ok()
        .and_then(|i| kind.table().get(i).copied())
}

pub fn label_to_numeric(kind: TableKind, label: &str) -> Option<u8> {
    kind.table()
        .iter()
        .position(|&l| l == label)
        .map(|i| i as u8)
}

/// Split a record into its two redundant encodings.
pub fn encode(pillars: &FourPillars) -> (NumericPillars, ChinesePillars) {
    let numeric = NumericPillars {
        year: Some(pillars.year.index().index() as i64),
        month: Some(pillars.month.index().index() as i64),
        day: Some(pillars.day.index().index() as i64),
        hour: Some(pillars.hour.index().index() as i64),
        shichen: Some(pillars.shichen.index() as i64),
    };
    let chinese = ChinesePillars {
        year: Some(pillars.year.label().to_string()),
        month: Some(pillars.month.label().to_string()),
        day: Some(pillars.day.label().to_string()),
        hour: Some(pillars.hour.label().to_string()),
        shichen: Some(pillars.shichen.label().to_string()),
    };
    (numeric, chinese)
}

fn pillar_from_numeric(value: Option<i64>) -> Option<Pillar> {
    let index = u8::try_from(value?).ok()?;
    Sexagenary::new(index).map(Pillar::new)
}

fn pillar_from_label(label: Option<&str>) -> Option<Pillar> {
    let index = label_to_numeric(TableKind::Pillar, label?)?;
    Sexagenary::new(index).map(Pillar::new)
}

/// Decode the numeric side. `None` if any field is missing or out of range.
pub fn decode_numeric(numeric: &NumericPillars) -> Option<FourPillars> {
    let shichen = Shichen::new(u8::try_from(numeric.shichen?).ok()?)?;
    Some(FourPillars {
        year: pillar_from_numeric(numeric.year)?,
        month: pillar_from_numeric(numeric.month)?,
        day: pillar_from_numeric(numeric.day)?,
        hour: pillar_from_numeric(numeric.hour)?,
        shichen,
    })
}

/// Decode the label side. `None` if any label is missing or unknown.
pub fn decode_chinese(chinese: &ChinesePillars) -> Option<FourPillars> {
    let shichen =
        Shichen::new(label_to_numeric(TableKind::Shichen, chinese.shichen.as_deref()?)?)?;
    Some(FourPillars {
        year: pillar_from_label(chinese.year.as_deref())?,
        month: pillar_from_label(chinese.month.as_deref())?,
        day: pillar_from_label(chinese.day.as_deref())?,
        hour: pillar_from_label(chinese.hour.as_deref())?,
        shichen,
    })
}
