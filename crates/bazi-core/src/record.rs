//! Dual-format record: the stored shape of a four-pillar reading.
//!
//! A record carries the same pillars twice, as table indices (`numeric`) and
//! as labels (`chinese`). Every stored field is optional on the wire so that
//! incomplete or damaged records can still be loaded, validated and repaired.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::calendar::BirthInput;
use crate::codec::{decode_chinese, encode};
use crate::error::{BaziError, Result};
use crate::pillar::FourPillars;
use crate::validate::{ValidationMode, ValidationReport, Validator};

/// Schema version written by this crate.
pub const CURRENT_SCHEMA_VERSION: &str = "2.0.0";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    #[default]
    Calculated,
    Migrated,
    Repaired,
    Imported,
}

/// The inputs a record was calculated from, kept so it can be recomputed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BirthStamp {
    pub date: String,
    pub time: String,
    pub longitude: f64,
}

impl BirthStamp {
    pub fn from_input(input: &BirthInput) -> Self {
        Self {
            date: input.date.to_string(),
            time: input.time.to_string(),
            longitude: input.longitude,
        }
    }

    pub fn to_input(&self) -> Result<BirthInput> {
        BirthInput::parse(&self.date, &self.time, self.longitude)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecordMeta {
    #[serde(rename = "schemaVersion", alias = "version")]
    pub schema_version: String,
    #[serde(rename = "producedAt", alias = "calculatedAt", default)]
    pub produced_at: Option<String>,
    #[serde(default)]
    pub source: RecordSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth: Option<BirthStamp>,
    #[serde(rename = "migratedFrom", default, skip_serializing_if = "Option::is_none")]
    pub migrated_from: Option<String>,
    #[serde(rename = "needsRepair", default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_repair: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct NumericPillars {
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub day: Option<i64>,
    pub hour: Option<i64>,
    pub shichen: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ChinesePillars {
    #[serde(rename = "yearCn")]
    pub year: Option<String>,
    #[serde(rename = "monthCn")]
    pub month: Option<String>,
    #[serde(rename = "dayCn")]
    pub day: Option<String>,
    #[serde(rename = "hourCn")]
    pub hour: Option<String>,
    #[serde(rename = "shichenCn")]
    pub shichen: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationSummary {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checksum: String,
}

impl From<&ValidationReport> for ValidationSummary {
    fn from(report: &ValidationReport) -> Self {
        Self {
            is_valid: report.is_valid,
            errors: report.errors.clone(),
            warnings: report.warnings.clone(),
            checksum: report.checksum.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DualFormatRecord {
    pub meta: RecordMeta,
    pub numeric: NumericPillars,
    pub chinese: ChinesePillars,
    #[serde(default)]
    pub validation: ValidationSummary,
}

impl DualFormatRecord {
    /// Encode freshly calculated pillars and validate the result.
    pub fn from_pillars(
        pillars: &FourPillars,
        birth: Option<&BirthInput>,
        produced_at: Option<String>,
    ) -> Self {
        let (numeric, chinese) = encode(pillars);
        let mut record = Self {
            meta: RecordMeta {
                schema_version: CURRENT_SCHEMA_VERSION.to_string(),
                produced_at,
                source: RecordSource::Calculated,
                birth: birth.map(BirthStamp::from_input),
                migrated_from: None,
                needs_repair: false,
            },
            numeric,
            chinese,
            validation: ValidationSummary::default(),
        };
        let report = Validator::new(ValidationMode::Strict).validate(&record);
        record.validation = ValidationSummary::from(&report);
        record
    }

    pub fn needs_repair(&self) -> bool {
        self.meta.needs_repair
    }

    /// Render the record in the requested output shape.
    pub fn format(&self, format: RecordFormat) -> Result<FormattedRecord> {
        match format {
            RecordFormat::Dual => Ok(FormattedRecord::Dual(self.clone())),
            RecordFormat::Numeric => Ok(FormattedRecord::Numeric(self.numeric.clone())),
            RecordFormat::Chinese => Ok(FormattedRecord::Chinese(self.chinese.clone())),
            RecordFormat::Legacy => {
                let pillars = decode_chinese(&self.chinese).ok_or_else(|| {
                    BaziError::Consistency("labels do not decode to a pillar set".into())
                })?;
                Ok(FormattedRecord::Legacy(LegacyPillars::from(&pillars)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
    #[default]
    Dual,
    Numeric,
    Chinese,
    Legacy,
}

impl RecordFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordFormat::Dual => "dual",
            RecordFormat::Numeric => "numeric",
            RecordFormat::Chinese => "chinese",
            RecordFormat::Legacy => "legacy",
        }
    }

    /// Formats that expose only one encoding and therefore cannot show a
    /// disagreement to the reader.
    pub fn is_single_sided(self) -> bool {
        !matches!(self, RecordFormat::Dual)
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordFormat {
    type Err = BaziError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dual" => Ok(RecordFormat::Dual),
            "numeric" => Ok(RecordFormat::Numeric),
            "chinese" => Ok(RecordFormat::Chinese),
            "legacy" => Ok(RecordFormat::Legacy),
            other => Err(BaziError::Input(format!("unknown record format '{other}'"))),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LegacyPillar {
    pub gan: String,
    pub zhi: String,
    pub ganzhi: String,
}

impl From<crate::pillar::Pillar> for LegacyPillar {
    fn from(p: crate::pillar::Pillar) -> Self {
        Self {
            gan: p.stem().label().to_string(),
            zhi: p.branch().label().to_string(),
            ganzhi: p.label().to_string(),
        }
    }
}

/// Flattened per-pillar objects for consumers of the pre-dual shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LegacyPillars {
    pub year: LegacyPillar,
    pub month: LegacyPillar,
    pub day: LegacyPillar,
    pub hour: LegacyPillar,
    pub shichen: String,
}

impl From<&FourPillars> for LegacyPillars {
    fn from(p: &FourPillars) -> Self {
        Self {
            year: p.year.into(),
            month: p.month.into(),
            day: p.day.into(),
            hour: p.hour.into(),
            shichen: p.shichen.label().to_string(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FormattedRecord {
    Dual(DualFormatRecord),
    Numeric(NumericPillars),
    Chinese(ChinesePillars),
    Legacy(LegacyPillars),
}
