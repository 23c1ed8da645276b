//! Schema migration for stored pillar records.
//!
//! Three shapes have been written over time:
//!
//! - `1.0.0`: flat `year`/`month`/`day`/`hour` label fields
//! - `1.1.0`: nested `birth` + `bazi` objects
//! - `2.0.0`: the dual-format record (`meta` + `numeric` + `chinese`)
//!
//! A stored value is sniffed structurally, walked along the edge list to the
//! current version, validated, and auto-repaired where the repair can be
//! derived from the record itself. Records that stay invalid are flagged
//! `needsRepair` and returned anyway.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::calendar::BirthInput;
use crate::codec::{TableKind, label_to_numeric};
use crate::error::MigrationError;
use crate::ganzhi::{Sexagenary, Shichen};
use crate::record::{
    BirthStamp, CURRENT_SCHEMA_VERSION, ChinesePillars, DualFormatRecord, NumericPillars,
    RecordMeta, RecordSource, ValidationSummary,
};
use crate::validate::{RepairPolicy, Validator};

/// Number of logs kept by `MigrationManager`.
pub const MAX_HISTORY: usize = 100;

const PILLAR_KEYS: [&str; 4] = ["year", "month", "day", "hour"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SchemaVersion {
    #[serde(rename = "1.0.0")]
    V1_0_0,
    #[serde(rename = "1.1.0")]
    V1_1_0,
    #[serde(rename = "2.0.0")]
    V2_0_0,
}

impl SchemaVersion {
    pub const CURRENT: SchemaVersion = SchemaVersion::V2_0_0;

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaVersion::V1_0_0 => "1.0.0",
            SchemaVersion::V1_1_0 => "1.1.0",
            SchemaVersion::V2_0_0 => CURRENT_SCHEMA_VERSION,
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, pure transform between two adjacent schema versions.
pub struct MigrationEdge {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub name: &'static str,
    pub transform: fn(&Value) -> Result<Value, MigrationError>,
}

pub static MIGRATION_EDGES: [MigrationEdge; 2] = [
    MigrationEdge {
        from: SchemaVersion::V1_0_0,
        to: SchemaVersion::V1_1_0,
        name: "nest-birth-and-pillars",
        transform: nest_birth_and_pillars,
    },
    MigrationEdge {
        from: SchemaVersion::V1_1_0,
        to: SchemaVersion::V2_0_0,
        name: "encode-dual-format",
        transform: encode_dual_format,
    },
];

/// Edges leading from `from` to the current version, in order.
pub fn migration_path(from: SchemaVersion) -> Vec<&'static MigrationEdge> {
    let mut path = Vec::new();
    let mut at = from;
    while at != SchemaVersion::CURRENT {
        match MIGRATION_EDGES.iter().find(|e| e.from == at) {
            Some(edge) => {
                path.push(edge);
                at = edge.to;
            }
            None => break,
        }
    }
    path
}

pub fn detect_version(record: &Value) -> Result<SchemaVersion, MigrationError> {
    let obj = record.as_object().ok_or(MigrationError::UnrecognizedShape)?;
    let has = |k: &str| obj.contains_key(k);
    if has("meta") && has("numeric") && has("chinese") {
        return Ok(SchemaVersion::V2_0_0);
    }
    if has("birth") && has("bazi") {
        return Ok(SchemaVersion::V1_1_0);
    }
    let nested = ["meta", "numeric", "chinese", "birth", "bazi"];
    if PILLAR_KEYS.iter().all(|k| has(k)) && !nested.iter().any(|k| has(k)) {
        return Ok(SchemaVersion::V1_0_0);
    }
    Err(MigrationError::UnrecognizedShape)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationLog {
    pub detected_version: Option<SchemaVersion>,
    pub steps: Vec<&'static str>,
    pub success: bool,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Migrated {
    pub record: DualFormatRecord,
    pub log: MigrationLog,
}

/// Migrate a stored value to a validated current-version record.
pub fn migrate(raw: &Value, validator: &Validator) -> (Result<DualFormatRecord, MigrationError>, MigrationLog) {
    let started = Instant::now();
    let mut log = MigrationLog {
        detected_version: None,
        steps: Vec::new(),
        success: false,
        duration_ms: 0.0,
        error: None,
    };
    let result = run(raw, validator, &mut log);
    log.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    match &result {
        Ok(_) => log.success = true,
        Err(e) => log.error = Some(e.to_string()),
    }
    (result, log)
}

fn run(
    raw: &Value,
    validator: &Validator,
    log: &mut MigrationLog,
) -> Result<DualFormatRecord, MigrationError> {
    let version = detect_version(raw)?;
    log.detected_version = Some(version);

    let mut value = raw.clone();
    for edge in migration_path(version) {
        value = (edge.transform)(&value)?;
        log.steps.push(edge.name);
    }

    let mut record: DualFormatRecord =
        serde_json::from_value(value).map_err(|e| MigrationError::Malformed(e.to_string()))?;
    record.meta.schema_version = CURRENT_SCHEMA_VERSION.to_string();

    let report = validator.validate(&record);
    if report.is_valid {
        record.validation = ValidationSummary::from(&report);
        record.meta.needs_repair = false;
        return Ok(record);
    }

    let repaired = validator.repair(&record, RepairPolicy::DerivableOnly);
    if repaired.applied > 0 {
        log.steps.push("auto-repair");
    }
    if repaired.record.meta.needs_repair {
        tracing::warn!(
            errors = ?repaired.report.errors,
            "record still invalid after auto-repair, keeping it flagged"
        );
    }
    Ok(repaired.record)
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// Label of a pillar stored either as a bare string or as an object with a
/// `ganZhi`/`ganzhi` field or separate `gan` + `zhi`.
fn pillar_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(o) => {
            let text = |k: &str| o.get(k).and_then(Value::as_str).filter(|s| !s.is_empty());
            if let Some(s) = text("ganZhi").or_else(|| text("ganzhi")) {
                return Some(s.to_string());
            }
            match (text("gan"), text("zhi")) {
                (Some(g), Some(z)) => Some(format!("{g}{z}")),
                _ => None,
            }
        }
        _ => None,
    }
}

fn shichen_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(o) => o
            .get("time")
            .or_else(|| o.get("shichen"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn field<'a>(obj: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = obj.get(*first)?;
    for key in rest {
        current = current.get(*key)?;
    }
    (!current.is_null()).then_some(current)
}

fn first_of<'a>(obj: &'a Map<String, Value>, paths: &[&[&str]]) -> Option<&'a Value> {
    paths.iter().find_map(|p| field(obj, p))
}

fn nest_birth_and_pillars(flat: &Value) -> Result<Value, MigrationError> {
    let obj = flat
        .as_object()
        .ok_or_else(|| MigrationError::Malformed("flat record is not an object".into()))?;

    let mut bazi = Map::new();
    for key in PILLAR_KEYS {
        let label = obj.get(key).and_then(pillar_label);
        bazi.insert(key.to_string(), json!({ "ganZhi": label }));
    }

    Ok(json!({
        "meta": {
            "version": "1.1.0",
            "migratedFrom": "1.0.0",
            "calculatedAt": first_of(obj, &[&["calculatedAt"], &["timestamp"]]),
        },
        "birth": {
            "date": field(obj, &["birthDate"]),
            "time": field(obj, &["birthTime"]),
            "longitude": field(obj, &["longitude"]),
            "shichen": obj.get("shichen").and_then(shichen_label),
        },
        "bazi": bazi,
        "nickname": field(obj, &["nickname"]),
    }))
}

fn encode_dual_format(nested: &Value) -> Result<Value, MigrationError> {
    let obj = nested
        .as_object()
        .ok_or_else(|| MigrationError::Malformed("nested record is not an object".into()))?;
    let bazi = obj
        .get("bazi")
        .and_then(Value::as_object)
        .ok_or_else(|| MigrationError::Malformed("bazi is not an object".into()))?;

    let label = |key: &str| bazi.get(key).and_then(pillar_label);
    let numeric = |label: &Option<String>| {
        label
            .as_deref()
            .and_then(|l| label_to_numeric(TableKind::Pillar, l))
            .map(i64::from)
    };
    let (year, month, day, hour) = (label("year"), label("month"), label("day"), label("hour"));

    // Shichen shares its index with the hour branch; fall back to it when the
    // stored period is absent or not a table member.
    let stored_shichen = first_of(
        obj,
        &[&["birth", "shichen"], &["birth", "time", "shichen"], &["bazi", "shichen"]],
    )
    .and_then(shichen_label);
    let from_hour = numeric(&hour)
        .and_then(|i| Sexagenary::new(i as u8))
        .map(|s| Shichen::from_branch(s.branch()).label().to_string());
    let shichen = match stored_shichen {
        Some(s) if label_to_numeric(TableKind::Shichen, &s).is_some() => Some(s),
        Some(s) => from_hour.or(Some(s)),
        None => from_hour,
    };
    let shichen_numeric = shichen
        .as_deref()
        .and_then(|s| label_to_numeric(TableKind::Shichen, s))
        .map(i64::from);

    let date = first_of(obj, &[&["birth", "date"], &["birth", "solar", "fullDate"]])
        .and_then(Value::as_str);
    let time = first_of(obj, &[&["birth", "time", "original"], &["birth", "time"]])
        .and_then(Value::as_str);
    let longitude = first_of(
        obj,
        &[&["birth", "longitude"], &["birth", "location", "longitude"]],
    )
    .and_then(Value::as_f64);
    let birth = match (date, time, longitude) {
        (Some(d), Some(t), Some(l)) => BirthInput::parse(d, t, l)
            .ok()
            .map(|input| BirthStamp::from_input(&input)),
        _ => None,
    };

    let produced_at = first_of(
        obj,
        &[&["meta", "calculatedAt"], &["meta", "producedAt"], &["meta", "createdAt"]],
    )
    .and_then(Value::as_str)
    .map(str::to_string);
    let migrated_from = field(obj, &["meta", "migratedFrom"])
        .and_then(Value::as_str)
        .unwrap_or("1.1.0")
        .to_string();

    let record = DualFormatRecord {
        meta: RecordMeta {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            produced_at,
            source: RecordSource::Migrated,
            birth,
            migrated_from: Some(migrated_from),
            needs_repair: false,
        },
        numeric: NumericPillars {
            year: numeric(&year),
            month: numeric(&month),
            day: numeric(&day),
            hour: numeric(&hour),
            shichen: shichen_numeric,
        },
        chinese: ChinesePillars {
            year,
            month,
            day,
            hour,
            shichen,
        },
        validation: ValidationSummary::default(),
    };
    serde_json::to_value(record).map_err(|e| MigrationError::Malformed(e.to_string()))
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub average_duration_ms: f64,
}

/// Runs migrations and keeps a bounded log history for diagnostics.
#[derive(Debug, Default)]
pub struct MigrationManager {
    validator: Validator,
    history: VecDeque<MigrationLog>,
}

impl MigrationManager {
    pub fn new(validator: Validator) -> Self {
        Self {
            validator,
            history: VecDeque::new(),
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn migrate(&mut self, raw: &Value) -> Result<Migrated, MigrationError> {
        let (result, log) = migrate(raw, &self.validator);
        tracing::debug!(
            detected = ?log.detected_version,
            steps = ?log.steps,
            success = log.success,
            duration_ms = log.duration_ms,
            "migration finished"
        );
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(log.clone());
        result.map(|record| Migrated { record, log })
    }

    /// Re-run the pipeline on an in-memory record (revalidate + auto-repair).
    pub fn migrate_record(&mut self, record: &DualFormatRecord) -> Result<Migrated, MigrationError> {
        let raw = serde_json::to_value(record).map_err(|e| MigrationError::Malformed(e.to_string()))?;
        self.migrate(&raw)
    }

    pub fn history(&self) -> impl Iterator<Item = &MigrationLog> {
        self.history.iter()
    }

    pub fn stats(&self) -> MigrationStats {
        let total = self.history.len();
        let successful = self.history.iter().filter(|l| l.success).count();
        let total_ms: f64 = self.history.iter().map(|l| l.duration_ms).sum();
        MigrationStats {
            total,
            successful,
            failed: total - successful,
            average_duration_ms: if total == 0 { 0.0 } else { total_ms / total as f64 },
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}
