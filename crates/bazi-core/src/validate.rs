//! Cross-checks the two encodings of a dual-format record.
//!
//! `Validator::validate` is read-only. Fixing a record is the separate
//! `Validator::repair` step, which the caller has to ask for.

use serde::{Deserialize, Serialize};

use crate::codec::{TableKind, label_to_numeric, numeric_to_label};
use crate::ganzhi::{Branch, Stem};
use crate::record::{ChinesePillars, DualFormatRecord, NumericPillars, RecordSource, ValidationSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Numeric/label disagreement is an error.
    #[default]
    Strict,
    /// Numeric/label disagreement is a warning.
    Permissive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PillarField {
    Year,
    Month,
    Day,
    Hour,
    Shichen,
}

impl PillarField {
    pub const ALL: [PillarField; 5] = [
        PillarField::Year,
        PillarField::Month,
        PillarField::Day,
        PillarField::Hour,
        PillarField::Shichen,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PillarField::Year => "year",
            PillarField::Month => "month",
            PillarField::Day => "day",
            PillarField::Hour => "hour",
            PillarField::Shichen => "shichen",
        }
    }

    pub fn kind(self) -> TableKind {
        match self {
            PillarField::Shichen => TableKind::Shichen,
            _ => TableKind::Pillar,
        }
    }

    fn numeric_slot(self, numeric: &mut NumericPillars) -> &mut Option<i64> {
        match self {
            PillarField::Year => &mut numeric.year,
            PillarField::Month => &mut numeric.month,
            PillarField::Day => &mut numeric.day,
            PillarField::Hour => &mut numeric.hour,
            PillarField::Shichen => &mut numeric.shichen,
        }
    }

    fn label_slot(self, chinese: &mut ChinesePillars) -> &mut Option<String> {
        match self {
            PillarField::Year => &mut chinese.year,
            PillarField::Month => &mut chinese.month,
            PillarField::Day => &mut chinese.day,
            PillarField::Hour => &mut chinese.hour,
            PillarField::Shichen => &mut chinese.shichen,
        }
    }

    pub fn numeric(self, numeric: &NumericPillars) -> Option<i64> {
        match self {
            PillarField::Year => numeric.year,
            PillarField::Month => numeric.month,
            PillarField::Day => numeric.day,
            PillarField::Hour => numeric.hour,
            PillarField::Shichen => numeric.shichen,
        }
    }

    pub fn label(self, chinese: &ChinesePillars) -> Option<&str> {
        match self {
            PillarField::Year => chinese.year.as_deref(),
            PillarField::Month => chinese.month.as_deref(),
            PillarField::Day => chinese.day.as_deref(),
            PillarField::Hour => chinese.hour.as_deref(),
            PillarField::Shichen => chinese.shichen.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum FixAction {
    /// Label is a table member; recompute the number from it.
    NumericFromLabel { value: u8 },
    /// Number is in range; recompute the label from it.
    LabelFromNumeric { label: &'static str },
    /// Neither side is usable; fall back to entry 0 of the table.
    ResetToDefault { value: u8, label: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fix {
    pub field: PillarField,
    #[serde(flatten)]
    pub action: FixAction,
}

impl Fix {
    /// Whether the fix is derived from data already in the record.
    pub fn is_derivable(&self) -> bool {
        !matches!(self.action, FixAction::ResetToDefault { .. })
    }

    fn apply(&self, record: &mut DualFormatRecord) {
        let (value, label) = match self.action {
            FixAction::NumericFromLabel { value } => (Some(value), None),
            FixAction::LabelFromNumeric { label } => (None, Some(label)),
            FixAction::ResetToDefault { value, label } => (Some(value), Some(label)),
        };
        if let Some(v) = value {
            *self.field.numeric_slot(&mut record.numeric) = Some(v as i64);
        }
        if let Some(l) = label {
            *self.field.label_slot(&mut record.chinese) = Some(l.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub fixes: Vec<Fix>,
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairPolicy {
    /// Apply only fixes computed from the other encoding of the same field.
    #[default]
    DerivableOnly,
    /// Also apply canonical defaults where nothing is salvageable.
    AllowDefaults,
}

impl RepairPolicy {
    fn permits(self, fix: &Fix) -> bool {
        match self {
            RepairPolicy::DerivableOnly => fix.is_derivable(),
            RepairPolicy::AllowDefaults => true,
        }
    }
}

/// Result of an explicit repair pass.
#[derive(Debug, Clone)]
pub struct Repaired {
    pub record: DualFormatRecord,
    pub applied: usize,
    pub report: ValidationReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub fix_count: usize,
    pub valid_rate: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    mode: ValidationMode,
}

impl Validator {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn validate(&self, record: &DualFormatRecord) -> ValidationReport {
        let mut report = ValidationReport {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            fixes: Vec::new(),
            checksum: checksum(&record.chinese),
        };
        for field in PillarField::ALL {
            self.check_field(field, record, &mut report);
        }
        check_shichen_matches_hour(&record.numeric, &mut report);
        report.is_valid = report.errors.is_empty();
        report
    }

    fn check_field(&self, field: PillarField, record: &DualFormatRecord, report: &mut ValidationReport) {
        let kind = field.kind();
        let name = field.name();
        let numeric = field.numeric(&record.numeric);
        let label = field.label(&record.chinese);

        let mut numeric_ok = false;
        match numeric {
            None => report.errors.push(format!("{name}: numeric value missing")),
            Some(n) if numeric_to_label(kind, n).is_none() => report
                .errors
                .push(format!("{name}: numeric value {n} outside 0..{}", kind.size())),
            Some(_) => numeric_ok = true,
        }

        let mut label_ok = false;
        match label {
            None => report.errors.push(format!("{name}: label missing")),
            Some(l) if !is_well_formed(kind, l) => {
                report.errors.push(format!("{name}: malformed label '{l}'"))
            }
            Some(_) => label_ok = true,
        }

        let expected = numeric.and_then(|n| numeric_to_label(kind, n));
        if numeric_ok && label_ok && expected == label {
            return;
        }

        if numeric_ok && label_ok {
            let message = format!(
                "{name}: numeric {} encodes {} but label is {}",
                numeric.unwrap_or_default(),
                expected.unwrap_or_default(),
                label.unwrap_or_default()
            );
            match self.mode {
                ValidationMode::Strict => report.errors.push(message),
                ValidationMode::Permissive => report.warnings.push(message),
            }
        }

        let action = if let Some(value) = label.and_then(|l| label_to_numeric(kind, l)) {
            FixAction::NumericFromLabel { value }
        } else if let Some(label) = expected {
            FixAction::LabelFromNumeric { label }
        } else {
            FixAction::ResetToDefault {
                value: 0,
                label: kind.table()[0],
            }
        };
        report.fixes.push(Fix { field, action });
    }

    /// Apply the fixes `policy` allows, then re-validate. The record's
    /// validation block and repair flag reflect the final report.
    pub fn repair(&self, record: &DualFormatRecord, policy: RepairPolicy) -> Repaired {
        let report = self.validate(record);
        let mut fixed = record.clone();
        let mut applied = 0;
        for fix in report.fixes.iter().filter(|f| policy.permits(f)) {
            fix.apply(&mut fixed);
            applied += 1;
        }
        let report = if applied > 0 {
            fixed.meta.source = RecordSource::Repaired;
            self.validate(&fixed)
        } else {
            report
        };
        fixed.validation = ValidationSummary::from(&report);
        fixed.meta.needs_repair = !report.is_valid;
        Repaired {
            record: fixed,
            applied,
            report,
        }
    }

    pub fn validate_batch<'a, I>(&self, records: I) -> (Vec<ValidationReport>, BatchSummary)
    where
        I: IntoIterator<Item = &'a DualFormatRecord>,
    {
        let reports: Vec<ValidationReport> = records.into_iter().map(|r| self.validate(r)).collect();
        let summary = summarize(&reports);
        (reports, summary)
    }
}

pub fn summarize(reports: &[ValidationReport]) -> BatchSummary {
    let total = reports.len();
    let valid = reports.iter().filter(|r| r.is_valid).count();
    BatchSummary {
        total,
        valid,
        invalid: total - valid,
        error_count: reports.iter().map(|r| r.errors.len()).sum(),
        warning_count: reports.iter().map(|r| r.warnings.len()).sum(),
        fix_count: reports.iter().map(|r| r.fixes.len()).sum(),
        valid_rate: if total == 0 {
            0.0
        } else {
            valid as f64 / total as f64
        },
    }
}

fn is_well_formed(kind: TableKind, label: &str) -> bool {
    match kind {
        TableKind::Pillar => {
            let mut chars = label.chars();
            match (chars.next(), chars.next(), chars.next()) {
                (Some(s), Some(b), None) => {
                    let mut buf = [0u8; 4];
                    let stem_ok = Stem::from_label(s.encode_utf8(&mut buf)).is_some();
                    let branch_ok = Branch::from_label(b.encode_utf8(&mut buf)).is_some();
                    stem_ok && branch_ok
                }
                _ => false,
            }
        }
        TableKind::Shichen => label_to_numeric(kind, label).is_some(),
    }
}

fn check_shichen_matches_hour(numeric: &NumericPillars, report: &mut ValidationReport) {
    let (Some(hour), Some(shichen)) = (numeric.hour, numeric.shichen) else {
        return;
    };
    if !(0..60).contains(&hour) || !(0..12).contains(&shichen) {
        return;
    }
    if hour % 12 != shichen {
        report.warnings.push(format!(
            "shichen {shichen} does not match hour branch {}",
            hour % 12
        ));
    }
}

/// Rolling 32-bit hash over all label fields, as 8 hex digits. Only meant
/// to detect change between two records.
pub fn checksum(chinese: &ChinesePillars) -> String {
    let labels = [
        &chinese.year,
        &chinese.month,
        &chinese.day,
        &chinese.hour,
        &chinese.shichen,
    ];
    let mut hash: i32 = 0;
    for label in labels.into_iter().flatten() {
        for c in label.chars() {
            hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(c as i32);
        }
    }
    format!("{:08x}", hash.unsigned_abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CURRENT_SCHEMA_VERSION, RecordMeta};

    fn record(numeric: [Option<i64>; 5], labels: [Option<&str>; 5]) -> DualFormatRecord {
        DualFormatRecord {
            meta: RecordMeta {
                schema_version: CURRENT_SCHEMA_VERSION.into(),
                produced_at: None,
                source: RecordSource::Calculated,
                birth: None,
                migrated_from: None,
                needs_repair: false,
            },
            numeric: NumericPillars {
                year: numeric[0],
                month: numeric[1],
                day: numeric[2],
                hour: numeric[3],
                shichen: numeric[4],
            },
            chinese: ChinesePillars {
                year: labels[0].map(String::from),
                month: labels[1].map(String::from),
                day: labels[2].map(String::from),
                hour: labels[3].map(String::from),
                shichen: labels[4].map(String::from),
            },
            validation: ValidationSummary::default(),
        }
    }

    fn good() -> DualFormatRecord {
        record(
            [Some(5), Some(12), Some(2), Some(30), Some(6)],
            [Some("己巳"), Some("丙子"), Some("丙寅"), Some("甲午"), Some("午时")],
        )
    }

    #[test]
    fn test_consistent_record_is_valid() {
        let report = Validator::default().validate(&good());
        assert!(report.is_valid, "{report:?}");
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
        assert!(report.fixes.is_empty());
    }

    #[test]
    fn test_missing_is_error_in_both_modes() {
        let mut r = good();
        r.numeric.day = None;
        for mode in [ValidationMode::Strict, ValidationMode::Permissive] {
            let report = Validator::new(mode).validate(&r);
            assert!(!report.is_valid);
            assert!(report.errors.iter().any(|e| e.contains("day: numeric value missing")));
            assert_eq!(
                report.fixes,
                vec![Fix {
                    field: PillarField::Day,
                    action: FixAction::NumericFromLabel { value: 2 }
                }]
            );
        }
    }

    #[test]
    fn test_mismatch_strict_vs_permissive() {
        let mut r = good();
        r.numeric.year = Some(6);

        let strict = Validator::new(ValidationMode::Strict).validate(&r);
        assert!(!strict.is_valid);
        assert_eq!(strict.errors.len(), 1);

        let permissive = Validator::new(ValidationMode::Permissive).validate(&r);
        assert!(permissive.is_valid);
        assert_eq!(permissive.warnings.len(), 1);

        // label wins when it is a table member
        assert_eq!(
            strict.fixes[0].action,
            FixAction::NumericFromLabel { value: 5 }
        );
        assert_eq!(strict.fixes, permissive.fixes);
    }

    #[test]
    fn test_fix_prefers_numeric_when_label_unusable() {
        let mut r = good();
        r.chinese.month = Some("丙丑".into());
        let report = Validator::default().validate(&r);
        assert_eq!(
            report.fixes[0],
            Fix {
                field: PillarField::Month,
                action: FixAction::LabelFromNumeric { label: "丙子" }
            }
        );
    }

    #[test]
    fn test_fix_defaults_when_nothing_usable() {
        let mut r = good();
        r.numeric.hour = Some(99);
        r.chinese.hour = Some("xx".into());
        let report = Validator::default().validate(&r);
        assert!(report.errors.iter().any(|e| e.contains("outside 0..60")));
        assert!(report.errors.iter().any(|e| e.contains("malformed label")));
        assert_eq!(
            report.fixes[0].action,
            FixAction::ResetToDefault {
                value: 0,
                label: "甲子"
            }
        );
        assert!(!report.fixes[0].is_derivable());
    }

    #[test]
    fn test_shichen_label_membership() {
        let mut r = good();
        r.chinese.shichen = Some("午".into());
        let report = Validator::default().validate(&r);
        assert!(report.errors.iter().any(|e| e.contains("shichen: malformed label")));
        assert_eq!(
            report.fixes[0].action,
            FixAction::LabelFromNumeric { label: "午时" }
        );
    }

    #[test]
    fn test_shichen_hour_disagreement_warns() {
        let mut r = good();
        r.numeric.shichen = Some(7);
        r.chinese.shichen = Some("未时".into());
        let report = Validator::default().validate(&r);
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("hour branch")));
    }

    #[test]
    fn test_validate_does_not_mutate() {
        let mut r = good();
        r.numeric.year = Some(6);
        let before = r.clone();
        let _ = Validator::default().validate(&r);
        assert_eq!(r, before);
    }

    #[test]
    fn test_repair_derivable_only() {
        let mut r = good();
        r.numeric.year = Some(6);
        r.numeric.hour = None;
        r.chinese.hour = None;

        let repaired = Validator::default().repair(&r, RepairPolicy::DerivableOnly);
        assert_eq!(repaired.applied, 1);
        assert_eq!(repaired.record.numeric.year, Some(5));
        assert!(!repaired.report.is_valid);
        assert!(repaired.record.meta.needs_repair);
        assert_eq!(repaired.record.meta.source, RecordSource::Repaired);

        let forced = Validator::default().repair(&r, RepairPolicy::AllowDefaults);
        assert!(forced.report.is_valid, "{:?}", forced.report);
        assert!(!forced.record.meta.needs_repair);
        assert_eq!(forced.record.chinese.hour.as_deref(), Some("甲子"));
    }

    #[test]
    fn test_repair_of_valid_record_is_noop() {
        let r = good();
        let repaired = Validator::default().repair(&r, RepairPolicy::AllowDefaults);
        assert_eq!(repaired.applied, 0);
        assert_eq!(repaired.record.numeric, r.numeric);
        assert_eq!(repaired.record.meta.source, RecordSource::Calculated);
    }

    #[test]
    fn test_checksum_detects_change() {
        let a = good();
        let mut b = good();
        assert_eq!(checksum(&a.chinese), checksum(&b.chinese));
        b.chinese.day = Some("丁卯".into());
        assert_ne!(checksum(&a.chinese), checksum(&b.chinese));
        assert_eq!(checksum(&a.chinese).len(), 8);
    }

    #[test]
    fn test_batch_summary() {
        let mut bad = good();
        bad.numeric.month = None;
        let records = [good(), bad, good()];
        let (reports, summary) = Validator::default().validate_batch(&records);
        assert_eq!(reports.len(), 3);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.valid, 2);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.fix_count, 1);
        assert!((summary.valid_rate - 2.0 / 3.0).abs() < 1e-12);
    }
}
