//! End-to-end checks across calculator, codec, validator and migration.

use bazi_core::time::{civil_from_days, days_from_civil};
use bazi_core::{
    BirthInput, CivilDate, ClockTime, DualFormatRecord, FormattedRecord, FourPillars,
    MigrationManager, RecordFormat, TableKind, Validator, day_pillar, decode_chinese,
    decode_numeric, label_to_numeric, numeric_to_label, year_pillar,
};
use proptest::prelude::*;
use serde_json::json;

fn date_from_epoch_days(days: i64) -> CivilDate {
    let (y, m, d) = civil_from_days(days);
    CivilDate::new(y as i32, m as u32, d as u32).unwrap()
}

fn supported_days() -> std::ops::Range<i64> {
    days_from_civil(1900, 1, 1)..days_from_civil(2100, 12, 31)
}

#[test]
fn reference_scenario_is_reproducible() {
    let input = BirthInput::parse("1990-01-01", "12:30", 116.4).unwrap();
    let first = FourPillars::calculate(&input).unwrap();
    let second = FourPillars::calculate(&input).unwrap();
    assert_eq!(first, second);

    let labels: Vec<&str> = first.pillars().iter().map(|p| p.label()).collect();
    assert_eq!(labels, ["己巳", "丙子", "丙寅", "甲午"]);
    assert_eq!(first.shichen.label(), "午时");

    let record = DualFormatRecord::from_pillars(&first, Some(&input), None);
    assert_eq!(record.numeric.year, Some(5));
    assert_eq!(record.numeric.month, Some(12));
    assert_eq!(record.numeric.day, Some(2));
    assert_eq!(record.numeric.hour, Some(30));
    assert_eq!(record.numeric.shichen, Some(6));
}

#[test]
fn codec_round_trip_over_full_tables() {
    for i in 0..60 {
        let label = numeric_to_label(TableKind::Pillar, i).unwrap();
        assert_eq!(label_to_numeric(TableKind::Pillar, label), Some(i as u8));
    }
    for i in 0..12 {
        let label = numeric_to_label(TableKind::Shichen, i).unwrap();
        assert_eq!(label_to_numeric(TableKind::Shichen, label), Some(i as u8));
    }
}

#[test]
fn year_boundary_discontinuity() {
    for y in [1950, 1990, 2024, 2077] {
        let feb3 = year_pillar(CivilDate::new(y, 2, 3).unwrap()).unwrap();
        let feb5 = year_pillar(CivilDate::new(y, 2, 5).unwrap()).unwrap();
        assert_eq!(feb3.index().offset(1), feb5.index(), "year {y}");

        // Jan 1 and Mar 1 of the same calendar year sit on opposite sides of
        // the boundary; each agrees with its own side.
        let jan1 = year_pillar(CivilDate::new(y, 1, 1).unwrap()).unwrap();
        let mar1 = year_pillar(CivilDate::new(y, 3, 1).unwrap()).unwrap();
        assert_eq!(jan1, feb3);
        assert_eq!(mar1, feb5);
    }
}

#[test]
fn flat_record_migrates_to_matching_pillars() {
    let flat = json!({"year": "庚午", "month": "戊寅", "day": "甲子", "hour": "丙寅"});
    let migrated = MigrationManager::default().migrate(&flat).unwrap();
    let record = migrated.record;
    assert!(record.validation.is_valid, "{:?}", record.validation);

    let numeric = decode_numeric(&record.numeric).unwrap();
    let chinese = decode_chinese(&record.chinese).unwrap();
    assert_eq!(numeric, chinese);
    let labels: Vec<&str> = chinese.pillars().iter().map(|p| p.label()).collect();
    assert_eq!(labels, ["庚午", "戊寅", "甲子", "丙寅"]);
    assert_eq!(chinese.shichen.label(), "寅时");
}

#[test]
fn every_format_renders_for_a_fresh_record() {
    let input = BirthInput::parse("2024-02-10", "07:45", 121.47).unwrap();
    let pillars = FourPillars::calculate(&input).unwrap();
    let record = DualFormatRecord::from_pillars(&pillars, Some(&input), None);
    for format in [
        RecordFormat::Dual,
        RecordFormat::Numeric,
        RecordFormat::Chinese,
        RecordFormat::Legacy,
    ] {
        let rendered = record.format(format).unwrap();
        let matches = matches!(
            (format, &rendered),
            (RecordFormat::Dual, FormattedRecord::Dual(_))
                | (RecordFormat::Numeric, FormattedRecord::Numeric(_))
                | (RecordFormat::Chinese, FormattedRecord::Chinese(_))
                | (RecordFormat::Legacy, FormattedRecord::Legacy(_))
        );
        assert!(matches, "{format} rendered as {rendered:?}");
    }
}

proptest! {
    #[test]
    fn day_pillar_is_linear(days in supported_days()) {
        let d = date_from_epoch_days(days);
        let today = day_pillar(d).unwrap().index();
        let tomorrow = day_pillar(d.succ()).unwrap().index();
        prop_assert_eq!(today.offset(1), tomorrow);
    }

    #[test]
    fn fresh_records_are_consistent(
        days in supported_days(),
        hour in 0u32..24,
        minute in 0u32..60,
        longitude in 70.0f64..140.0,
    ) {
        let input = BirthInput::new(
            date_from_epoch_days(days),
            ClockTime::new(hour, minute).unwrap(),
            longitude,
        ).unwrap();
        let pillars = FourPillars::calculate(&input).unwrap();
        let record = DualFormatRecord::from_pillars(&pillars, Some(&input), None);
        let report = Validator::default().validate(&record);
        prop_assert!(report.is_valid, "{:?}", report);
        prop_assert!(report.warnings.is_empty(), "{:?}", report);
        prop_assert_eq!(decode_numeric(&record.numeric), Some(pillars));
        prop_assert_eq!(decode_chinese(&record.chinese), Some(pillars));
    }

    #[test]
    fn migration_is_idempotent(
        year in 0i64..70,
        month in 0i64..70,
        day in 0i64..70,
        hour in 0i64..70,
    ) {
        let label = |i: i64| numeric_to_label(TableKind::Pillar, i).unwrap_or("??");
        let flat = json!({
            "year": label(year),
            "month": label(month),
            "day": label(day),
            "hour": label(hour),
        });
        let mut manager = MigrationManager::default();
        let once = manager.migrate(&flat).unwrap().record;
        let twice = manager.migrate_record(&once).unwrap().record;
        prop_assert_eq!(once, twice);
    }
}
