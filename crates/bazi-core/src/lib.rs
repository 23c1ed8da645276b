//! Sexagenary four-pillar engine.
//!
//! Turns a birth date, clock time and longitude into year/month/day/hour
//! pillars (corrected to true solar time), stores them as a dual-format
//! record carrying both table indices and labels, validates that the two
//! encodings agree, and migrates records written by older schema versions.
//!
//! Zero I/O. Persistence and caching live in `bazi-store`.

pub mod calendar;
pub mod codec;
pub mod constants;
pub mod error;
pub mod ganzhi;
pub mod migrate;
pub mod pillar;
pub mod record;
pub mod time;
pub mod validate;

pub use calendar::{BirthInput, CivilDate, ClockTime, is_on_or_after_spring_boundary, to_true_solar_minutes};
pub use codec::{TableKind, decode_chinese, decode_numeric, encode, label_to_numeric, numeric_to_label};
pub use constants::{DEFAULT_BIRTH_TIME, DEFAULT_LONGITUDE};
pub use error::{BaziError, BaziStatus, MigrationError, Result};
pub use ganzhi::{Branch, Sexagenary, Shichen, Stem};
pub use migrate::{Migrated, MigrationLog, MigrationManager, MigrationStats, SchemaVersion, detect_version};
pub use pillar::{FourPillars, Pillar, day_pillar, hour_pillar, month_pillar, year_pillar};
pub use record::{
    BirthStamp, CURRENT_SCHEMA_VERSION, ChinesePillars, DualFormatRecord, FormattedRecord,
    LegacyPillar, LegacyPillars, NumericPillars, RecordFormat, RecordMeta, RecordSource,
    ValidationSummary,
};
pub use time::{now_iso8601, now_unix_millis, now_unix_secs, unix_to_iso8601};
pub use validate::{
    BatchSummary, Fix, FixAction, PillarField, RepairPolicy, ValidationMode, ValidationReport,
    Validator, checksum,
};
