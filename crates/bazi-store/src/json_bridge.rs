use std::fs;
use std::path::Path;

use bazi_core::{CURRENT_SCHEMA_VERSION, RecordSource, now_iso8601};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheEntry, CacheManager};
use crate::durable::DurableStore;
use crate::error::{Result, StoreError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportFile<'a> {
    schema_version: &'static str,
    exported_at: String,
    entries: Vec<&'a CacheEntry>,
}

#[derive(Deserialize)]
struct ImportFile {
    entries: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub expired: usize,
    pub failed: usize,
}

impl<S: DurableStore> CacheManager<S> {
    /// Export every entry, expired ones included, as a JSON string.
    pub fn export_json_string(&self) -> Result<String> {
        let file = ExportFile {
            schema_version: CURRENT_SCHEMA_VERSION,
            exported_at: now_iso8601(),
            entries: self.entries(),
        };
        serde_json::to_string_pretty(&file)
            .map_err(|e| StoreError::InvalidData(format!("JSON export failed: {e}")))
    }

    pub fn export_json_file(&self, path: &Path) -> Result<()> {
        let json = self.export_json_string()?;
        fs::write(path, json).map_err(|e| {
            StoreError::InvalidData(format!("failed to write {}: {e}", path.display()))
        })
    }

    /// Import an export. Each record goes through migration, so files
    /// written by older versions load too. Expired entries are skipped.
    pub fn import_json_str(&mut self, json: &str) -> Result<ImportReport> {
        let file: ImportFile = serde_json::from_str(json)
            .map_err(|e| StoreError::InvalidData(format!("invalid JSON: {e}")))?;
        let now = self.now_millis();
        let mut report = ImportReport::default();

        for raw in file.entries {
            match self.import_entry(&raw) {
                Ok(entry) if entry.is_expired(now) => report.expired += 1,
                Ok(entry) => {
                    self.insert_entry(entry);
                    report.imported += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unimportable cache entry");
                    report.failed += 1;
                }
            }
        }
        if report.imported > 0 {
            self.save_index();
        }
        tracing::info!(
            imported = report.imported,
            expired = report.expired,
            failed = report.failed,
            "cache import finished"
        );
        Ok(report)
    }

    pub fn import_json_file(&mut self, path: &Path) -> Result<ImportReport> {
        let json = fs::read_to_string(path).map_err(|e| {
            StoreError::InvalidData(format!("failed to read {}: {e}", path.display()))
        })?;
        self.import_json_str(&json)
    }

    fn import_entry(&mut self, raw: &Value) -> Result<CacheEntry> {
        let text = |name: &str| raw.get(name).and_then(Value::as_str).map(str::to_string);
        let millis = |name: &str| {
            raw.get(name)
                .and_then(Value::as_u64)
                .ok_or_else(|| StoreError::InvalidData(format!("entry lacks {name}")))
        };
        let key = text("key").ok_or_else(|| StoreError::InvalidData("entry lacks key".into()))?;
        let record = raw
            .get("record")
            .ok_or_else(|| StoreError::InvalidData(format!("entry {key} lacks record")))?;
        let mut record = self.migrations_mut().migrate(record)?.record;
        record.meta.source = RecordSource::Imported;

        Ok(CacheEntry {
            nickname: text("nickname"),
            record,
            cached_at: millis("cachedAt")?,
            expires_at: millis("expiresAt")?,
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bazi_core::{BirthInput, DualFormatRecord, FourPillars, RecordFormat};
    use serde_json::json;

    use super::*;
    use crate::cache::Lookup;
    use crate::clock::ManualClock;
    use crate::config::CacheConfig;
    use crate::durable::MemoryStore;

    const T0: u64 = 1_700_000_000_000;

    fn manager(clock: &ManualClock) -> CacheManager<MemoryStore> {
        CacheManager::open_with_clock(
            MemoryStore::new(),
            CacheConfig::default(),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    fn populated(clock: &ManualClock) -> CacheManager<MemoryStore> {
        let mut cache = manager(clock);
        for (date, nickname) in [("1990-01-01", "a"), ("1985-10-26", "b")] {
            let birth = BirthInput::parse(date, "12:30", 116.4).unwrap();
            let pillars = FourPillars::calculate(&birth).unwrap();
            let record = DualFormatRecord::from_pillars(&pillars, Some(&birth), None);
            cache.put(&birth, Some(nickname), record, None);
        }
        cache
    }

    #[test]
    fn test_export_import_roundtrip() {
        let clock = ManualClock::new(T0);
        let original = populated(&clock);
        let json = original.export_json_string().unwrap();

        let mut restored = manager(&clock);
        let report = restored.import_json_str(&json).unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(restored.len(), 2);

        let a = restored
            .get(&Lookup::Nickname("a".into()), RecordFormat::Dual)
            .unwrap();
        assert!(a.is_some());
        let entry = restored.get_entry(&Lookup::Nickname("b".into())).unwrap();
        assert_eq!(entry.record.meta.source, RecordSource::Imported);
    }

    #[test]
    fn test_export_shape() {
        let clock = ManualClock::new(T0);
        let cache = populated(&clock);
        let value: Value = serde_json::from_str(&cache.export_json_string().unwrap()).unwrap();
        assert_eq!(value["schemaVersion"], CURRENT_SCHEMA_VERSION);
        let entries = value["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        // sorted by key
        assert!(entries[0]["key"].as_str().unwrap() < entries[1]["key"].as_str().unwrap());
        assert!(entries[0]["record"]["chinese"]["yearCn"].is_string());
    }

    #[test]
    fn test_import_skips_expired_and_broken() {
        let clock = ManualClock::new(T0);
        let json = populated(&clock).export_json_string().unwrap();

        let later = ManualClock::new(T0);
        later.advance(Duration::from_secs(13 * 3600));
        let mut cache = manager(&later);
        let report = cache.import_json_str(&json).unwrap();
        assert_eq!(report.expired, 2);
        assert!(cache.is_empty());

        let mixed = json!({
            "entries": [
                {"key": "k", "record": {"year": "庚午", "month": "戊寅", "day": "甲子", "hour": "丙寅"},
                 "cachedAt": T0, "expiresAt": T0 + 100 * 3_600_000u64},
                {"key": "bad", "record": {"nope": 1}, "cachedAt": T0, "expiresAt": T0},
                {"record": {}}
            ]
        });
        let report = cache.import_json_str(&mixed.to_string()).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.failed, 2);
    }

    #[test]
    fn test_import_rejects_non_export() {
        let clock = ManualClock::new(T0);
        let mut cache = manager(&clock);
        assert!(cache.import_json_str("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("bazi-bridge-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("export.json");

        let clock = ManualClock::new(T0);
        populated(&clock).export_json_file(&path).unwrap();
        let mut cache = manager(&clock);
        let report = cache.import_json_file(&path).unwrap();
        assert_eq!(report.imported, 2);
        let _ = fs::remove_dir_all(&dir);
    }
}
