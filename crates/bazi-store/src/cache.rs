//! The cache manager: sole owner of cached dual-format records and the
//! nickname index, persisted through a [`DurableStore`].
//!
//! Durable writes are best effort. A failed write is logged and the
//! in-memory copy stays authoritative for the life of the process.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bazi_core::{
    BirthInput, CURRENT_SCHEMA_VERSION, DualFormatRecord, FormattedRecord, FourPillars,
    MigrationManager, MigrationStats, RecordFormat, RecordSource, RepairPolicy,
    ValidationSummary, Validator, now_iso8601, unix_to_iso8601,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::durable::DurableStore;
use crate::error::{Result, StoreError};

/// Prefix of every persisted entry key.
pub const ENTRY_PREFIX: &str = "bazi_cache_entry_v2:";
/// Key of the persisted list of entries and nicknames.
pub const INDEX_KEY: &str = "bazi_cache_index_v2";

/// Cache key of a birth input: `"{date}_{time}_{longitude:.2}"`.
pub fn cache_key(birth: &BirthInput) -> String {
    format!("{}_{}_{:.2}", birth.date, birth.time, birth.longitude)
}

fn storage_key(key: &str) -> String {
    format!("{ENTRY_PREFIX}{key}")
}

/// How a caller names a cached reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Nickname(String),
    Key(String),
    Birth(BirthInput),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub record: DualFormatRecord,
    /// Unix milliseconds.
    pub cached_at: u64,
    /// Unix milliseconds; the entry is stale once `now > expires_at`.
    pub expires_at: u64,
    pub schema_version: String,
}

impl CacheEntry {
    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis > self.expires_at
    }
}

/// Persisted entry before its record has been migrated.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    key: String,
    #[serde(default)]
    nickname: Option<String>,
    record: Value,
    cached_at: u64,
    expires_at: u64,
    #[serde(default)]
    schema_version: Option<String>,
}

#[derive(Serialize, Deserialize, Default)]
struct CacheIndex {
    #[serde(default)]
    entries: Vec<String>,
    #[serde(default)]
    nicknames: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct WarmItem {
    pub birth: BirthInput,
    pub nickname: Option<String>,
    /// Precomputed record in any known schema shape; calculated when absent.
    pub record: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WarmOptions {
    pub force_refresh: bool,
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RepairOutcome {
    /// Nothing to do.
    Healthy,
    /// Migration and derivable fixes made the record consistent.
    Repaired,
    /// Rebuilt from the record's birth stamp.
    Recomputed,
    StillNeedsRepair,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub examined: usize,
    pub healthy: usize,
    pub repaired: usize,
    pub recomputed: usize,
    pub still_needs_repair: usize,
}

impl RepairReport {
    fn record(&mut self, outcome: RepairOutcome) {
        self.examined += 1;
        match outcome {
            RepairOutcome::Healthy => self.healthy += 1,
            RepairOutcome::Repaired => self.repaired += 1,
            RepairOutcome::Recomputed => self.recomputed += 1,
            RepairOutcome::StillNeedsRepair => self.still_needs_repair += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub nicknames: usize,
    pub expired: usize,
    pub needs_repair: usize,
    /// Persisted entries that could not be read or migrated.
    pub unreadable: usize,
    pub oldest_cached_at: Option<String>,
    pub newest_cached_at: Option<String>,
}

fn needs_attention(record: &DualFormatRecord) -> bool {
    record.meta.needs_repair || !record.validation.is_valid
}

pub struct CacheManager<S: DurableStore> {
    store: S,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: HashMap<String, CacheEntry>,
    nicknames: HashMap<String, String>,
    unreadable: BTreeSet<String>,
    migrations: MigrationManager,
}

impl<S: DurableStore> CacheManager<S> {
    pub fn open(store: S, config: CacheConfig) -> Result<Self> {
        Self::open_with_clock(store, config, Arc::new(SystemClock))
    }

    /// Build a manager and load whatever the store already holds.
    pub fn open_with_clock(store: S, config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let migrations = MigrationManager::new(Validator::new(config.validation_mode));
        let mut manager = Self {
            store,
            config,
            clock,
            entries: HashMap::new(),
            nicknames: HashMap::new(),
            unreadable: BTreeSet::new(),
            migrations,
        };
        manager.load()?;
        Ok(manager)
    }

    // --- Loading ---

    fn load(&mut self) -> Result<()> {
        let Some(bytes) = self.store.get(INDEX_KEY)? else {
            return Ok(());
        };
        let index: CacheIndex = match serde_json::from_slice(&bytes) {
            Ok(index) => index,
            Err(e) => {
                let backup = format!("{INDEX_KEY}.corrupt");
                warn!(error = %e, backup = %backup, "cache index unreadable, starting empty");
                if let Err(e) = self.store.set(&backup, &bytes) {
                    warn!(error = %e, "failed to back up corrupt cache index");
                }
                return Ok(());
            }
        };

        let mut upgraded = Vec::new();
        for key in index.entries {
            match self.load_entry(&key) {
                Ok(Some((entry, changed))) => {
                    if changed {
                        upgraded.push(key.clone());
                    }
                    self.entries.insert(key, entry);
                }
                Ok(None) => debug!(key = %key, "indexed cache entry has no stored value"),
                Err(e) => {
                    warn!(key = %key, error = %e, "leaving unreadable cache entry untouched");
                    self.unreadable.insert(key);
                }
            }
        }
        for (nickname, key) in index.nicknames {
            if self.entries.contains_key(&key) {
                self.nicknames.insert(nickname, key);
            }
        }

        for key in &upgraded {
            if let Some(entry) = self.entries.get(key) {
                self.persist_entry(entry);
            }
        }
        if !upgraded.is_empty() {
            self.persist_index();
        }
        info!(
            entries = self.entries.len(),
            upgraded = upgraded.len(),
            unreadable = self.unreadable.len(),
            "cache loaded"
        );
        Ok(())
    }

    /// Read and migrate one stored entry. The flag is set when the stored
    /// bytes are out of date and should be written back.
    fn load_entry(&mut self, key: &str) -> Result<Option<(CacheEntry, bool)>> {
        let Some(bytes) = self.store.get(&storage_key(key))? else {
            return Ok(None);
        };
        let stored: StoredEntry = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::InvalidData(format!("cache entry {key}: {e}")))?;
        if stored.key != key {
            return Err(StoreError::InvalidData(format!(
                "cache entry stored under {key} claims key {}",
                stored.key
            )));
        }
        let migrated = self.migrations.migrate(&stored.record)?;
        let changed = !migrated.log.steps.is_empty()
            || stored.schema_version.as_deref() != Some(CURRENT_SCHEMA_VERSION);
        let entry = CacheEntry {
            key: stored.key,
            nickname: stored.nickname,
            record: migrated.record,
            cached_at: stored.cached_at,
            expires_at: stored.expires_at,
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
        };
        Ok(Some((entry, changed)))
    }

    // --- Persistence ---

    fn persist_entry(&self, entry: &CacheEntry) {
        let result = serde_json::to_vec(entry)
            .map_err(|e| StoreError::InvalidData(e.to_string()))
            .and_then(|bytes| self.store.set(&storage_key(&entry.key), &bytes));
        if let Err(e) = result {
            warn!(key = %entry.key, error = %e, "failed to persist cache entry");
        }
    }

    fn persist_index(&self) {
        let mut entries: BTreeSet<&String> = self.entries.keys().collect();
        entries.extend(self.unreadable.iter());
        let index = CacheIndex {
            entries: entries.into_iter().cloned().collect(),
            nicknames: self
                .nicknames
                .iter()
                .map(|(n, k)| (n.clone(), k.clone()))
                .collect(),
        };
        let result = serde_json::to_vec(&index)
            .map_err(|e| StoreError::InvalidData(e.to_string()))
            .and_then(|bytes| self.store.set(INDEX_KEY, &bytes));
        if let Err(e) = result {
            warn!(error = %e, "failed to persist cache index");
        }
    }

    fn unpersist_entry(&self, key: &str) {
        if let Err(e) = self.store.remove(&storage_key(key)) {
            warn!(key = %key, error = %e, "failed to remove cache entry from store");
        }
    }

    // --- Lookup ---

    fn resolve(&self, lookup: &Lookup) -> Option<String> {
        let key = match lookup {
            Lookup::Nickname(nickname) => self.nicknames.get(nickname)?.clone(),
            Lookup::Key(key) => key.clone(),
            Lookup::Birth(birth) => cache_key(birth),
        };
        self.entries.contains_key(&key).then_some(key)
    }

    /// Interpret a free-form identifier: an entry key if one matches,
    /// otherwise a nickname.
    pub fn identify(&self, identifier: &str) -> Lookup {
        if self.entries.contains_key(identifier) {
            Lookup::Key(identifier.to_string())
        } else {
            Lookup::Nickname(identifier.to_string())
        }
    }

    /// Drop the entry if it has expired. Returns true when it was dropped.
    fn expire_if_stale(&mut self, key: &str) -> bool {
        let now = self.clock.now_millis();
        let stale = self.entries.get(key).is_some_and(|e| e.is_expired(now));
        if stale {
            debug!(key = %key, "cache entry expired on read");
            self.evict(key);
            self.persist_index();
        }
        stale
    }

    fn evict(&mut self, key: &str) {
        self.entries.remove(key);
        self.nicknames.retain(|_, k| k != key);
        self.unpersist_entry(key);
    }

    /// Point `nickname` at `key`. The entry it previously named loses it.
    fn bind_nickname(&mut self, nickname: &str, key: &str) {
        let previous = self.nicknames.insert(nickname.to_string(), key.to_string());
        let Some(previous) = previous.filter(|p| p != key) else {
            return;
        };
        let detached = self.entries.get_mut(&previous).and_then(|entry| {
            if entry.nickname.as_deref() != Some(nickname) {
                return None;
            }
            entry.nickname = None;
            Some(entry.clone())
        });
        if let Some(entry) = detached {
            debug!(nickname, from = %previous, to = %key, "nickname moved");
            self.persist_entry(&entry);
        }
    }

    /// Unexpired entry, after a transparent derivable-only repair.
    fn live_entry(&mut self, key: &str) -> Option<&CacheEntry> {
        if self.expire_if_stale(key) {
            return None;
        }
        if self.entries.get(key).is_some_and(|e| needs_attention(&e.record)) {
            self.repair_key(key, RepairPolicy::DerivableOnly);
        }
        self.entries.get(key)
    }

    /// The cached entry behind `lookup`, if present and unexpired.
    pub fn get_entry(&mut self, lookup: &Lookup) -> Option<&CacheEntry> {
        let key = self.resolve(lookup)?;
        self.live_entry(&key)
    }

    /// Fetch a cached reading in the requested format.
    ///
    /// Single-sided formats are only served from records that validate,
    /// because one side alone cannot reveal a disagreement.
    pub fn get(&mut self, lookup: &Lookup, format: RecordFormat) -> Result<Option<FormattedRecord>> {
        let Some(key) = self.resolve(lookup) else {
            return Ok(None);
        };
        let validator = *self.migrations.validator();
        let Some(entry) = self.live_entry(&key) else {
            return Ok(None);
        };
        if format.is_single_sided() {
            let report = validator.validate(&entry.record);
            if !report.is_valid {
                return Err(bazi_core::BaziError::Consistency(format!(
                    "cached record {key} is inconsistent: {}",
                    report.errors.join("; ")
                ))
                .into());
            }
        }
        Ok(Some(entry.record.format(format)?))
    }

    // --- Writes ---

    /// Store a record under the key of `birth`, replacing any previous entry.
    /// Returns the cache key.
    pub fn put(
        &mut self,
        birth: &BirthInput,
        nickname: Option<&str>,
        mut record: DualFormatRecord,
        ttl: Option<Duration>,
    ) -> String {
        let key = cache_key(birth);
        let ttl = self
            .config
            .clamp_ttl(ttl.unwrap_or_else(|| self.config.default_ttl()));
        let now = self.clock.now_millis();

        let report = self.migrations.validator().validate(&record);
        record.validation = ValidationSummary::from(&report);
        record.meta.needs_repair |= !report.is_valid;

        let nickname = match nickname {
            Some(nickname) => {
                self.bind_nickname(nickname, &key);
                Some(nickname.to_string())
            }
            // keep the old nickname only while the index still points here
            None => self
                .entries
                .get(&key)
                .and_then(|e| e.nickname.clone())
                .filter(|n| self.nicknames.get(n) == Some(&key)),
        };
        let entry = CacheEntry {
            key: key.clone(),
            nickname,
            record,
            cached_at: now,
            expires_at: now.saturating_add(ttl.as_millis() as u64),
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
        };
        self.unreadable.remove(&key);
        self.persist_entry(&entry);
        self.entries.insert(key.clone(), entry);
        self.persist_index();
        debug!(key = %key, ttl_secs = ttl.as_secs(), "cached record");
        key
    }

    fn is_fresh_and_valid(&mut self, key: &str) -> bool {
        self.live_entry(key)
            .is_some_and(|e| !needs_attention(&e.record))
    }

    fn calculate(birth: &BirthInput) -> bazi_core::Result<DualFormatRecord> {
        let pillars = FourPillars::calculate(birth)?;
        Ok(DualFormatRecord::from_pillars(
            &pillars,
            Some(birth),
            Some(now_iso8601()),
        ))
    }

    /// Serve from the cache when possible, otherwise calculate and cache.
    /// Calculation errors are returned and nothing is cached.
    pub fn get_or_calculate(
        &mut self,
        birth: &BirthInput,
        nickname: Option<&str>,
        format: RecordFormat,
        force_refresh: bool,
    ) -> Result<FormattedRecord> {
        let key = cache_key(birth);
        if !force_refresh && self.is_fresh_and_valid(&key) {
            if let Some(nickname) = nickname
                && self.nicknames.get(nickname) != Some(&key)
            {
                self.bind_nickname(nickname, &key);
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.nickname = Some(nickname.to_string());
                }
                if let Some(entry) = self.entries.get(&key) {
                    self.persist_entry(entry);
                }
                self.persist_index();
            }
            if let Some(found) = self.get(&Lookup::Key(key.clone()), format)? {
                debug!(key = %key, "cache hit");
                return Ok(found);
            }
        }

        let record = Self::calculate(birth)?;
        let formatted = record.format(format)?;
        self.put(birth, nickname, record, None);
        Ok(formatted)
    }

    /// Bulk load. Entries already present, unexpired and valid are skipped
    /// unless `force_refresh` is set.
    pub fn warm(&mut self, items: Vec<WarmItem>, options: WarmOptions) -> WarmReport {
        let mut report = WarmReport::default();
        for item in items {
            let key = cache_key(&item.birth);
            if !options.force_refresh && self.is_fresh_and_valid(&key) {
                report.skipped += 1;
                continue;
            }
            let record = match &item.record {
                Some(raw) => self
                    .migrations
                    .migrate(raw)
                    .map(|m| m.record)
                    .map_err(StoreError::from),
                None => Self::calculate(&item.birth).map_err(StoreError::from),
            };
            match record {
                Ok(record) => {
                    self.put(&item.birth, item.nickname.as_deref(), record, options.ttl);
                    report.applied += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "warm item failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failed,
            "cache warmed"
        );
        report
    }

    /// Evict every expired entry. Returns the number evicted.
    pub fn sweep(&mut self) -> usize {
        let now = self.clock.now_millis();
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            self.evict(key);
        }
        if !expired.is_empty() {
            self.persist_index();
        }
        debug!(evicted = expired.len(), remaining = self.entries.len(), "cache sweep");
        expired.len()
    }

    // --- Repair ---

    fn repair_key(&mut self, key: &str, policy: RepairPolicy) -> RepairOutcome {
        let Some(current) = self.entries.get(key).map(|e| e.record.clone()) else {
            return RepairOutcome::Healthy;
        };
        if !needs_attention(&current) {
            return RepairOutcome::Healthy;
        }

        let mut record = match self.migrations.migrate_record(&current) {
            Ok(migrated) => migrated.record,
            Err(e) => {
                warn!(key = %key, error = %e, "re-migration failed");
                current
            }
        };
        let mut outcome = RepairOutcome::Repaired;

        if needs_attention(&record) {
            let recomputed = record
                .meta
                .birth
                .as_ref()
                .and_then(|stamp| stamp.to_input().ok())
                .and_then(|birth| Self::calculate(&birth).ok());
            if let Some(mut fresh) = recomputed {
                fresh.meta.source = RecordSource::Repaired;
                fresh.meta.migrated_from = record.meta.migrated_from.take();
                record = fresh;
                outcome = RepairOutcome::Recomputed;
            } else if policy == RepairPolicy::AllowDefaults {
                record = self.migrations.validator().repair(&record, policy).record;
            }
        }
        if needs_attention(&record) {
            outcome = RepairOutcome::StillNeedsRepair;
        }

        if let Some(entry) = self.entries.get_mut(key) {
            entry.record = record;
        }
        if let Some(entry) = self.entries.get(key) {
            self.persist_entry(entry);
        }
        debug!(key = %key, outcome = ?outcome, "cache entry repaired");
        outcome
    }

    /// Repair the entry behind `identifier` (key or nickname).
    /// `None` when no unexpired entry matches.
    pub fn repair_one(&mut self, identifier: &str, policy: RepairPolicy) -> Option<RepairOutcome> {
        let key = self.resolve(&self.identify(identifier))?;
        if self.expire_if_stale(&key) {
            return None;
        }
        Some(self.repair_key(&key, policy))
    }

    pub fn repair_all(&mut self, policy: RepairPolicy) -> RepairReport {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        let mut report = RepairReport::default();
        let now = self.clock.now_millis();
        for key in keys {
            if self.entries.get(&key).is_some_and(|e| e.is_expired(now)) {
                continue;
            }
            report.record(self.repair_key(&key, policy));
        }
        info!(
            examined = report.examined,
            repaired = report.repaired,
            recomputed = report.recomputed,
            still_needs_repair = report.still_needs_repair,
            "cache repair pass"
        );
        report
    }

    // --- Removal ---

    /// Remove the entry behind `identifier`. Returns whether one existed.
    pub fn clear(&mut self, identifier: &str) -> bool {
        let Some(key) = self.resolve(&self.identify(identifier)) else {
            return false;
        };
        self.evict(&key);
        self.persist_index();
        true
    }

    /// Remove every entry, including unreadable ones. Returns the count.
    pub fn clear_all(&mut self) -> usize {
        let keys: Vec<String> = self
            .entries
            .keys()
            .chain(self.unreadable.iter())
            .cloned()
            .collect();
        for key in &keys {
            self.unpersist_entry(key);
        }
        self.entries.clear();
        self.nicknames.clear();
        self.unreadable.clear();
        if let Err(e) = self.store.remove(INDEX_KEY) {
            warn!(error = %e, "failed to remove cache index");
        }
        info!(removed = keys.len(), "cache cleared");
        keys.len()
    }

    // --- Introspection ---

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now_millis();
        let cached_at = self.entries.values().map(|e| e.cached_at);
        let iso = |millis: u64| unix_to_iso8601(millis / 1000);
        CacheStats {
            entries: self.entries.len(),
            nicknames: self.nicknames.len(),
            expired: self.entries.values().filter(|e| e.is_expired(now)).count(),
            needs_repair: self
                .entries
                .values()
                .filter(|e| needs_attention(&e.record))
                .count(),
            unreadable: self.unreadable.len(),
            oldest_cached_at: cached_at.clone().min().map(iso),
            newest_cached_at: cached_at.max().map(iso),
        }
    }

    /// Entries sorted by key, expired ones included.
    pub fn entries(&self) -> Vec<&CacheEntry> {
        let mut entries: Vec<&CacheEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub(crate) fn insert_entry(&mut self, entry: CacheEntry) {
        if let Some(nickname) = &entry.nickname {
            self.bind_nickname(nickname, &entry.key);
        }
        self.unreadable.remove(&entry.key);
        self.persist_entry(&entry);
        self.entries.insert(entry.key.clone(), entry);
    }

    pub(crate) fn migrations_mut(&mut self) -> &mut MigrationManager {
        &mut self.migrations
    }

    pub(crate) fn save_index(&self) {
        self.persist_index();
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn unreadable_keys(&self) -> impl Iterator<Item = &str> {
        self.unreadable.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn validator(&self) -> &Validator {
        self.migrations.validator()
    }

    pub fn migration_stats(&self) -> MigrationStats {
        self.migrations.stats()
    }
}
