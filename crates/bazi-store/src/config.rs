//! Cache configuration: `config.toml` in the data directory, then
//! `BAZI_CACHE_*` environment overrides.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bazi_core::ValidationMode;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "bazi.db";

/// Default base directory for all bazi storage.
pub fn default_base_dir() -> PathBuf {
    dirs_home().join(".bazi")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Shortest lifetime a cache entry may be given.
    pub min_ttl_secs: u64,
    /// Longest lifetime a cache entry may be given.
    pub max_ttl_secs: u64,
    /// Lifetime used when the caller does not pass one.
    pub default_ttl_secs: u64,
    /// Period of the background sweep.
    pub sweep_interval_secs: u64,
    pub validation_mode: ValidationMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_ttl_secs: 10 * 60,
            max_ttl_secs: 12 * 60 * 60,
            default_ttl_secs: 12 * 60 * 60,
            sweep_interval_secs: 6 * 60 * 60,
            validation_mode: ValidationMode::Strict,
        }
    }
}

impl CacheConfig {
    pub fn min_ttl(&self) -> Duration {
        Duration::from_secs(self.min_ttl_secs)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Clamp a requested lifetime into `[min_ttl, max_ttl]`.
    pub fn clamp_ttl(&self, ttl: Duration) -> Duration {
        ttl.clamp(self.min_ttl(), self.max_ttl())
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_ttl_secs == 0 {
            return Err(StoreError::Config("min_ttl_secs must be positive".into()));
        }
        if self.min_ttl_secs > self.max_ttl_secs {
            return Err(StoreError::Config(format!(
                "min_ttl_secs ({}) exceeds max_ttl_secs ({})",
                self.min_ttl_secs, self.max_ttl_secs
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(StoreError::Config("sweep_interval_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `config.toml` under `base_dir`; a missing file means defaults.
    pub fn load(base_dir: &Path) -> Result<Self> {
        let path = base_dir.join(CONFIG_FILE_NAME);
        let config = match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::info!("loaded cache config from {}", path.display());
                Self::from_toml_str(&text)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        let config = config.with_env_overrides(|k| env::var(k).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `BAZI_CACHE_*` overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |name: &str| -> Result<Option<u64>> {
            match lookup(name) {
                None => Ok(None),
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| StoreError::Config(format!("{name}={v} is not a whole number"))),
            }
        };
        if let Some(v) = secs("BAZI_CACHE_MIN_TTL_SECS")? {
            self.min_ttl_secs = v;
        }
        if let Some(v) = secs("BAZI_CACHE_MAX_TTL_SECS")? {
            self.max_ttl_secs = v;
        }
        if let Some(v) = secs("BAZI_CACHE_DEFAULT_TTL_SECS")? {
            self.default_ttl_secs = v;
        }
        if let Some(v) = secs("BAZI_CACHE_SWEEP_INTERVAL_SECS")? {
            self.sweep_interval_secs = v;
        }
        if let Some(mode) = lookup("BAZI_CACHE_VALIDATION_MODE") {
            self.validation_mode = match mode.trim().to_ascii_lowercase().as_str() {
                "strict" => ValidationMode::Strict,
                "permissive" => ValidationMode::Permissive,
                other => {
                    return Err(StoreError::Config(format!(
                        "unknown validation mode '{other}'"
                    )));
                }
            };
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.min_ttl(), Duration::from_secs(600));
        assert_eq!(config.max_ttl(), Duration::from_secs(43_200));
        assert_eq!(config.sweep_interval(), Duration::from_secs(21_600));
        config.validate().unwrap();
    }

    #[test]
    fn test_clamp_ttl() {
        let config = CacheConfig::default();
        let just_under = config.min_ttl() - Duration::from_millis(1);
        assert_eq!(config.clamp_ttl(just_under), config.min_ttl());
        assert_eq!(config.clamp_ttl(Duration::from_secs(3600)), Duration::from_secs(3600));
        assert_eq!(config.clamp_ttl(Duration::from_secs(86_400)), config.max_ttl());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CacheConfig::from_toml_str(
            "min_ttl_secs = 60\nvalidation_mode = \"permissive\"\n",
        )
        .unwrap();
        assert_eq!(config.min_ttl_secs, 60);
        assert_eq!(config.max_ttl_secs, 43_200);
        assert_eq!(config.validation_mode, ValidationMode::Permissive);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let err = CacheConfig::from_toml_str("min_ttl_secs = 100\nmax_ttl_secs = 10\n");
        assert!(matches!(err, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BAZI_CACHE_MAX_TTL_SECS", "7200"),
            ("BAZI_CACHE_VALIDATION_MODE", "Permissive"),
        ]
        .into_iter()
        .collect();
        let config = CacheConfig::default()
            .with_env_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_ttl_secs, 7200);
        assert_eq!(config.validation_mode, ValidationMode::Permissive);

        let bad = CacheConfig::default()
            .with_env_overrides(|k| (k == "BAZI_CACHE_MIN_TTL_SECS").then(|| "ten".to_string()));
        assert!(bad.is_err());
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = std::env::temp_dir().join(format!("bazi-config-missing-{}", std::process::id()));
        let config = CacheConfig::load(&dir).unwrap();
        assert_eq!(config.min_ttl_secs, CacheConfig::default().min_ttl_secs);
    }
}
