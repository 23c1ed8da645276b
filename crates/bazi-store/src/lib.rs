pub mod cache;
pub mod clock;
pub mod config;
pub mod durable;
pub mod error;
pub mod json_bridge;
pub mod schema;
pub mod store;

pub use cache::{
    CacheEntry, CacheManager, CacheStats, Lookup, RepairOutcome, RepairReport, WarmItem,
    WarmOptions, WarmReport, cache_key,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CONFIG_FILE_NAME, CacheConfig, DB_FILE_NAME, default_base_dir};
pub use durable::{DurableStore, MemoryStore};
pub use error::{Result, StoreError};
pub use json_bridge::ImportReport;
pub use store::SqliteStore;
