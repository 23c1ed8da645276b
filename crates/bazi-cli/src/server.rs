use std::sync::Arc;
use std::time::Duration;

use bazi_core::{
    BaziError, BaziStatus, BirthInput, DEFAULT_BIRTH_TIME, DEFAULT_LONGITUDE, RecordFormat,
    RepairPolicy,
};
use bazi_store::{CacheManager, Lookup, SqliteStore, StoreError, cache_key};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Clone)]
pub struct BaziServer {
    cache: Arc<Mutex<CacheManager<SqliteStore>>>,
    tool_router: ToolRouter<Self>,
}

impl BaziServer {
    pub fn new(cache: CacheManager<SqliteStore>) -> Self {
        Self {
            cache: Arc::new(Mutex::new(cache)),
            tool_router: Self::tool_router(),
        }
    }

    /// Sweep expired entries every `every`, sharing the server's lock.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = cache.lock().await.sweep();
                tracing::debug!(evicted, "periodic sweep");
            }
        })
    }

    /// Flush the WAL before exit. The store's Drop does the same, but the
    /// runtime may shut down before the last handle is dropped.
    pub async fn checkpoint_wal(&self) {
        let cache = self.cache.lock().await;
        if let Err(e) = cache.store().checkpoint_truncate() {
            tracing::warn!("WAL checkpoint failed: {e}");
        }
        tracing::info!("WAL checkpoint complete");
    }
}

fn json_result(value: serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_default(),
    )])
}

fn status_result(status: BaziStatus, message: impl std::fmt::Display) -> CallToolResult {
    json_result(json!({
        "status": status,
        "error": message.to_string(),
    }))
}

fn store_error_result(e: &StoreError) -> CallToolResult {
    status_result(e.status(), e)
}

fn parse_format(format: Option<&str>) -> Result<RecordFormat, McpError> {
    match format {
        None => Ok(RecordFormat::Dual),
        Some(f) => f
            .parse()
            .map_err(|e: BaziError| McpError::invalid_params(e.to_string(), None)),
    }
}

fn parse_birth(
    date: &str,
    time: Option<&str>,
    longitude: Option<f64>,
) -> Result<BirthInput, BaziError> {
    BirthInput::parse(
        date,
        time.unwrap_or(DEFAULT_BIRTH_TIME),
        longitude.unwrap_or(DEFAULT_LONGITUDE),
    )
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct CalculateRequest {
    /// Birth date, YYYY-MM-DD
    date: String,
    /// Clock time, HH:mm. Defaults to 12:30
    time: Option<String>,
    /// Decimal longitude, east positive. Defaults to 116.40 (Beijing)
    longitude: Option<f64>,
    /// Optional nickname to index the reading under
    nickname: Option<String>,
    /// Output format: "dual" (default), "numeric", "chinese" or "legacy"
    format: Option<String>,
    /// Recalculate even when a valid entry is cached
    #[serde(default)]
    force_refresh: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GetRequest {
    /// Nickname or cache key. Takes precedence over the birth fields
    identifier: Option<String>,
    /// Birth date, YYYY-MM-DD
    date: Option<String>,
    /// Clock time, HH:mm
    time: Option<String>,
    /// Decimal longitude, east positive
    longitude: Option<f64>,
    /// Output format: "dual" (default), "numeric", "chinese" or "legacy"
    format: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RepairRequest {
    /// Nickname or cache key. Repairs every entry when omitted
    identifier: Option<String>,
    /// Reset fields with no salvageable data to table defaults
    #[serde(default)]
    allow_defaults: bool,
}

#[tool_router]
impl BaziServer {
    #[tool(
        description = "Calculate the four pillars (year, month, day, hour) and shichen for a birth date, clock time and longitude. Served from the cache when a valid entry exists; otherwise calculated and cached. Returns {status, key, format, record}."
    )]
    async fn bazi_calculate(
        &self,
        Parameters(req): Parameters<CalculateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let format = parse_format(req.format.as_deref())?;
        let birth = match parse_birth(&req.date, req.time.as_deref(), req.longitude) {
            Ok(birth) => birth,
            Err(e) => return Ok(status_result(e.status(), e)),
        };

        let mut cache = self.cache.lock().await;
        match cache.get_or_calculate(&birth, req.nickname.as_deref(), format, req.force_refresh)
        {
            Ok(record) => Ok(json_result(json!({
                "status": BaziStatus::Ready,
                "key": cache_key(&birth),
                "format": format.as_str(),
                "record": record,
            }))),
            Err(e) => Ok(store_error_result(&e)),
        }
    }

    #[tool(
        description = "Look up a cached reading by nickname, cache key, or birth date/time/longitude. Never calculates. Returns status MISSING when nothing unexpired is cached."
    )]
    async fn bazi_get(
        &self,
        Parameters(req): Parameters<GetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let format = parse_format(req.format.as_deref())?;
        let mut cache = self.cache.lock().await;
        let lookup = match (&req.identifier, &req.date) {
            (Some(id), _) => cache.identify(id),
            (None, Some(date)) => match parse_birth(date, req.time.as_deref(), req.longitude) {
                Ok(birth) => Lookup::Birth(birth),
                Err(e) => return Ok(status_result(e.status(), e)),
            },
            (None, None) => {
                return Ok(status_result(
                    BaziStatus::Missing,
                    "pass an identifier or a birth date",
                ));
            }
        };

        match cache.get(&lookup, format) {
            Ok(Some(record)) => Ok(json_result(json!({
                "status": BaziStatus::Ready,
                "format": format.as_str(),
                "record": record,
            }))),
            Ok(None) => Ok(status_result(BaziStatus::Missing, "no cached reading")),
            Err(e) => Ok(store_error_result(&e)),
        }
    }

    #[tool(
        description = "Re-run migration and validation on cached readings flagged invalid, recomputing from the stored birth input when needed. Pass an identifier for one reading, or omit it to repair all."
    )]
    async fn bazi_repair(
        &self,
        Parameters(req): Parameters<RepairRequest>,
    ) -> Result<CallToolResult, McpError> {
        let policy = if req.allow_defaults {
            RepairPolicy::AllowDefaults
        } else {
            RepairPolicy::DerivableOnly
        };
        let mut cache = self.cache.lock().await;
        match req.identifier.as_deref() {
            Some(id) => match cache.repair_one(id, policy) {
                Some(outcome) => Ok(json_result(json!({
                    "status": BaziStatus::Ready,
                    "outcome": outcome,
                }))),
                None => Ok(status_result(BaziStatus::Missing, "no cached reading")),
            },
            None => Ok(json_result(json!({
                "status": BaziStatus::Ready,
                "report": cache.repair_all(policy),
            }))),
        }
    }

    #[tool(description = "Evict expired cache entries now. Also runs periodically in the background.")]
    async fn bazi_sweep(&self) -> Result<CallToolResult, McpError> {
        let mut cache = self.cache.lock().await;
        let evicted = cache.sweep();
        Ok(json_result(json!({
            "evicted": evicted,
            "remaining": cache.len(),
        })))
    }

    #[tool(
        description = "Cache statistics: entry and nickname counts, expired and needs-repair counts, oldest/newest entry, migration history and database size."
    )]
    async fn bazi_stats(&self) -> Result<CallToolResult, McpError> {
        let cache = self.cache.lock().await;
        Ok(json_result(json!({
            "cache": cache.stats(),
            "migrations": cache.migration_stats(),
            "config": cache.config(),
            "db_size_bytes": cache.store().db_size(),
        })))
    }
}

#[tool_handler]
impl ServerHandler for BaziServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Four-pillar (bazi) calculator backed by a validated cache.\n\n\
                 - bazi_calculate: pillars for a birth date, HH:mm time and longitude. \
                   Time defaults to 12:30 and longitude to 116.40.\n\
                 - bazi_get: read a cached reading by nickname, key or birth input.\n\
                 - bazi_repair / bazi_sweep / bazi_stats: maintenance.\n\n\
                 Every response carries a status: READY, MISSING (input absent or not cached) \
                 or ERROR (outside the supported 1900-2100 range, or an inconsistent record)."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
