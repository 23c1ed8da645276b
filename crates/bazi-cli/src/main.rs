mod server;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bazi_core::{
    BirthInput, DEFAULT_BIRTH_TIME, DEFAULT_LONGITUDE, DualFormatRecord, MigrationManager,
    RecordFormat, RepairPolicy, ValidationMode, Validator,
};
use bazi_store::{
    CacheConfig, CacheManager, DB_FILE_NAME, SqliteStore, WarmItem, WarmOptions,
    default_base_dir,
};
use clap::{Args, Parser, Subcommand};
use rmcp::{ServiceExt, transport::stdio};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "bazi", about = "Four-pillar calculator with a validated record cache")]
struct Cli {
    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct BirthArgs {
    /// Birth date, YYYY-MM-DD
    #[arg(long)]
    date: String,

    /// Clock time, HH:mm
    #[arg(long, default_value = DEFAULT_BIRTH_TIME)]
    time: String,

    /// Decimal longitude, east positive
    #[arg(long, default_value_t = DEFAULT_LONGITUDE, allow_negative_numbers = true)]
    longitude: f64,
}

impl BirthArgs {
    fn to_input(&self) -> Result<BirthInput> {
        BirthInput::parse(&self.date, &self.time, self.longitude).context("invalid birth input")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio transport
    Serve,

    /// Calculate four pillars, served from the cache when possible
    Calc {
        #[command(flatten)]
        birth: BirthArgs,

        /// Nickname to index the reading under
        #[arg(long)]
        nickname: Option<String>,

        /// Output format: dual, numeric, chinese, legacy
        #[arg(long, default_value = "dual")]
        format: RecordFormat,

        /// Recalculate even if a valid entry is cached
        #[arg(long)]
        force: bool,
    },

    /// Look up a cached reading by nickname or cache key
    Get {
        identifier: String,

        /// Output format: dual, numeric, chinese, legacy
        #[arg(long, default_value = "dual")]
        format: RecordFormat,
    },

    /// Bulk-load readings from a JSON array of {date, time?, longitude?, nickname?, record?}
    Warm {
        path: PathBuf,

        /// Replace entries that are already cached and valid
        #[arg(long)]
        force: bool,

        /// Entry lifetime in seconds (clamped to the configured bounds)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Evict expired entries
    Sweep,

    /// Repair one cached reading, or all of them
    Repair {
        /// Nickname or cache key; every entry when omitted
        identifier: Option<String>,

        /// Reset unsalvageable fields to table defaults
        #[arg(long)]
        allow_defaults: bool,
    },

    /// Migrate a stored record file to the current schema and print it
    Migrate {
        path: PathBuf,
    },

    /// Validate a record file (one record or an array of records)
    Validate {
        path: PathBuf,

        /// Report numeric/label disagreements as warnings
        #[arg(long)]
        permissive: bool,
    },

    /// Show cache statistics
    Stats,

    /// Remove a cached reading, or everything with --all
    Clear {
        identifier: Option<String>,

        #[arg(long, conflicts_with = "identifier")]
        all: bool,
    },

    /// Export the cache to a JSON file
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// Import cache entries from a JSON file
    Import {
        /// Input file path
        path: PathBuf,
    },
}

fn base_dir() -> PathBuf {
    std::env::var("BAZI_DATA_DIR")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(default_base_dir)
}

fn open_cache() -> Result<CacheManager<SqliteStore>> {
    let base = base_dir();
    std::fs::create_dir_all(&base)
        .with_context(|| format!("failed to create {}", base.display()))?;
    let config = CacheConfig::load(&base).context("failed to load cache config")?;
    let store =
        SqliteStore::open(&base.join(DB_FILE_NAME)).context("failed to open cache database")?;
    CacheManager::open(store, config).context("failed to open cache")
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve => cmd_serve().await,
        Commands::Calc {
            birth,
            nickname,
            format,
            force,
        } => cmd_calc(&birth, nickname.as_deref(), format, force),
        Commands::Get { identifier, format } => cmd_get(&identifier, format),
        Commands::Warm {
            path,
            force,
            ttl_secs,
        } => cmd_warm(&path, force, ttl_secs),
        Commands::Sweep => cmd_sweep(),
        Commands::Repair {
            identifier,
            allow_defaults,
        } => cmd_repair(identifier.as_deref(), allow_defaults),
        Commands::Migrate { path } => cmd_migrate(&path),
        Commands::Validate { path, permissive } => cmd_validate(&path, permissive),
        Commands::Stats => cmd_stats(),
        Commands::Clear { identifier, all } => cmd_clear(identifier.as_deref(), all),
        Commands::Export { path } => cmd_export(&path),
        Commands::Import { path } => cmd_import(&path),
    }
}

// ---------------------------------------------------------------------------
// Advisory pidfile for observability
// ---------------------------------------------------------------------------

fn pidfile_path() -> PathBuf {
    base_dir().join("bazi-serve.pid")
}

/// Check for an existing pidfile and log accordingly, then write our own.
fn acquire_pidfile() -> Option<PathBuf> {
    let path = pidfile_path();
    if let Ok(content) = std::fs::read_to_string(&path)
        && let Ok(pid) = content.trim().parse::<u32>()
    {
        if is_process_alive(pid) {
            tracing::warn!("another bazi serve (PID {pid}) is running, sharing the database");
        } else {
            tracing::info!("cleaned up stale pidfile (PID {pid} is dead)");
            let _ = std::fs::remove_file(&path);
        }
    }

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match std::fs::File::create(&path) {
        Ok(mut f) => {
            let _ = write!(f, "{}", std::process::id());
            tracing::info!("wrote pidfile: {}", path.display());
            Some(path)
        }
        Err(e) => {
            tracing::warn!("failed to write pidfile: {e}");
            None
        }
    }
}

fn release_pidfile(path: &Path) {
    let _ = std::fs::remove_file(path);
    tracing::info!("removed pidfile: {}", path.display());
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) checks existence without sending a signal
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    false
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_serve() -> Result<()> {
    let cache = open_cache()?;
    let sweep_every = cache.config().sweep_interval();
    tracing::info!(entries = cache.len(), "starting MCP server");

    let pidfile = acquire_pidfile();

    let server = server::BaziServer::new(cache);
    let sweeper = server.spawn_sweeper(sweep_every);
    // A client that hangs up before initializing is a normal shutdown.
    match server.clone().serve(stdio()).await {
        Ok(service) => {
            tokio::select! {
                result = service.waiting() => {
                    result.context("MCP server task failed")?;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted, shutting down");
                }
            }
        }
        Err(e) => tracing::info!("MCP client closed before initialization: {e}"),
    }

    sweeper.abort();
    server.checkpoint_wal().await;
    if let Some(path) = pidfile {
        release_pidfile(&path);
    }
    Ok(())
}

fn cmd_calc(
    birth: &BirthArgs,
    nickname: Option<&str>,
    format: RecordFormat,
    force: bool,
) -> Result<()> {
    let input = birth.to_input()?;
    let mut cache = open_cache()?;
    let record = cache
        .get_or_calculate(&input, nickname, format, force)
        .context("calculation failed")?;
    print_json(&record)
}

fn cmd_get(identifier: &str, format: RecordFormat) -> Result<()> {
    let mut cache = open_cache()?;
    let lookup = cache.identify(identifier);
    match cache.get(&lookup, format)? {
        Some(record) => print_json(&record),
        None => bail!("no cached reading for '{identifier}'"),
    }
}

#[derive(Deserialize)]
struct WarmFileItem {
    date: String,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    record: Option<serde_json::Value>,
}

fn cmd_warm(path: &Path, force: bool, ttl_secs: Option<u64>) -> Result<()> {
    let items: Vec<WarmFileItem> = serde_json::from_value(read_json(path)?)
        .context("warm file must be an array of {date, time?, longitude?, nickname?, record?}")?;
    let mut invalid = 0;
    let mut batch = Vec::with_capacity(items.len());
    for item in items {
        let time = item.time.as_deref().unwrap_or(DEFAULT_BIRTH_TIME);
        let longitude = item.longitude.unwrap_or(DEFAULT_LONGITUDE);
        match BirthInput::parse(&item.date, time, longitude) {
            Ok(birth) => batch.push(WarmItem {
                birth,
                nickname: item.nickname,
                record: item.record,
            }),
            Err(e) => {
                eprintln!("skipping {}: {e}", item.date);
                invalid += 1;
            }
        }
    }

    let mut cache = open_cache()?;
    let report = cache.warm(
        batch,
        WarmOptions {
            force_refresh: force,
            ttl: ttl_secs.map(Duration::from_secs),
        },
    );
    println!(
        "applied={} skipped={} failed={}",
        report.applied,
        report.skipped,
        report.failed + invalid
    );
    Ok(())
}

fn cmd_sweep() -> Result<()> {
    let mut cache = open_cache()?;
    let evicted = cache.sweep();
    println!("evicted {evicted}, {} remaining", cache.len());
    Ok(())
}

fn repair_policy(allow_defaults: bool) -> RepairPolicy {
    if allow_defaults {
        RepairPolicy::AllowDefaults
    } else {
        RepairPolicy::DerivableOnly
    }
}

fn cmd_repair(identifier: Option<&str>, allow_defaults: bool) -> Result<()> {
    let mut cache = open_cache()?;
    let policy = repair_policy(allow_defaults);
    match identifier {
        Some(id) => match cache.repair_one(id, policy) {
            Some(outcome) => print_json(&outcome),
            None => bail!("no cached reading for '{id}'"),
        },
        None => print_json(&cache.repair_all(policy)),
    }
}

fn cmd_migrate(path: &Path) -> Result<()> {
    let raw = read_json(path)?;
    let mut manager = MigrationManager::default();
    let migrated = manager
        .migrate(&raw)
        .with_context(|| format!("cannot migrate {}", path.display()))?;
    print_json(&serde_json::json!({
        "record": migrated.record,
        "log": migrated.log,
    }))
}

fn cmd_validate(path: &Path, permissive: bool) -> Result<()> {
    let raw = read_json(path)?;
    let records: Vec<DualFormatRecord> = match raw {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()
            .context("expected an array of dual-format records")?,
        other => vec![serde_json::from_value(other).context("expected a dual-format record")?],
    };
    let mode = if permissive {
        ValidationMode::Permissive
    } else {
        ValidationMode::Strict
    };
    let (reports, summary) = Validator::new(mode).validate_batch(&records);
    print_json(&serde_json::json!({
        "reports": reports,
        "summary": summary,
    }))?;
    if summary.invalid > 0 {
        bail!("{} of {} records invalid", summary.invalid, summary.total);
    }
    Ok(())
}

fn cmd_stats() -> Result<()> {
    let cache = open_cache()?;
    let stats = cache.stats();
    let db_size = cache.store().db_size();

    println!("entries:      {}", stats.entries);
    println!("nicknames:    {}", stats.nicknames);
    println!("expired:      {}", stats.expired);
    println!("needs_repair: {}", stats.needs_repair);
    println!("unreadable:   {}", stats.unreadable);
    println!(
        "oldest:       {}",
        stats.oldest_cached_at.as_deref().unwrap_or("-")
    );
    println!(
        "newest:       {}",
        stats.newest_cached_at.as_deref().unwrap_or("-")
    );
    println!("db_size:      {:.1}KB", db_size as f64 / 1024.0);
    Ok(())
}

fn cmd_clear(identifier: Option<&str>, all: bool) -> Result<()> {
    let mut cache = open_cache()?;
    match (identifier, all) {
        (_, true) => {
            let removed = cache.clear_all();
            println!("cleared {removed} entries");
        }
        (Some(id), false) => {
            if !cache.clear(id) {
                bail!("no cached reading for '{id}'");
            }
            println!("cleared {id}");
        }
        (None, false) => bail!("pass an identifier or --all"),
    }
    Ok(())
}

fn cmd_export(path: &Path) -> Result<()> {
    let cache = open_cache()?;
    cache
        .export_json_file(path)
        .context("failed to export cache")?;
    println!("exported {} entries to {}", cache.len(), path.display());
    Ok(())
}

fn cmd_import(path: &Path) -> Result<()> {
    let mut cache = open_cache()?;
    let report = cache
        .import_json_file(path)
        .context("failed to import JSON")?;
    println!(
        "imported from {}. imported={}, expired={}, failed={}",
        path.display(),
        report.imported,
        report.expired,
        report.failed
    );
    Ok(())
}
