//! Application configuration for csrledger.
//!
//! User config lives at `~/.csrledger/csrledger.toml`.
//! A `--config` path overrides the default location; a missing file means
//! defaults. Secrets are referenced by environment variable name only.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "csrledger.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".csrledger";

// ---------------------------------------------------------------------------
// Config structs (matching csrledger.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Entity ledger (libSQL) settings.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Processing tracker settings.
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Report archive (object store) settings.
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Batch selection settings.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Search API strategy settings.
    #[serde(default)]
    pub search_api: SearchApiConfig,

    /// Site crawler strategy settings.
    #[serde(default)]
    pub crawler: CrawlerConfig,
}

/// `[ledger]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// libSQL database file holding entity records.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// JSON array of entity records imported when the ledger is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<String>,

    /// JSON export of all entity records written after a population pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_file: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            seed_file: None,
            snapshot_file: None,
        }
    }
}

fn default_database_path() -> String {
    "var/ledger/csrledger.db".into()
}

/// `[tracker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// JSON file holding the ordered list of status records.
    #[serde(default = "default_tracker_path")]
    pub path: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            path: default_tracker_path(),
        }
    }
}

fn default_tracker_path() -> String {
    "populated_tracking.json".into()
}

/// `[archive]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Root directory acting as the object store.
    #[serde(default = "default_archive_root")]
    pub root: String,

    /// Timeout for a single document download.
    #[serde(default = "default_archive_timeout")]
    pub timeout_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: default_archive_root(),
            timeout_secs: default_archive_timeout(),
        }
    }
}

fn default_archive_root() -> String {
    "var/reports".into()
}
fn default_archive_timeout() -> u64 {
    60
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum entities reconciled per population pass.
    #[serde(default = "default_batch_limit")]
    pub limit: usize,

    /// Years looked back from the current year when an entity has no history.
    #[serde(default = "default_lookback")]
    pub lookback_years: i32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            limit: default_batch_limit(),
            lookback_years: default_lookback(),
        }
    }
}

fn default_batch_limit() -> usize {
    10
}
fn default_lookback() -> i32 {
    2
}

/// `[search_api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchApiConfig {
    /// Custom-search JSON endpoint.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Name of the env var holding the search engine id.
    #[serde(default = "default_engine_id_env")]
    pub engine_id_env: String,

    /// Calls allowed per run before the strategy reports quota exhaustion.
    #[serde(default = "default_daily_quota")]
    pub daily_quota: u32,

    /// Request timeout.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Minimum spacing between two calls.
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
}

impl Default for SearchApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_api_key_env(),
            engine_id_env: default_engine_id_env(),
            daily_quota: default_daily_quota(),
            timeout_secs: default_search_timeout(),
            min_interval_ms: default_min_interval(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://www.googleapis.com/customsearch/v1".into()
}
fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_engine_id_env() -> String {
    "GOOGLE_CSE_ID".into()
}
fn default_daily_quota() -> u32 {
    100
}
fn default_search_timeout() -> u64 {
    15
}
fn default_min_interval() -> u64 {
    250
}

/// `[crawler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Request timeout per page.
    #[serde(default = "default_crawler_timeout")]
    pub timeout_secs: u64,

    /// Minimum ms between two page fetches.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// Keywords identifying sustainability pages and report links.
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Maximum pages visited per entity.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_crawler_timeout(),
            rate_limit_ms: default_rate_limit(),
            keywords: default_keywords(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_crawler_timeout() -> u64 {
    20
}
fn default_rate_limit() -> u64 {
    200
}
fn default_keywords() -> Vec<String> {
    [
        "sustainability",
        "esg",
        "csr",
        "responsibility",
        "impact",
        "environment",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_max_pages() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.csrledger/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LedgerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.csrledger/csrledger.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LedgerError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        LedgerError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LedgerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LedgerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LedgerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

impl AppConfig {
    /// Reject values the passes cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch.limit == 0 {
            return Err(LedgerError::config("batch.limit must be at least 1"));
        }
        if self.batch.lookback_years < 0 {
            return Err(LedgerError::config("batch.lookback_years must not be negative"));
        }
        if self.crawler.keywords.is_empty() {
            return Err(LedgerError::config("crawler.keywords must not be empty"));
        }
        Ok(())
    }
}
