//! Application configuration for FilingDesk.
//!
//! User config lives at `~/.filingdesk/filingdesk.toml`.
//! Environment variables override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FilingDeskError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "filingdesk.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".filingdesk";

/// Default database file name inside the config directory.
const DB_FILE_NAME: &str = "filingdesk.db";

/// Env var overriding `[backend] project_url`.
pub const ENV_PROJECT_URL: &str = "SUPABASE_PROJECT_URL";

/// Env var overriding `[backend] bucket`.
pub const ENV_BUCKET: &str = "SUPABASE_BUCKET";

/// Env var overriding `[account] user_id`.
pub const ENV_USER: &str = "FILINGDESK_USER";

// ---------------------------------------------------------------------------
// Config structs (matching filingdesk.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Hosted backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Local database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Extraction worker settings.
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Submission limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Acting user.
    #[serde(default)]
    pub account: AccountConfig,
}

/// `[backend]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`.
    #[serde(default)]
    pub project_url: String,

    /// Storage bucket holding filing PDFs.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Name of the env var holding the service-role key (never store the key itself).
    #[serde(default = "default_service_key_env")]
    pub service_key_env: String,

    /// HTTP timeout for object-store requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            project_url: String::new(),
            bucket: default_bucket(),
            service_key_env: default_service_key_env(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_bucket() -> String {
    "filings".into()
}
fn default_service_key_env() -> String {
    "SUPABASE_SERVICE_ROLE_KEY".into()
}
fn default_request_timeout() -> u64 {
    60
}

/// `[database]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file; defaults to `~/.filingdesk/filingdesk.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// `[worker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Seconds to wait before polling again when the queue is empty.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Seconds after which a job left in `processing` is queued again.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_poll_interval() -> u64 {
    3
}

fn default_stale_after() -> u64 {
    15 * 60
}

/// `[limits]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum submissions per user per window.
    #[serde(default = "default_uploads_per_window")]
    pub uploads_per_window: u32,

    /// Window length in seconds.
    #[serde(default = "default_window")]
    pub window_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            uploads_per_window: default_uploads_per_window(),
            window_secs: default_window(),
        }
    }
}

fn default_uploads_per_window() -> u32 {
    10
}
fn default_window() -> u64 {
    3600
}

/// `[account]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Runtime configs (resolved from AppConfig + environment)
// ---------------------------------------------------------------------------

/// Resolved object-store connection settings.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub project_url: Url,
    pub bucket: String,
    pub service_key: String,
    pub timeout: Duration,
}

impl BucketConfig {
    /// Resolve from app config, reading the service key from the environment.
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        let raw = config.backend.project_url.trim();
        if raw.is_empty() {
            return Err(FilingDeskError::config(format!(
                "backend project URL not set. Set [backend] project_url or {ENV_PROJECT_URL}."
            )));
        }
        let project_url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| FilingDeskError::config(format!("invalid project URL '{raw}': {e}")))?;

        Ok(Self {
            project_url,
            bucket: config.backend.bucket.clone(),
            service_key: resolve_service_key(config)?,
            timeout: Duration::from_secs(config.backend.request_timeout_secs),
        })
    }
}

/// Resolved worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub stale_after: Duration,
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.worker.poll_interval_secs),
            stale_after: Duration::from_secs(config.worker.stale_after_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.filingdesk/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FilingDeskError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.filingdesk/filingdesk.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Database path from config, falling back to the config directory.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.database.path {
        Some(p) => Ok(PathBuf::from(p)),
        None => Ok(config_dir()?.join(DB_FILE_NAME)),
    }
}

/// Load the application config from disk and apply environment overrides.
/// Uses defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FilingDeskError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        FilingDeskError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty(ENV_PROJECT_URL) {
        config.backend.project_url = url;
    }
    if let Some(bucket) = non_empty(ENV_BUCKET) {
        config.backend.bucket = bucket;
    }
    if let Some(user) = non_empty(ENV_USER) {
        config.account.user_id = Some(user);
    }
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FilingDeskError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FilingDeskError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FilingDeskError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the service-role key from the env var named in config.
pub fn resolve_service_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.backend.service_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(FilingDeskError::config(format!(
            "service key not found. Set the {var_name} environment variable."
        ))),
    }
}
