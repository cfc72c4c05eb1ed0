//! Application configuration for recrawl.
//!
//! User config lives at `~/.recrawl/recrawl.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RecrawlError, Result};
use crate::status::Status;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "recrawl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".recrawl";

// ---------------------------------------------------------------------------
// Config structs (matching recrawl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// HTTP backend settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Browser backend settings.
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Opaque options handed to the extraction hook.
    #[serde(default)]
    pub parse: ParseOptions,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Records at or above this status are considered done and skipped.
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: Status,

    /// Hours a finished record stays fresh before it is due again.
    #[serde(default = "default_refresh_hours")]
    pub refresh_hours: u64,

    /// Concurrent workers for HTTP batches (browser batches run alone).
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,

    /// Keep processing the batch past item-level infrastructure errors.
    #[serde(default = "default_true")]
    pub ignore_error: bool,

    /// Skip cache lookups and always fetch live.
    #[serde(default)]
    pub ignore_cache: bool,

    /// Write fetched content back to the cache on success.
    #[serde(default = "default_true")]
    pub update_cache: bool,

    /// Cache entry lifetime in hours; defaults to `refresh_hours` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_hours: Option<u64>,

    /// Render pages in headless Chrome instead of plain HTTP GET.
    #[serde(default)]
    pub use_browser: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: default_dedup_threshold(),
            refresh_hours: default_refresh_hours(),
            worker_count: default_worker_count(),
            ignore_error: true,
            ignore_cache: false,
            update_cache: true,
            cache_ttl_hours: None,
            use_browser: false,
        }
    }
}

fn default_dedup_threshold() -> Status {
    Status::Done
}
fn default_refresh_hours() -> u64 {
    24
}
fn default_worker_count() -> u32 {
    1
}
fn default_true() -> bool {
    true
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for all live requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum redirects to follow before giving up.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_redirects: default_max_redirects(),
            headers: BTreeMap::new(),
        }
    }
}

fn default_user_agent() -> String {
    format!("recrawl/{}", env!("CARGO_PKG_VERSION"))
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_redirects() -> u32 {
    5
}

/// `[browser]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Explicit Chrome/Chromium executable; auto-detected when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    /// Viewport width for rendered pages.
    #[serde(default = "default_window_width")]
    pub window_width: u32,

    /// Viewport height for rendered pages.
    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// CSS selector to wait for after navigation, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<String>,

    /// Navigation timeout in seconds.
    #[serde(default = "default_nav_timeout_secs")]
    pub nav_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            wait_for_selector: None,
            nav_timeout_secs: default_nav_timeout_secs(),
        }
    }
}

fn default_window_width() -> u32 {
    1920
}
fn default_window_height() -> u32 {
    1080
}
fn default_nav_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Per-call option bags
// ---------------------------------------------------------------------------

/// Per-request HTTP options carried in each input envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Extra headers for this request, merged over the client defaults.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Per-request timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Per-render browser options carried in each input envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderOptions {
    /// CSS selector to wait for after navigation, overriding the config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<String>,

    /// Navigation timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav_timeout_secs: Option<u64>,
}

/// Opaque extraction options, passed through to the harvester untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParseOptions(pub Map<String, Value>);

impl ParseOptions {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Records with `status >= dedup_threshold` are done; below it they are
    /// re-selected once stale.
    pub dedup_threshold: Status,
    /// How long a record stays fresh after a reconciler write.
    pub refresh_interval: Duration,
    /// Render via headless Chrome instead of HTTP GET.
    pub use_browser: bool,
    /// Skip cache lookups for every item in the batch.
    pub ignore_cache: bool,
    /// Write fetched content to the cache on fresh outcomes.
    pub update_cache: bool,
    /// Cache entry lifetime; `None` falls back to `refresh_interval`.
    pub cache_ttl: Option<Duration>,
    /// Worker permits for HTTP batches.
    pub worker_count: u32,
    /// Keep going past item-level infrastructure errors.
    pub ignore_error: bool,
    /// Default per-request HTTP options for every envelope.
    pub request: RequestOptions,
    /// Default per-render browser options for every envelope.
    pub render: RenderOptions,
    /// Default extraction options for every envelope.
    pub parse: ParseOptions,
}

impl PipelineConfig {
    /// Cache lifetime actually applied to writes.
    pub fn effective_cache_ttl(&self) -> Duration {
        self.cache_ttl.unwrap_or(self.refresh_interval)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            dedup_threshold: config.defaults.dedup_threshold,
            refresh_interval: Duration::hours(config.defaults.refresh_hours as i64),
            use_browser: config.defaults.use_browser,
            ignore_cache: config.defaults.ignore_cache,
            update_cache: config.defaults.update_cache,
            cache_ttl: config
                .defaults
                .cache_ttl_hours
                .map(|h| Duration::hours(h as i64)),
            worker_count: config.defaults.worker_count,
            ignore_error: config.defaults.ignore_error,
            request: RequestOptions {
                headers: config.http.headers.clone(),
                timeout_secs: None,
            },
            render: RenderOptions {
                wait_for_selector: config.browser.wait_for_selector.clone(),
                nav_timeout_secs: None,
            },
            parse: config.parse.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.recrawl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RecrawlError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.recrawl/recrawl.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| RecrawlError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RecrawlError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RecrawlError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RecrawlError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RecrawlError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
