//! Application configuration for salesetl.
//!
//! User config lives at `~/.salesetl/salesetl.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PipelineError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "salesetl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".salesetl";

/// Mirror serving the Northwind CSV exports.
pub const DEFAULT_BASE_URL: &str =
    "https://raw.githubusercontent.com/neo4j-contrib/northwind-neo4j/master/data";

// ---------------------------------------------------------------------------
// Config structs (matching salesetl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote CSV source.
    #[serde(default)]
    pub source: SourceConfig,

    /// On-disk layout.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Pipeline toggles.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Data-quality log settings.
    #[serde(default)]
    pub quality: QualityConfig,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL the four CSVs are fetched from.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP timeout per file, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Download missing raw files. When off, only local files are used.
    #[serde(default = "default_true")]
    pub auto_download: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            auto_download: true,
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the raw/clean/model layer tree.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "data".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Whether the optional products table is extracted and modeled.
    #[serde(default = "default_true")]
    pub include_products: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            include_products: true,
        }
    }
}

/// `[quality]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Number of most recent DQ runs kept in the run log.
    #[serde(default = "default_retain_runs")]
    pub retain_runs: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            retain_runs: default_retain_runs(),
        }
    }
}

fn default_retain_runs() -> usize {
    50
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Remote source settings.
    pub source: SourceConfig,
    /// Root data directory.
    pub data_dir: PathBuf,
    /// Extract and model the optional products table.
    pub include_products: bool,
    /// DQ run log retention.
    pub retain_runs: usize,
    /// Tool version recorded in the model manifest.
    pub tool_version: String,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            source: config.source.clone(),
            data_dir: PathBuf::from(&config.paths.data_dir),
            include_products: config.pipeline.include_products,
            retain_runs: config.quality.retain_runs,
            tool_version: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.salesetl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PipelineError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.salesetl/salesetl.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| PipelineError::config(format!("failed to parse {}: {e}", path.display())))?;

    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PipelineError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PipelineError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configs the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let url = Url::parse(&config.source.base_url).map_err(|e| {
        PipelineError::config(format!("invalid source.base_url '{}': {e}", config.source.base_url))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PipelineError::config(format!(
            "source.base_url must be http(s), got '{}'",
            url.scheme()
        )));
    }
    if config.quality.retain_runs == 0 {
        return Err(PipelineError::config("quality.retain_runs must be at least 1"));
    }
    Ok(())
}
