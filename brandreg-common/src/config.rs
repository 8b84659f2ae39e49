//! Bootstrap configuration loading
//!
//! Implements the bootstrap tier of configuration:
//! 1. **TOML Bootstrap**: database path, server address, logging, engine tuning
//! 2. **Database Runtime**: selected knobs overridable through the `settings` table
//!
//! # Config File Resolution
//!
//! 1. Command-line argument (highest priority)
//! 2. `BRANDREG_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/brandreg/consolidator.toml`)
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "BRANDREG_CONFIG";

/// Bootstrap configuration loaded from TOML file
///
/// Every field has a default so an absent or partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Candidate detection tuning
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Threshold learning tuning
    #[serde(default)]
    pub learning: LearningConfig,

    /// Merge execution tuning
    #[serde(default)]
    pub merge: MergeConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            detection: DetectionConfig::default(),
            learning: LearningConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Candidate detection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Upper bound on members per block
    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,

    /// Characters of the compact key used as the prefix blocking key
    #[serde(default = "default_prefix_len")]
    pub prefix_len: usize,

    /// Minimum name similarity for SIMILAR_NAME
    #[serde(default = "default_similar_name_floor")]
    pub similar_name_floor: f64,

    /// Minimum name similarity before SKU_TO_BRAND is considered
    #[serde(default = "default_sku_to_brand_name_floor")]
    pub sku_to_brand_name_floor: f64,

    /// Minimum SKU descriptor overlap for SKU_TO_BRAND
    #[serde(default = "default_sku_overlap_floor")]
    pub sku_overlap_floor: f64,

    /// Minimum name similarity before PORTFOLIO_GROUP is considered
    #[serde(default = "default_portfolio_name_floor")]
    pub portfolio_name_floor: f64,

    /// Classification workers (0 = available parallelism)
    #[serde(default)]
    pub workers: usize,

    /// Apply AUTO_APPROVED proposals as soon as they are persisted
    #[serde(default = "default_true")]
    pub auto_apply: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_block_size: default_max_block_size(),
            prefix_len: default_prefix_len(),
            similar_name_floor: default_similar_name_floor(),
            sku_to_brand_name_floor: default_sku_to_brand_name_floor(),
            sku_overlap_floor: default_sku_overlap_floor(),
            portfolio_name_floor: default_portfolio_name_floor(),
            workers: 0,
            auto_apply: true,
        }
    }
}

/// Threshold learning tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Seconds between learning cycles
    #[serde(default = "default_learning_interval_secs")]
    pub interval_secs: u64,

    /// Override rate above which the auto-approve threshold rises
    #[serde(default = "default_override_tolerance")]
    pub override_tolerance: f64,

    /// Confirmation rate at or above which thresholds may fall
    #[serde(default = "default_confirmation_rate")]
    pub confirmation_rate: f64,

    /// Minimum events in a bucket before it can move a threshold
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,

    /// Largest threshold change applied per cycle
    #[serde(default = "default_max_step")]
    pub max_step: f64,

    /// Width of a confidence bucket
    #[serde(default = "default_bucket_width")]
    pub bucket_width: u32,

    /// Only events newer than this many days are aggregated
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_learning_interval_secs(),
            override_tolerance: default_override_tolerance(),
            confirmation_rate: default_confirmation_rate(),
            min_samples: default_min_samples(),
            max_step: default_max_step(),
            bucket_width: default_bucket_width(),
            window_days: default_window_days(),
        }
    }
}

/// Merge execution tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Longest wait to enter the merge critical section before failing with a conflict
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: default_lock_wait_ms(),
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("brandreg").join("brandreg.db"))
        .unwrap_or_else(|| PathBuf::from("./brandreg_data/brandreg.db"))
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5790
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_block_size() -> usize {
    50
}

fn default_prefix_len() -> usize {
    5
}

fn default_similar_name_floor() -> f64 {
    0.85
}

fn default_sku_to_brand_name_floor() -> f64 {
    0.5
}

fn default_sku_overlap_floor() -> f64 {
    0.25
}

fn default_portfolio_name_floor() -> f64 {
    0.4
}

fn default_true() -> bool {
    true
}

fn default_learning_interval_secs() -> u64 {
    3600
}

fn default_override_tolerance() -> f64 {
    0.10
}

fn default_confirmation_rate() -> f64 {
    0.95
}

fn default_min_samples() -> u32 {
    20
}

fn default_max_step() -> f64 {
    2.0
}

fn default_bucket_width() -> u32 {
    10
}

fn default_window_days() -> i64 {
    90
}

fn default_lock_wait_ms() -> u64 {
    2000
}

/// Resolve the config file path following the documented priority order
///
/// Returns `None` when no file is named and the platform default does not exist.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("brandreg").join("consolidator.toml"))
        .filter(|p| p.exists())
}

/// Load TOML configuration from a file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    parse_toml_config(&content)
}

/// Parse TOML configuration text and validate it
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    let config: TomlConfig =
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

/// Load configuration from the resolved path, or built-in defaults when none exists
pub fn load_or_default(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            load_toml_config(&path)
        }
        None => {
            tracing::info!("No configuration file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write TOML configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn validate(config: &TomlConfig) -> Result<()> {
    let d = &config.detection;
    if d.max_block_size < 2 {
        return Err(Error::Config(format!(
            "detection.max_block_size must be at least 2 (got {})",
            d.max_block_size
        )));
    }
    if d.prefix_len == 0 {
        return Err(Error::Config("detection.prefix_len must be positive".to_string()));
    }
    for (name, value) in [
        ("detection.similar_name_floor", d.similar_name_floor),
        ("detection.sku_to_brand_name_floor", d.sku_to_brand_name_floor),
        ("detection.sku_overlap_floor", d.sku_overlap_floor),
        ("detection.portfolio_name_floor", d.portfolio_name_floor),
        ("learning.override_tolerance", config.learning.override_tolerance),
        ("learning.confirmation_rate", config.learning.confirmation_rate),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::Config(format!("{} must be within 0.0-1.0 (got {})", name, value)));
        }
    }
    if d.similar_name_floor >= 1.0 {
        return Err(Error::Config("detection.similar_name_floor must be below 1.0".to_string()));
    }
    let l = &config.learning;
    if l.bucket_width == 0 || 100 % l.bucket_width != 0 {
        return Err(Error::Config(format!(
            "learning.bucket_width must divide 100 (got {})",
            l.bucket_width
        )));
    }
    if l.max_step <= 0.0 {
        return Err(Error::Config("learning.max_step must be positive".to_string()));
    }
    Ok(())
}
