pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::progress::{ProgressStep, DEFAULT_PROGRESS_TABLE};

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Host service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Whole-request timeout for upstream calls, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    600
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            http_use_env_proxy: false,
        }
    }
}

/// Model backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub default_model: String,
    #[serde(default)]
    pub models: Vec<String>,
    /// Response header carrying the conversation/artifact marker.
    #[serde(default = "default_mode_header")]
    pub mode_header: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_mode_header() -> String {
    "x-response-mode".to_string()
}

/// Tuning for the generation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Run extraction after this many deltas since the last extraction.
    #[serde(default = "default_extract_every_chunks")]
    pub extract_every_chunks: u64,
    /// Run extraction once this much time passed since the last extraction.
    #[serde(default = "default_extract_interval_ms")]
    pub extract_interval_ms: u64,
    #[serde(default = "default_progress_table")]
    pub progress_table: Vec<ProgressStep>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_extract_every_chunks() -> u64 {
    25
}
fn default_extract_interval_ms() -> u64 {
    750
}
fn default_progress_table() -> Vec<ProgressStep> {
    DEFAULT_PROGRESS_TABLE.to_vec()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            extract_every_chunks: default_extract_every_chunks(),
            extract_interval_ms: default_extract_interval_ms(),
            progress_table: default_progress_table(),
            system_prompt: None,
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
