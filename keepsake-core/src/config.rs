//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/keepsake/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/keepsake/` (~/.config/keepsake/)
//! - Data: `$XDG_DATA_HOME/keepsake/` (~/.local/share/keepsake/)
//! - State/Logs: `$XDG_STATE_HOME/keepsake/` (~/.local/state/keepsake/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// LLM provider configuration (required for extraction runs)
    #[serde(default)]
    pub llm: Option<LlmConfig>,

    /// Extraction pipeline configuration
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// LLM provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider type
    pub provider: LlmProvider,
    /// Model to use
    pub model: String,
    /// API endpoint (optional, uses default for provider)
    pub endpoint: Option<String>,
    /// API key (can also use env var)
    pub api_key: Option<String>,
    /// HTTP request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

/// Supported LLM providers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    Claude,
    OpenAI,
}

impl LlmProvider {
    /// Returns the default endpoint for this provider
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::Claude => "https://api.anthropic.com",
            LlmProvider::OpenAI => "https://api.openai.com",
        }
    }
}

fn default_llm_timeout() -> u64 {
    120
}

/// Extraction pipeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ExtractorConfig {
    /// Maximum simultaneous in-flight LLM calls across the whole run
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum attempts per chunk before a transient failure becomes hard
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Cache-key namespace for this extraction pass
    #[serde(default = "default_calling_context")]
    pub calling_context: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            calling_context: default_calling_context(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    10
}

fn default_calling_context() -> String {
    "extract.memorable".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/keepsake/config.toml` (~/.config/keepsake/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("keepsake").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database)
    ///
    /// `$XDG_DATA_HOME/keepsake/` (~/.local/share/keepsake/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("keepsake")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/keepsake/` (~/.local/state/keepsake/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("keepsake")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/keepsake/keepsake.db` (~/.local/share/keepsake/keepsake.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("keepsake.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/keepsake/keepsake.log` (~/.local/state/keepsake/keepsake.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("keepsake.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
