//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/flowlens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/flowlens/` (~/.config/flowlens/)
//! - Data: `$XDG_DATA_HOME/flowlens/` (~/.local/share/flowlens/)
//! - State/Logs: `$XDG_STATE_HOME/flowlens/` (~/.local/state/flowlens/)

use crate::error::{Error, Result};
use crate::types::RedactionRule;
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
    /// Engine tuning knobs
    #[serde(default)]
    pub engine: EngineConfig,

    /// Export defaults
    #[serde(default)]
    pub export: ExportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine tuning knobs
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    /// Override path to the flows database
    pub database_path: Option<PathBuf>,

    /// Days a flow is kept before it becomes eligible for cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Page sizes above this are clamped, not rejected
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Width (in characters) of search result snippets
    #[serde(default = "default_snippet_width")]
    pub snippet_width: usize,

    /// Capacity of the live notification channels
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            retention_days: default_retention_days(),
            max_page_size: default_max_page_size(),
            snippet_width: default_snippet_width(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

fn default_max_page_size() -> u32 {
    200
}

fn default_snippet_width() -> usize {
    120
}

fn default_event_capacity() -> usize {
    256
}

/// Export defaults
#[derive(Debug, Deserialize)]
pub struct ExportConfig {
    /// Redaction rules applied when `redact_sensitive` is set and the caller
    /// supplies none of their own
    #[serde(default = "default_redaction_rules")]
    pub redaction_rules: Vec<RedactionRule>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            redaction_rules: default_redaction_rules(),
        }
    }
}

/// Built-in rules covering the usual secrets that end up in captured traffic
pub fn default_redaction_rules() -> Vec<RedactionRule> {
    vec![
        RedactionRule {
            name: "openai-api-key".to_string(),
            pattern: r"sk-[A-Za-z0-9_-]{20,}".to_string(),
            replacement: "[REDACTED-API-KEY]".to_string(),
            enabled: true,
        },
        RedactionRule {
            name: "anthropic-api-key".to_string(),
            pattern: r"sk-ant-[A-Za-z0-9_-]{20,}".to_string(),
            replacement: "[REDACTED-API-KEY]".to_string(),
            enabled: true,
        },
        RedactionRule {
            name: "bearer-token".to_string(),
            pattern: r"(?i)bearer\s+[A-Za-z0-9._~+/-]+=*".to_string(),
            replacement: "Bearer [REDACTED]".to_string(),
            enabled: true,
        },
        RedactionRule {
            name: "email".to_string(),
            pattern: r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}".to_string(),
            replacement: "[REDACTED-EMAIL]".to_string(),
            enabled: true,
        },
    ]
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when no config file exists
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Path to the config file
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("flowlens").join("config.toml")
    }

    /// Directory for durable data (the flows database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("flowlens")
    }

    /// Path to the flows database, honoring the config override
    pub fn database_path(&self) -> PathBuf {
        self.engine
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("flows.db"))
    }

    /// Directory for logs and other regenerable state
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("flowlens")
    }
}
