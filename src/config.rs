//! Configuration module for Steward
//!
//! Handles loading and merging configuration from multiple sources, lowest
//! precedence first:
//! - Default values
//! - System configuration (/etc/steward/steward.toml)
//! - User configuration (~/.steward.toml)
//! - Project configuration (./steward.toml), or the file named by
//!   `STEWARD_CONFIG` / `--config` instead
//! - Environment variables (`STEWARD_*`)
//!
//! Command-line flags are applied on top by the binary. Files may be TOML,
//! YAML or JSON, chosen by extension. Later files only override the keys
//! they set.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::vars::{deep_merge, HashBehaviour};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default settings
    pub defaults: Defaults,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Colors and output settings
    pub colors: ColorsConfig,
}

/// Default run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Default inventory path
    pub inventory: Option<PathBuf>,

    /// Hosts running at once
    pub forks: usize,

    /// Deadline for a task's apply step, e.g. `"5m"`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Hash behavior (replace or merge)
    pub hash_behaviour: HashBehaviour,

    /// Run in check mode unless told otherwise
    pub check_mode: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            inventory: None,
            forks: 5,
            timeout: Duration::from_secs(300),
            hash_behaviour: HashBehaviour::Replace,
            check_mode: false,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => bail!("unknown log format '{}' (expected text or json)", other),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when neither `RUST_LOG` nor `-v` says otherwise
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Color settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    /// Enable colored output
    pub enabled: bool,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;

        for path in Self::config_paths(config_path) {
            if path.exists() {
                merged = deep_merge(&merged, &read_file(&path)?);
            } else if config_path.is_some_and(|p| p == path.as_path()) {
                bail!("Config file not found: {}", path.display());
            }
        }

        let mut config: Config =
            serde_json::from_value(merged).context("Invalid configuration")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Files to read, lowest precedence first
    fn config_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/steward/steward.toml")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".steward.toml"));
        }

        let project = explicit_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("STEWARD_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("steward.toml"));
        paths.push(project);
        paths
    }

    /// Load from a single file on top of the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let defaults = serde_json::to_value(Config::default())?;
        let merged = deep_merge(&defaults, &read_file(path.as_ref())?);
        serde_json::from_value(merged).context("Invalid configuration")
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(forks) = env("STEWARD_FORKS") {
            self.defaults.forks = forks
                .parse()
                .with_context(|| format!("STEWARD_FORKS: invalid number '{}'", forks))?;
        }

        if let Some(timeout) = env("STEWARD_TIMEOUT") {
            self.defaults.timeout = parse_duration(&timeout)
                .with_context(|| format!("STEWARD_TIMEOUT: invalid duration '{}'", timeout))?;
        }

        if let Some(inventory) = env("STEWARD_INVENTORY") {
            self.defaults.inventory = Some(PathBuf::from(inventory));
        }

        if let Some(behaviour) = env("STEWARD_HASH_BEHAVIOUR") {
            self.defaults.hash_behaviour =
                serde_json::from_value(Value::String(behaviour.to_lowercase())).with_context(
                    || format!("STEWARD_HASH_BEHAVIOUR: expected replace or merge, got '{}'", behaviour),
                )?;
        }

        if let Some(check) = env("STEWARD_CHECK") {
            self.defaults.check_mode = matches!(check.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(level) = env("STEWARD_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = env("STEWARD_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }

        // NO_COLOR
        if std::env::var_os("NO_COLOR").is_some() || std::env::var_os("STEWARD_NO_COLOR").is_some() {
            self.colors.enabled = false;
        }
        Ok(())
    }

    /// Get the effective inventory path
    pub fn inventory_path(&self) -> Option<&PathBuf> {
        self.defaults.inventory.as_ref()
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a config file into a JSON value, by extension
fn read_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let value = match extension {
        "yml" | "yaml" => serde_yaml::from_str::<Option<Value>>(&content)
            .map(Option::unwrap_or_default)
            .map_err(anyhow::Error::from),
        "json" => serde_json::from_str(&content).map_err(anyhow::Error::from),
        _ => toml::from_str::<toml::Value>(&content)
            .map_err(anyhow::Error::from)
            .and_then(|v| serde_json::to_value(v).map_err(anyhow::Error::from)),
    }
    .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    match value {
        Value::Null => Ok(Value::Object(Default::default())),
        Value::Object(_) => Ok(value),
        _ => bail!("Config file {} must contain a table", path.display()),
    }
}

/// Seconds (`90`) or a humantime duration (`"90s"`, `"5m"`)
pub fn parse_duration(s: &str) -> Result<Duration> {
    #[derive(Deserialize)]
    struct Human(#[serde(with = "humantime_serde")] Duration);

    if let Ok(secs) = s.trim().parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let Human(duration) = serde_json::from_value(Value::String(s.trim().to_string()))?;
    Ok(duration)
}
