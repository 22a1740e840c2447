//! Multi-tier TOML configuration for mcpt.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

use mcpt_engine::{EngineSettings, ReadinessPolicy, TransportSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Env var overriding the per-call timeout.
pub const CALL_TIMEOUT_ENV: &str = "MCPT_CALL_TIMEOUT_MS";

/// Env var overriding the handshake timeout.
pub const HANDSHAKE_TIMEOUT_ENV: &str = "MCPT_HANDSHAKE_TIMEOUT_MS";

/// Errors from resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Unknown server '{name}' (not defined under [servers] in {path})")]
    UnknownServer { name: String, path: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Resolved configuration for an mcpt invocation.
#[derive(Debug, Clone)]
pub struct McptConfig {
    pub engine: EngineSettings,
    /// Named server profiles, sorted by name.
    pub servers: BTreeMap<String, TransportSpec>,
    pub config_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub servers: BTreeMap<String, TransportSpec>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub call_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub readiness: Option<ReadinessPolicy>,
}

impl McptConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Config file (~/.mcpt/config.toml)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::load_from(&config_dir(), overrides, |key| std::env::var(key).ok())
    }

    /// Same as [`McptConfig::load`] with an explicit directory and env lookup.
    pub fn load_from(
        dir: &Path,
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let settings = load_settings_file(&dir.join("config.toml"));
        let mut engine = settings.engine;

        // Resolve call timeout: CLI > env > config file
        if let Some(ms) = overrides
            .call_timeout_ms
            .map(Ok)
            .or_else(|| env(CALL_TIMEOUT_ENV).map(|v| parse_millis(CALL_TIMEOUT_ENV, &v)))
            .transpose()?
        {
            engine.call_timeout_ms = ms;
        }

        // Resolve handshake timeout: CLI > env > config file
        if let Some(ms) = overrides
            .handshake_timeout_ms
            .map(Ok)
            .or_else(|| env(HANDSHAKE_TIMEOUT_ENV).map(|v| parse_millis(HANDSHAKE_TIMEOUT_ENV, &v)))
            .transpose()?
        {
            engine.handshake_timeout_ms = ms;
        }

        if let Some(readiness) = overrides.readiness {
            engine.readiness = readiness;
        }

        Ok(McptConfig {
            engine,
            servers: settings.servers,
            config_dir: dir.to_path_buf(),
        })
    }

    /// Look up a named server profile.
    pub fn server(&self, name: &str) -> Result<&TransportSpec, ConfigError> {
        self.servers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownServer {
                name: name.to_string(),
                path: self.config_dir.join("config.toml").display().to_string(),
            })
    }
}

/// Get the mcpt config directory path (~/.mcpt/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MCPT_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcpt")
}

/// Parse settings TOML read from `path`.
pub fn parse_settings(content: &str, path: &Path) -> Result<SettingsFile, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load and parse a TOML settings file, returning defaults on any error.
fn load_settings_file(path: &Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_settings(&content, path).unwrap_or_else(|e| {
            tracing::warn!("{e}; using defaults");
            SettingsFile::default()
        }),
        Err(_) => SettingsFile::default(),
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected milliseconds, got '{value}'"),
        })
}
