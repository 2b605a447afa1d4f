//! Configuration for TQL
//!
//! Loads settings from a YAML file. Environment variables override the file:
//!
//! - `TQL_DIALECT`, `TQL_WARN_ON_FALLBACK`
//! - `TQL_DUCKDB_PATH`, `TQL_DUCKDB_MEMORY_LIMIT_MB`
//! - `RUST_LOG`, `LOG_FORMAT`, `LOG_OUTPUT`, `LOG_DIR`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tql_duck::{DuckError, DuckOptions, DuckSource};
use tql_sql::{Dialect, LazyTbl, SqlError, SqlSource};
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Engine-wide behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dialect for lazy tables whose source does not report one
    pub dialect: String,

    /// Log a warning when a grouped verb falls back to split-apply
    pub warn_on_fallback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dialect: "duckdb".to_string(),
            warn_on_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckdbConfig {
    /// Database file; in-memory when unset
    pub path: Option<String>,

    pub memory_limit_mb: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub duckdb: DuckdbConfig,
    pub logging: LoggingConfig,
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

impl Config {
    /// Load configuration from a YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Parse YAML only; missing sections and fields take their defaults.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dialect) = lookup("TQL_DIALECT") {
            dialect.parse::<Dialect>().map_err(|_| invalid("TQL_DIALECT", &dialect))?;
            self.engine.dialect = dialect;
        }
        if let Some(warn) = lookup("TQL_WARN_ON_FALLBACK") {
            self.engine.warn_on_fallback = parse_bool("TQL_WARN_ON_FALLBACK", &warn)?;
        }

        if let Some(path) = lookup("TQL_DUCKDB_PATH") {
            self.duckdb.path = if path.is_empty() { None } else { Some(path) };
        }
        if let Some(limit) = lookup("TQL_DUCKDB_MEMORY_LIMIT_MB") {
            let mb = limit
                .parse()
                .map_err(|_| invalid("TQL_DUCKDB_MEMORY_LIMIT_MB", &limit))?;
            self.duckdb.memory_limit_mb = Some(mb);
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.directory = dir;
        }
        Ok(())
    }

    pub fn dialect(&self) -> Result<Dialect, ConfigError> {
        self.engine
            .dialect
            .parse()
            .map_err(|_| invalid("engine.dialect", &self.engine.dialect))
    }

    /// Push engine settings into the process-wide switches.
    pub fn apply(&self) {
        tql_frame::set_warn_on_fallback(self.engine.warn_on_fallback);
    }

    pub fn duck_options(&self) -> DuckOptions {
        DuckOptions {
            path: self.duckdb.path.as_ref().map(PathBuf::from),
            memory_limit_mb: self.duckdb.memory_limit_mb,
        }
    }

    pub fn open_duckdb(&self) -> Result<DuckSource, DuckError> {
        DuckSource::connect(&self.duck_options())
    }

    /// Lazy table over `table`, in the source's own dialect when it reports one.
    pub fn lazy(&self, source: Arc<dyn SqlSource>, table: &str) -> Result<LazyTbl, SqlError> {
        let dialect = match source.dialect() {
            Some(d) => d,
            None => self
                .dialect()
                .map_err(|e| SqlError::Unsupported(e.to_string()))?,
        };
        info!(table, dialect = dialect.name(), "Opening lazy table");
        LazyTbl::with_dialect(source, table, dialect)
    }

    /// Set logging environment variables for the logging module
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}
