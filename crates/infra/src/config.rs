//! Ingestion configuration.
//!
//! Loaded from an optional TOML file, then overridden field by field from
//! `CHATLOG_*` environment variables. Every field has a default, so an empty
//! file (or none) is a valid configuration.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::worker::{RowFailurePolicy, WorkerConfig};

pub const ENV_DATABASE_URL: &str = "CHATLOG_DATABASE_URL";
pub const ENV_REDIS_URL: &str = "CHATLOG_REDIS_URL";
pub const ENV_BATCH_SIZE: &str = "CHATLOG_BATCH_SIZE";
pub const ENV_IDLE_MS: &str = "CHATLOG_IDLE_MS";
pub const ENV_DEDUP_TTL_SECS: &str = "CHATLOG_DEDUP_TTL_SECS";
pub const ENV_OCR_HINT: &str = "CHATLOG_OCR_HINT";
pub const ENV_ROW_FAILURE_POLICY: &str = "CHATLOG_ROW_FAILURE_POLICY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub database_url: String,
    pub redis_url: String,
    /// Pool size for the relational store
    pub max_connections: u32,
    pub batch_size: usize,
    pub idle_ms: u64,
    pub dedup_ttl_secs: i64,
    /// Text prefix that makes an inserted message spawn an OCR job
    pub ocr_hint: String,
    pub row_failure_policy: RowFailurePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/chatlog".to_string(),
            redis_url: "redis://127.0.0.1/".to_string(),
            max_connections: 4,
            batch_size: 10,
            idle_ms: 10,
            dedup_ttl_secs: 10,
            ocr_hint: "[OCR]".to_string(),
            row_failure_policy: RowFailurePolicy::Abort,
        }
    }
}

impl IngestConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// File (if any), then process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                debug!(path = %path.display(), "loaded config file");
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env(|var| env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `lookup` (an environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(url) = lookup(ENV_REDIS_URL) {
            self.redis_url = url;
        }
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            self.batch_size = parse_env(ENV_BATCH_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_IDLE_MS) {
            self.idle_ms = parse_env(ENV_IDLE_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DEDUP_TTL_SECS) {
            self.dedup_ttl_secs = parse_env(ENV_DEDUP_TTL_SECS, &raw)?;
        }
        if let Some(hint) = lookup(ENV_OCR_HINT) {
            self.ocr_hint = hint;
        }
        if let Some(raw) = lookup(ENV_ROW_FAILURE_POLICY) {
            self.row_failure_policy = raw.parse().map_err(|reason| ConfigError::Env {
                var: ENV_ROW_FAILURE_POLICY,
                reason,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".to_string()));
        }
        if self.dedup_ttl_secs < 0 {
            return Err(ConfigError::Invalid(format!(
                "dedup_ttl_secs must be non-negative, got {}",
                self.dedup_ttl_secs
            )));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    /// Loop settings for the worker named `name`.
    pub fn worker(&self, name: &str) -> WorkerConfig {
        WorkerConfig::default()
            .with_name(name)
            .with_batch_size(self.batch_size)
            .with_idle(self.idle())
    }
}

fn parse_env<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        reason: format!("{raw:?}: {e}"),
    })
}
