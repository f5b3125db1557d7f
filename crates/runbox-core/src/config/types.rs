//! Configuration type definitions
//!
//! Every section is optional in YAML; an empty document yields the reference
//! limits (60s build, 10s run, 5s log drain, 128 MiB, one CPU).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunboxConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub languages: Vec<LanguageConfig>,
}

/// Per-execution ceilings. These are process-wide; requests cannot override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_build_timeout")]
    pub build_timeout_seconds: u64,
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,
    #[serde(default = "default_log_timeout")]
    pub log_timeout_seconds: u64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: i64,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,
    /// Parent directory for workspaces. Falls back to the system temp dir.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            build_timeout_seconds: default_build_timeout(),
            run_timeout_seconds: default_run_timeout(),
            log_timeout_seconds: default_log_timeout(),
            memory_limit_bytes: default_memory_limit(),
            cpu_limit: default_cpu_limit(),
            workspace_root: None,
            image_prefix: default_image_prefix(),
        }
    }
}

impl EngineConfig {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_seconds)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }

    pub fn log_timeout(&self) -> Duration {
        Duration::from_secs(self.log_timeout_seconds)
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory_bytes: self.memory_limit_bytes,
            nano_cpus: (self.cpu_limit * 1_000_000_000.0) as i64,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build_timeout_seconds == 0
            || self.run_timeout_seconds == 0
            || self.log_timeout_seconds == 0
        {
            return Err(ConfigError::Invalid(
                "engine timeouts must be greater than zero".to_string(),
            ));
        }
        if self.memory_limit_bytes < MIN_MEMORY_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "memory_limit_bytes must be at least {} (got {})",
                MIN_MEMORY_LIMIT, self.memory_limit_bytes
            )));
        }
        if !(self.cpu_limit > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "cpu_limit must be positive (got {})",
                self.cpu_limit
            )));
        }
        if self.image_prefix.is_empty()
            || !self
                .image_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "image_prefix '{}' is not a valid image name component",
                self.image_prefix
            )));
        }
        Ok(())
    }
}

/// Host limits applied to every container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Where finished results are delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    Log,
    Http {
        base_url: String,
        #[serde(default = "default_sink_timeout")]
        timeout_seconds: u64,
    },
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::Log
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
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

/// Extra language registered at startup next to the builtin ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LanguageConfig {
    pub name: String,
    pub source_file: String,
    pub base_image: String,
    #[serde(default)]
    pub compile: Option<String>,
    pub run: String,
}

const MIN_MEMORY_LIMIT: i64 = 4 * 1024 * 1024;

fn default_build_timeout() -> u64 {
    60
}

fn default_run_timeout() -> u64 {
    10
}

fn default_log_timeout() -> u64 {
    5
}

fn default_memory_limit() -> i64 {
    128 * 1024 * 1024
}

fn default_cpu_limit() -> f64 {
    1.0
}

fn default_image_prefix() -> String {
    "runbox".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8085".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_sink_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}
