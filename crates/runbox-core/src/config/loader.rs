//! Configuration loader for YAML files and environment overrides

use std::collections::HashSet;
use std::env;
use std::path::Path;
use tokio::fs;

use crate::config::types::*;
use crate::errors::ConfigError;

/// Loads `RunboxConfig` from YAML, applies environment overrides, then validates.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<RunboxConfig, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_str(&content)
    }

    /// Like `from_file`, but a missing file yields the defaults.
    pub async fn from_file_or_default<P: AsRef<Path>>(
        path: P,
    ) -> Result<RunboxConfig, ConfigError> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::from_file(path).await
        } else {
            log::info!(
                "Config file {} not found, using defaults",
                path.display()
            );
            let mut config = RunboxConfig::default();
            Self::apply_env_overrides(&mut config);
            Self::validate(&config)?;
            Ok(config)
        }
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<RunboxConfig, ConfigError> {
        let mut config: RunboxConfig = if content.trim().is_empty() {
            RunboxConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        Self::apply_env_overrides(&mut config);
        Self::validate(&config)?;
        Ok(config)
    }

    fn apply_env_overrides(config: &mut RunboxConfig) {
        if let Ok(addr) = env::var("RUNBOX_BIND_ADDR") {
            config.server.bind_addr = addr;
        }
        if let Ok(level) = env::var("RUNBOX_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(base_url) = env::var("RUNBOX_SINK_URL") {
            let timeout_seconds = match &config.sink {
                SinkConfig::Http { timeout_seconds, .. } => *timeout_seconds,
                SinkConfig::Log => 10,
            };
            config.sink = SinkConfig::Http {
                base_url,
                timeout_seconds,
            };
        }
    }

    pub fn validate(config: &RunboxConfig) -> Result<(), ConfigError> {
        config.engine.validate()?;

        if let SinkConfig::Http { base_url, timeout_seconds } = &config.sink {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "sink base_url '{}' must be an http(s) URL",
                    base_url
                )));
            }
            if *timeout_seconds == 0 {
                return Err(ConfigError::Invalid(
                    "sink timeout_seconds must be greater than zero".to_string(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for language in &config.languages {
            let name = language.name.trim().to_lowercase();
            if name.is_empty() {
                return Err(ConfigError::Invalid("language name must not be empty".to_string()));
            }
            if language.source_file.is_empty() || language.source_file.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "language '{}' needs a plain source_file name",
                    language.name
                )));
            }
            if language.run.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{}' has an empty run command",
                    language.name
                )));
            }
            if !seen.insert(name) {
                return Err(ConfigError::Invalid(format!(
                    "language '{}' is declared more than once",
                    language.name
                )));
            }
        }
        Ok(())
    }
}
