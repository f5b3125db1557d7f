//! Error types for the execution engine
//!
//! Errors are split by the layer that produces them. `RuntimeError` covers the
//! container runtime connection, `ExecutionError` is the per-request failure
//! taxonomy, and configuration or delivery problems get their own enums so a
//! caller can tell a misconfigured process apart from a failed execution.

use thiserror::Error;

/// Failure talking to the container runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Bollard (Docker client) error: {0}")]
    BollardError(#[from] bollard::errors::Error),
    #[error("I/O error during container operation: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Container runtime did not answer {operation} within {seconds}s")]
    TimedOut {
        operation: &'static str,
        seconds: u64,
    },
    #[error("Container runtime error: {0}")]
    Other(String),
}

/// Terminal failure of one execution request.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),
    #[error("{log}")]
    BuildFailed { log: String },
    #[error("Image build timed out after {seconds}s\n{log}")]
    BuildTimedOut { seconds: u64, log: String },
    #[error("Execution timed out after {seconds}s")]
    RunTimedOut { seconds: u64 },
    #[error("Container runtime failure: {0}")]
    Runtime(#[from] RuntimeError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failure delivering a result to the Result Sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP delivery failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Relay rejected result for '{correlation_id}' with status {status}")]
    Rejected { correlation_id: String, status: u16 },
}
