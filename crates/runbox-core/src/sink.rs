//! Result Sink: where finished executions are delivered.
//!
//! The engine hands over a flattened `ExecutionResult` keyed by the request's
//! correlation id. Delivery is a single attempt; retries and persistence are
//! the receiver's business.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SinkConfig;
use crate::errors::SinkError;
use crate::executors::ExecutionResult;

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn deliver(
        &self,
        correlation_id: &str,
        result: &ExecutionResult,
    ) -> Result<(), SinkError>;
}

/// Build the sink described by the configuration.
pub fn sink_from_config(config: &SinkConfig) -> Result<Arc<dyn ResultSink>, SinkError> {
    match config {
        SinkConfig::Log => Ok(Arc::new(LogSink)),
        SinkConfig::Http {
            base_url,
            timeout_seconds,
        } => Ok(Arc::new(HttpBroadcastSink::new(
            base_url,
            Duration::from_secs(*timeout_seconds),
        )?)),
    }
}

/// Writes results to the log. Useful when nothing downstream listens.
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn deliver(
        &self,
        correlation_id: &str,
        result: &ExecutionResult,
    ) -> Result<(), SinkError> {
        log::info!(
            "[{}] stdout: {} bytes, stderr: {} bytes",
            correlation_id,
            result.stdout.len(),
            result.stderr.len()
        );
        log::debug!("[{}] stdout:\n{}", correlation_id, result.stdout);
        log::debug!("[{}] stderr:\n{}", correlation_id, result.stderr);
        Ok(())
    }
}

/// Posts results to a collaboration relay at
/// `{base_url}/api/internal/broadcast/{correlation_id}`.
pub struct HttpBroadcastSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBroadcastSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn broadcast_url(&self, correlation_id: &str) -> String {
        format!(
            "{}/api/internal/broadcast/{}",
            self.base_url,
            urlencoding::encode(correlation_id)
        )
    }
}

#[async_trait]
impl ResultSink for HttpBroadcastSink {
    async fn deliver(
        &self,
        correlation_id: &str,
        result: &ExecutionResult,
    ) -> Result<(), SinkError> {
        let url = self.broadcast_url(correlation_id);
        log::debug!("Broadcasting result for {} to {}", correlation_id, url);

        let response = self.client.post(&url).json(result).send().await?;
        if !response.status().is_success() {
            return Err(SinkError::Rejected {
                correlation_id: correlation_id.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Keeps delivered results in memory.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct MemorySink {
    delivered: std::sync::Mutex<Vec<(String, ExecutionResult)>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemorySink {
    pub fn delivered(&self) -> Vec<(String, ExecutionResult)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl ResultSink for MemorySink {
    async fn deliver(
        &self,
        correlation_id: &str,
        result: &ExecutionResult,
    ) -> Result<(), SinkError> {
        self.delivered
            .lock()
            .unwrap()
            .push((correlation_id.to_string(), result.clone()));
        Ok(())
    }
}
