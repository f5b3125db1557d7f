//! Container runtime capability.
//!
//! The engine never talks to Docker directly. It drives a `ContainerRuntime`,
//! which keeps the pipeline testable against an in-memory fake and lets any
//! runtime binding slot in. Implementations must be safe to share between
//! concurrent executions.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::future::Future;
use std::time::Duration;

use crate::config::ResourceLimits;
use crate::errors::RuntimeError;

pub mod docker;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use docker::DockerRuntime;

/// Ceiling for create, start and remove calls. Builds, waits and log drains
/// have their own configured timeouts.
pub const CONTROL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Run one control call, failing with `RuntimeError::TimedOut` if the runtime
/// does not answer within `CONTROL_CALL_TIMEOUT`.
pub(crate) async fn bounded<T, F>(operation: &'static str, call: F) -> Result<T, RuntimeError>
where
    F: Future<Output = Result<T, RuntimeError>>,
{
    tokio::time::timeout(CONTROL_CALL_TIMEOUT, call)
        .await
        .map_err(|_| RuntimeError::TimedOut {
            operation,
            seconds: CONTROL_CALL_TIMEOUT.as_secs(),
        })?
}

/// One item of an image build's progress stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// Build output text, appended verbatim to the build log.
    Log(String),
    /// The runtime reported the id of the finished image.
    ImageId(String),
    /// The runtime reported the build as failed.
    Error(String),
}

/// One demultiplexed frame of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build an image from a tar build context and tag it.
    fn build_image<'a>(
        &'a self,
        context: Vec<u8>,
        tag: &'a str,
    ) -> BoxStream<'a, Result<BuildEvent, RuntimeError>>;

    /// Create a container with the given name and limits. Returns its id.
    async fn create_container(
        &self,
        image: &str,
        name: &str,
        limits: ResourceLimits,
    ) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Block until the container exits. Returns the exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Output the container has produced so far, frame by frame.
    fn container_logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<LogChunk, RuntimeError>>;

    /// Force-remove a container, killing it if it still runs.
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Force-remove an image by id or tag.
    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError>;
}
