//! Log Collector: best-effort drain of a container's output streams.

use futures_util::stream::StreamExt;
use std::time::Duration;

use super::runner::ContainerHandle;
use crate::runtime::{ContainerRuntime, LogChunk};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedLogs {
    pub stdout: String,
    pub stderr: String,
    /// False when the drain hit its timeout or the stream broke off.
    pub complete: bool,
}

pub struct LogCollector<'a> {
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> LogCollector<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// Demultiplex the container's output into stdout and stderr.
    ///
    /// Bytes are buffered per stream and decoded once at the end, so a UTF-8
    /// sequence split across frames is not mangled.
    pub async fn collect(&self, handle: &ContainerHandle, timeout: Duration) -> CollectedLogs {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut broken = false;

        let drained = tokio::time::timeout(timeout, async {
            let mut stream = self.runtime.container_logs(&handle.id);
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LogChunk::Stdout(bytes)) => stdout.extend_from_slice(&bytes),
                    Ok(LogChunk::Stderr(bytes)) => stderr.extend_from_slice(&bytes),
                    Err(e) => {
                        log::warn!("Log stream for container {} broke off: {}", handle.name, e);
                        broken = true;
                        break;
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            log::warn!(
                "Log collection for container {} incomplete after {:?}",
                handle.name,
                timeout
            );
        }

        CollectedLogs {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            complete: drained.is_ok() && !broken,
        }
    }
}
