//! Image Builder: turns a workspace into a runnable image within a deadline.

use futures_util::stream::StreamExt;
use std::time::Duration;

use crate::errors::ExecutionError;
use crate::runtime::{BuildEvent, ContainerRuntime};
use crate::workspace::Workspace;

const SUCCESS_MARKER: &str = "Successfully built ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Built { image_id: String },
    Failed,
    TimedOut,
}

/// Outcome of one build. The log is kept in every case as diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub status: BuildStatus,
    pub log: String,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, BuildStatus::Built { .. })
    }

    pub fn image_id(&self) -> Option<&str> {
        match &self.status {
            BuildStatus::Built { image_id } => Some(image_id),
            _ => None,
        }
    }
}

pub struct ImageBuilder<'a> {
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// Build `workspace` into an image tagged `tag`.
    ///
    /// The build log is accumulated as it streams in, so a timeout still
    /// returns everything received up to that point. There is no retry.
    pub async fn build(
        &self,
        workspace: &Workspace,
        tag: &str,
        timeout: Duration,
    ) -> Result<BuildResult, ExecutionError> {
        let context = workspace.archive()?;

        let mut build_log = String::new();
        let mut image_id: Option<String> = None;
        let mut failed = false;

        let drained = tokio::time::timeout(timeout, async {
            let mut stream = self.runtime.build_image(context, tag);
            while let Some(event) = stream.next().await {
                match event {
                    Ok(BuildEvent::Log(text)) => build_log.push_str(&text),
                    Ok(BuildEvent::ImageId(id)) => image_id = Some(id),
                    Ok(BuildEvent::Error(message)) => {
                        push_line(&mut build_log, &message);
                        failed = true;
                    }
                    Err(e) => {
                        push_line(&mut build_log, &e.to_string());
                        failed = true;
                        break;
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            log::warn!("Image build for {} timed out after {:?}", tag, timeout);
            return Ok(BuildResult {
                status: BuildStatus::TimedOut,
                log: build_log,
            });
        }

        let image_id = image_id.or_else(|| image_id_from_log(&build_log));
        let status = match image_id {
            Some(image_id) if !failed => BuildStatus::Built { image_id },
            _ => {
                log::debug!("Image build for {} failed", tag);
                BuildStatus::Failed
            }
        };
        Ok(BuildResult {
            status,
            log: build_log,
        })
    }
}

fn push_line(log: &mut String, line: &str) {
    if !log.is_empty() && !log.ends_with('\n') {
        log.push('\n');
    }
    log.push_str(line);
    if !line.ends_with('\n') {
        log.push('\n');
    }
}

/// Legacy builders only announce the image in the log text.
fn image_id_from_log(log: &str) -> Option<String> {
    log.lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(SUCCESS_MARKER))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}
