//! Container Runner: create, start and bound one container.

use std::time::Duration;

use crate::config::ResourceLimits;
use crate::errors::RuntimeError;
use crate::runtime::{bounded, ContainerRuntime};

/// A created container. Owned by a single execution and never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Exited { code: i64 },
    /// No completion within the run timeout. The container may still be alive.
    TimedOut,
}

pub struct ContainerRunner<'a> {
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> ContainerRunner<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self { runtime }
    }

    pub async fn create(
        &self,
        image: &str,
        name: &str,
        limits: ResourceLimits,
    ) -> Result<ContainerHandle, RuntimeError> {
        let id = bounded(
            "create_container",
            self.runtime.create_container(image, name, limits),
        )
        .await?;
        log::debug!("Created container {} ({}) from {}", name, id, image);
        Ok(ContainerHandle {
            id,
            name: name.to_string(),
        })
    }

    pub async fn start(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        bounded("start_container", self.runtime.start_container(&handle.id)).await
    }

    /// Wait for the container to exit, at most `timeout`.
    pub async fn await_completion(
        &self,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> Result<RunStatus, RuntimeError> {
        match tokio::time::timeout(timeout, self.runtime.wait_container(&handle.id)).await {
            Ok(Ok(code)) => {
                log::debug!("Container {} exited with code {}", handle.name, code);
                Ok(RunStatus::Exited { code })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                log::warn!(
                    "Execution timed out for container {} after {:?}",
                    handle.name,
                    timeout
                );
                Ok(RunStatus::TimedOut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::{FakeBuild, FakeRun, FakeRuntime, RuntimeCall};

    const LIMITS: ResourceLimits = ResourceLimits {
        memory_bytes: 128 * 1024 * 1024,
        nano_cpus: 1_000_000_000,
    };

    #[tokio::test]
    async fn test_create_passes_limits() {
        let rt = FakeRuntime::printing("");
        let runner = ContainerRunner::new(&rt);
        let handle = runner.create("sha256:abc", "runbox-1", LIMITS).await.unwrap();
        assert_eq!(handle.name, "runbox-1");
        assert_eq!(
            rt.calls(),
            vec![RuntimeCall::CreateContainer {
                image: "sha256:abc".to_string(),
                name: "runbox-1".to_string(),
                limits: LIMITS,
            }]
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_completion() {
        let rt = FakeRuntime::new(
            FakeBuild::Succeed { log: vec![] },
            FakeRun::exit(1, "", "Traceback"),
        );
        let runner = ContainerRunner::new(&rt);
        let handle = runner.create("img", "c", LIMITS).await.unwrap();
        runner.start(&handle).await.unwrap();
        let status = runner
            .await_completion(&handle, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(status, RunStatus::Exited { code: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_container_times_out() {
        let rt = FakeRuntime::new(
            FakeBuild::Succeed { log: vec![] },
            FakeRun::hang("", ""),
        );
        let runner = ContainerRunner::new(&rt);
        let handle = runner.create("img", "c", LIMITS).await.unwrap();
        runner.start(&handle).await.unwrap();
        let status = runner
            .await_completion(&handle, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(status, RunStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_create_failure_propagates() {
        let rt = FakeRuntime::new(
            FakeBuild::Succeed { log: vec![] },
            FakeRun::CreateError {
                message: "no space left on device".to_string(),
            },
        );
        let err = ContainerRunner::new(&rt)
            .create("img", "c", LIMITS)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no space left"));
    }
}
