// src/runtime/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    BuildImageOptionsBuilder,
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    LogsOptions as BollardLogsOptionsQuery,
    RemoveContainerOptionsBuilder, RemoveImageOptionsBuilder,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    WaitContainerOptions as BollardWaitContainerOptionsQuery,
};
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};

use super::{BuildEvent, ContainerRuntime, LogChunk};
use crate::config::ResourceLimits;
use crate::errors::RuntimeError;
use crate::templates::RECIPE_FILE_NAME;

/// `ContainerRuntime` backed by a local Docker daemon through bollard.
///
/// The underlying client is cheap to clone and safe for concurrent calls, so a
/// single instance serves every execution for the life of the process.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self, RuntimeError> {
        Ok(Self::with_client(Docker::connect_with_local_defaults()?))
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    pub async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn build_image<'a>(
        &'a self,
        context: Vec<u8>,
        tag: &'a str,
    ) -> BoxStream<'a, Result<BuildEvent, RuntimeError>> {
        let options = BuildImageOptionsBuilder::new()
            .dockerfile(RECIPE_FILE_NAME)
            .t(tag)
            .rm(true)
            .forcerm(true)
            .build();

        self.docker
            .build_image(options, None, Some(bollard::body_full(Bytes::from(context))))
            .flat_map(|item| {
                let events: Vec<Result<BuildEvent, RuntimeError>> = match item {
                    Ok(info) => {
                        let mut events = Vec::new();
                        if let Some(stream) = info.stream {
                            events.push(Ok(BuildEvent::Log(stream)));
                        }
                        if let Some(message) = info.error_detail.and_then(|d| d.message) {
                            events.push(Ok(BuildEvent::Error(message)));
                        }
                        if let Some(id) = info.aux.and_then(|aux| aux.id) {
                            events.push(Ok(BuildEvent::ImageId(id)));
                        }
                        events
                    }
                    Err(e) => vec![Err(RuntimeError::BollardError(e))],
                };
                futures_util::stream::iter(events)
            })
            .boxed()
    }

    async fn create_container(
        &self,
        image: &str,
        name: &str,
        limits: ResourceLimits,
    ) -> Result<String, RuntimeError> {
        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(name.to_string()),
            ..Default::default()
        });

        let config = ContainerCreateBody {
            image: Some(image.to_string()),
            host_config: Some(HostConfig {
                memory: Some(limits.memory_bytes),
                // Same as memory: no swap on top of the ceiling.
                memory_swap: Some(limits.memory_bytes),
                nano_cpus: Some(limits.nano_cpus),
                ..Default::default()
            }),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let container = self.docker.create_container(options, config).await?;
        for warning in &container.warnings {
            log::warn!("Docker warning for container {}: {}", container.id, warning);
        }
        Ok(container.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<BollardStartContainerOptionsQuery>)
            .await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let mut wait_stream = self
            .docker
            .wait_container(id, None::<BollardWaitContainerOptionsQuery>);

        match wait_stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error; for us it is a finished run.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(RuntimeError::BollardError(e)),
            None => Err(RuntimeError::Other(format!(
                "wait stream for container {} ended unexpectedly",
                id
            ))),
        }
    }

    fn container_logs<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<LogChunk, RuntimeError>> {
        self.docker
            .logs(
                id,
                Some(BollardLogsOptionsQuery {
                    stdout: true,
                    stderr: true,
                    ..Default::default()
                }),
            )
            .filter_map(|log_result| async move {
                match log_result {
                    Ok(LogOutput::StdOut { message }) => Some(Ok(LogChunk::Stdout(message))),
                    Ok(LogOutput::StdErr { message }) => Some(Ok(LogChunk::Stderr(message))),
                    Ok(LogOutput::Console { message }) => Some(Ok(LogChunk::Stdout(message))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(RuntimeError::BollardError(e))),
                }
            })
            .boxed()
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::new().force(true).v(true).build();
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        let options = RemoveImageOptionsBuilder::new().force(true).build();
        self.docker.remove_image(image, Some(options), None).await?;
        Ok(())
    }
}
