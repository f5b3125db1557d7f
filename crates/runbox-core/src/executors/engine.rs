//! Execution engine: sequences the pipeline stages for one request.
//!
//! Every resource a stage creates is recorded in `AcquiredResources` before
//! the next fallible step runs. The stages run inside one fallible scope and
//! cleanup runs once after that scope returns, panics included, so no early
//! exit can skip teardown.

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::builder::{BuildStatus, ImageBuilder};
use super::cleanup::{AcquiredResources, CleanupCoordinator, CleanupReport};
use super::logs::LogCollector;
use super::runner::{ContainerRunner, RunStatus};
use super::{ExecutionOutcome, ExecutionRequest, ExecutionResult, PipelineState};
use crate::config::EngineConfig;
use crate::errors::ExecutionError;
use crate::runtime::ContainerRuntime;
use crate::sink::ResultSink;
use crate::templates::TemplateRegistry;
use crate::workspace::WorkspaceManager;

/// Names generated for one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceNames {
    pub workspace: Option<String>,
    pub image_tag: Option<String>,
    pub container: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub correlation_id: String,
    pub outcome: ExecutionOutcome,
    /// Every state the pipeline passed through, ending in `Done`. Empty only
    /// when the execution task itself died.
    pub states: Vec<PipelineState>,
    pub cleanup: CleanupReport,
    pub names: ResourceNames,
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub fn result(&self) -> ExecutionResult {
        self.outcome.clone().into_result()
    }
}

struct StateTrace {
    correlation_id: String,
    states: Vec<PipelineState>,
}

impl StateTrace {
    fn new(correlation_id: &str) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            states: vec![PipelineState::Created],
        }
    }

    fn enter(&mut self, next: PipelineState) {
        if let Some(&current) = self.states.last() {
            debug_assert!(
                current.can_transition_to(next),
                "illegal transition {} -> {}",
                current,
                next
            );
            log::debug!("[{}] {} -> {}", self.correlation_id, current, next);
        }
        self.states.push(next);
    }
}

struct Execution<'r> {
    request: &'r ExecutionRequest,
    resources: AcquiredResources,
    names: ResourceNames,
    trace: StateTrace,
}

/// Runs execution requests. Cheap to clone; clones share the runtime
/// connection and the read-only template registry.
#[derive(Clone)]
pub struct ExecutionEngine {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<TemplateRegistry>,
    config: Arc<EngineConfig>,
    workspaces: WorkspaceManager,
}

impl ExecutionEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<TemplateRegistry>,
        config: EngineConfig,
    ) -> Self {
        let workspaces = WorkspaceManager::new(config.workspace_root.clone());
        Self {
            runtime,
            registry,
            config: Arc::new(config),
            workspaces,
        }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Run one request to completion. Never fails: every error becomes an outcome.
    ///
    /// The execution runs on its own task. Dropping the returned future
    /// (a disconnected client, a caller-side timeout) does not cancel it, so
    /// cleanup still happens.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionReport {
        self.detached(request, None).await
    }

    /// Execute, then hand the flattened result to `sink`. Delivery failures are
    /// logged; they do not change the report. Delivery happens on the
    /// execution's task, so the sink hears about the result even if the caller
    /// stopped waiting.
    pub async fn execute_and_deliver(
        &self,
        request: &ExecutionRequest,
        sink: Arc<dyn ResultSink>,
    ) -> ExecutionReport {
        self.detached(request, Some(sink)).await
    }

    async fn detached(
        &self,
        request: &ExecutionRequest,
        sink: Option<Arc<dyn ResultSink>>,
    ) -> ExecutionReport {
        let engine = self.clone();
        let owned = request.clone();
        let task = tokio::spawn(async move {
            let report = engine.run_to_completion(&owned).await;
            if let Some(sink) = sink {
                if let Err(e) = sink.deliver(&owned.correlation_id, &report.result()).await {
                    log::error!("[{}] failed to deliver result: {}", owned.correlation_id, e);
                }
            }
            report
        });

        match task.await {
            Ok(report) => report,
            Err(e) => {
                log::error!("[{}] execution task failed: {}", request.correlation_id, e);
                ExecutionReport {
                    correlation_id: request.correlation_id.clone(),
                    outcome: ExecutionOutcome::InfrastructureError {
                        message: "Execution task failed".to_string(),
                    },
                    states: Vec::new(),
                    cleanup: CleanupReport::default(),
                    names: ResourceNames::default(),
                    elapsed: Duration::ZERO,
                }
            }
        }
    }

    async fn run_to_completion(&self, request: &ExecutionRequest) -> ExecutionReport {
        let started = Instant::now();
        log::info!(
            "Executing {} request {}",
            request.language,
            request.correlation_id
        );

        let mut exec = Execution {
            request,
            resources: AcquiredResources::default(),
            names: ResourceNames::default(),
            trace: StateTrace::new(&request.correlation_id),
        };

        let staged = AssertUnwindSafe(self.run_stages(&mut exec))
            .catch_unwind()
            .await;
        let outcome = match staged {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                log_failure(&request.correlation_id, &err);
                ExecutionOutcome::from(err)
            }
            Err(_) => {
                log::error!("[{}] execution pipeline panicked", request.correlation_id);
                ExecutionOutcome::InfrastructureError {
                    message: "Execution pipeline panicked".to_string(),
                }
            }
        };

        exec.trace.enter(PipelineState::CleaningUp);
        let cleanup = CleanupCoordinator::new(self.runtime.as_ref(), &self.workspaces)
            .cleanup(std::mem::take(&mut exec.resources))
            .await;
        exec.trace.enter(PipelineState::Done);

        let elapsed = started.elapsed();
        log::info!(
            "[{}] finished with {} in {:?} ({} cleanup warnings)",
            request.correlation_id,
            outcome.kind(),
            elapsed,
            cleanup.warnings.len()
        );

        ExecutionReport {
            correlation_id: request.correlation_id.clone(),
            outcome,
            states: exec.trace.states,
            cleanup,
            names: exec.names,
            elapsed,
        }
    }

    async fn run_stages(
        &self,
        exec: &mut Execution<'_>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let runtime = self.runtime.as_ref();

        // Unknown languages are refused before anything exists to clean up.
        let template = self.registry.resolve(&exec.request.language)?;

        let workspace = exec.resources.workspace.insert(self.workspaces.create()?);
        exec.names.workspace = Some(workspace.name().to_string());
        self.workspaces
            .materialize(workspace, exec.request, template)
            .await?;

        let tag = format!("{}-{}", self.config.image_prefix, Uuid::new_v4());
        exec.names.image_tag = Some(tag.clone());
        // A failed or abandoned build can still leave a tagged image behind.
        exec.resources.image = Some(tag.clone());

        exec.trace.enter(PipelineState::Building);
        let build = ImageBuilder::new(runtime)
            .build(workspace, &tag, self.config.build_timeout())
            .await?;
        let image_id = match build.status {
            BuildStatus::Built { image_id } => image_id,
            BuildStatus::Failed => {
                exec.trace.enter(PipelineState::BuildFailed);
                return Err(ExecutionError::BuildFailed { log: build.log });
            }
            BuildStatus::TimedOut => {
                exec.trace.enter(PipelineState::BuildTimedOut);
                return Err(ExecutionError::BuildTimedOut {
                    seconds: self.config.build_timeout_seconds,
                    log: build.log,
                });
            }
        };
        exec.resources.image = Some(image_id.clone());
        exec.trace.enter(PipelineState::Built);

        exec.trace.enter(PipelineState::Starting);
        let runner = ContainerRunner::new(runtime);
        let name = format!("{}-{}", self.config.image_prefix, Uuid::new_v4());
        exec.names.container = Some(name.clone());
        let handle = exec.resources.container.insert(
            runner
                .create(&image_id, &name, self.config.resource_limits())
                .await?,
        );
        runner.start(handle).await?;
        exec.trace.enter(PipelineState::Running);

        let status = runner
            .await_completion(handle, self.config.run_timeout())
            .await?;
        let logs = LogCollector::new(runtime)
            .collect(handle, self.config.log_timeout())
            .await;

        match status {
            RunStatus::Exited { code } => {
                exec.trace.enter(PipelineState::RunCompleted);
                Ok(ExecutionOutcome::Success {
                    stdout: logs.stdout,
                    stderr: logs.stderr,
                    exit_code: code,
                    logs_complete: logs.complete,
                })
            }
            RunStatus::TimedOut => {
                exec.trace.enter(PipelineState::RunTimedOut);
                Ok(ExecutionOutcome::RunTimeout {
                    stdout: logs.stdout,
                    stderr: logs.stderr,
                    timeout_seconds: self.config.run_timeout_seconds,
                })
            }
        }
    }
}

fn log_failure(correlation_id: &str, err: &ExecutionError) {
    match err {
        ExecutionError::UnsupportedLanguage(_) | ExecutionError::BuildFailed { .. } => {
            log::info!("[{}] {}", correlation_id, err)
        }
        ExecutionError::BuildTimedOut { seconds, .. } => {
            log::warn!("[{}] image build timed out after {}s", correlation_id, seconds)
        }
        ExecutionError::RunTimedOut { .. } => log::warn!("[{}] {}", correlation_id, err),
        ExecutionError::Workspace(_) | ExecutionError::Runtime(_) => {
            log::error!("[{}] {}", correlation_id, err)
        }
    }
}
