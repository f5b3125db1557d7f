//! Sandboxed execution pipeline.
//!
//! One execution walks Workspace -> Image build -> Container run -> Log drain
//! and always ends in cleanup. Each stage lives in its own module; `engine`
//! sequences them and owns the per-execution state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ExecutionError;

pub mod builder;
pub mod cleanup;
pub mod engine;
pub mod logs;
pub mod runner;

pub use builder::{BuildResult, BuildStatus, ImageBuilder};
pub use cleanup::{
    AcquiredResources, CleanupCoordinator, CleanupReport, CleanupTarget, CleanupWarning,
};
pub use engine::{ExecutionEngine, ExecutionReport, ResourceNames};
pub use logs::{CollectedLogs, LogCollector};
pub use runner::{ContainerHandle, ContainerRunner, RunStatus};

/// One caller-submitted program to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub standard_input: Option<String>,
    /// Opaque to the engine; only the Result Sink interprets it.
    pub correlation_id: String,
}

/// What the Result Sink receives. Both fields may be empty, never absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(rename = "output")]
    pub stdout: String,
    #[serde(rename = "error")]
    pub stderr: String,
}

/// Tagged result carried through the pipeline; flattened only at the sink boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The program ran to completion, whatever its exit code.
    Success {
        stdout: String,
        stderr: String,
        exit_code: i64,
        logs_complete: bool,
    },
    /// The request was refused before anything was created.
    Rejected { message: String },
    BuildFailure { diagnostic: String, timed_out: bool },
    RunTimeout {
        stdout: String,
        stderr: String,
        timeout_seconds: u64,
    },
    InfrastructureError { message: String },
}

impl ExecutionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success { .. } => "success",
            ExecutionOutcome::Rejected { .. } => "rejected",
            ExecutionOutcome::BuildFailure { timed_out: false, .. } => "build_failure",
            ExecutionOutcome::BuildFailure { timed_out: true, .. } => "build_timeout",
            ExecutionOutcome::RunTimeout { .. } => "run_timeout",
            ExecutionOutcome::InfrastructureError { .. } => "infrastructure_error",
        }
    }

    /// Flatten into the single output/error shape the sink understands.
    pub fn into_result(self) -> ExecutionResult {
        match self {
            ExecutionOutcome::Success { stdout, stderr, .. } => ExecutionResult { stdout, stderr },
            ExecutionOutcome::Rejected { message }
            | ExecutionOutcome::InfrastructureError { message } => ExecutionResult {
                stdout: String::new(),
                stderr: message,
            },
            ExecutionOutcome::BuildFailure { diagnostic, .. } => ExecutionResult {
                stdout: String::new(),
                stderr: diagnostic,
            },
            ExecutionOutcome::RunTimeout {
                stdout,
                mut stderr,
                timeout_seconds,
            } => {
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(
                    &ExecutionError::RunTimedOut {
                        seconds: timeout_seconds,
                    }
                    .to_string(),
                );
                ExecutionResult { stdout, stderr }
            }
        }
    }
}

impl From<ExecutionError> for ExecutionOutcome {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::UnsupportedLanguage(_) => ExecutionOutcome::Rejected {
                message: err.to_string(),
            },
            ExecutionError::BuildFailed { log } => ExecutionOutcome::BuildFailure {
                diagnostic: if log.trim().is_empty() {
                    "Image build failed".to_string()
                } else {
                    log
                },
                timed_out: false,
            },
            ExecutionError::BuildTimedOut { .. } => ExecutionOutcome::BuildFailure {
                diagnostic: err.to_string(),
                timed_out: true,
            },
            ExecutionError::RunTimedOut { seconds } => ExecutionOutcome::RunTimeout {
                stdout: String::new(),
                stderr: String::new(),
                timeout_seconds: seconds,
            },
            ExecutionError::Workspace(_) | ExecutionError::Runtime(_) => {
                ExecutionOutcome::InfrastructureError {
                    message: err.to_string(),
                }
            }
        }
    }
}

/// Pipeline states. `Done` is the only terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Created,
    Building,
    Built,
    BuildFailed,
    BuildTimedOut,
    Starting,
    Running,
    RunCompleted,
    RunTimedOut,
    CleaningUp,
    Done,
}

impl PipelineState {
    /// There is no retry edge: every failure leads to cleanup.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Done, _) => false,
            (CleaningUp, Done) => true,
            (CleaningUp, _) => false,
            (_, CleaningUp) => true,
            (Created, Building) => true,
            (Building, Built | BuildFailed | BuildTimedOut) => true,
            (Built, Starting) => true,
            (Starting, Running) => true,
            (Running, RunCompleted | RunTimedOut) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Created => "CREATED",
            PipelineState::Building => "BUILDING",
            PipelineState::Built => "BUILT",
            PipelineState::BuildFailed => "BUILD_FAILED",
            PipelineState::BuildTimedOut => "BUILD_TIMED_OUT",
            PipelineState::Starting => "STARTING",
            PipelineState::Running => "RUNNING",
            PipelineState::RunCompleted => "RUN_COMPLETED",
            PipelineState::RunTimedOut => "RUN_TIMED_OUT",
            PipelineState::CleaningUp => "CLEANING_UP",
            PipelineState::Done => "DONE",
        };
        f.write_str(name)
    }
}
