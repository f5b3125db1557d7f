//! Sandboxed multi-language code execution.
//!
//! Given untrusted source code, a language and optional standard input, the
//! engine builds the code into a throwaway image, runs it in a resource-capped
//! container, captures stdout and stderr, and removes everything it created,
//! all within bounded wall-clock time.
//!
//! # Architecture Overview
//!
//! - **Templates**: language identifier to build recipe, resolved before anything is created
//! - **Workspaces**: uniquely named staging directories, one per execution
//! - **Runtime**: the container runtime as an injected capability (`bollard` for Docker)
//! - **Executors**: image build, container run, log drain and cleanup, sequenced by the engine
//! - **Sink**: delivery of the flattened result to whoever is waiting for it
//! - **Configuration**: YAML with environment overrides

pub mod config;
pub mod errors;
pub mod executors;
pub mod runtime;
pub mod sink;
pub mod templates;
pub mod workspace;

pub use config::{ConfigLoader, EngineConfig, RunboxConfig};
pub use errors::{ConfigError, ExecutionError, RuntimeError, SinkError};
pub use executors::{
    ExecutionEngine, ExecutionOutcome, ExecutionReport, ExecutionRequest, ExecutionResult,
    PipelineState,
};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use sink::{sink_from_config, HttpBroadcastSink, LogSink, ResultSink};
pub use templates::{LanguageTemplate, TemplateRegistry};
