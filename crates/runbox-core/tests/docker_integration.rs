//! End-to-end runs against a real Docker daemon.
//!
//! Ignored by default: they pull base images and need `/var/run/docker.sock`.
//! Run with `cargo test -p runbox-core -- --ignored`.

use runbox_core::config::EngineConfig;
use runbox_core::{
    DockerRuntime, ExecutionEngine, ExecutionOutcome, ExecutionRequest, TemplateRegistry,
};
use std::sync::Arc;

async fn engine() -> Option<ExecutionEngine> {
    let runtime = DockerRuntime::connect().ok()?;
    if !runtime.is_available().await {
        return None;
    }
    Some(ExecutionEngine::new(
        Arc::new(runtime),
        Arc::new(TemplateRegistry::builtin()),
        EngineConfig {
            // First runs pull base images.
            build_timeout_seconds: 300,
            ..Default::default()
        },
    ))
}

fn request(language: &str, source: &str, stdin: &str) -> ExecutionRequest {
    ExecutionRequest {
        language: language.to_string(),
        source_code: source.to_string(),
        standard_input: Some(stdin.to_string()),
        correlation_id: "integration".to_string(),
    }
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_python_prints_hi() {
    let Some(engine) = engine().await else {
        eprintln!("Docker not available, skipping");
        return;
    };
    let report = engine.execute(&request("python", "print(\"hi\")", "")).await;
    let result = report.result();
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.stderr, "");
    assert!(report.cleanup.warnings.is_empty(), "{:?}", report.cleanup.warnings);
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_stdin_is_piped() {
    let Some(engine) = engine().await else {
        eprintln!("Docker not available, skipping");
        return;
    };
    let source = "const fs = require('fs');\nprocess.stdout.write(fs.readFileSync(0, 'utf8').toUpperCase());";
    let report = engine.execute(&request("javascript", source, "shout")).await;
    assert_eq!(report.result().stdout, "SHOUT");
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_java_compile_error_never_starts_container() {
    let Some(engine) = engine().await else {
        eprintln!("Docker not available, skipping");
        return;
    };
    let report = engine
        .execute(&request("java", "public class Main { oops }", ""))
        .await;
    assert_eq!(report.outcome.kind(), "build_failure");
    assert!(report.names.container.is_none());
    let result = report.result();
    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("Main.java"));
}

#[tokio::test]
#[ignore] // Requires a Docker daemon
async fn test_infinite_loop_is_cut_off() {
    let Some(engine) = engine().await else {
        eprintln!("Docker not available, skipping");
        return;
    };
    let report = engine
        .execute(&request("python", "while True:\n    pass\n", ""))
        .await;
    assert!(matches!(report.outcome, ExecutionOutcome::RunTimeout { .. }));
    assert!(report.cleanup.container_removed);
}
