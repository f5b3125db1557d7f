//! HTTP front end for the execution engine.
//!
//! Accepts `{language, code, sessionId, stdin?}`, runs it through the engine and
//! delivers `{output, error}` to the configured Result Sink under `sessionId`.

pub mod error;

pub use error::{Result, ServerError};

use axum::extract::{DefaultBodyLimit, Json as AxumJson, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use runbox_core::config::ServerSettings;
use runbox_core::{ExecutionEngine, ExecutionRequest, ResultSink};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

/// Body of `POST /api/execute` and `POST /api/execute/sync`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub stdin: Option<String>,
}

impl ExecuteRequest {
    fn into_execution_request(self) -> Result<ExecutionRequest> {
        let session_id = non_blank(self.session_id)
            .ok_or_else(|| ServerError::missing_field("sessionId"))?;
        let language = non_blank(self.language)
            .ok_or_else(|| ServerError::missing_field("language"))?;
        Ok(ExecutionRequest {
            language,
            source_code: self.code,
            standard_input: self.stdin,
            correlation_id: session_id,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Clone)]
pub struct AppState {
    pub engine: ExecutionEngine,
    pub sink: Arc<dyn ResultSink>,
}

/// Runs the engine for the whole request, delivers to the sink, then answers
/// `200` whatever the outcome. Callers learn the result through the sink.
async fn execute_handler(
    State(state): State<AppState>,
    AxumJson(body): AxumJson<ExecuteRequest>,
) -> Result<Json<serde_json::Value>> {
    let request = body.into_execution_request()?;
    log::info!(
        "Received {} execution request for session {}",
        request.language,
        request.correlation_id
    );

    let report = state
        .engine
        .execute_and_deliver(&request, state.sink.clone())
        .await;

    Ok(Json(json!({
        "status": "accepted",
        "correlationId": report.correlation_id,
        "outcome": report.outcome.kind(),
    })))
}

/// Same pipeline as `/api/execute`, but the flattened result is also returned.
async fn execute_sync_handler(
    State(state): State<AppState>,
    AxumJson(body): AxumJson<ExecuteRequest>,
) -> Result<Json<serde_json::Value>> {
    let request = body.into_execution_request()?;
    let report = state
        .engine
        .execute_and_deliver(&request, state.sink.clone())
        .await;
    let result = report.result();

    Ok(Json(json!({
        "output": result.stdout,
        "error": result.stderr,
        "outcome": report.outcome.kind(),
    })))
}

async fn languages_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "languages": state.engine.registry().languages() }))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub struct RunboxServer {
    state: AppState,
    settings: ServerSettings,
}

impl RunboxServer {
    pub fn new(
        engine: ExecutionEngine,
        sink: Arc<dyn ResultSink>,
        settings: ServerSettings,
    ) -> Self {
        Self {
            state: AppState { engine, sink },
            settings,
        }
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(health_handler))
            .route("/api/languages", get(languages_handler))
            .route("/api/execute", post(execute_handler))
            .route("/api/execute/sync", post(execute_sync_handler))
            .layer(DefaultBodyLimit::max(self.settings.max_body_bytes))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown_signal` resolves. In-flight executions finish
    /// (and clean up) before the server returns.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr: SocketAddr = self.settings.bind_addr.parse().map_err(|e| {
            ServerError::config_error(format!(
                "Invalid bind address '{}': {}",
                self.settings.bind_addr, e
            ))
        })?;
        let router = self.build_router();
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            ServerError::config_error(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        log::info!("runbox server listening on {}", bind_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        log::info!("runbox server shut down gracefully");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use runbox_core::config::EngineConfig;
    use runbox_core::runtime::fake::{FakeBuild, FakeRun, FakeRuntime, RuntimeCall};
    use runbox_core::sink::MemorySink;
    use runbox_core::{ExecutionResult, TemplateRegistry};
    use std::time::Duration;
    use tower::ServiceExt; // for `oneshot`

    struct Harness {
        router: Router,
        runtime: Arc<FakeRuntime>,
        sink: Arc<MemorySink>,
    }

    fn harness(runtime: FakeRuntime) -> Harness {
        let runtime = Arc::new(runtime);
        let sink = Arc::new(MemorySink::default());
        let engine = ExecutionEngine::new(
            runtime.clone(),
            Arc::new(TemplateRegistry::builtin()),
            EngineConfig::default(),
        );
        let server = RunboxServer::new(engine, sink.clone(), ServerSettings::default());
        Harness {
            router: server.build_router(),
            runtime,
            sink,
        }
    }

    async fn post_json(
        router: Router,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_execute_delivers_to_sink() {
        let h = harness(FakeRuntime::printing("hi\n"));
        let (status, body) = post_json(
            h.router,
            "/api/execute",
            json!({"language": "python", "code": "print('hi')", "sessionId": "s-1"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["correlationId"], "s-1");
        assert_eq!(body["outcome"], "success");
        assert_eq!(
            h.sink.delivered(),
            vec![(
                "s-1".to_string(),
                ExecutionResult {
                    stdout: "hi\n".to_string(),
                    stderr: String::new(),
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_unsupported_language_still_answers_ok() {
        let h = harness(FakeRuntime::printing(""));
        let (status, body) = post_json(
            h.router,
            "/api/execute",
            json!({"language": "ruby", "code": "puts 1", "sessionId": "s-2"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "rejected");
        let delivered = h.sink.delivered();
        assert_eq!(delivered[0].1.stderr, "Unsupported language: ruby");
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_session_id_is_bad_request() {
        let h = harness(FakeRuntime::printing(""));
        let (status, body) = post_json(
            h.router,
            "/api/execute",
            json!({"language": "python", "code": "print(1)"}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing_field");
        assert_eq!(body["details"], "Missing required field: sessionId");
        assert!(h.sink.delivered().is_empty());
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_blank_language_is_bad_request() {
        let h = harness(FakeRuntime::printing(""));
        let (status, body) = post_json(
            h.router,
            "/api/execute",
            json!({"language": "  ", "code": "", "sessionId": "s-3"}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"], "Missing required field: language");
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let h = harness(FakeRuntime::printing(""));
        let response = h
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/execute")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sync_execute_returns_flattened_result() {
        let h = harness(FakeRuntime::new(
            FakeBuild::Succeed { log: vec![] },
            FakeRun::EchoInput,
        ));
        let (status, body) = post_json(
            h.router,
            "/api/execute/sync",
            json!({"language": "javascript", "code": "x", "sessionId": "s-4", "stdin": "abc"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"], "abc");
        assert_eq!(body["error"], "");
        assert_eq!(body["outcome"], "success");
        assert_eq!(h.sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_build_failure_reaches_sink_as_error_text() {
        let h = harness(FakeRuntime::new(
            FakeBuild::Fail {
                log: vec!["Main.java:3: error: ';' expected\n".to_string()],
                error: "returned a non-zero code: 1".to_string(),
            },
            FakeRun::exit(0, "", ""),
        ));
        let (status, body) = post_json(
            h.router,
            "/api/execute/sync",
            json!({"language": "java", "code": "class Main {", "sessionId": "s-5"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "build_failure");
        assert_eq!(body["output"], "");
        assert!(body["error"].as_str().unwrap().contains("';' expected"));
        assert_eq!(
            h.runtime.count(|c| matches!(c, RuntimeCall::CreateContainer { .. })),
            0
        );
    }

    #[tokio::test]
    async fn test_languages_endpoint() {
        let h = harness(FakeRuntime::printing(""));
        let response = h
            .router
            .oneshot(Request::builder().uri("/api/languages").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["languages"], json!(["java", "javascript", "python"]));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let h = harness(FakeRuntime::printing(""));
        let response = h
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_disconnect_still_cleans_up_and_delivers() {
        let h = harness(FakeRuntime::new(
            FakeBuild::Succeed { log: vec![] },
            FakeRun::hang("tick\n", ""),
        ));
        let request = Request::builder()
            .method("POST")
            .uri("/api/execute")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"language": "python", "code": "while True: pass", "sessionId": "s-6"})
                    .to_string(),
            ))
            .unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_secs(2), h.router.oneshot(request)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(
            h.runtime.count(|c| matches!(c, RuntimeCall::RemoveContainer { .. })),
            1
        );
        assert_eq!(
            h.runtime.count(|c| matches!(c, RuntimeCall::RemoveImage { .. })),
            1
        );
        let delivered = h.sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "s-6");
        assert_eq!(delivered[0].1.stdout, "tick\n");
        assert_eq!(delivered[0].1.stderr, "Execution timed out after 10s");
    }

    #[tokio::test]
    async fn test_invalid_bind_address() {
        let engine = ExecutionEngine::new(
            Arc::new(FakeRuntime::printing("")),
            Arc::new(TemplateRegistry::builtin()),
            EngineConfig::default(),
        );
        let settings = ServerSettings {
            bind_addr: "not-an-address".to_string(),
            ..ServerSettings::default()
        };
        let server = RunboxServer::new(engine, Arc::new(MemorySink::default()), settings);
        let err = server.serve_with_shutdown(async {}).await.unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }
}
