//! HTTP tool server.
//!
//! Exposes the tool surface as a JSON HTTP API suitable for agent
//! integration. All tools are registered in a [`ToolRegistry`] and
//! dispatched through the same `POST /tools/{name}` handler.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/initialize` | Begin a session; required before tool calls |
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call any registered tool by name |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Session lifecycle
//!
//! The server starts uninitialized. Discovery (`/tools/list`,
//! `/health`) works immediately; tool calls before `POST /initialize`
//! are rejected with a `not_initialized` error so a client that skips
//! the handshake gets a clear signal instead of undefined behavior.
//!
//! # Tool results and timeouts
//!
//! A dispatched tool always answers `200` with a structured
//! `{ "success": ... }` body, including when its wall-clock budget
//! (`[server].tool_timeout_secs`) expires. Transport-level errors
//! (unknown tool, missing handshake) use the error schema:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "..." } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support
//! browser-based clients and cross-origin tool calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::tools::{failure, ToolContext, ToolRegistry};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    tools: Arc<ToolRegistry>,
    /// Built once at startup so HTTP connection pools are reused
    /// across tool calls.
    context: Arc<ToolContext>,
    /// Flips to true on `POST /initialize` and stays true for the
    /// lifetime of the process.
    ready: Arc<AtomicBool>,
}

/// Starts the tool server and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let registry = Arc::new(ToolRegistry::with_builtins());
    let context = Arc::new(ToolContext::new(Arc::clone(&config))?);

    info!(tools = registry.len(), "registered tool routes");
    for tool in registry.tools() {
        info!("  POST /tools/{} — {}", tool.name(), tool.description());
    }
    if context.embeddings.is_none() {
        warn!("embedding service not configured; ingestion and query tools will fail");
    }

    let state = AppState {
        config,
        tools: registry,
        context,
        ready: Arc::new(AtomicBool::new(false)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/initialize", post(handle_initialize))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!("tool server listening on http://{bind_addr}");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Transport-level error that converts into an HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn not_initialized() -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "not_initialized".to_string(),
        message: "session not initialized; POST /initialize first".to_string(),
    }
}

// ============ POST /initialize ============

/// Handler for `POST /initialize`.
///
/// Marks the session ready and describes the server. Idempotent:
/// repeated calls succeed and leave the session ready.
async fn handle_initialize(State(state): State<AppState>) -> Json<Value> {
    let first = !state.ready.swap(true, Ordering::SeqCst);
    if first {
        info!("session initialized");
    }
    Json(json!({
        "status": "ready",
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "tool_count": state.tools.len(),
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

/// Handler for `GET /tools/list`. Available before initialization so
/// clients can discover the surface during their handshake.
async fn handle_list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(state.tools.describe())
}

// ============ POST /tools/{name} ============

/// Handler for `POST /tools/{name}`.
///
/// Looks up the tool by name and executes it under the configured
/// wall-clock budget. The tool's own result contract means the body is
/// always `{ "success": ... }`; only an unknown name or a missing
/// handshake produce an error status.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    if !state.ready.load(Ordering::SeqCst) {
        return Err(not_initialized());
    }

    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {name}")))?;

    let budget = Duration::from_secs(state.config.server.tool_timeout_secs);
    match tokio::time::timeout(budget, tool.execute(params, &state.context)).await {
        Ok(result) => Ok(Json(result)),
        Err(_) => {
            warn!(tool = name, timeout_secs = budget.as_secs(), "tool call timed out");
            Ok(Json(failure(&format!(
                "{name} timed out after {} seconds",
                budget.as_secs()
            ))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        let config = Arc::new(Config::default());
        AppState {
            config: Arc::clone(&config),
            tools: Arc::new(ToolRegistry::with_builtins()),
            context: Arc::new(ToolContext::new(config).unwrap()),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = handle_health().await;
        assert_eq!(body.status, "ok");
        assert!(!body.version.is_empty());
    }

    #[tokio::test]
    async fn list_is_available_before_initialization() {
        let Json(body) = handle_list_tools(State(state())).await;
        assert_eq!(body["tools"].as_array().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn tool_calls_require_initialization() {
        let err = handle_tool_call(
            State(state()),
            Path("get_available_sources".to_string()),
            Json(json!({})),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "not_initialized");
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_unlocks_dispatch() {
        let state = state();
        let Json(first) = handle_initialize(State(state.clone())).await;
        let Json(second) = handle_initialize(State(state.clone())).await;
        assert_eq!(first["status"], "ready");
        assert_eq!(second["status"], "ready");

        // Unknown tool after init is a 404, not a handshake error.
        let err = handle_tool_call(
            State(state),
            Path("no_such_tool".to_string()),
            Json(json!({})),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dispatched_tool_failures_are_structured_not_http_errors() {
        let state = state();
        handle_initialize(State(state.clone())).await;

        // Missing required parameter: transported as success=false.
        let Json(body) = handle_tool_call(
            State(state),
            Path("crawl_single_page".to_string()),
            Json(json!({})),
        )
        .await
        .unwrap();
        assert_eq!(body["success"], false);
    }
}
