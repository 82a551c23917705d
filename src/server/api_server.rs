//! HTTP surface for sandbox commands

use anyhow::Result;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::parse_command_id;
use crate::lifecycle::{CommandController, RunUserCodeTask, RUN_USER_CODE_TASK};
use crate::sandbox::{LocalSandboxProvider, SandboxProvider};
use crate::task::{InProcessTaskQueue, TaskQueue};
use crate::stream::WireRecord;
use crate::tool::{RunCommandEvent, RunCommandInput, RunCommandTool};

const NDJSON: &str = "application/x-ndjson";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    provider: Arc<dyn SandboxProvider>,
    tool: Arc<RunCommandTool>,
}

impl AppState {
    pub fn new(provider: Arc<dyn SandboxProvider>, tool: Arc<RunCommandTool>) -> Self {
        Self { provider, tool }
    }

    /// Local sandboxes plus an in-process queue running `run-user-code`
    pub fn from_config(config: &Config) -> Self {
        let provider: Arc<dyn SandboxProvider> =
            Arc::new(LocalSandboxProvider::from_config(&config.sandbox));
        let task = RunUserCodeTask::new(Arc::clone(&provider))
            .with_default_timeout(config.sandbox.default_timeout);
        let queue: Arc<dyn TaskQueue> =
            Arc::new(InProcessTaskQueue::new().with_task(RUN_USER_CODE_TASK, Arc::new(task)));
        let tool = RunCommandTool::new(queue).with_probe_policy(config.probe);
        Self::new(provider, Arc::new(tool))
    }

    pub fn provider(&self) -> &Arc<dyn SandboxProvider> {
        &self.provider
    }

    pub fn tool(&self) -> &Arc<RunCommandTool> {
        &self.tool
    }
}

/// API server for sandbox command endpoints
pub struct ApiServer {
    state: AppState,
    addr: String,
}

impl ApiServer {
    pub fn new(state: AppState, addr: impl Into<String>) -> Self {
        Self {
            state,
            addr: addr.into(),
        }
    }

    /// Start the API server
    pub async fn start(self) -> Result<()> {
        let app = build_router(self.state);

        info!("Starting sandbox API server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Build API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sandboxes/{sandbox_id}", get(sandbox_status))
        .route("/api/sandboxes/{sandbox_id}/files", get(read_file))
        .route("/api/sandboxes/{sandbox_id}/cmds/{cmd_id}", get(command_status))
        .route(
            "/api/sandboxes/{sandbox_id}/cmds/{cmd_id}/logs",
            get(command_logs),
        )
        .route("/api/commands", post(run_command))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandStatus {
    sandbox_id: String,
    cmd_id: String,
    started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunCommandBody {
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(flatten)]
    input: RunCommandInput,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn status_code(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

// API Handlers

async fn sandbox_status(
    State(state): State<AppState>,
    Path(sandbox_id): Path<String>,
) -> Json<serde_json::Value> {
    let running = match state.provider.connect(&sandbox_id).await {
        Ok(sandbox) => sandbox.is_running().await,
        Err(e) => {
            debug!(sandbox_id = %sandbox_id, "Status check could not connect: {}", e);
            false
        }
    };
    let status = if running { "running" } else { "stopped" };
    Json(json!({ "status": status }))
}

async fn read_file(
    State(state): State<AppState>,
    Path(sandbox_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Response {
    let Some(path) = query.path else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid parameters. You must pass a `path` as query",
        );
    };

    let contents = match state.provider.connect(&sandbox_id).await {
        Ok(sandbox) => sandbox.read_file(&path).await,
        Err(e) => Err(e),
    };
    match contents {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response()
        }
        Err(e) => {
            warn!(sandbox_id = %sandbox_id, "Failed to read '{}': {}", path, e);
            error_response(StatusCode::NOT_FOUND, "File not found in the Sandbox")
        }
    }
}

async fn command_status(
    State(state): State<AppState>,
    Path((sandbox_id, cmd_id)): Path<(String, String)>,
) -> Response {
    let pid = match parse_command_id(&cmd_id) {
        Ok(pid) => pid,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid command ID"),
    };

    let sandbox = match state.provider.connect(&sandbox_id).await {
        Ok(sandbox) => sandbox,
        Err(e) => {
            warn!(sandbox_id = %sandbox_id, "Command status: {}", e);
            return error_response(status_code(e.http_status()), e.message());
        }
    };

    let (started_at, exit_code) = match sandbox.connect_command(pid, None).await {
        Ok(command) => (command.started_at(), command.exit_code()),
        Err(e) => {
            debug!(sandbox_id = %sandbox_id, pid, "Command status unavailable: {}", e);
            (None, None)
        }
    };

    Json(CommandStatus {
        sandbox_id: sandbox.sandbox_id().to_string(),
        cmd_id,
        started_at: started_at.unwrap_or_else(Utc::now).timestamp_millis(),
        exit_code,
    })
    .into_response()
}

async fn command_logs(
    State(state): State<AppState>,
    Path((sandbox_id, cmd_id)): Path<(String, String)>,
) -> Response {
    let pid = match parse_command_id(&cmd_id) {
        Ok(pid) => pid,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid command ID"),
    };

    let followed = match state.provider.connect(&sandbox_id).await {
        Ok(sandbox) => CommandController::new(sandbox).follow(pid).await,
        Err(e) => Err(e),
    };
    let mux = match followed {
        Ok(mux) => mux,
        Err(e) => {
            warn!(sandbox_id = %sandbox_id, pid, "Cannot stream logs: {}", e);
            return error_response(StatusCode::NOT_FOUND, "Command not found");
        }
    };

    let lines = mux
        .into_stream()
        .map(|record| WireRecord::from(&record).to_ndjson_line());
    ([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response()
}

async fn run_command(
    State(state): State<AppState>,
    body: Result<Json<RunCommandBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            debug!("Rejected run command body: {}", rejection.body_text());
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid parameters. {}", rejection.body_text()),
            );
        }
    };
    if let Err(e) = body.input.validate() {
        return error_response(status_code(e.http_status()), e.message());
    }

    let tool_call_id = body
        .tool_call_id
        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
    let (tx, mut rx) = mpsc::unbounded_channel::<RunCommandEvent>();

    let report = state.tool.execute(&tool_call_id, &body.input, Some(&tx)).await;
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    Json(json!({
        "message": report.message,
        "report": report.result,
        "events": events,
    }))
    .into_response()
}
