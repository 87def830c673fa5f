//! The worker's HTTP surface.
//!
//! - `POST /start/:batch_id` with a take-exam command body starts a session:
//!   `{"status": "started"}`, `{"status": "already_started"}` if this batch
//!   was started before, or `{"status": "running"}` if another batch's
//!   session is active.
//! - `GET /monitor/:batch_id/:index` returns the session's records from
//!   `index` on, as a JSON array of `[tag, payload]` pairs.
//! - `GET /screenshot/:batch_id` returns `{"screenshot": <base64 or null>}`.
//! - `GET /health` for liveness probes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use examcheck_core::command::TakeExamCommand;

use crate::worker::WorkerMachine;

#[derive(Clone)]
pub struct WorkerServer {
    worker: Arc<WorkerMachine>,
}

impl WorkerServer {
    pub fn new(worker: Arc<WorkerMachine>) -> Self {
        Self { worker }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/start/:batch_id", post(start_handler))
            .route("/monitor/:batch_id/:index", get(monitor_handler))
            .route("/screenshot/:batch_id", get(screenshot_handler))
            .route("/health", get(health_handler))
            .with_state(Arc::clone(&self.worker))
    }

    pub async fn serve(self, addr: SocketAddr, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve until `shutdown` fires, then tear down the active session.
    pub async fn serve_listener(self, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!("worker listening on http://{}", listener.local_addr()?);
        let token = shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;
        self.worker.shutdown();
        tracing::info!("worker stopped");
        Ok(())
    }
}

async fn start_handler(
    State(worker): State<Arc<WorkerMachine>>,
    Path(batch_id): Path<String>,
    body: String,
) -> Response {
    let command = match TakeExamCommand::from_json(&body) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!("rejected start request for {batch_id}: {e:#}");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("{e:#}") })),
            )
                .into_response();
        }
    };
    let status = worker.start(&batch_id, command);
    Json(serde_json::json!({ "status": status })).into_response()
}

async fn monitor_handler(
    State(worker): State<Arc<WorkerMachine>>,
    Path((batch_id, index)): Path<(String, usize)>,
) -> Response {
    Json(worker.monitor(&batch_id, index)).into_response()
}

async fn screenshot_handler(
    State(worker): State<Arc<WorkerMachine>>,
    Path(batch_id): Path<String>,
) -> Response {
    Json(serde_json::json!({ "screenshot": worker.screenshot(&batch_id) })).into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "examcheck-machine"
    }))
}
