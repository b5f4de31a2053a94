//! HTTP surface: synchronous aggregation, task submission and result polling.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::queue::TaskQueue;
use crate::resilience::CircuitHealth;
use crate::store::ResultStore;
use crate::types::Prompt;
use crate::worker;

const MISSING_PROMPT: &str = "Missing 'prompt' query parameter";
const NOT_READY: &str = "Result not found or still processing";

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub queue: Arc<dyn TaskQueue>,
    pub store: Arc<dyn ResultStore>,
    pub result_ttl: Duration,
    /// Any provider failure turns a sync request into a 500.
    pub strict_status: bool,
}

#[derive(Debug, Deserialize)]
pub struct PromptQuery {
    prompt: Option<String>,
}

#[derive(Serialize)]
struct CircuitView {
    source: String,
    health: CircuitHealth,
    consecutive_failures: u32,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/merged", get(merged))
        .route("/tasks", get(enqueue).post(enqueue))
        .route("/tasks/{task_id}/status", get(task_status))
        .route("/results/{task_id}", get(result))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then finish in-flight requests.
pub async fn serve<S>(addr: SocketAddr, state: AppState, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "http server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")?;
    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn require_prompt(query: PromptQuery) -> Result<Prompt, Response> {
    query
        .prompt
        .and_then(|text| Prompt::new(text).ok())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, MISSING_PROMPT))
}

async fn merged(State(state): State<AppState>, Query(query): Query<PromptQuery>) -> Response {
    let prompt = match require_prompt(query) {
        Ok(prompt) => prompt,
        Err(response) => return response,
    };

    let result = state.aggregator.merged_results(&prompt).await;
    if state.strict_status
        && let Some(failed) = result.failures().next()
    {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, failed.to_string());
    }
    Json(result).into_response()
}

async fn enqueue(State(state): State<AppState>, Query(query): Query<PromptQuery>) -> Response {
    let prompt = match require_prompt(query) {
        Ok(prompt) => prompt,
        Err(response) => return response,
    };

    match worker::submit(
        state.queue.as_ref(),
        state.store.as_ref(),
        &prompt,
        state.result_ttl,
    )
    .await
    {
        Ok(task) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "Request queued successfully",
                "task_id": task.task_id,
            })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to enqueue task");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to enqueue request: {err}"),
            )
        }
    }
}

async fn result(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    match state.store.get(&task_id).await {
        Ok(Some(result)) => Json(result).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, NOT_READY),
        Err(err) => {
            error!(task_id = %task_id, error = %err, "failed to fetch result");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to fetch result: {err}"),
            )
        }
    }
}

async fn task_status(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    match state.store.state(&task_id).await {
        Ok(Some(task_state)) => {
            Json(json!({ "task_id": task_id, "state": task_state })).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Task not found"),
        Err(err) => {
            error!(task_id = %task_id, error = %err, "failed to fetch task state");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to fetch task state: {err}"),
            )
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers: Vec<CircuitView> = state
        .aggregator
        .circuits()
        .into_iter()
        .map(|(source, snapshot)| CircuitView {
            source,
            health: snapshot.health,
            consecutive_failures: snapshot.consecutive_failures,
        })
        .collect();
    let healthy = providers.iter().any(|p| p.health != CircuitHealth::Open);
    Json(json!({
        "status": if healthy { "ok" } else { "degraded" },
        "providers": providers,
    }))
}
