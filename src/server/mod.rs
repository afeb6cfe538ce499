//! HTTP surface.
//!
//! Routes:
//! - `POST /upload/{submission_id}`: raw audio body (or JSON envelope) → 202 ack
//! - `POST /upload`: same, with a generated id
//! - `GET /status/{submission_id}`: processing / completed / failed
//! - `GET /health`

pub mod error;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{JobStatus, StatusReader};
use crate::domain::SubmissionId;
use crate::ingest::{Ack, SubmissionIngress};

pub use error::ApiError;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub ingress: SubmissionIngress,
    pub status: StatusReader,
}

/// Build the router with an upload size limit
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/upload/{submission_id}", post(upload_with_id))
        .route("/status/{submission_id}", get(status))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Serve on an already bound listener until Ctrl-C
pub async fn serve(listener: TcpListener, app: Router) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")
}

/// Bind `addr` and serve
pub async fn bind_and_serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    serve(listener, app).await
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<Ack>), ApiError> {
    let body = body?;
    let ack = state
        .ingress
        .accept(None, content_type(&headers), body.to_vec())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn upload_with_id(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<Ack>), ApiError> {
    let body = body?;
    let ack = state
        .ingress
        .accept(Some(&submission_id), content_type(&headers), body.to_vec())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn status(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    let id = SubmissionId::parse(&submission_id)?;
    Ok(Json(state.status.status(&id).await?))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
