//! HTTP and WebSocket surface.
//!
//! - GET    /health                              liveness
//! - POST   /api/embeddings?mode=&partition=     enroll or recognize
//! - GET    /api/embeddings/{partition}          full name → embedding dump
//! - GET    /api/identities/{partition}          enrolled names
//! - DELETE /api/identities/{partition}          clear partition
//! - DELETE /api/identities/{partition}/{name}   delete one identity
//! - GET    /api/enrollments                     enrollments in progress
//! - GET/POST/DELETE /api/results                audit log
//! - DELETE /api/results/{id}                    remove one audit record
//! - GET/POST /api/commands                      device command log / send
//! - GET    /ws/stream                           frame relay between peers

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::audit::{NewResult, RecognitionResult, ResultStatus};
use crate::device::CommandRecord;
use crate::enroll::PendingEnrollment;
use crate::error::FacegateError;
use crate::identity::Partition;
use crate::relay::Frame;
use crate::service::{AccessService, Mode, Submission, SubmissionOutcome};

type AppState = Arc<AccessService>;

/// Error returned from handlers.
#[derive(Debug)]
pub enum ApiError {
    Service(FacegateError),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
}

impl From<FacegateError> for ApiError {
    fn from(e: FacegateError) -> Self {
        ApiError::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Service(e) => (status_for(e), e.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        if status.is_server_error() {
            error!("request failed: {}", message);
        }
        let body = ErrorBody {
            error: message,
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

fn status_for(e: &FacegateError) -> StatusCode {
    match e {
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        FacegateError::NotFound { .. } | FacegateError::ResultNotFound(_) => StatusCode::NOT_FOUND,
        FacegateError::Device(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Run a store-touching call off the async workers; snapshot writes fsync.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&AccessService) -> crate::error::Result<T> + Send + 'static,
{
    let svc = state.clone();
    tokio::task::spawn_blocking(move || f(&svc))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/embeddings", post(submit))
        .route("/api/embeddings/{partition}", get(export_identities))
        .route(
            "/api/identities/{partition}",
            get(list_identities).delete(clear_identities),
        )
        .route("/api/identities/{partition}/{name}", delete(delete_identity))
        .route("/api/enrollments", get(pending_enrollments))
        .route(
            "/api/results",
            get(list_results).post(report_result).delete(clear_results),
        )
        .route("/api/results/{id}", delete(delete_result))
        .route("/api/commands", get(command_log).post(send_command))
        .route("/ws/stream", get(ws_stream))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until Ctrl-C, sweeping stale enrollments in the background.
pub async fn serve(state: AppState, listen: &str, prune_every: Duration) -> anyhow::Result<()> {
    let sweeper = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(prune_every);
            loop {
                tick.tick().await;
                let dropped = state.enrollment().prune_expired();
                if dropped > 0 {
                    info!("pruned {} stale enrollment(s)", dropped);
                }
            }
        })
    };

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}

async fn shutdown_signal() {
    wait_for_shutdown(tokio::signal::ctrl_c()).await
}

/// Resolves when `signal` fires. If the handler cannot be installed the
/// server keeps running until killed.
async fn wait_for_shutdown<F>(signal: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("shutting down"),
        Err(e) => {
            error!("cannot listen for Ctrl-C, graceful shutdown disabled: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
}

async fn health() -> Json<StatusBody> {
    Json(StatusBody { status: "ok" })
}

#[derive(Deserialize)]
struct SubmitParams {
    mode: Mode,
    #[serde(default = "default_partition")]
    partition: Partition,
}

fn default_partition() -> Partition {
    Partition::Server
}

async fn submit(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
    Json(submission): Json<Submission>,
) -> Result<Json<SubmissionOutcome>, ApiError> {
    let outcome = blocking(&state, move |svc| {
        svc.submit(params.mode, params.partition, submission)
    })
    .await?;
    Ok(Json(outcome))
}

async fn list_identities(
    State(state): State<AppState>,
    Path(partition): Path<Partition>,
) -> Json<Vec<String>> {
    Json(state.list(partition))
}

async fn export_identities(
    State(state): State<AppState>,
    Path(partition): Path<Partition>,
) -> Json<BTreeMap<String, Vec<f32>>> {
    Json(state.export(partition))
}

#[derive(Serialize)]
struct Deleted {
    status: &'static str,
    name: String,
}

async fn delete_identity(
    State(state): State<AppState>,
    Path((partition, name)): Path<(Partition, String)>,
) -> Result<Json<Deleted>, ApiError> {
    let deleted = name.clone();
    blocking(&state, move |svc| svc.delete(partition, &name)).await?;
    Ok(Json(Deleted {
        status: "deleted",
        name: deleted,
    }))
}

async fn clear_identities(
    State(state): State<AppState>,
    Path(partition): Path<Partition>,
) -> Result<Json<StatusBody>, ApiError> {
    blocking(&state, move |svc| svc.clear(partition)).await?;
    Ok(Json(StatusBody { status: "cleared" }))
}

async fn pending_enrollments(State(state): State<AppState>) -> Json<Vec<PendingEnrollment>> {
    Json(state.pending_enrollments())
}

async fn list_results(State(state): State<AppState>) -> Json<Vec<RecognitionResult>> {
    Json(state.audit().list())
}

/// Recognition result reported by the capture device itself.
#[derive(Deserialize)]
struct ReportedResult {
    status: ResultStatus,
    label: String,
    #[serde(default)]
    score: Option<f32>,
}

async fn report_result(
    State(state): State<AppState>,
    Json(report): Json<ReportedResult>,
) -> Result<(StatusCode, Json<RecognitionResult>), ApiError> {
    let record = blocking(&state, move |svc| {
        svc.audit().append(NewResult {
            status: report.status,
            label: report.label,
            score: report.score,
            origin: Partition::Device,
        })
    })
    .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn clear_results(State(state): State<AppState>) -> Result<Json<StatusBody>, ApiError> {
    blocking(&state, |svc| svc.audit().clear()).await?;
    Ok(Json(StatusBody { status: "cleared" }))
}

async fn delete_result(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<StatusBody>, ApiError> {
    blocking(&state, move |svc| svc.audit().remove(id)).await?;
    Ok(Json(StatusBody { status: "deleted" }))
}

async fn command_log(State(state): State<AppState>) -> Json<Vec<CommandRecord>> {
    Json(state.device().command_log())
}

#[derive(Deserialize)]
struct CommandForm {
    cmd: String,
}

async fn send_command(
    State(state): State<AppState>,
    Form(form): Form<CommandForm>,
) -> Result<Json<CommandRecord>, ApiError> {
    let record = state.device().send_command(&form.cmd).await?;
    Ok(Json(record))
}

async fn ws_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_socket(socket, state))
}

async fn relay_socket(socket: WebSocket, state: AppState) {
    let session = state.relay().register();
    let id = session.id;
    let mut outbound = session.outbound;
    let (mut sink, mut stream) = socket.split();

    // Ends when the hub drops this session or the peer stops accepting writes.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let msg = match frame {
                Frame::Binary(data) => Message::Binary(data),
                Frame::Text(text) => Message::Text(text.into()),
            };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    state.relay().broadcast(id, Frame::Binary(data)).await;
                }
                Some(Ok(Message::Text(text))) => {
                    debug!("text frame from {}: {}", id, text.as_str());
                    state
                        .relay()
                        .broadcast(id, Frame::Text(text.as_str().to_owned()))
                        .await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("relay session {} read error: {}", id, e);
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    state.relay().unregister(id);
    if !writer.is_finished() {
        let abort = writer.abort_handle();
        if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
            abort.abort();
        }
    }
}
