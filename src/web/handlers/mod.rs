use axum::{
    body::Body,
    extract::{Multipart, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::audio::UploadResponse;
use crate::dispatch::{Ack, CommandRequest};
use crate::error::{AppError, Result};
use crate::robot::{Heartbeat, SessionState};
use crate::state::AppState;

/// `{result, data}` envelope used by the robot endpoints
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub result: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { result: true, data })
    }
}

// ============================================================================
// Page & video
// ============================================================================

pub async fn index() -> Html<&'static str> {
    Html(super::page::INDEX_HTML)
}

/// MJPEG multipart stream
///
/// The first client opens the camera; later clients share its frames.
pub async fn video(State(state): State<Arc<AppState>>) -> Result<Response> {
    let guard = state.streamer.attach().await?;
    info!(client_id = %guard.id(), "MJPEG client attached");

    let body = state.streamer.handler().client_stream(guard);

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .body(Body::from_stream(body))
        .map_err(|e| AppError::Internal(e.to_string()))
}

// ============================================================================
// Session
// ============================================================================

/// `data` is `true` for a new session, `false` when the existing one was kept
pub async fn connect(State(state): State<Arc<AppState>>) -> Result<Json<ApiResponse<bool>>> {
    let created = state.session.connect().await?;
    Ok(ApiResponse::ok(created))
}

pub async fn disconnect(State(state): State<Arc<AppState>>) -> Json<ApiResponse<bool>> {
    ApiResponse::ok(state.session.disconnect().await)
}

pub async fn heartbeat(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Heartbeat>> {
    ApiResponse::ok(state.session.heartbeat())
}

// ============================================================================
// Locomotion
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct WalkQuery {
    pub lx: Option<String>,
    pub ly: Option<String>,
    pub rx: Option<String>,
    pub ry: Option<String>,
}

/// Missing axes are treated as centered
fn parse_axis(name: &str, value: Option<&str>) -> Result<f32> {
    match value.map(str::trim) {
        None | Some("") => Ok(0.0),
        Some(raw) => raw.parse::<f32>().map_err(|_| {
            AppError::Validation(format!("axis {} must be a number, got {:?}", name, raw))
        }),
    }
}

pub async fn walk(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WalkQuery>,
) -> Result<Json<ApiResponse<String>>> {
    let request = CommandRequest::Walk {
        lx: parse_axis("lx", query.lx.as_deref())?,
        ly: parse_axis("ly", query.ly.as_deref())?,
        rx: parse_axis("rx", query.rx.as_deref())?,
        ry: parse_axis("ry", query.ry.as_deref())?,
    };
    let ack = state.dispatcher.dispatch(request).await?;
    Ok(ApiResponse::ok(ack.message))
}

#[derive(Debug, Deserialize)]
pub struct CmdQuery {
    pub cmd: Option<String>,
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Validation(format!("missing parameter `{}`", name)))
}

pub async fn state_g1(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CmdQuery>,
) -> Result<Json<ApiResponse<String>>> {
    let cmd = required(query.cmd, "cmd")?;
    let ack = state
        .dispatcher
        .dispatch(CommandRequest::Posture { cmd })
        .await?;
    Ok(ApiResponse::ok(ack.message))
}

pub async fn balance_g1(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CmdQuery>,
) -> Result<Json<ApiResponse<String>>> {
    let cmd = required(query.cmd, "cmd")?;
    let ack = state
        .dispatcher
        .dispatch(CommandRequest::Balance { cmd })
        .await?;
    Ok(ApiResponse::ok(ack.message))
}

// ============================================================================
// Executables
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LedQuery {
    #[serde(default = "full_channel")]
    pub r: String,
    #[serde(default = "full_channel")]
    pub g: String,
    #[serde(default = "full_channel")]
    pub b: String,
}

fn full_channel() -> String {
    "255".to_string()
}

pub async fn led(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LedQuery>,
) -> Result<Json<Ack>> {
    let ack = state
        .dispatcher
        .dispatch(CommandRequest::Led {
            r: query.r,
            g: query.g,
            b: query.b,
        })
        .await?;
    Ok(Json(ack))
}

#[derive(Debug, Deserialize)]
pub struct ArmQuery {
    pub id: Option<String>,
}

pub async fn arm(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ArmQuery>,
) -> Result<Json<Ack>> {
    let id = required(query.id, "id")?;
    let ack = state.dispatcher.dispatch(CommandRequest::Arm { id }).await?;
    Ok(Json(ack))
}

// ============================================================================
// Audio
// ============================================================================

/// Multipart upload; the first field carrying a file name is used
pub async fn upload_audio(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {}", e)))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let outcome = state.audio.receive(&filename, Box::pin(field)).await?;
        return Ok(Json(outcome.response));
    }

    Err(AppError::Validation("no audio file in upload".into()))
}

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
pub struct HealthInfo {
    pub version: &'static str,
    pub build_date: &'static str,
    pub session: SessionState,
    pub stream_clients: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ApiResponse::ok(HealthInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("BUILD_DATE"),
        session: state.session.state(),
        stream_clients: state.streamer.client_count(),
    })
}
