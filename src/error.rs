use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Unknown symbolic command or malformed parameter
    #[error("{0}")]
    Validation(String),

    /// Command issued before a robot session was established
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// External resampler failed or produced unusable output
    #[error("Transcode failed: {0}")]
    Transcode(String),

    /// Native executable failed to launch or exited non-zero
    #[error("Process `{program}` failed: {reason}")]
    Process { program: String, reason: String },

    /// Control channel publish/request/connect failure
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// Capture device or client slots unavailable
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Video error: {0}")]
    VideoError(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub result: bool,
    pub error: String,
    pub kind: &'static str,
}

impl AppError {
    pub fn process(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Process {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Stable error kind reported to clients
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::NotConnected(_) => "NotConnectedError",
            AppError::Transcode(_) => "TranscodeError",
            AppError::Process { .. } => "ProcessError",
            AppError::Transport(_) => "TransportError",
            AppError::Timeout(_) => "TimeoutError",
            AppError::ResourceBusy(_) => "ResourceBusyError",
            AppError::VideoError(_) => "VideoError",
            AppError::Database(_) | AppError::Config(_) => "ConfigError",
            AppError::Internal(_) | AppError::Io(_) | AppError::Serialization(_) => {
                "InternalError"
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotConnected(_) => StatusCode::CONFLICT,
            AppError::Transcode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Process { .. } | AppError::Transport(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::ResourceBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            result: false,
            error: self.to_string(),
            kind: self.kind(),
        };

        if status.is_server_error() {
            tracing::error!(kind = body.kind, error_message = %body.error, "Request failed");
        } else {
            tracing::warn!(kind = body.kind, error_message = %body.error, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
