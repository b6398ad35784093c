//! Error types for the gateway.
//!
//! Each concern has its own `thiserror` enum; handlers funnel everything
//! into [`ApiError`], which decides the HTTP status and renders the
//! `{"detail": ...}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failure of an outbound call to an inference endpoint.
///
/// Always the last failure observed by the retry loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream request timed out")]
    Timeout,

    #[error("Upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid API response format: {0}")]
    MalformedBody(String),

    #[error("Upstream reported an error: {0}")]
    Reported(String),

    #[error("Failed to call external API: {0}")]
    Transport(String),
}

/// The upstream body contained nothing that looks like a caption.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("No caption generated from API")]
    EmptyCaption,
}

/// Translation failures. Never surfaced to clients.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("translation endpoint returned status {0}")]
    Status(u16),

    #[error("translation response had no translation_text")]
    MissingText,
}

/// Image proxy failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid URL scheme")]
    InvalidScheme,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Image size exceeds {} limit", format_limit(.limit_bytes))]
    TooLarge { limit_bytes: u64 },

    #[error("URL does not point to a valid image")]
    NotAnImage,

    #[error("Image fetch timeout")]
    Timeout,

    #[error("Failed to fetch image: upstream returned status {0}")]
    UpstreamStatus(u16),

    #[error("Failed to fetch image: {0}")]
    Fetch(String),
}

/// `10MB`, `512KB`, or plain bytes when neither divides evenly.
fn format_limit(bytes: &u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    match *bytes {
        b if b >= MIB && b % MIB == 0 => format!("{}MB", b / MIB),
        b if b >= KIB && b % KIB == 0 => format!("{}KB", b / KIB),
        b => format!("{b} bytes"),
    }
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidScheme | Self::InvalidUrl(_) | Self::TooLarge { .. } | Self::NotAnImage => {
                StatusCode::BAD_REQUEST
            }
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamStatus(status) => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::Fetch(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Error returned by every HTTP handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Caption(#[from] NormalizeError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(UpstreamError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(UpstreamError::Status { status: 504, .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) | Self::Caption(_) => StatusCode::BAD_GATEWAY,
            Self::Proxy(err) => err.status_code(),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, Json(ErrorBody { detail: self.to_string() })).into_response()
    }
}
