//! Application error types and HTTP response mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, AppError>;

/// Top-level application error
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration problem (missing credentials, bad settings, empty prompt).
    /// Never retried.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Engine not found: {0}")]
    EngineNotFound(String),

    /// No registered engine matched the candidate filter. Never retried.
    #[error("No engine available: {0}")]
    NoEngineAvailable(String),

    /// Network-level failure talking to a backend. Retryable.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Backend answered but the answer is unusable (5xx, malformed body).
    /// Retryable.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Backend rejected the request outright (auth failure, 4xx).
    #[error("Backend rejected request: {0}")]
    BackendRejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Coarse category surfaced to callers alongside the message.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::InvalidRequest(_) => "configuration",
            AppError::EngineNotFound(_) => "not_found",
            AppError::NoEngineAvailable(_) => "no_engine",
            AppError::HttpClient(_) | AppError::Backend(_) => "transient_backend",
            AppError::BackendRejected(_) => "permanent_backend",
            AppError::Io(_) => "io",
            AppError::Internal(_) => "internal",
        }
    }

    /// Whether the retry policy should attempt this failure again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::HttpClient(_) | AppError::Backend(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Config(_) | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::EngineNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoEngineAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::HttpClient(_) | AppError::Backend(_) => StatusCode::BAD_GATEWAY,
            AppError::BackendRejected(_) => StatusCode::BAD_GATEWAY,
            AppError::Io(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "category": self.category(),
            }
        }));

        (status, body).into_response()
    }
}
