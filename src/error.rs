use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Catalogue is still loading, try again shortly")]
    NotReady,

    #[error("Not enough movies left to build a pair")]
    PoolExhausted,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid choice: {0}")]
    InvalidChoice(String),

    #[error("Session is already complete")]
    SessionComplete,

    #[error("Session is not complete yet")]
    SessionIncomplete,

    #[error("No more candidates available for replacement")]
    NoMoreCandidates,

    #[error("Upstream resolution failed: {0}")]
    UpstreamResolution(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotReady => "not_ready",
            AppError::PoolExhausted => "pool_exhausted",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::InvalidChoice(_) => "invalid_choice",
            AppError::SessionComplete => "session_complete",
            AppError::SessionIncomplete => "session_incomplete",
            AppError::NoMoreCandidates => "no_more_candidates",
            AppError::UpstreamResolution(_) => "upstream_failure",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Cache(_) | AppError::Internal(_) => "internal",
            AppError::HttpClient(_) => "upstream_failure",
        }
    }

    /// Whether the caller should retry the same request after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::NotReady | AppError::PoolExhausted)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotReady | AppError::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SessionNotFound(_) | AppError::NoMoreCandidates => StatusCode::NOT_FOUND,
            AppError::InvalidChoice(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            // Acting on a finished session is a no-op, not a failure
            AppError::SessionComplete => StatusCode::OK,
            AppError::SessionIncomplete => StatusCode::CONFLICT,
            AppError::UpstreamResolution(_) | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
            AppError::Cache(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }

        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
            "retryable": self.is_retryable(),
        });

        if matches!(self, AppError::SessionComplete) {
            body["is_complete"] = json!(true);
        }

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
