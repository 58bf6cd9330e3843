use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// Error taxonomy surfaced at the HTTP / RPC boundary.
///
/// Anything that reaches a handler is one of these; internal plumbing uses
/// `anyhow` and is wrapped into `Internal` at the edge. Job-level failures
/// are *not* errors; status endpoints return 200 with the failure inside
/// the payload.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid or missing API key")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    #[error("rate limit exceeded for {domain}")]
    RateLimited { domain: String },

    #[error("store unavailable: {0}")]
    Store(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON-RPC error code for the tool-call surface.
    pub fn rpc_code(&self) -> i64 {
        match self {
            ApiError::Validation(_) | ApiError::NotFound(_) => -32602,
            _ => -32603,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_) | ApiError::Store(_)) {
            tracing::error!("request failed: {self:#}");
        }
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}
