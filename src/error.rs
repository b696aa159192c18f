//! Error taxonomy for the price-differential pipeline.
//!
//! Components return `anyhow::Result` internally (matching the rest of the
//! crate's style), but the handful of kinds that callers and the HTTP facade
//! need to distinguish are given a typed enum here so `/update`, `/settings`,
//! and friends can map failures to the right status code instead of
//! collapsing everything to 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A refresh was aborted via cancellation. Not surfaced as an error to
    /// readers; recorded only for operators who requested the cancel.
    #[error("refresh cancelled")]
    Cancelled,

    /// Both clients failed to return any items during a full refresh.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A request was retried until the configured rate-limit backoff gave up.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed (401/403) after the single retry.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Rejected configuration or credential update.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// I/O error writing the credential or interesting-key cache file.
    #[error("persist failed: {0}")]
    PersistFailed(String),

    /// A refresh was requested while one was already running.
    #[error("refresh already running")]
    AlreadyRunning,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = match self {
            PipelineError::Cancelled => StatusCode::OK,
            PipelineError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            PipelineError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            PipelineError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            PipelineError::PersistFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::AlreadyRunning => StatusCode::CONFLICT,
        };

        let body = Json(json!({
            "ok": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
