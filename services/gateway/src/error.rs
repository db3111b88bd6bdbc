use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the gateway's store, listing and ingestion paths.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("object store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("failed to sign temporary access link for {key}: {reason}")]
    SigningError { key: String, reason: String },

    #[error("failed to fetch remote resource: {0}")]
    RemoteFetchError(String),

    #[error("bad payload: {0}")]
    BadPayload(String),

    #[error("record store unavailable: {0}")]
    RecordStoreUnavailable(String),

    #[error("{0} timed out")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::RecordStoreUnavailable(_) | Self::Timeout(_)
        )
    }

    /// Stable machine-readable code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::ObjectNotFound(_) => "NOT_FOUND",
            Self::SigningError { .. } => "SIGNING_ERROR",
            Self::RemoteFetchError(_) => "REMOTE_FETCH_ERROR",
            Self::BadPayload(_) => "BAD_PAYLOAD",
            Self::RecordStoreUnavailable(_) => "RECORD_STORE_UNAVAILABLE",
            Self::Timeout(_) => "TIMEOUT",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ObjectNotFound(_) => StatusCode::NOT_FOUND,
            Self::SigningError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RemoteFetchError(_) => StatusCode::BAD_GATEWAY,
            Self::BadPayload(_) => StatusCode::BAD_REQUEST,
            Self::RecordStoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadPayload(rejection.body_text())
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, code = self.code(), "Request failed");
        }

        // Record store internals stay in the logs.
        let message = match &self {
            Self::RecordStoreUnavailable(_) => "Failed to read movie records".to_string(),
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}
