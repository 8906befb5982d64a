use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tessera_auth::identity::EkPubHash;
use tessera_core::wire::ErrorBody;

use crate::store::StoreError;

/// Message for every verification failure. Details go to the log only.
pub const ATTESTATION_FAILED: &str = "attestation failed";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("attestation failed")]
    AttestationFailed,
    #[error("identity not enrolled")]
    Unenrolled(EkPubHash),
    #[error("identity already enrolled")]
    Conflict(EkPubHash),
    #[error("not found")]
    NotFound,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("asset generation failed: {0}")]
    Generation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(hash) => ApiError::Conflict(hash),
            StoreError::NotFound(_) => ApiError::NotFound,
            StoreError::InvalidPrefix(_)
            | StoreError::InvalidProfile(_)
            | StoreError::InvalidKey(_) => ApiError::BadRequest(e.to_string()),
            StoreError::Io(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, ekpubhash) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::AttestationFailed => {
                (StatusCode::BAD_REQUEST, ATTESTATION_FAILED.to_string(), None)
            }
            ApiError::Unenrolled(_) => (StatusCode::UNAUTHORIZED, self.to_string(), None),
            ApiError::Conflict(hash) => {
                (StatusCode::CONFLICT, self.to_string(), Some(hash.to_string()))
            }
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), None),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string(), None),
            ApiError::Generation(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "asset generation failed".to_string(),
                None,
            ),
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string(), None)
            }
        };

        let body = ErrorBody {
            error: message,
            ekpubhash,
        };
        (status, Json(body)).into_response()
    }
}
