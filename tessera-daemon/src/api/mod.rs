//! HTTP API for tesserad

mod error;
pub mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::audit::AuditLog;
use crate::services::{rate_limit_middleware, AttestRateLimiter, AttestationService};
use crate::store::EnrollmentStore;

pub use error::{ApiError, ATTESTATION_FAILED};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EnrollmentStore>,
    pub attest: Arc<AttestationService>,
    pub audit: Arc<AuditLog>,
    /// Hex Ed25519 key that verifies sealed assets
    pub signer_public: String,
    /// `None` disables rate limiting
    pub limiter: Option<AttestRateLimiter>,
}

/// Create the API router
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    let mut attest_routes = Router::new()
        .route("/v1/initiate", post(handlers::initiate))
        .route("/v1/complete", post(handlers::complete));
    if let Some(limiter) = state.limiter.clone() {
        attest_routes =
            attest_routes.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }

    let enroll_routes = Router::new()
        .route("/v1/add", post(handlers::add))
        .route("/v1/query", get(handlers::query))
        .route("/v1/delete", post(handlers::delete))
        .route("/v1/reenroll", post(handlers::reenroll))
        .route("/v1/janitor", get(handlers::janitor))
        .route("/v1/get-asset-signer", get(handlers::asset_signer));

    Router::new()
        .merge(attest_routes)
        .merge(enroll_routes)
        .route("/healthcheck", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
