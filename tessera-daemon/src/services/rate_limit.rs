//! Throttling for `/v1/initiate` and `/v1/complete`.
//!
//! Both routes draw from a single unkeyed token bucket. Enrollment
//! administration is not throttled.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::api::ApiError;

type Bucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Cheap to clone; clones draw from the same bucket.
#[derive(Clone)]
pub struct AttestRateLimiter {
    bucket: Arc<Bucket>,
}

impl AttestRateLimiter {
    /// `per_second` tokens are replenished each second, up to `burst`.
    /// Zero rates fall back to one per second; a zero burst to the rate.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(rate);
        Self {
            bucket: Arc::new(RateLimiter::direct(
                Quota::per_second(rate).allow_burst(burst),
            )),
        }
    }

    pub fn check(&self) -> Result<(), ApiError> {
        self.bucket.check().map_err(|_| {
            tracing::warn!("Attestation request throttled");
            ApiError::RateLimited
        })
    }
}

/// Answers 429 without reaching the handler when the bucket is empty.
pub async fn rate_limit_middleware(
    State(limiter): State<AttestRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Err(throttled) = limiter.check() {
        return throttled.into_response();
    }
    next.run(request).await
}
