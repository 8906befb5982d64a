//! Attestation and asset services behind the HTTP API.

mod assets;
mod attest;
mod rate_limit;

pub use assets::{AssetPipeline, GenerationError};
pub use attest::AttestationService;
pub use rate_limit::{rate_limit_middleware, AttestRateLimiter};
