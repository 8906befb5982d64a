//! Certificate issuance port.

use async_trait::async_trait;
use tessera_core::CertRequest;

use crate::PortError;

mod hxtool;
mod local;

pub use hxtool::{hxtool_args, Hxtool};
pub use local::{Authority, LocalCa};

#[async_trait]
pub trait CertIssuer: Send + Sync {
    /// Issue a certificate and its new private key, returned as PEM
    /// (key first, then certificate).
    async fn issue(&self, request: &CertRequest) -> Result<Vec<u8>, PortError>;
}
