//! TPM port.
//!
//! The client side uses [`TpmPort::identity_public`] and [`TpmPort::quote`];
//! the verifier uses [`TpmPort::ak_attributes`] and [`TpmPort::check_quote`].

use async_trait::async_trait;
use tessera_auth::QuoteChallenge;
use tessera_core::QuoteBundle;

use crate::PortError;

mod emulated;
mod tools;

pub use emulated::EmulatedTpm;
pub use tools::{parse_attributes, Tpm2Tools};

#[async_trait]
pub trait TpmPort: Send + Sync {
    /// Public half of the identity (endorsement) key, as it appears in `ek.pub`.
    async fn identity_public(&self) -> Result<Vec<u8>, PortError>;

    /// Create a fresh restricted signing key under the identity and quote `pcrs`
    /// qualified by `nonce`.
    async fn quote(&self, pcrs: &str, nonce: &[u8]) -> Result<QuoteBundle, PortError>;

    /// Attribute flags of the signing key in `ak_pub`, e.g. `fixedtpm|...|sign`.
    async fn ak_attributes(&self, ak_pub: &[u8]) -> Result<String, PortError>;

    /// Verify the quote signature, qualifying data and PCR digest.
    async fn check_quote(
        &self,
        bundle: &QuoteBundle,
        challenge: &QuoteChallenge,
    ) -> Result<(), PortError>;
}
