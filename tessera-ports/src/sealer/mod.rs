//! Sealing port.
//!
//! The server seals with [`Sealer::seal_secret`] and [`Sealer::seal_public`];
//! the attested host opens the results with the matching `unseal_*` calls.

use async_trait::async_trait;

use crate::PortError;

mod local;
mod tools;

pub use local::LocalSealer;
pub use tools::SafebootTools;

#[async_trait]
pub trait Sealer: Send + Sync {
    /// Encrypt `plaintext` to the holder of `recipient` (the raw `ek.pub`) and sign it.
    async fn seal_secret(&self, plaintext: &[u8], recipient: &[u8]) -> Result<Vec<u8>, PortError>;

    /// Sign `plaintext` without encrypting it.
    async fn seal_public(&self, plaintext: &[u8]) -> Result<Vec<u8>, PortError>;

    /// Verify and decrypt an asset sealed to this host.
    async fn unseal_secret(&self, sealed: &[u8]) -> Result<Vec<u8>, PortError>;

    /// Verify a signed asset and return its contents.
    async fn unseal_public(&self, sealed: &[u8]) -> Result<Vec<u8>, PortError>;
}
