use std::sync::Arc;

use async_trait::async_trait;
use tessera_auth::identity::{PrivateKey, PublicKey};
use tessera_auth::seal;

use super::Sealer;
use crate::PortError;

/// In-process sealer using the `tessera-auth` envelope.
///
/// A server instance holds the asset signer; a client instance holds the
/// signer's verification key and, to open secret assets, the identity key.
#[derive(Clone, Default)]
pub struct LocalSealer {
    signer: Option<Arc<PrivateKey>>,
    verifier: Option<PublicKey>,
    identity: Option<p256::SecretKey>,
}

impl LocalSealer {
    /// A sealer that can only seal.
    pub fn signing(signer: Arc<PrivateKey>) -> Self {
        Self {
            signer: Some(signer),
            ..Self::default()
        }
    }

    /// A sealer that can only unseal. Without an identity key only public
    /// assets can be opened.
    pub fn verifying(verifier: PublicKey, identity: Option<p256::SecretKey>) -> Self {
        Self {
            verifier: Some(verifier),
            identity,
            ..Self::default()
        }
    }

    fn signer(&self) -> Result<&PrivateKey, PortError> {
        self.signer
            .as_deref()
            .ok_or_else(|| PortError::Unsupported("sealer has no signing key".into()))
    }

    fn verifier(&self) -> Result<&PublicKey, PortError> {
        self.verifier
            .as_ref()
            .ok_or_else(|| PortError::Unsupported("sealer has no verification key".into()))
    }
}

#[async_trait]
impl Sealer for LocalSealer {
    async fn seal_secret(&self, plaintext: &[u8], recipient: &[u8]) -> Result<Vec<u8>, PortError> {
        let recipient = seal::recipient_from_sec1(recipient)?;
        Ok(seal::seal_secret(self.signer()?, &recipient, plaintext)?)
    }

    async fn seal_public(&self, plaintext: &[u8]) -> Result<Vec<u8>, PortError> {
        Ok(seal::seal_public(self.signer()?, plaintext)?)
    }

    async fn unseal_secret(&self, sealed: &[u8]) -> Result<Vec<u8>, PortError> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| PortError::Unsupported("sealer has no identity key".into()))?;
        Ok(seal::unseal_secret(self.verifier()?, identity, sealed)?)
    }

    async fn unseal_public(&self, sealed: &[u8]) -> Result<Vec<u8>, PortError> {
        Ok(seal::unseal_public(self.verifier()?, sealed)?)
    }
}
