use std::path::Path;

use async_trait::async_trait;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tessera_auth::identity::PrivateKey;
use tessera_auth::quote::emulated::{sign_quote, verify_quote, AkPublic, PcrValues};
use tessera_auth::quote::AK_TEMPLATE;
use tessera_auth::QuoteChallenge;
use tessera_core::QuoteBundle;

use super::TpmPort;
use crate::fsutil::{create_private_dir, write_private};
use crate::PortError;

const IDENTITY_FILE: &str = "ek.key";
const PCRS_FILE: &str = "pcrs.json";
const PCR_COUNT: u32 = 24;

/// Software TPM for development and tests.
///
/// The identity key is P-256 (its SEC1 encoding is `ek.pub`), so assets sealed
/// to it can be opened with [`EmulatedTpm::identity_secret`]. Each quote uses a
/// fresh Ed25519 attestation key.
pub struct EmulatedTpm {
    identity: Option<p256::SecretKey>,
    pcrs: PcrValues,
    ak_attributes: String,
}

impl EmulatedTpm {
    /// Open (or initialise) the emulator state in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error, or `Invalid` if the stored state is corrupt.
    pub fn open(dir: &Path) -> Result<Self, PortError> {
        create_private_dir(dir)?;

        let key_path = dir.join(IDENTITY_FILE);
        let identity = if key_path.exists() {
            let bytes = std::fs::read(&key_path)?;
            p256::SecretKey::from_slice(&bytes)
                .map_err(|_| PortError::Invalid(format!("corrupt {}", key_path.display())))?
        } else {
            let key = p256::SecretKey::random(&mut OsRng);
            write_private(&key_path, key.to_bytes().as_slice())?;
            tracing::info!(path = %key_path.display(), "Generated emulated identity key");
            key
        };

        let pcr_path = dir.join(PCRS_FILE);
        let pcrs = if pcr_path.exists() {
            let bytes = std::fs::read(&pcr_path)?;
            serde_json::from_slice(&bytes)
                .map_err(|e| PortError::Invalid(format!("corrupt {}: {e}", pcr_path.display())))?
        } else {
            let pcrs = default_pcrs();
            let json = serde_json::to_vec_pretty(&pcrs)
                .map_err(|e| PortError::Invalid(e.to_string()))?;
            std::fs::write(&pcr_path, json)?;
            pcrs
        };

        Ok(Self {
            identity: Some(identity),
            pcrs,
            ak_attributes: AK_TEMPLATE.to_string(),
        })
    }

    /// A verifier-only instance with no identity of its own.
    pub fn verifier() -> Self {
        Self {
            identity: None,
            pcrs: PcrValues::new(),
            ak_attributes: AK_TEMPLATE.to_string(),
        }
    }

    /// Override the attributes reported for new attestation keys.
    #[must_use]
    pub fn with_ak_attributes(mut self, attributes: impl Into<String>) -> Self {
        self.ak_attributes = attributes.into();
        self
    }

    /// The identity private key, used to open assets sealed to this TPM.
    pub fn identity_secret(&self) -> Option<&p256::SecretKey> {
        self.identity.as_ref()
    }

    fn identity(&self) -> Result<&p256::SecretKey, PortError> {
        self.identity
            .as_ref()
            .ok_or_else(|| PortError::Unsupported("emulated TPM has no identity".into()))
    }
}

fn default_pcrs() -> PcrValues {
    (0..PCR_COUNT)
        .map(|i| {
            let value = Sha256::digest(format!("tessera-emulated-pcr-{i}"));
            (i, hex::encode(value))
        })
        .collect()
}

#[async_trait]
impl TpmPort for EmulatedTpm {
    async fn identity_public(&self) -> Result<Vec<u8>, PortError> {
        Ok(self.identity()?.public_key().to_sec1_bytes().to_vec())
    }

    async fn quote(&self, pcrs: &str, nonce: &[u8]) -> Result<QuoteBundle, PortError> {
        let ek_pub = self.identity_public().await?;
        let ak = PrivateKey::generate();
        let ak_public = AkPublic::new(self.ak_attributes.clone(), &ak.public_key());
        let signed = sign_quote(&ak, pcrs, &self.pcrs, nonce)?;
        let ak_ctx = serde_json::to_vec(&serde_json::json!({ "emulated": ak_public.key }))
            .map_err(|e| PortError::Invalid(e.to_string()))?;

        Ok(QuoteBundle {
            ek_pub,
            ak_pub: ak_public.to_vec()?,
            ak_ctx,
            quote_out: signed.message,
            quote_sig: signed.signature,
            quote_pcr: signed.pcrs,
        })
    }

    async fn ak_attributes(&self, ak_pub: &[u8]) -> Result<String, PortError> {
        Ok(AkPublic::from_slice(ak_pub)?.attributes)
    }

    async fn check_quote(
        &self,
        bundle: &QuoteBundle,
        challenge: &QuoteChallenge,
    ) -> Result<(), PortError> {
        verify_quote(
            &bundle.ak_pub,
            &bundle.quote_out,
            &bundle.quote_sig,
            &bundle.quote_pcr,
            challenge,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_auth::quote::check_ak_attributes;
    use tessera_auth::{EkPubHash, QuoteError};

    const PCRS: &str = "0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16";

    fn challenge(nonce: &[u8]) -> QuoteChallenge {
        QuoteChallenge {
            nonce: nonce.to_vec(),
            pcrs: PCRS.into(),
        }
    }

    #[tokio::test]
    async fn test_identity_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first = EmulatedTpm::open(dir.path()).unwrap();
        let ek = first.identity_public().await.unwrap();
        drop(first);

        let second = EmulatedTpm::open(dir.path()).unwrap();
        assert_eq!(second.identity_public().await.unwrap(), ek);
        assert_eq!(EkPubHash::of(&ek).as_str().len(), 64);
    }

    #[tokio::test]
    async fn test_quote_verifies_with_stateless_verifier() {
        let dir = tempfile::tempdir().unwrap();
        let tpm = EmulatedTpm::open(dir.path()).unwrap();
        let nonce = [7u8; 16];
        let bundle = tpm.quote(PCRS, &nonce).await.unwrap();

        let verifier = EmulatedTpm::verifier();
        let attrs = verifier.ak_attributes(&bundle.ak_pub).await.unwrap();
        assert!(check_ak_attributes(&attrs).is_ok());
        verifier.check_quote(&bundle, &challenge(&nonce)).await.unwrap();
    }

    #[tokio::test]
    async fn test_quote_for_other_nonce_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tpm = EmulatedTpm::open(dir.path()).unwrap();
        let bundle = tpm.quote(PCRS, &[7u8; 16]).await.unwrap();

        let mut other = [7u8; 16];
        other[15] ^= 1;
        let err = EmulatedTpm::verifier()
            .check_quote(&bundle, &challenge(&other))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Quote(QuoteError::NonceMismatch)));
    }

    #[tokio::test]
    async fn test_overridden_attributes_reported() {
        let dir = tempfile::tempdir().unwrap();
        let tpm = EmulatedTpm::open(dir.path())
            .unwrap()
            .with_ak_attributes("fixedtpm|sign");
        let bundle = tpm.quote(PCRS, &[0u8; 16]).await.unwrap();
        let attrs = tpm.ak_attributes(&bundle.ak_pub).await.unwrap();
        assert_eq!(attrs, "fixedtpm|sign");
        assert!(check_ak_attributes(&attrs).is_err());
    }

    #[tokio::test]
    async fn test_verifier_has_no_identity() {
        let err = EmulatedTpm::verifier().identity_public().await.unwrap_err();
        assert!(matches!(err, PortError::Unsupported(_)));
    }
}
