//! Ed25519 material: the daemon's asset signer and emulated attestation keys.
//!
//! The verifying half travels as 64 lowercase hex characters, which is
//! what `GET /v1/get-asset-signer` serves and what hosts keep on disk.

use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

const PUBLIC_LEN: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;
const SIGNATURE_LEN: usize = ed25519_dalek::SIGNATURE_LENGTH;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    #[error("expected {expected} key bytes, found {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("key bytes are not a valid Ed25519 key")]
    InvalidFormat,

    #[error("key is not hex encoded")]
    InvalidHex,
}

/// Copy `bytes` into a fixed array, reporting the length on mismatch.
fn exact<const N: usize>(bytes: &[u8]) -> Result<[u8; N], KeyError> {
    bytes.try_into().map_err(|_| KeyError::InvalidLength {
        expected: N,
        actual: bytes.len(),
    })
}

/// Serialized private key material, wiped when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Signing half of an Ed25519 pair. Has no `Debug` impl.
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    #[must_use]
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message))
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// PKCS#8 DER, the on-disk format of the daemon's signer file.
    pub fn to_pkcs8_der(&self) -> Result<SecretBytes, KeyError> {
        self.0
            .to_pkcs8_der()
            .map(|doc| SecretBytes(doc.as_bytes().to_vec()))
            .map_err(|_| KeyError::InvalidFormat)
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, KeyError> {
        SigningKey::from_pkcs8_der(der)
            .map(Self)
            .map_err(|_| KeyError::InvalidFormat)
    }
}

/// Verifying half of an Ed25519 pair.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        VerifyingKey::from_bytes(&exact::<PUBLIC_LEN>(bytes)?)
            .map(Self)
            .map_err(|_| KeyError::InvalidFormat)
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; PUBLIC_LEN] {
        self.0.to_bytes()
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse [`PublicKey::to_hex`] output. A trailing newline from a key
    /// file is tolerated.
    pub fn from_hex(text: &str) -> Result<Self, KeyError> {
        let raw = hex::decode(text.trim()).map_err(|_| KeyError::InvalidHex)?;
        Self::from_bytes(&raw)
    }

    /// Strict verification; small-order keys and malleable signatures fail.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.0.verify_strict(message, &signature.0).is_ok()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fingerprint = hex::encode(&self.to_bytes()[..8]);
        f.debug_tuple("PublicKey").field(&fingerprint).finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub const LEN: usize = SIGNATURE_LEN;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let raw = exact::<SIGNATURE_LEN>(bytes)?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&raw)))
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0.to_bytes()
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.to_bytes()[..4]))
    }
}
