//! Asset sealing envelope.
//!
//! A sealed asset is a JSON object:
//!
//! ```text
//! { "v": 1, "mode": "signed" | "encrypted",
//!   "payload": b64, "epk": b64?, "iv": b64?, "sig": b64 }
//! ```
//!
//! - `signed`: `payload` is the plaintext, `sig` is Ed25519 over the transcript
//! - `encrypted`: an ephemeral P-256 key agrees a secret with the recipient's
//!   identity key, HKDF-SHA256 derives an AES-256-GCM key, `payload` is the
//!   ciphertext, and `sig` covers `epk`, `iv` and the ciphertext
//!
//! The transcript always starts with [`DOMAIN_PREFIX`] and the mode name, so a
//! signed envelope cannot be replayed as an encrypted one or vice versa.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::prelude::*;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::identity::{PrivateKey, PublicKey, Signature};

/// Envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Domain separation for signatures and key derivation.
pub const DOMAIN_PREFIX: &[u8] = b"TESSERA-SEAL-v1:";

const IV_LEN: usize = 12;

/// Errors from sealing and unsealing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SealError {
    /// The envelope is not valid JSON or a field is badly encoded.
    #[error("malformed envelope")]
    Malformed,

    /// The envelope is of the other mode than the caller expected.
    #[error("envelope is {actual}, expected {expected}")]
    WrongMode {
        expected: &'static str,
        actual: &'static str,
    },

    /// The signature does not verify under the asset signer's key.
    #[error("envelope signature invalid")]
    BadSignature,

    /// The recipient key is not a valid P-256 point.
    #[error("invalid recipient key")]
    InvalidRecipient,

    /// Authenticated decryption failed.
    #[error("decryption failed")]
    Decrypt,

    /// Encryption failed.
    #[error("encryption failed")]
    Encrypt,
}

/// Envelope mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SealMode {
    Signed,
    Encrypted,
}

impl SealMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SealMode::Signed => "signed",
            SealMode::Encrypted => "encrypted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    v: u8,
    mode: SealMode,
    payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    epk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iv: Option<String>,
    sig: String,
}

/// Parse a recipient identity key from SEC1 bytes (the emulated `ek.pub`).
///
/// # Errors
///
/// Returns `SealError::InvalidRecipient`.
pub fn recipient_from_sec1(bytes: &[u8]) -> Result<p256::PublicKey, SealError> {
    p256::PublicKey::from_sec1_bytes(bytes).map_err(|_| SealError::InvalidRecipient)
}

/// Sign `plaintext` without encrypting it.
///
/// # Errors
///
/// Returns `SealError::Encrypt` if the envelope cannot be serialized.
pub fn seal_public(signer: &PrivateKey, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    let sig = signer.sign(&transcript(SealMode::Signed, &[], &[], plaintext));
    let envelope = Envelope {
        v: ENVELOPE_VERSION,
        mode: SealMode::Signed,
        payload: BASE64_STANDARD.encode(plaintext),
        epk: None,
        iv: None,
        sig: BASE64_STANDARD.encode(sig.to_bytes()),
    };
    serde_json::to_vec(&envelope).map_err(|_| SealError::Encrypt)
}

/// Encrypt `plaintext` to `recipient` and sign the result.
///
/// # Errors
///
/// Returns `SealError::Encrypt` on cipher or serialization failure.
pub fn seal_secret(
    signer: &PrivateKey,
    recipient: &p256::PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, SealError> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let epk = ephemeral.public_key().to_sec1_bytes().to_vec();
    let shared = ephemeral.diffie_hellman(recipient);
    let cipher = derive_cipher(shared.raw_secret_bytes().as_slice(), &epk)?;

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: &aad(&epk),
            },
        )
        .map_err(|_| SealError::Encrypt)?;

    let sig = signer.sign(&transcript(SealMode::Encrypted, &epk, &iv, &ciphertext));
    let envelope = Envelope {
        v: ENVELOPE_VERSION,
        mode: SealMode::Encrypted,
        payload: BASE64_STANDARD.encode(&ciphertext),
        epk: Some(BASE64_STANDARD.encode(&epk)),
        iv: Some(BASE64_STANDARD.encode(iv)),
        sig: BASE64_STANDARD.encode(sig.to_bytes()),
    };
    serde_json::to_vec(&envelope).map_err(|_| SealError::Encrypt)
}

/// Verify a signed envelope and return its payload.
///
/// # Errors
///
/// Returns `Malformed`, `WrongMode` or `BadSignature`.
pub fn unseal_public(verifier: &PublicKey, sealed: &[u8]) -> Result<Vec<u8>, SealError> {
    let envelope = parse(sealed, SealMode::Signed)?;
    let payload = decode(&envelope.payload)?;
    verify(verifier, &envelope.sig, &transcript(SealMode::Signed, &[], &[], &payload))?;
    Ok(payload)
}

/// Verify an encrypted envelope, then decrypt it with the recipient's key.
///
/// The signature is checked before any decryption is attempted.
///
/// # Errors
///
/// Returns `Malformed`, `WrongMode`, `BadSignature` or `Decrypt`.
pub fn unseal_secret(
    verifier: &PublicKey,
    recipient: &p256::SecretKey,
    sealed: &[u8],
) -> Result<Vec<u8>, SealError> {
    let envelope = parse(sealed, SealMode::Encrypted)?;
    let epk = decode(envelope.epk.as_deref().ok_or(SealError::Malformed)?)?;
    let iv = decode(envelope.iv.as_deref().ok_or(SealError::Malformed)?)?;
    let ciphertext = decode(&envelope.payload)?;
    if iv.len() != IV_LEN {
        return Err(SealError::Malformed);
    }
    verify(
        verifier,
        &envelope.sig,
        &transcript(SealMode::Encrypted, &epk, &iv, &ciphertext),
    )?;

    let ephemeral = p256::PublicKey::from_sec1_bytes(&epk).map_err(|_| SealError::Malformed)?;
    let shared = p256::ecdh::diffie_hellman(recipient.to_nonzero_scalar(), ephemeral.as_affine());
    let cipher = derive_cipher(shared.raw_secret_bytes().as_slice(), &epk)?;
    cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &ciphertext,
                aad: &aad(&epk),
            },
        )
        .map_err(|_| SealError::Decrypt)
}

fn parse(sealed: &[u8], expected: SealMode) -> Result<Envelope, SealError> {
    let envelope: Envelope = serde_json::from_slice(sealed).map_err(|_| SealError::Malformed)?;
    if envelope.v != ENVELOPE_VERSION {
        return Err(SealError::Malformed);
    }
    if envelope.mode != expected {
        return Err(SealError::WrongMode {
            expected: expected.as_str(),
            actual: envelope.mode.as_str(),
        });
    }
    Ok(envelope)
}

fn decode(field: &str) -> Result<Vec<u8>, SealError> {
    BASE64_STANDARD.decode(field).map_err(|_| SealError::Malformed)
}

fn verify(verifier: &PublicKey, sig: &str, message: &[u8]) -> Result<(), SealError> {
    let sig = Signature::from_bytes(&decode(sig)?).map_err(|_| SealError::BadSignature)?;
    if verifier.verify(message, &sig) {
        Ok(())
    } else {
        Err(SealError::BadSignature)
    }
}

fn derive_cipher(shared: &[u8], epk: &[u8]) -> Result<Aes256Gcm, SealError> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut key = [0u8; 32];
    hk.expand(&aad(epk), &mut key).map_err(|_| SealError::Encrypt)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| SealError::Encrypt);
    key.zeroize();
    cipher
}

fn aad(epk: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(DOMAIN_PREFIX.len() + epk.len());
    aad.extend_from_slice(DOMAIN_PREFIX);
    aad.extend_from_slice(epk);
    aad
}

fn transcript(mode: SealMode, epk: &[u8], iv: &[u8], payload: &[u8]) -> Vec<u8> {
    let mode = mode.as_str().as_bytes();
    let mut message =
        Vec::with_capacity(DOMAIN_PREFIX.len() + mode.len() + 24 + epk.len() + iv.len() + payload.len());
    message.extend_from_slice(DOMAIN_PREFIX);
    message.extend_from_slice(mode);
    for part in [epk, iv, payload] {
        message.extend_from_slice(&(part.len() as u64).to_be_bytes());
        message.extend_from_slice(part);
    }
    message
}
