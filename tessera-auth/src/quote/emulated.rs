//! Quote encoding used by the software TPM.
//!
//! Members of an emulated quote bundle:
//! - `ak.pub`: JSON `{"attributes": "<flags>", "key": "<ed25519 hex>"}`
//! - `quote.out`: JSON [`QuoteMessage`]
//! - `quote.sig`: raw 64-byte Ed25519 signature over `quote.out`
//! - `quote.pcr`: JSON map of PCR index to hex SHA-256 bank value
//!
//! The PCR digest is SHA-256 over the selected bank values in ascending index
//! order, mirroring how a hardware quote commits to its PCR selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::identity::{PrivateKey, PublicKey, Signature};

use super::{QuoteChallenge, QuoteError};

/// PCR index to lowercase hex value.
pub type PcrValues = BTreeMap<u32, String>;

/// Public half of an emulated attestation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AkPublic {
    pub attributes: String,
    pub key: String,
}

impl AkPublic {
    /// Describe `key` with the given attribute string.
    #[must_use]
    pub fn new(attributes: impl Into<String>, key: &PublicKey) -> Self {
        Self {
            attributes: attributes.into(),
            key: key.to_hex(),
        }
    }

    /// Parse an `ak.pub` member.
    ///
    /// # Errors
    ///
    /// Returns `QuoteError::Malformed("ak.pub")`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, QuoteError> {
        serde_json::from_slice(bytes).map_err(|_| QuoteError::Malformed("ak.pub"))
    }

    /// Serialize to `ak.pub` bytes.
    ///
    /// # Errors
    ///
    /// Returns `QuoteError::Malformed("ak.pub")` if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, QuoteError> {
        serde_json::to_vec(self).map_err(|_| QuoteError::Malformed("ak.pub"))
    }

    fn public_key(&self) -> Result<PublicKey, QuoteError> {
        PublicKey::from_hex(&self.key).map_err(|_| QuoteError::Malformed("ak.pub"))
    }
}

/// The signed body of an emulated quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteMessage {
    pub pcr_select: String,
    pub pcr_digest: String,
    pub qualifying_data: String,
}

/// A signed quote ready to be packed into a bundle.
#[derive(Debug, Clone)]
pub struct SignedQuote {
    pub message: Vec<u8>,
    pub signature: Vec<u8>,
    pub pcrs: Vec<u8>,
}

/// Parse `"0,1,2"` into sorted, de-duplicated indices.
///
/// An optional `sha256:` bank prefix is accepted.
///
/// # Errors
///
/// Returns `QuoteError::Malformed("pcr selection")` for empty or non-numeric entries.
pub fn parse_selection(selection: &str) -> Result<Vec<u32>, QuoteError> {
    let list = selection.trim();
    let list = list.strip_prefix("sha256:").unwrap_or(list);
    let mut indices = list
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| QuoteError::Malformed("pcr selection"))?;
    indices.sort_unstable();
    indices.dedup();
    Ok(indices)
}

/// Digest over the selected PCR values.
///
/// # Errors
///
/// Returns `QuoteError::PcrMismatch` if a selected index has no value, or
/// `QuoteError::Malformed("quote.pcr")` if a value is not hex.
pub fn pcr_digest(selection: &[u32], values: &PcrValues) -> Result<String, QuoteError> {
    let mut hasher = Sha256::new();
    for index in selection {
        let value = values.get(index).ok_or(QuoteError::PcrMismatch)?;
        let bytes = hex::decode(value).map_err(|_| QuoteError::Malformed("quote.pcr"))?;
        hasher.update(bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Produce a quote over `selection` qualified by `nonce`.
///
/// # Errors
///
/// Propagates selection and digest errors.
pub fn sign_quote(
    ak: &PrivateKey,
    selection: &str,
    values: &PcrValues,
    nonce: &[u8],
) -> Result<SignedQuote, QuoteError> {
    let indices = parse_selection(selection)?;
    let selected: PcrValues = indices
        .iter()
        .filter_map(|i| values.get(i).map(|v| (*i, v.clone())))
        .collect();
    let message = QuoteMessage {
        pcr_select: selection.trim().to_string(),
        pcr_digest: pcr_digest(&indices, &selected)?,
        qualifying_data: hex::encode(nonce),
    };
    let message = serde_json::to_vec(&message).map_err(|_| QuoteError::Malformed("quote.out"))?;
    let signature = ak.sign(&message).to_bytes().to_vec();
    let pcrs = serde_json::to_vec(&selected).map_err(|_| QuoteError::Malformed("quote.pcr"))?;
    Ok(SignedQuote {
        message,
        signature,
        pcrs,
    })
}

/// Verify an emulated quote against `challenge`.
///
/// # Errors
///
/// Returns the first failing check as a [`QuoteError`].
pub fn verify_quote(
    ak_pub: &[u8],
    quote_out: &[u8],
    quote_sig: &[u8],
    quote_pcr: &[u8],
    challenge: &QuoteChallenge,
) -> Result<(), QuoteError> {
    let ak = AkPublic::from_slice(ak_pub)?.public_key()?;
    let signature = Signature::from_bytes(quote_sig).map_err(|_| QuoteError::SignatureInvalid)?;
    if !ak.verify(quote_out, &signature) {
        return Err(QuoteError::SignatureInvalid);
    }

    let message: QuoteMessage =
        serde_json::from_slice(quote_out).map_err(|_| QuoteError::Malformed("quote.out"))?;
    let qualifying =
        hex::decode(&message.qualifying_data).map_err(|_| QuoteError::Malformed("quote.out"))?;
    if qualifying.len() != challenge.nonce.len()
        || !bool::from(qualifying.ct_eq(&challenge.nonce))
    {
        return Err(QuoteError::NonceMismatch);
    }

    let signed = parse_selection(&message.pcr_select)?;
    if signed != parse_selection(&challenge.pcrs)? {
        return Err(QuoteError::PcrMismatch);
    }
    let values: PcrValues =
        serde_json::from_slice(quote_pcr).map_err(|_| QuoteError::Malformed("quote.pcr"))?;
    if pcr_digest(&signed, &values)? != message.pcr_digest {
        return Err(QuoteError::PcrMismatch);
    }
    Ok(())
}
