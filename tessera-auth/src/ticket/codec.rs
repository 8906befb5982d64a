//! Attestation tickets: the encrypted session state handed to clients.
//!
//! Wire format (v1, base64 standard):
//! - 1 byte: version (currently 1)
//! - 4 bytes: key id (big-endian)
//! - 12 bytes: AES-GCM IV
//! - remainder: ciphertext || 16-byte tag
//!
//! The plaintext is the JSON object `{ekpubhash, PCRs, nonce, time}`. The
//! associated data is `DOMAIN_PREFIX || version || key id`, so a ticket cannot
//! be replayed as any other AES-GCM payload produced under the same key.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::prelude::*;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::identity::EkPubHash;

use super::{TicketError, TicketKeyProvider};

/// Current wire format version.
const TICKET_VERSION: u8 = 1;

/// Domain separation for the AEAD associated data.
const DOMAIN_PREFIX: &[u8] = b"TESSERA-TICKET-v1:";

const IV_LEN: usize = 12;
const HEADER_LEN: usize = 1 + 4 + IV_LEN;
const TAG_LEN: usize = 16;

/// Seconds a ticket stays valid after issue.
pub const MAX_TICKET_AGE: i64 = 120;

/// PCR selection quoted by default.
pub const DEFAULT_PCRS: &str = "0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16";

/// Bytes of randomness in a nonce (rendered as twice as many hex characters).
pub const NONCE_LEN: usize = 16;

/// The claims sealed inside a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationTicket {
    pub ekpubhash: EkPubHash,
    #[serde(rename = "PCRs")]
    pub pcrs: String,
    pub nonce: String,
    pub time: i64,
}

impl AttestationTicket {
    /// Build fresh claims for `ekpubhash` with a random nonce stamped at `now`.
    #[must_use]
    pub fn new(ekpubhash: EkPubHash, pcrs: impl Into<String>, now: i64) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        Self {
            ekpubhash,
            pcrs: pcrs.into(),
            nonce: hex::encode(nonce),
            time: now,
        }
    }

    /// Encrypt the claims under the provider's current key.
    ///
    /// # Errors
    ///
    /// Returns `TicketError::Encrypt` if serialization or the cipher fails.
    pub fn seal(&self, keys: &dyn TicketKeyProvider) -> Result<String, TicketError> {
        let key = keys.current();
        let cipher =
            Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| TicketError::Encrypt)?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let plaintext = serde_json::to_vec(self).map_err(|_| TicketError::Encrypt)?;
        let aad = associated_data(TICKET_VERSION, key.id());
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| TicketError::Encrypt)?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        bytes.push(TICKET_VERSION);
        bytes.extend_from_slice(&key.id().to_be_bytes());
        bytes.extend_from_slice(&iv);
        bytes.extend_from_slice(&ciphertext);
        Ok(BASE64_STANDARD.encode(bytes))
    }

    /// Decode and decrypt a ticket.
    ///
    /// # Errors
    ///
    /// - `Malformed` for bad base64, a short buffer, or an unknown version
    /// - `UnknownKey` if the provider does not hold the named key
    /// - `Undecryptable` if authentication fails or the plaintext is not a ticket
    pub fn open(encoded: &str, keys: &dyn TicketKeyProvider) -> Result<Self, TicketError> {
        let bytes = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|_| TicketError::Malformed)?;
        if bytes.len() < HEADER_LEN + TAG_LEN || bytes[0] != TICKET_VERSION {
            return Err(TicketError::Malformed);
        }

        let key_id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let key = keys.lookup(key_id).ok_or(TicketError::UnknownKey(key_id))?;
        let cipher =
            Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| TicketError::Undecryptable)?;

        let aad = associated_data(bytes[0], key_id);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&bytes[5..HEADER_LEN]),
                Payload {
                    msg: &bytes[HEADER_LEN..],
                    aad: &aad,
                },
            )
            .map_err(|_| TicketError::Undecryptable)?;

        serde_json::from_slice(&plaintext).map_err(|_| TicketError::Undecryptable)
    }

    /// Compare the client's echoed `ekpubhash` and `nonce` with the sealed ones.
    ///
    /// # Errors
    ///
    /// Returns `TicketError::ClaimMismatch` naming the first differing field.
    pub fn check_claims(&self, ekpubhash: &str, nonce: &str) -> Result<(), TicketError> {
        if !ct_str_eq(self.ekpubhash.as_str(), ekpubhash) {
            return Err(TicketError::ClaimMismatch { field: "ekpubhash" });
        }
        if !ct_str_eq(&self.nonce, nonce) {
            return Err(TicketError::ClaimMismatch { field: "nonce" });
        }
        Ok(())
    }

    /// Require `time <= now <= time + MAX_TICKET_AGE`.
    ///
    /// # Errors
    ///
    /// Returns `NotYetValid` or `Expired`.
    pub fn check_fresh(&self, now: i64) -> Result<(), TicketError> {
        if now < self.time {
            return Err(TicketError::NotYetValid);
        }
        if now > self.time.saturating_add(MAX_TICKET_AGE) {
            return Err(TicketError::Expired);
        }
        Ok(())
    }

    /// Raw nonce bytes, as passed to the TPM as qualifying data.
    ///
    /// # Errors
    ///
    /// Returns `TicketError::Malformed` if the nonce is not hex.
    pub fn nonce_bytes(&self) -> Result<Vec<u8>, TicketError> {
        hex::decode(&self.nonce).map_err(|_| TicketError::Malformed)
    }
}

fn associated_data(version: u8, key_id: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(DOMAIN_PREFIX.len() + 5);
    aad.extend_from_slice(DOMAIN_PREFIX);
    aad.push(version);
    aad.extend_from_slice(&key_id.to_be_bytes());
    aad
}

fn ct_str_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::{KeyRing, StaticKeyProvider, TicketKey};

    const T0: i64 = 1_700_000_000;

    fn hash() -> EkPubHash {
        EkPubHash::parse(&"a1".repeat(32)).unwrap()
    }

    fn provider() -> StaticKeyProvider {
        StaticKeyProvider::new(TicketKey::generate())
    }

    #[test]
    fn test_sealed_ticket_opens_to_issued_claims() {
        let keys = provider();
        let ticket = AttestationTicket::new(hash(), DEFAULT_PCRS, T0);
        let encoded = ticket.seal(&keys).unwrap();

        let opened = AttestationTicket::open(&encoded, &keys).unwrap();
        assert_eq!(opened, ticket);
        assert_eq!(opened.pcrs, DEFAULT_PCRS);
        assert_eq!(opened.nonce.len(), NONCE_LEN * 2);
        assert_eq!(opened.time, T0);
    }

    #[test]
    fn test_plaintext_uses_pcrs_field_name() {
        let ticket = AttestationTicket::new(hash(), DEFAULT_PCRS, T0);
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["PCRs"], DEFAULT_PCRS);
        assert_eq!(json["ekpubhash"], "a1".repeat(32));
    }

    #[test]
    fn test_nonces_are_unique() {
        let a = AttestationTicket::new(hash(), DEFAULT_PCRS, T0);
        let b = AttestationTicket::new(hash(), DEFAULT_PCRS, T0);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_other_key_cannot_open() {
        let ticket = AttestationTicket::new(hash(), DEFAULT_PCRS, T0);
        let encoded = ticket.seal(&provider()).unwrap();

        let result = AttestationTicket::open(&encoded, &provider());
        assert!(matches!(result, Err(TicketError::UnknownKey(_))));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let keys = provider();
        let encoded = AttestationTicket::new(hash(), DEFAULT_PCRS, T0)
            .seal(&keys)
            .unwrap();

        let mut bytes = BASE64_STANDARD.decode(&encoded).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64_STANDARD.encode(bytes);

        assert_eq!(
            AttestationTicket::open(&tampered, &keys),
            Err(TicketError::Undecryptable)
        );
    }

    #[test]
    fn test_malformed_inputs() {
        let keys = provider();
        assert_eq!(
            AttestationTicket::open("not base64!!", &keys),
            Err(TicketError::Malformed)
        );
        assert_eq!(
            AttestationTicket::open("YWJjZA==", &keys),
            Err(TicketError::Malformed)
        );
    }

    #[test]
    fn test_rotated_ring_opens_old_tickets() {
        let old = TicketKey::generate();
        let mut ring = KeyRing::new(old.clone());
        let encoded = AttestationTicket::new(hash(), DEFAULT_PCRS, T0)
            .seal(&ring)
            .unwrap();

        ring.rotate(TicketKey::generate());
        assert!(AttestationTicket::open(&encoded, &ring).is_ok());
        assert_ne!(ring.current().id(), old.id());
    }

    #[test]
    fn test_freshness_window() {
        let ticket = AttestationTicket::new(hash(), DEFAULT_PCRS, T0);

        assert!(ticket.check_fresh(T0).is_ok());
        assert!(ticket.check_fresh(T0 + MAX_TICKET_AGE).is_ok());
        assert_eq!(
            ticket.check_fresh(T0 + MAX_TICKET_AGE + 1),
            Err(TicketError::Expired)
        );
        assert_eq!(ticket.check_fresh(T0 - 1), Err(TicketError::NotYetValid));
    }

    #[test]
    fn test_claim_mismatch() {
        let ticket = AttestationTicket::new(hash(), DEFAULT_PCRS, T0);

        assert!(ticket.check_claims(&"a1".repeat(32), &ticket.nonce).is_ok());
        assert_eq!(
            ticket.check_claims(&"a2".repeat(32), &ticket.nonce),
            Err(TicketError::ClaimMismatch { field: "ekpubhash" })
        );

        let mut nonce = ticket.nonce.clone().into_bytes();
        nonce[0] = if nonce[0] == b'0' { b'1' } else { b'0' };
        let nonce = String::from_utf8(nonce).unwrap();
        assert_eq!(
            ticket.check_claims(&"a1".repeat(32), &nonce),
            Err(TicketError::ClaimMismatch { field: "nonce" })
        );
    }
}
