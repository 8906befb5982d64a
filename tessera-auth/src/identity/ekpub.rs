//! Identity hashes: the SHA-256 of a TPM's raw public identity key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Number of hex characters in a full identity hash.
pub const EKPUBHASH_LEN: usize = 64;

/// Errors produced when parsing identity hashes and prefixes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum HashError {
    /// A character outside `[0-9a-fA-F]` was found.
    #[error("identity hash must be hexadecimal")]
    NotHex,

    /// A full hash did not have exactly 64 characters.
    #[error("identity hash must be {EKPUBHASH_LEN} characters, got {0}")]
    WrongLength(usize),

    /// A prefix was longer than a full hash.
    #[error("identity hash prefix longer than {EKPUBHASH_LEN} characters ({0})")]
    PrefixTooLong(usize),
}

/// A lowercase, 64-character hex SHA-256 digest of `ek.pub`.
///
/// Equality is constant-time. The value itself is not secret, but it is
/// compared against attacker-supplied echoes during attestation.
#[derive(Clone, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[allow(clippy::derived_hash_with_manual_eq)]
pub struct EkPubHash(String);

impl EkPubHash {
    /// Hash the raw bytes of a public identity key.
    #[must_use]
    pub fn of(ekpub: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(ekpub)))
    }

    /// Parse a full hash, accepting upper-case input.
    ///
    /// # Errors
    ///
    /// Returns `HashError::WrongLength` or `HashError::NotHex`.
    pub fn parse(s: &str) -> Result<Self, HashError> {
        let s = s.trim();
        if s.len() != EKPUBHASH_LEN {
            return Err(HashError::WrongLength(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HashError::NotHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The hash as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First-level shard directory name (two characters).
    #[must_use]
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }

    /// Second-level shard directory name (four characters).
    #[must_use]
    pub fn sub_shard(&self) -> &str {
        &self.0[..4]
    }

    /// Whether this hash starts with `prefix`.
    #[must_use]
    pub fn matches(&self, prefix: &HashPrefix) -> bool {
        self.0.starts_with(prefix.as_str())
    }
}

impl PartialEq for EkPubHash {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl TryFrom<String> for EkPubHash {
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EkPubHash> for String {
    fn from(value: EkPubHash) -> Self {
        value.0
    }
}

impl std::fmt::Display for EkPubHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for EkPubHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EkPubHash({})", self.0)
    }
}

/// A lowercase hex prefix of 0 to 64 characters used to select records.
///
/// The empty prefix selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashPrefix(String);

impl HashPrefix {
    /// Parse and normalize a prefix.
    ///
    /// # Errors
    ///
    /// Returns `HashError::PrefixTooLong` past 64 characters and
    /// `HashError::NotHex` for anything that isn't hexadecimal.
    pub fn parse(s: &str) -> Result<Self, HashError> {
        let s = s.trim();
        if s.len() > EKPUBHASH_LEN {
            return Err(HashError::PrefixTooLong(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HashError::NotHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The prefix as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The smallest hash that starts with this prefix.
    #[must_use]
    pub fn lowest(&self) -> EkPubHash {
        EkPubHash(format!("{:0<width$}", self.0, width = EKPUBHASH_LEN))
    }

    /// Whether this prefix names exactly one hash.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.0.len() == EKPUBHASH_LEN
    }
}

impl From<&EkPubHash> for HashPrefix {
    fn from(hash: &EkPubHash) -> Self {
        Self(hash.0.clone())
    }
}

impl std::fmt::Display for HashPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_of_matches_sha256_hex() {
        // sha256("abc")
        let h = EkPubHash::of(b"abc");
        assert_eq!(
            h.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(h.shard(), "ba");
        assert_eq!(h.sub_shard(), "ba78");
    }

    #[test]
    fn test_parse_normalizes_case() {
        let upper = "A1".repeat(32);
        let h = EkPubHash::parse(&upper).unwrap();
        assert_eq!(h.as_str(), "a1".repeat(32));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(EkPubHash::parse("abc"), Err(HashError::WrongLength(3)));
        assert_eq!(EkPubHash::parse(&"g".repeat(64)), Err(HashError::NotHex));
    }

    #[test]
    fn test_prefix_bounds() {
        assert!(HashPrefix::parse("").unwrap().as_str().is_empty());
        assert!(HashPrefix::parse(&"0".repeat(64)).unwrap().is_exact());
        assert_eq!(
            HashPrefix::parse(&"0".repeat(65)),
            Err(HashError::PrefixTooLong(65))
        );
        assert_eq!(HashPrefix::parse("xy"), Err(HashError::NotHex));
    }

    #[test]
    fn test_matches_prefix() {
        let h = EkPubHash::parse(&"ab".repeat(32)).unwrap();
        assert!(h.matches(&HashPrefix::parse("").unwrap()));
        assert!(h.matches(&HashPrefix::parse("ABA").unwrap()));
        assert!(!h.matches(&HashPrefix::parse("b").unwrap()));
    }

    #[test]
    fn test_lowest_hash_for_prefix() {
        let prefix = HashPrefix::parse("AB1").unwrap();
        let lowest = prefix.lowest();
        assert_eq!(lowest.as_str(), format!("ab1{}", "0".repeat(61)));
        assert!(lowest.matches(&prefix));
        assert!(lowest <= EkPubHash::parse(&"ab10".repeat(16)).unwrap());
        assert_eq!(HashPrefix::default().lowest().as_str(), "0".repeat(64));
    }

    #[test]
    fn test_serde_validates() {
        let ok: EkPubHash = serde_json::from_str(&format!("\"{}\"", "c3".repeat(32))).unwrap();
        assert_eq!(ok.as_str(), "c3".repeat(32));
        assert!(serde_json::from_str::<EkPubHash>("\"c3\"").is_err());
    }
}
