//! Identity material for Tessera.
//!
//! - [`EkPubHash`] - SHA-256 of a host's public identity key, the primary key of
//!   every enrollment record
//! - [`HashPrefix`] - a validated prefix used to select records
//! - [`PrivateKey`] / [`PublicKey`] / [`Signature`] - Ed25519 keys for the asset
//!   signer and for emulated attestation keys
//!
//! # Example
//!
//! ```
//! use tessera_auth::identity::{EkPubHash, HashPrefix};
//!
//! let hash = EkPubHash::of(b"ek.pub bytes");
//! let prefix = HashPrefix::parse(&hash.as_str()[..4]).unwrap();
//! assert!(hash.matches(&prefix));
//! ```

mod ekpub;
mod keys;

pub use ekpub::{EKPUBHASH_LEN, EkPubHash, HashError, HashPrefix};
pub use keys::{KeyError, PrivateKey, PublicKey, SecretBytes, Signature};
