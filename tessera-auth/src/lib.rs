//! Pure cryptography for Tessera.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No subprocesses
//! - No logging
//!
//! Key material is injected by callers:
//! - [`ticket::TicketKeyProvider`] - symmetric keys for attestation tickets
//! - [`identity::PrivateKey`] - the asset signer
//!
//! # Example
//!
//! ```
//! use tessera_auth::identity::EkPubHash;
//! use tessera_auth::ticket::{AttestationTicket, StaticKeyProvider, TicketKey, DEFAULT_PCRS};
//!
//! let keys = StaticKeyProvider::new(TicketKey::generate());
//! let claims = AttestationTicket::new(EkPubHash::of(b"ek"), DEFAULT_PCRS, 1_700_000_000);
//! let ticket = claims.seal(&keys).unwrap();
//!
//! let opened = AttestationTicket::open(&ticket, &keys).unwrap();
//! assert!(opened.check_fresh(1_700_000_060).is_ok());
//! ```

pub mod identity;
pub mod quote;
pub mod seal;
pub mod ticket;

pub use identity::{EkPubHash, HashError, HashPrefix, KeyError, PrivateKey, PublicKey, Signature};
pub use quote::{QuoteChallenge, QuoteError};
pub use seal::{SealError, SealMode};
pub use ticket::{AttestationTicket, TicketError, TicketKey, TicketKeyProvider};
