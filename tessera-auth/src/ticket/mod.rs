//! Stateless attestation sessions.
//!
//! The attestation flow is:
//! 1. Client sends its `ekpubhash`; server issues an [`AttestationTicket`] with
//!    a fresh nonce, the PCR selection and the issue time, encrypted under a
//!    server-held key
//! 2. Client quotes its TPM over the nonce and returns the ticket with the quote
//! 3. Server opens the ticket, checks the echoed claims and the
//!    [`MAX_TICKET_AGE`] window, then verifies the quote against the sealed nonce
//!
//! The server keeps no session table: the ticket is the session.

mod codec;
mod error;
mod keys;

pub use codec::{AttestationTicket, DEFAULT_PCRS, MAX_TICKET_AGE, NONCE_LEN};
pub use error::TicketError;
pub use keys::{KeyRing, StaticKeyProvider, TICKET_KEY_LEN, TicketKey, TicketKeyProvider};
