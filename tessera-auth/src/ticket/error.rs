//! Ticket error types.

/// Errors that can occur while opening or checking an attestation ticket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TicketError {
    /// The ticket is not valid base64 or is too short to contain a header.
    #[error("malformed ticket")]
    Malformed,

    /// The ticket names a key the provider does not hold.
    #[error("ticket encrypted under unknown key {0:08x}")]
    UnknownKey(u32),

    /// Authenticated decryption failed, or the plaintext is not a ticket.
    #[error("ticket could not be decrypted")]
    Undecryptable,

    /// A claim echoed by the client differs from the sealed value.
    #[error("ticket has bad {field}")]
    ClaimMismatch { field: &'static str },

    /// `now` is past `time + MAX_TICKET_AGE`.
    #[error("ticket too old")]
    Expired,

    /// `now` is before the issue time.
    #[error("ticket issued in the future")]
    NotYetValid,

    /// Encryption failed while issuing.
    #[error("ticket encryption failed")]
    Encrypt,
}
