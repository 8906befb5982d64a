//! Outcomes of an attestation Complete request.

use tessera_auth::identity::EkPubHash;
use tessera_auth::{QuoteError, TicketError};

/// Why a Complete request failed verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationFailure {
    /// The request itself was unusable (missing or unparsable parts).
    #[error("bad request: {0}")]
    Request(String),

    #[error(transparent)]
    Ticket(#[from] TicketError),

    #[error(transparent)]
    Quote(#[from] QuoteError),

    /// The verifying tool failed or timed out before reaching a verdict.
    #[error("verifier unavailable: {0}")]
    Collaborator(String),
}

/// Every way a Complete request can end.
///
/// Callers match exhaustively; there is no catch-all error path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestOutcome {
    /// Verification passed and assets were generated. Carries the archive bytes.
    Issued(Vec<u8>),
    /// The quote verified but no enrollment record exists for the identity.
    Unenrolled(EkPubHash),
    /// The ticket or quote was rejected.
    VerificationFailed(VerificationFailure),
    /// A collaborator or the profile failed; nothing was returned.
    GenerationFailed(String),
}

impl AttestOutcome {
    #[must_use]
    pub fn is_issued(&self) -> bool {
        matches!(self, AttestOutcome::Issued(_))
    }
}
