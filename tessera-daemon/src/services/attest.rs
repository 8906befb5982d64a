//! Attestation sessions: Initiate hands out a sealed ticket, Complete checks the
//! quote against it and, for enrolled hosts, returns their sealed assets.
//!
//! The ticket is the whole session. Nothing is kept server-side between the
//! two calls, so any replica holding the ticket keys can serve either half.

use std::sync::Arc;
use std::time::Duration;

use tessera_auth::identity::EkPubHash;
use tessera_auth::quote::check_ak_attributes;
use tessera_auth::ticket::AttestationTicket;
use tessera_auth::{QuoteChallenge, QuoteError, TicketKeyProvider};
use tessera_core::audit::{AuditAction, AuditEvent, AuditTarget};
use tessera_core::wire::InitialContext;
use tessera_core::{AttestOutcome, QuoteBundle, VerificationFailure};
use tessera_ports::exec::with_timeout;
use tessera_ports::{PortError, TpmPort};

use super::AssetPipeline;
use crate::audit::AuditLog;
use crate::store::EnrollmentStore;

pub struct AttestationService {
    keys: Arc<dyn TicketKeyProvider>,
    tpm: Arc<dyn TpmPort>,
    store: Arc<EnrollmentStore>,
    pipeline: AssetPipeline,
    audit: Arc<AuditLog>,
    pcrs: String,
    timeout: Duration,
}

impl AttestationService {
    pub fn new(
        keys: Arc<dyn TicketKeyProvider>,
        tpm: Arc<dyn TpmPort>,
        store: Arc<EnrollmentStore>,
        pipeline: AssetPipeline,
        audit: Arc<AuditLog>,
        pcrs: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            keys,
            tpm,
            store,
            pipeline,
            audit,
            pcrs: pcrs.into(),
            timeout,
        }
    }

    /// Issue a ticket for `ekpubhash`. Enrollment is not consulted.
    pub fn initiate(&self, ekpubhash: &str, now: i64) -> Result<InitialContext, VerificationFailure> {
        let hash =
            EkPubHash::parse(ekpubhash).map_err(|e| VerificationFailure::Request(e.to_string()))?;
        let ticket = AttestationTicket::new(hash.clone(), &self.pcrs, now);
        let sealed = ticket.seal(self.keys.as_ref())?;

        tracing::debug!(ekpubhash = %hash, "Issued ticket");
        self.audit
            .record(AuditEvent::new(AuditAction::TicketIssued, AuditTarget::Identity(hash.clone())));
        Ok(InitialContext {
            ekpubhash: hash.to_string(),
            pcrs: ticket.pcrs,
            nonce: ticket.nonce,
            ticket: sealed,
        })
    }

    /// Verify a quote against its ticket and produce the host's assets.
    pub async fn complete(
        &self,
        initial: &InitialContext,
        quote: &[u8],
        now: i64,
    ) -> AttestOutcome {
        let hash = match self.verify(initial, quote, now).await {
            Ok(hash) => hash,
            Err(failure) => {
                self.rejected(initial, &failure);
                return AttestOutcome::VerificationFailed(failure);
            }
        };

        let record = match self.store.get(&hash).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(
                    target: "tessera::security",
                    ekpubhash = %hash,
                    "Attestation from unenrolled identity"
                );
                self.audit.record(AuditEvent::new(
                    AuditAction::UnenrolledAttempt,
                    AuditTarget::Identity(hash.clone()),
                ));
                return AttestOutcome::Unenrolled(hash);
            }
            Err(e) => {
                tracing::error!(ekpubhash = %hash, error = %e, "Failed to load enrollment record");
                return AttestOutcome::GenerationFailed(e.to_string());
            }
        };

        match self.pipeline.generate(&record).await {
            Ok(archive) => {
                self.audit.record(
                    AuditEvent::new(AuditAction::AssetsIssued, AuditTarget::Identity(hash))
                        .with_metadata("bytes", archive.len().to_string()),
                );
                AttestOutcome::Issued(archive)
            }
            Err(e) => {
                tracing::error!(ekpubhash = %hash, error = %e, "Asset generation failed");
                self.audit.record(
                    AuditEvent::new(AuditAction::GenerationFailed, AuditTarget::Identity(hash))
                        .with_metadata("reason", e.to_string()),
                );
                AttestOutcome::GenerationFailed(e.to_string())
            }
        }
    }

    async fn verify(
        &self,
        initial: &InitialContext,
        quote: &[u8],
        now: i64,
    ) -> Result<EkPubHash, VerificationFailure> {
        let ticket = AttestationTicket::open(&initial.ticket, self.keys.as_ref())?;
        ticket.check_claims(&initial.ekpubhash, &initial.nonce)?;
        ticket.check_fresh(now)?;

        let bundle = QuoteBundle::from_archive(quote)
            .map_err(|e| VerificationFailure::Request(format!("quote archive: {e}")))?;
        if EkPubHash::of(&bundle.ek_pub) != ticket.ekpubhash {
            return Err(QuoteError::IdentityMismatch.into());
        }

        let attributes = with_timeout(
            "ak_attributes",
            self.timeout,
            self.tpm.ak_attributes(&bundle.ak_pub),
        )
        .await
        .map_err(port_failure)?;
        check_ak_attributes(&attributes)?;

        let challenge = QuoteChallenge {
            nonce: ticket.nonce_bytes()?,
            pcrs: ticket.pcrs.clone(),
        };
        with_timeout(
            "checkquote",
            self.timeout,
            self.tpm.check_quote(&bundle, &challenge),
        )
        .await
        .map_err(port_failure)?;

        Ok(ticket.ekpubhash)
    }

    fn rejected(&self, initial: &InitialContext, failure: &VerificationFailure) {
        let target = match EkPubHash::parse(&initial.ekpubhash) {
            Ok(hash) => AuditTarget::Identity(hash),
            Err(_) => AuditTarget::Store,
        };
        let action = match failure {
            VerificationFailure::Request(reason) => {
                tracing::info!(reason = %reason, "Rejected complete request");
                return;
            }
            VerificationFailure::Ticket(e) => {
                tracing::warn!(
                    target: "tessera::security",
                    ekpubhash = %initial.ekpubhash,
                    reason = %e,
                    "Ticket rejected"
                );
                AuditAction::TicketRejected
            }
            VerificationFailure::Quote(e) => {
                tracing::warn!(
                    target: "tessera::security",
                    ekpubhash = %initial.ekpubhash,
                    reason = %e,
                    "Quote verification failed"
                );
                AuditAction::QuoteRejected
            }
            VerificationFailure::Collaborator(e) => {
                tracing::error!(ekpubhash = %initial.ekpubhash, error = %e, "Quote verifier failed");
                AuditAction::QuoteRejected
            }
        };
        self.audit
            .record(AuditEvent::new(action, target).with_metadata("reason", failure.to_string()));
    }
}

/// A verdict from the TPM port stays a quote failure; anything else means the
/// verifier itself broke.
fn port_failure(e: PortError) -> VerificationFailure {
    match e {
        PortError::Quote(q) => VerificationFailure::Quote(q),
        other => VerificationFailure::Collaborator(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_verdict_stays_quote_failure() {
        let failure = port_failure(PortError::Quote(QuoteError::NonceMismatch));
        assert_eq!(failure, VerificationFailure::Quote(QuoteError::NonceMismatch));
    }

    #[test]
    fn test_port_timeout_is_collaborator_failure() {
        let failure = port_failure(PortError::Timeout {
            tool: "tpm2".into(),
            secs: 60,
        });
        assert!(matches!(failure, VerificationFailure::Collaborator(_)));
    }
}
