//! Quote verification primitives.
//!
//! Verifying a quote means checking, in order:
//! 1. The attestation key carries exactly the restricted-signing template
//!    ([`check_ak_attributes`])
//! 2. The quote signature verifies under that key
//! 3. The quote's qualifying data equals the ticket nonce
//! 4. The PCR values match the digest the TPM signed
//!
//! Steps 2-4 depend on the TPM encoding, so they live with the TPM adapter.
//! The [`emulated`] module implements them for the software TPM.

use std::collections::BTreeSet;

pub mod emulated;

/// Attributes a restricted attestation key must carry.
pub const AK_TEMPLATE: &str =
    "fixedtpm|stclear|fixedparent|sensitivedataorigin|userwithauth|restricted|sign";

/// Errors from quote verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum QuoteError {
    /// `sha256(ek.pub)` is not the hash the ticket was issued for.
    #[error("identity key does not match ticket")]
    IdentityMismatch,

    /// The attestation key does not have the required template.
    #[error("attestation key has wrong attributes: {0}")]
    AttributesMismatch(String),

    /// The quote signature does not verify under the attestation key.
    #[error("quote signature invalid")]
    SignatureInvalid,

    /// The qualifying data is not the ticket nonce.
    #[error("quote qualifying data does not match nonce")]
    NonceMismatch,

    /// The PCR selection or values differ from what was signed or requested.
    #[error("quote PCRs do not match")]
    PcrMismatch,

    /// A bundle member could not be parsed.
    #[error("malformed quote member: {0}")]
    Malformed(&'static str),
}

/// What the verifier expects a quote to attest to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteChallenge {
    /// Raw nonce bytes (the decoded ticket nonce).
    pub nonce: Vec<u8>,
    /// PCR selection, e.g. `"0,1,2"`.
    pub pcrs: String,
}

/// Compare an attribute string against [`AK_TEMPLATE`] as a set of flags.
///
/// Order and surrounding whitespace do not matter; extra or missing flags do.
///
/// # Errors
///
/// Returns `QuoteError::AttributesMismatch` carrying the offending value.
pub fn check_ak_attributes(value: &str) -> Result<(), QuoteError> {
    if flag_set(value) == flag_set(AK_TEMPLATE) {
        Ok(())
    } else {
        Err(QuoteError::AttributesMismatch(value.trim().to_string()))
    }
}

fn flag_set(value: &str) -> BTreeSet<&str> {
    value
        .split('|')
        .map(str::trim)
        .filter(|flag| !flag.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_accepted_in_any_order() {
        assert!(check_ak_attributes(AK_TEMPLATE).is_ok());
        assert!(check_ak_attributes(
            "fixedtpm|fixedparent|sensitivedataorigin|userwithauth|restricted|sign|stclear"
        )
        .is_ok());
        assert!(check_ak_attributes(&format!(" {AK_TEMPLATE}\n")).is_ok());
    }

    #[test]
    fn test_missing_restricted_rejected() {
        let result =
            check_ak_attributes("fixedtpm|stclear|fixedparent|sensitivedataorigin|userwithauth|sign");
        assert!(matches!(result, Err(QuoteError::AttributesMismatch(_))));
    }

    #[test]
    fn test_extra_decrypt_rejected() {
        let result = check_ak_attributes(&format!("{AK_TEMPLATE}|decrypt"));
        assert!(matches!(result, Err(QuoteError::AttributesMismatch(_))));
    }
}
