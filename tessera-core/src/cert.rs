//! Certificate requests handed to the issuance port.

use serde::{Deserialize, Serialize};

/// Certificate kinds a profile may ask for in `certgen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertKind {
    HttpsServer,
    HttpsClient,
    PkinitClient,
    PkinitKdc,
    PkinitIprop,
}

/// Certificate type as understood by the issuer.
///
/// `pkinit-iprop` is issued as a `pkinit-client` certificate, so it has no
/// type of its own here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertType {
    HttpsServer,
    HttpsClient,
    PkinitClient,
    PkinitKdc,
}

impl CertType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CertType::HttpsServer => "https-server",
            CertType::HttpsClient => "https-client",
            CertType::PkinitClient => "pkinit-client",
            CertType::PkinitKdc => "pkinit-kdc",
        }
    }
}

/// Which CA signs a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaRole {
    /// Servers, PKINIT clients and KDCs.
    Default,
    /// HTTPS client certificates.
    HttpsClient,
}

/// Everything needed to issue one certificate and its private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertRequest {
    pub cert_type: CertType,
    pub ca: CaRole,
    /// Lifetime as written in the profile, e.g. `"1d"`.
    pub lifetime: String,
    /// The same lifetime in seconds.
    pub lifetime_secs: u64,
    pub key_type: String,
    pub key_bits: u32,
    pub hostname: Option<String>,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub principal: Option<String>,
}
