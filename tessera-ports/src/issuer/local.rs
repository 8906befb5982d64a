//! In-process certificate authority built on rcgen.

use std::path::Path;

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, OtherNameValue, SanType,
};
use tessera_core::{CaRole, CertRequest, CertType};

use super::CertIssuer;
use crate::PortError;

/// `id-pkinit-san` (RFC 4556), used for the Kerberos principal name.
const PKINIT_SAN: [u64; 7] = [1, 3, 6, 1, 5, 2, 2];
/// `id-pkinit-KPClientAuth`.
const PKINIT_CLIENT_EKU: [u64; 8] = [1, 3, 6, 1, 5, 2, 3, 4];
/// `id-pkinit-KPKdc`.
const PKINIT_KDC_EKU: [u64; 8] = [1, 3, 6, 1, 5, 2, 3, 5];
/// `userId` (RFC 4519), the `UID=` attribute.
const UID_ATTRIBUTE: [u64; 7] = [0, 9, 2342, 19200300, 100, 1, 1];

/// CA validity when one is generated on the fly.
const GENERATED_CA_DAYS: i64 = 3650;

fn rcgen_err(e: rcgen::Error) -> PortError {
    PortError::Invalid(format!("certificate generation failed: {e}"))
}

/// A CA certificate with its signing key.
pub struct Authority {
    cert: Certificate,
    key: KeyPair,
    pem: String,
}

impl Authority {
    /// Create a fresh self-signed CA.
    pub fn generate(common_name: &str) -> Result<Self, PortError> {
        let key = KeyPair::generate().map_err(rcgen_err)?;
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = time::OffsetDateTime::now_utc();
        params.not_after = params.not_before + time::Duration::days(GENERATED_CA_DAYS);

        let cert = params.self_signed(&key).map_err(rcgen_err)?;
        let pem = cert.pem();
        Ok(Self { cert, key, pem })
    }

    /// Load a CA from its certificate and PKCS#8 key, both PEM.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, PortError> {
        let key = KeyPair::from_pem(key_pem).map_err(rcgen_err)?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem).map_err(rcgen_err)?;
        // Re-signing yields a certificate with the same subject and key, which
        // is all that issuing needs.
        let cert = params.self_signed(&key).map_err(rcgen_err)?;
        Ok(Self {
            cert,
            key,
            pem: cert_pem.to_string(),
        })
    }

    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, PortError> {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// The CA certificate as distributed to relying parties.
    pub fn certificate_pem(&self) -> &str {
        &self.pem
    }

    pub fn key_pem(&self) -> String {
        self.key.serialize_pem()
    }
}

/// Issues ECDSA P-256 certificates from in-process CAs.
///
/// RSA keys are not supported; profiles used with this issuer must set
/// `key-type` to `ec`.
pub struct LocalCa {
    default: Authority,
    https_client: Authority,
}

impl LocalCa {
    pub fn new(default: Authority, https_client: Authority) -> Self {
        Self {
            default,
            https_client,
        }
    }

    /// Generate both CAs.
    pub fn generate() -> Result<Self, PortError> {
        Ok(Self::new(
            Authority::generate("Tessera Default CA")?,
            Authority::generate("Tessera HTTPS Client CA")?,
        ))
    }

    pub fn authority(&self, role: CaRole) -> &Authority {
        match role {
            CaRole::Default => &self.default,
            CaRole::HttpsClient => &self.https_client,
        }
    }

    fn params(request: &CertRequest) -> Result<CertificateParams, PortError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        if let Some(subject) = &request.subject {
            let (kind, value) = subject
                .split_once('=')
                .ok_or_else(|| PortError::Invalid(format!("bad subject {subject:?}")))?;
            let dn_type = match kind {
                "UID" => DnType::CustomDnType(UID_ATTRIBUTE.to_vec()),
                "CN" => DnType::CommonName,
                other => {
                    return Err(PortError::Unsupported(format!("subject attribute {other}")))
                }
            };
            params.distinguished_name.push(dn_type, value);
        }

        params.not_before = time::OffsetDateTime::now_utc();
        let lifetime = i64::try_from(request.lifetime_secs).unwrap_or(i64::MAX);
        params.not_after = params
            .not_before
            .saturating_add(time::Duration::seconds(lifetime));
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = match request.cert_type {
            CertType::HttpsServer => vec![ExtendedKeyUsagePurpose::ServerAuth],
            CertType::HttpsClient => vec![
                ExtendedKeyUsagePurpose::ClientAuth,
                ExtendedKeyUsagePurpose::EmailProtection,
            ],
            CertType::PkinitClient => vec![
                ExtendedKeyUsagePurpose::ClientAuth,
                ExtendedKeyUsagePurpose::Other(PKINIT_CLIENT_EKU.to_vec()),
            ],
            CertType::PkinitKdc => vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::Other(PKINIT_KDC_EKU.to_vec()),
            ],
        };

        if let Some(hostname) = &request.hostname {
            let name = hostname
                .clone()
                .try_into()
                .map_err(|_| PortError::Invalid(format!("bad hostname {hostname:?}")))?;
            params.subject_alt_names.push(SanType::DnsName(name));
        }
        if let Some(email) = &request.email {
            let name = email
                .clone()
                .try_into()
                .map_err(|_| PortError::Invalid(format!("bad email {email:?}")))?;
            params.subject_alt_names.push(SanType::Rfc822Name(name));
        }
        if let Some(principal) = &request.principal {
            // Carried as a UTF8String; hxtool encodes the full KRB5PrincipalName.
            params.subject_alt_names.push(SanType::OtherName((
                PKINIT_SAN.to_vec(),
                OtherNameValue::Utf8String(principal.clone()),
            )));
        }
        Ok(params)
    }
}

#[async_trait]
impl CertIssuer for LocalCa {
    async fn issue(&self, request: &CertRequest) -> Result<Vec<u8>, PortError> {
        match request.key_type.to_ascii_lowercase().as_str() {
            "ec" | "ecdsa" | "p256" => {}
            other => {
                return Err(PortError::Unsupported(format!(
                    "local CA cannot generate {other} keys"
                )))
            }
        }

        let ca = self.authority(request.ca);
        let key = KeyPair::generate().map_err(rcgen_err)?;
        let cert = Self::params(request)?
            .signed_by(&key, &ca.cert, &ca.key)
            .map_err(rcgen_err)?;

        let mut pem = key.serialize_pem();
        pem.push_str(&cert.pem());
        Ok(pem.into_bytes())
    }
}
