use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::{CaRole, CertRequest};
use tokio::process::Command;

use super::CertIssuer;
use crate::exec::run_checked;
use crate::PortError;

const OUTPUT: &str = "issued.pem";

/// Issues certificates with Heimdal's `hxtool issue-certificate`.
#[derive(Debug, Clone)]
pub struct Hxtool {
    program: PathBuf,
    default_ca: PathBuf,
    https_client_ca: PathBuf,
    timeout: Duration,
}

impl Hxtool {
    /// `default_ca` and `https_client_ca` are hxtool stores holding the CA
    /// certificate and its private key.
    pub fn new(
        program: impl Into<PathBuf>,
        default_ca: impl Into<PathBuf>,
        https_client_ca: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            default_ca: default_ca.into(),
            https_client_ca: https_client_ca.into(),
            timeout,
        }
    }

    fn ca_for(&self, role: CaRole) -> &Path {
        match role {
            CaRole::Default => &self.default_ca,
            CaRole::HttpsClient => &self.https_client_ca,
        }
    }
}

/// Build the `hxtool` argument list for `request`.
pub fn hxtool_args(request: &CertRequest, ca: &Path, output: &Path) -> Vec<String> {
    let mut args = vec![
        "issue-certificate".to_string(),
        format!("--lifetime={}", request.lifetime),
        format!("--generate-key={}", request.key_type),
        format!("--key-bits={}", request.key_bits),
        format!("--type={}", request.cert_type.as_str()),
    ];
    if let Some(hostname) = &request.hostname {
        args.push(format!("--hostname={hostname}"));
    }
    if let Some(subject) = &request.subject {
        args.push(format!("--subject={subject}"));
    }
    if let Some(email) = &request.email {
        args.push(format!("--email={email}"));
    }
    if let Some(principal) = &request.principal {
        args.push(format!("--pk-init-principal={principal}"));
    }
    args.push(format!("--ca-certificate=FILE:{}", ca.display()));
    args.push(format!("--certificate=FILE:{}", output.display()));
    args
}

#[async_trait]
impl CertIssuer for Hxtool {
    async fn issue(&self, request: &CertRequest) -> Result<Vec<u8>, PortError> {
        let dir = tempfile::Builder::new().prefix("tessera-hx").tempdir()?;
        let output = dir.path().join(OUTPUT);

        let mut cmd = Command::new(&self.program);
        cmd.args(hxtool_args(request, self.ca_for(request.ca), &output));
        run_checked(cmd, "hxtool", self.timeout).await?;

        let pem = tokio::fs::read(&output).await?;
        if pem.is_empty() {
            return Err(PortError::Invalid("hxtool produced an empty certificate".into()));
        }
        tracing::debug!(cert_type = request.cert_type.as_str(), "Issued certificate");
        Ok(pem)
    }
}
