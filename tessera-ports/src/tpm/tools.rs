use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tessera_auth::quote::AK_TEMPLATE;
use tessera_auth::{QuoteChallenge, QuoteError};
use tessera_core::QuoteBundle;
use tokio::process::Command;

use super::TpmPort;
use crate::exec::run_checked;
use crate::PortError;

const TOOL: &str = "tpm2";

/// TPM adapter that drives a hardware (or swtpm) TPM through `tpm2-tools`.
///
/// Every sequence runs in a private scratch directory which is removed when
/// the call returns.
#[derive(Debug, Clone)]
pub struct Tpm2Tools {
    program: PathBuf,
    timeout: Duration,
}

impl Tpm2Tools {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<Vec<u8>, PortError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).current_dir(dir);
        run_checked(cmd, TOOL, self.timeout).await
    }

    async fn flush_all(&self, dir: &Path) -> Result<(), PortError> {
        for flag in ["--transient-object", "--loaded-session", "--saved-session"] {
            self.run(dir, &["flushcontext", flag]).await?;
        }
        Ok(())
    }

    async fn create_ek(&self, dir: &Path) -> Result<(), PortError> {
        self.run(
            dir,
            &[
                "createek",
                "--ek-context",
                "ek.ctx",
                "--key-algorithm",
                "rsa",
                "--public",
                "ek.pub",
            ],
        )
        .await
        .map(drop)
    }

    /// Open a policy session satisfied by the endorsement hierarchy secret.
    async fn secret_session(&self, dir: &Path) -> Result<(), PortError> {
        self.run(
            dir,
            &[
                "startauthsession",
                "--session",
                "session.ctx",
                "--policy-session",
            ],
        )
        .await?;
        self.run(
            dir,
            &[
                "policysecret",
                "--session",
                "session.ctx",
                "--object-context",
                "endorsement",
            ],
        )
        .await
        .map(drop)
    }
}

fn scratch() -> Result<TempDir, PortError> {
    Ok(tempfile::Builder::new().prefix("tessera-tpm").tempdir()?)
}

async fn read(dir: &Path, name: &str) -> Result<Vec<u8>, PortError> {
    Ok(tokio::fs::read(dir.join(name)).await?)
}

/// Extract the attribute flags from `tpm2 print --type TPMT_PUBLIC` output.
///
/// The flags are on the `value:` line that follows `attributes:`.
pub fn parse_attributes(printed: &str) -> Option<String> {
    let mut lines = printed.lines().skip_while(|l| l.trim() != "attributes:");
    lines.next()?;
    lines
        .map(str::trim)
        .find_map(|l| l.strip_prefix("value:"))
        .map(|v| v.trim().to_string())
}

#[async_trait]
impl TpmPort for Tpm2Tools {
    async fn identity_public(&self) -> Result<Vec<u8>, PortError> {
        let dir = scratch()?;
        self.flush_all(dir.path()).await?;
        self.create_ek(dir.path()).await?;
        read(dir.path(), "ek.pub").await
    }

    async fn quote(&self, pcrs: &str, nonce: &[u8]) -> Result<QuoteBundle, PortError> {
        let dir = scratch()?;
        let d = dir.path();
        tokio::fs::write(d.join("nonce"), hex::encode(nonce)).await?;

        self.flush_all(d).await?;
        self.create_ek(d).await?;
        self.secret_session(d).await?;
        self.run(
            d,
            &[
                "create",
                "--parent-context",
                "ek.ctx",
                "--parent-auth",
                "session:session.ctx",
                "--key-algorithm",
                "ecc:ecdsa:null",
                "--attributes",
                AK_TEMPLATE,
                "--public",
                "ak-pub.key",
                "--private",
                "ak-priv.key",
            ],
        )
        .await?;
        self.secret_session(d).await?;
        self.run(
            d,
            &[
                "load",
                "--parent-context",
                "ek.ctx",
                "--auth",
                "session:session.ctx",
                "--key-context",
                "ak.ctx",
                "--public",
                "ak-pub.key",
                "--private",
                "ak-priv.key",
            ],
        )
        .await?;
        self.run(
            d,
            &[
                "readpublic",
                "--object-context",
                "ak.ctx",
                "--output",
                "ak.pub",
                "--format",
                "tpmt",
            ],
        )
        .await?;
        self.flush_all(d).await?;

        let selection = format!("sha256:{pcrs}");
        self.run(
            d,
            &[
                "quote",
                "--key-context",
                "ak.ctx",
                "--pcr-list",
                &selection,
                "--qualification",
                "nonce",
                "--message",
                "quote.out",
                "--signature",
                "quote.sig",
                "--pcr",
                "quote.pcr",
            ],
        )
        .await?;

        Ok(QuoteBundle {
            ek_pub: read(d, "ek.pub").await?,
            ak_pub: read(d, "ak.pub").await?,
            ak_ctx: read(d, "ak.ctx").await?,
            quote_out: read(d, "quote.out").await?,
            quote_sig: read(d, "quote.sig").await?,
            quote_pcr: read(d, "quote.pcr").await?,
        })
    }

    async fn ak_attributes(&self, ak_pub: &[u8]) -> Result<String, PortError> {
        let dir = scratch()?;
        tokio::fs::write(dir.path().join("ak.pub"), ak_pub).await?;
        let printed = self
            .run(dir.path(), &["print", "--type", "TPMT_PUBLIC", "ak.pub"])
            .await
            .map_err(|e| match e {
                PortError::Failed { .. } => QuoteError::Malformed("ak.pub").into(),
                other => other,
            })?;
        parse_attributes(&String::from_utf8_lossy(&printed))
            .ok_or(PortError::Quote(QuoteError::Malformed("ak.pub")))
    }

    async fn check_quote(
        &self,
        bundle: &QuoteBundle,
        challenge: &QuoteChallenge,
    ) -> Result<(), PortError> {
        let dir = scratch()?;
        let d = dir.path();
        for (name, data) in [
            ("ak.pub", &bundle.ak_pub),
            ("quote.out", &bundle.quote_out),
            ("quote.sig", &bundle.quote_sig),
            ("quote.pcr", &bundle.quote_pcr),
        ] {
            tokio::fs::write(d.join(name), data).await?;
        }
        tokio::fs::write(d.join("nonce"), hex::encode(&challenge.nonce)).await?;

        self.run(
            d,
            &[
                "checkquote",
                "--qualification",
                "nonce",
                "--message",
                "quote.out",
                "--signature",
                "quote.sig",
                "--pcr",
                "quote.pcr",
                "--public",
                "ak.pub",
            ],
        )
        .await
        .map(drop)
        .map_err(|e| match e {
            PortError::Failed { stderr, .. } => {
                tracing::debug!(%stderr, "checkquote rejected quote");
                QuoteError::SignatureInvalid.into()
            }
            other => other,
        })
    }
}
