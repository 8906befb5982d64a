use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::archive::{read_members, write_members};
use tokio::process::Command;

use super::Sealer;
use crate::exec::run_checked;
use crate::PortError;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Sealer backed by the safeboot `api_seal` / `api_unseal` scripts.
///
/// A secret seal may produce a directory of parts rather than a single file;
/// such output is carried as a ZIP of its files and expanded again before
/// unsealing.
#[derive(Debug, Clone)]
pub struct SafebootTools {
    seal: PathBuf,
    unseal: PathBuf,
    signer: Option<PathBuf>,
    verifier: Option<PathBuf>,
    timeout: Duration,
}

impl SafebootTools {
    /// Use `api_seal` and `api_unseal` from `dir`.
    pub fn new(dir: impl AsRef<Path>, timeout: Duration) -> Self {
        let dir = dir.as_ref();
        Self {
            seal: dir.join("api_seal"),
            unseal: dir.join("api_unseal"),
            signer: None,
            verifier: None,
            timeout,
        }
    }

    /// Signing key used when sealing (server side).
    #[must_use]
    pub fn with_signer(mut self, path: impl Into<PathBuf>) -> Self {
        self.signer = Some(path.into());
        self
    }

    /// Verification key used when unsealing (client side).
    #[must_use]
    pub fn with_verifier(mut self, path: impl Into<PathBuf>) -> Self {
        self.verifier = Some(path.into());
        self
    }

    fn key<'a>(key: &'a Option<PathBuf>, what: &str) -> Result<&'a Path, PortError> {
        key.as_deref()
            .ok_or_else(|| PortError::Unsupported(format!("no {what} key configured")))
    }

    async fn run(
        &self,
        program: &Path,
        tool: &str,
        args: &[&Path],
        sign_only: bool,
    ) -> Result<(), PortError> {
        let mut cmd = Command::new(program);
        if sign_only {
            cmd.arg("-s");
        }
        cmd.args(args);
        run_checked(cmd, tool, self.timeout).await.map(drop)
    }
}

async fn read_output(path: &Path) -> Result<Vec<u8>, PortError> {
    if !tokio::fs::metadata(path).await?.is_dir() {
        return Ok(tokio::fs::read(path).await?);
    }
    let mut parts = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        parts.push((name, tokio::fs::read(entry.path()).await?));
    }
    parts.sort();
    write_members(parts.iter().map(|(n, d)| (n.as_str(), d.as_slice())))
        .map_err(|e| PortError::Invalid(e.to_string()))
}

async fn write_input(path: &Path, sealed: &[u8]) -> Result<(), PortError> {
    if !sealed.starts_with(ZIP_MAGIC) {
        return Ok(tokio::fs::write(path, sealed).await?);
    }
    let parts = read_members(sealed).map_err(|e| PortError::Invalid(e.to_string()))?;
    tokio::fs::create_dir(path).await?;
    for (name, data) in parts {
        tokio::fs::write(path.join(name), data).await?;
    }
    Ok(())
}

#[async_trait]
impl Sealer for SafebootTools {
    async fn seal_secret(&self, plaintext: &[u8], recipient: &[u8]) -> Result<Vec<u8>, PortError> {
        let signer = Self::key(&self.signer, "signing")?;
        let dir = tempfile::Builder::new().prefix("tessera-seal").tempdir()?;
        let (ek, input, output) = (
            dir.path().join("ek.pub"),
            dir.path().join("input"),
            dir.path().join("output"),
        );
        tokio::fs::write(&ek, recipient).await?;
        tokio::fs::write(&input, plaintext).await?;
        self.run(&self.seal, "api_seal", &[&ek, signer, &input, &output], false)
            .await?;
        read_output(&output).await
    }

    async fn seal_public(&self, plaintext: &[u8]) -> Result<Vec<u8>, PortError> {
        let signer = Self::key(&self.signer, "signing")?;
        let dir = tempfile::Builder::new().prefix("tessera-seal").tempdir()?;
        let (input, output) = (dir.path().join("input"), dir.path().join("output"));
        tokio::fs::write(&input, plaintext).await?;
        self.run(&self.seal, "api_seal", &[signer, &input, &output], true)
            .await?;
        read_output(&output).await
    }

    async fn unseal_secret(&self, sealed: &[u8]) -> Result<Vec<u8>, PortError> {
        let verifier = Self::key(&self.verifier, "verification")?;
        let dir = tempfile::Builder::new().prefix("tessera-unseal").tempdir()?;
        let (input, output) = (dir.path().join("input"), dir.path().join("output"));
        write_input(&input, sealed).await?;
        self.run(&self.unseal, "api_unseal", &[verifier, &input, &output], false)
            .await?;
        Ok(tokio::fs::read(&output).await?)
    }

    async fn unseal_public(&self, sealed: &[u8]) -> Result<Vec<u8>, PortError> {
        let verifier = Self::key(&self.verifier, "verification")?;
        let dir = tempfile::Builder::new().prefix("tessera-unseal").tempdir()?;
        let (input, output) = (dir.path().join("input"), dir.path().join("output"));
        write_input(&input, sealed).await?;
        self.run(&self.unseal, "api_unseal", &[verifier, &input, &output], true)
            .await?;
        Ok(tokio::fs::read(&output).await?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Install fake scripts that copy (`api_seal -s`), split into a directory
    /// (`api_seal`), or reassemble (`api_unseal`).
    fn fake_tools(dir: &Path) {
        let seal = r#"#!/bin/sh
if [ "$1" = "-s" ]; then cp "$3" "$4"; exit 0; fi
mkdir "$4" && cp "$3" "$4/data" && printf key > "$4/symkeyenc"
"#;
        let unseal = r#"#!/bin/sh
if [ "$1" = "-s" ]; then cp "$3" "$4"; exit 0; fi
test -f "$2/symkeyenc" || exit 1
cp "$2/data" "$3"
"#;
        for (name, body) in [("api_seal", seal), ("api_unseal", unseal)] {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    fn tools(dir: &Path) -> SafebootTools {
        fake_tools(dir);
        SafebootTools::new(dir, Duration::from_secs(5))
            .with_signer(dir.join("signer.pem"))
            .with_verifier(dir.join("verifier.pem"))
    }

    #[tokio::test]
    async fn test_directory_output_is_carried_as_zip() {
        let dir = tempfile::tempdir().unwrap();
        let sealer = tools(dir.path());

        let sealed = sealer.seal_secret(b"secret", b"ek").await.unwrap();
        assert!(sealed.starts_with(ZIP_MAGIC));
        let parts = read_members(&sealed).unwrap();
        assert!(parts.contains_key("symkeyenc"));

        assert_eq!(sealer.unseal_secret(&sealed).await.unwrap(), b"secret");
    }

    #[tokio::test]
    async fn test_public_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let sealer = tools(dir.path());
        let sealed = sealer.seal_public(b"[realms]").await.unwrap();
        assert_eq!(sealer.unseal_public(&sealed).await.unwrap(), b"[realms]");
    }

    #[tokio::test]
    async fn test_unseal_without_verifier_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        fake_tools(dir.path());
        let sealer = SafebootTools::new(dir.path(), Duration::from_secs(5));
        assert!(matches!(
            sealer.unseal_public(b"x").await,
            Err(PortError::Unsupported(_))
        ));
    }
}
