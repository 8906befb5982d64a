//! Attester configuration for `tessera attest`.
//!
//! ```toml
//! api = "https://attest.example.com"
//! verifier = "/etc/tessera/asset-signer.hex"
//! assetdir = "/var/lib/tessera/assets"
//! callback = "/etc/tessera/install-hook"
//!
//! [tpm]
//! backend = "tools"
//!
//! [sealer]
//! kind = "local"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tessera_auth::identity::PublicKey;
use tessera_ports::{EmulatedTpm, LocalSealer, SafebootTools, Sealer, Tpm2Tools, TpmPort};

const CONFIG_FILE: &str = "attest.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttestConfig {
    /// Attestation server; `--api` overrides it.
    #[serde(default)]
    pub api: Option<String>,

    /// Asset signer verification key. A hex file for the local sealer, the
    /// key file `api_unseal` expects for the tools sealer. When unset with the
    /// local sealer, the key is fetched from the server.
    #[serde(default)]
    pub verifier: Option<PathBuf>,

    #[serde(default = "default_assetdir")]
    pub assetdir: PathBuf,

    #[serde(default)]
    pub cacert: Option<PathBuf>,

    /// Install hook program, see [`crate::hook::CommandHook`].
    #[serde(default)]
    pub callback: Option<PathBuf>,

    #[serde(default = "default_hook_timeout")]
    pub callback_timeout_secs: u64,

    #[serde(default)]
    pub tpm: TpmBackend,

    #[serde(default)]
    pub sealer: SealerBackend,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum TpmBackend {
    Tools {
        #[serde(default = "default_tpm_program")]
        program: PathBuf,
    },
    Emulated {
        dir: PathBuf,
    },
}

impl Default for TpmBackend {
    fn default() -> Self {
        TpmBackend::Tools {
            program: default_tpm_program(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SealerBackend {
    #[default]
    Local,
    Tools {
        #[serde(default = "default_safeboot_dir")]
        dir: PathBuf,
    },
}

fn default_assetdir() -> PathBuf {
    PathBuf::from("/var/lib/tessera/assets")
}

fn default_hook_timeout() -> u64 {
    60
}

fn default_tpm_program() -> PathBuf {
    PathBuf::from("tpm2")
}

fn default_safeboot_dir() -> PathBuf {
    PathBuf::from("/hcp/safeboot")
}

impl Default for AttestConfig {
    fn default() -> Self {
        Self {
            api: None,
            verifier: None,
            assetdir: default_assetdir(),
            cacert: None,
            callback: None,
            callback_timeout_secs: default_hook_timeout(),
            tpm: TpmBackend::default(),
            sealer: SealerBackend::default(),
        }
    }
}

impl AttestConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Load `path`, else the per-user config file if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    /// Build the TPM and sealer adapters.
    ///
    /// `signer_hex` is the server's asset signer, used by the local sealer
    /// when no verifier file is configured.
    pub fn backends(
        &self,
        timeout: Duration,
        signer_hex: Option<&str>,
    ) -> Result<(Arc<dyn TpmPort>, Arc<dyn Sealer>)> {
        let (tpm, identity): (Arc<dyn TpmPort>, _) = match &self.tpm {
            TpmBackend::Tools { program } => (Arc::new(Tpm2Tools::new(program, timeout)), None),
            TpmBackend::Emulated { dir } => {
                let tpm = EmulatedTpm::open(dir)
                    .with_context(|| format!("opening emulated TPM in {}", dir.display()))?;
                let identity = tpm.identity_secret().cloned();
                (Arc::new(tpm), identity)
            }
        };

        let sealer: Arc<dyn Sealer> = match &self.sealer {
            SealerBackend::Local => {
                let hex = match (&self.verifier, signer_hex) {
                    (Some(path), _) => std::fs::read_to_string(path)
                        .with_context(|| format!("reading verifier {}", path.display()))?,
                    (None, Some(hex)) => hex.to_string(),
                    (None, None) => anyhow::bail!("no asset verifier key configured"),
                };
                let verifier =
                    PublicKey::from_hex(hex.trim()).context("invalid asset verifier key")?;
                Arc::new(LocalSealer::verifying(verifier, identity))
            }
            SealerBackend::Tools { dir } => {
                let mut tools = SafebootTools::new(dir, timeout);
                if let Some(path) = &self.verifier {
                    tools = tools.with_verifier(path);
                }
                Arc::new(tools)
            }
        };
        Ok((tpm, sealer))
    }
}

/// `<config dir>/tessera/attest.toml` for the current user.
pub fn default_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "tessera", "tessera")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
