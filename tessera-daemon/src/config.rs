//! Configuration for tesserad.
//!
//! Loaded once from TOML and threaded through constructors. Every field has
//! a default, so an empty (or missing) file yields a working development
//! configuration apart from the collaborator paths.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! state_dir = "/var/lib/tessera"
//!
//! [timeouts]
//! external_secs = 60
//!
//! [assets]
//! domain = "example.com"
//!
//! [tpm]
//! backend = "tools"
//!
//! [issuer]
//! kind = "local"
//!
//! [sealer]
//! kind = "local"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_auth::ticket::DEFAULT_PCRS;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TESSERA_CONFIG";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP API listens on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Root for the enrollment db, ticket keys and asset signer
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// PCR selection placed in every ticket
    #[serde(default = "default_pcrs")]
    pub pcrs: String,
    /// Largest accepted request body
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
    /// Append audit events here as JSON lines
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub assets: AssetConfig,
    #[serde(default)]
    pub tpm: TpmConfig,
    #[serde(default)]
    pub issuer: IssuerConfig,
    #[serde(default)]
    pub sealer: SealerConfig,
    #[serde(default)]
    pub keytab: KeytabConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Budget for every external collaborator call
    #[serde(default = "default_external_secs")]
    pub external_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            external_secs: default_external_secs(),
        }
    }
}

/// Rate limiting for the attestation endpoints
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Mail domain for HTTPS client certificates
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
        }
    }
}

/// How quotes are verified.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum TpmConfig {
    /// `tpm2 print` and `tpm2 checkquote`
    Tools {
        #[serde(default = "default_tpm2")]
        program: PathBuf,
    },
    /// Quotes from the software TPM
    Emulated,
}

impl Default for TpmConfig {
    fn default() -> Self {
        TpmConfig::Tools {
            program: default_tpm2(),
        }
    }
}

/// A CA certificate and key, both PEM.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IssuerConfig {
    Hxtool {
        #[serde(default = "default_hxtool")]
        program: PathBuf,
        default_ca: PathBuf,
        https_client_ca: PathBuf,
    },
    /// In-process CA; generated on start when no files are given
    Local {
        #[serde(default)]
        default_ca: Option<CaFiles>,
        #[serde(default)]
        https_client_ca: Option<CaFiles>,
    },
}

impl Default for IssuerConfig {
    fn default() -> Self {
        IssuerConfig::Local {
            default_ca: None,
            https_client_ca: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SealerConfig {
    /// safeboot `api_seal`
    Tools {
        #[serde(default = "default_safeboot_dir")]
        dir: PathBuf,
        signer: PathBuf,
    },
    /// In-process envelope signed with the asset signer
    Local,
}

impl Default for SealerConfig {
    fn default() -> Self {
        SealerConfig::Local
    }
}

/// TLS material for the keytab service client
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeytabConfig {
    #[serde(default)]
    pub cacert: Option<PathBuf>,
    #[serde(default)]
    pub clientcert: Option<PathBuf>,
    #[serde(default)]
    pub clientkey: Option<PathBuf>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tessera")
}

fn default_pcrs() -> String {
    DEFAULT_PCRS.to_string()
}

fn default_max_upload() -> usize {
    16 * 1024 * 1024
}

fn default_external_secs() -> u64 {
    60
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_requests_per_second() -> u32 {
    20
}

fn default_burst_size() -> u32 {
    50
}

fn default_domain() -> String {
    "localdomain".to_string()
}

fn default_tpm2() -> PathBuf {
    PathBuf::from("tpm2")
}

fn default_hxtool() -> PathBuf {
    PathBuf::from("hxtool")
}

fn default_safeboot_dir() -> PathBuf {
    PathBuf::from("/hcp/safeboot")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            state_dir: default_state_dir(),
            pcrs: default_pcrs(),
            max_upload_bytes: default_max_upload(),
            audit_log: None,
            timeouts: TimeoutConfig::default(),
            rate_limit: RateLimitConfig::default(),
            assets: AssetConfig::default(),
            tpm: TpmConfig::default(),
            issuer: IssuerConfig::default(),
            sealer: SealerConfig::default(),
            keytab: KeytabConfig::default(),
        }
    }
}

impl Config {
    /// Parse a config file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, else `$TESSERA_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                let config = Self::from_file(&path)?;
                tracing::info!(path = %path.display(), "Loaded config");
                Ok(config)
            }
            None => {
                tracing::info!("No config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        tessera_auth::quote::emulated::parse_selection(&self.pcrs)
            .map_err(|_| anyhow::anyhow!("Invalid pcrs selection {:?}", self.pcrs))?;
        if self.timeouts.external_secs == 0 {
            anyhow::bail!("timeouts.external_secs must be positive");
        }
        Ok(())
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.external_secs)
    }

    /// Enrollment database root.
    pub fn db_dir(&self) -> PathBuf {
        self.state_dir.join("db")
    }

    /// Directory of `*.key` ticket keys.
    pub fn ticket_key_dir(&self) -> PathBuf {
        self.state_dir.join("ticket-keys")
    }

    /// PKCS#8 DER of the Ed25519 asset signer.
    pub fn signer_path(&self) -> PathBuf {
        self.state_dir.join("asset-signer.der")
    }
}
