//! Shared fixtures for tessera client tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tessera_auth::PrivateKey;
use tessera_core::{AssetArchive, Manifest, ManifestEntry};
use tessera_daemon::config::TpmConfig;
use tessera_daemon::Config;
use tessera_cli::hook::InstallHook;
use tessera_ports::{EmulatedTpm, LocalSealer, PortError, Sealer, TpmPort};

/// A profile the local CA can serve without a KDC.
pub const PROFILE: &str = r#"{
    "certgen": ["https-server"],
    "hostname": "host.example.com",
    "realm": "EXAMPLE.COM",
    "key-type": "ec",
    "krb5conf": {
        "pkinit_anchors": "/etc/ca.pem",
        "dotdomain": ".example.com",
        "kdchost": "kdc.example.com",
        "kdcport": 88
    }
}"#;

/// Host side of a signer/host pair for unseal tests.
pub struct Host {
    pub dir: tempfile::TempDir,
    pub tpm: EmulatedTpm,
    pub signer: Arc<PrivateKey>,
}

impl Host {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let tpm = EmulatedTpm::open(&dir.path().join("tpm")).expect("emulated tpm");
        Self {
            dir,
            tpm,
            signer: Arc::new(PrivateKey::generate()),
        }
    }

    pub fn outdir(&self) -> PathBuf {
        self.dir.path().join("assets")
    }

    /// Sealer the host unseals with.
    pub fn sealer(&self) -> LocalSealer {
        LocalSealer::verifying(self.signer.public_key(), self.tpm.identity_secret().cloned())
    }

    /// Seal `assets` (name, public, content) the way the daemon does.
    pub async fn archive(&self, assets: &[(&str, bool, &[u8])]) -> AssetArchive {
        let server = LocalSealer::signing(Arc::clone(&self.signer));
        let ek_pub = self.tpm.identity_public().await.expect("ek.pub");

        let mut manifest = Manifest::new();
        let mut archive = AssetArchive::default();
        for (name, public, content) in assets {
            let sealed = if *public {
                server.seal_public(content).await
            } else {
                server.seal_secret(content, &ek_pub).await
            };
            manifest
                .push(ManifestEntry::new(*name, *public))
                .expect("manifest entry");
            archive
                .assets
                .insert(name.to_string(), sealed.expect("seal"));
        }
        archive.manifest = server
            .seal_public(&manifest.to_json())
            .await
            .expect("seal manifest");
        archive
    }
}

/// Hook that records each call and the content of the file it was shown.
#[derive(Default)]
pub struct RecordingHook {
    pub calls: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub fail_pre: Option<String>,
}

impl RecordingHook {
    pub fn calls(&self) -> Vec<(String, String, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, phase: &str, name: &str, path: &Path) {
        let content = std::fs::read(path).unwrap_or_default();
        self.calls
            .lock()
            .unwrap()
            .push((phase.to_string(), name.to_string(), content));
    }
}

#[async_trait]
impl InstallHook for RecordingHook {
    async fn before_install(&self, name: &str, staged: &Path) -> Result<(), PortError> {
        self.record("pre", name, staged);
        if self.fail_pre.as_deref() == Some(name) {
            return Err(PortError::Invalid(format!("refusing {name}")));
        }
        Ok(())
    }

    async fn after_install(&self, name: &str, installed: &Path) -> Result<(), PortError> {
        self.record("post", name, installed);
        Ok(())
    }
}

/// A real tesserad on 127.0.0.1 with the emulated verifier and local CA.
pub struct Daemon {
    pub dir: tempfile::TempDir,
    pub url: String,
}

impl Daemon {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            state_dir: dir.path().join("state"),
            tpm: TpmConfig::Emulated,
            ..Config::default()
        };
        let state = tessera_daemon::build_state(&config).expect("daemon state");
        let app = tessera_daemon::api::create_router(state, config.max_upload_bytes);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let url = format!("http://{}", listener.local_addr().expect("local addr"));
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        Self { dir, url }
    }
}
