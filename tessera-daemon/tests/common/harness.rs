//! Test harness for tesserad end-to-end tests.
//!
//! Wires the real store, ticket codec and sealing with the emulated TPM and
//! counting fakes for the issuer and keytab service. HTTP tests bind the
//! router to 127.0.0.1:0 and talk to it with reqwest.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tessera_auth::identity::{EkPubHash, PrivateKey};
use tessera_auth::ticket::{StaticKeyProvider, TicketKey};
use tessera_core::{CertRequest, PlanContext};
use tessera_daemon::api::{create_router, AppState};
use tessera_daemon::audit::AuditLog;
use tessera_daemon::services::{AssetPipeline, AttestRateLimiter, AttestationService};
use tessera_daemon::store::EnrollmentStore;
use tessera_ports::{CertIssuer, EmulatedTpm, KeytabSource, LocalSealer, PortError};

pub const PCRS: &str = "0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16";

/// A profile touching every kind of port: two certificates, a rendered
/// public file and a keytab.
pub const FULL_PROFILE: &str = r#"{
    "certgen": ["https-server", "pkinit-client"],
    "hostname": "host.example.com",
    "realm": "EXAMPLE.COM",
    "key-type": "ec",
    "krb5conf": {
        "pkinit_anchors": "/etc/ca.pem",
        "dotdomain": ".example.com",
        "kdchost": "kdc.example.com",
        "kdcport": 88
    },
    "ktgen": {
        "api": "http://kdc.invalid",
        "host": "host/host.example.com@EXAMPLE.COM"
    }
}"#;

/// Profile issuing one HTTPS client certificate per client, `c0..`.
pub fn https_clients_profile(count: usize) -> String {
    let clients: Vec<String> = (0..count).map(|i| format!("c{i}")).collect();
    serde_json::json!({"certgen": ["https-client"], "https-clients": clients}).to_string()
}

/// Issuer returning a fixed PEM-shaped body per request.
#[derive(Default)]
pub struct CountingIssuer {
    calls: AtomicUsize,
}

impl CountingIssuer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertIssuer for CountingIssuer {
    async fn issue(&self, request: &CertRequest) -> Result<Vec<u8>, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let subject = request.subject.as_deref().unwrap_or("");
        Ok(format!("-----BEGIN FAKE-----\n{subject}\n-----END FAKE-----\n").into_bytes())
    }
}

/// Keytab source that can be told to fail.
#[derive(Default)]
pub struct CountingKeytabs {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingKeytabs {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeytabSource for CountingKeytabs {
    async fn extract(&self, _api: &str, principals: &[String]) -> Result<Vec<u8>, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PortError::Http("kdc unavailable".into()));
        }
        Ok(format!("KEYTAB {}", principals.join(",")).into_bytes())
    }
}

#[derive(Default)]
pub struct Options {
    pub failing_keytabs: bool,
    /// `(per_second, burst)`
    pub rate_limit: Option<(u32, u32)>,
}

/// A daemon plus the host-side emulated TPM that attests to it.
pub struct TestDaemon {
    pub dir: tempfile::TempDir,
    pub tpm: EmulatedTpm,
    pub store: Arc<EnrollmentStore>,
    pub service: Arc<AttestationService>,
    pub issuer: Arc<CountingIssuer>,
    pub keytabs: Arc<CountingKeytabs>,
    pub keys: Arc<StaticKeyProvider>,
    pub signer: Arc<PrivateKey>,
    state: AppState,
}

impl TestDaemon {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let tpm = EmulatedTpm::open(&dir.path().join("tpm")).expect("emulated tpm");
        let store = Arc::new(EnrollmentStore::open(dir.path().join("db")).expect("store"));
        let keys = Arc::new(StaticKeyProvider::new(TicketKey::generate()));
        let signer = Arc::new(PrivateKey::generate());
        let issuer = Arc::new(CountingIssuer::default());
        let keytabs = Arc::new(CountingKeytabs {
            calls: AtomicUsize::new(0),
            fail: options.failing_keytabs,
        });
        let audit = Arc::new(AuditLog::tracing_only());

        let pipeline = AssetPipeline::new(
            issuer.clone(),
            keytabs.clone(),
            Arc::new(LocalSealer::signing(Arc::clone(&signer))),
            PlanContext {
                domain: "example.com".into(),
            },
            Duration::from_secs(5),
        );
        let service = Arc::new(AttestationService::new(
            keys.clone(),
            Arc::new(EmulatedTpm::verifier()),
            Arc::clone(&store),
            pipeline,
            Arc::clone(&audit),
            PCRS,
            Duration::from_secs(5),
        ));

        let state = AppState {
            store: Arc::clone(&store),
            attest: Arc::clone(&service),
            audit,
            signer_public: signer.public_key().to_hex(),
            limiter: options
                .rate_limit
                .map(|(per_second, burst)| AttestRateLimiter::new(per_second, burst)),
        };

        Self {
            dir,
            tpm,
            store,
            service,
            issuer,
            keytabs,
            keys,
            signer,
            state,
        }
    }

    /// The host's `ek.pub`.
    pub async fn ek_pub(&self) -> Vec<u8> {
        use tessera_ports::TpmPort;
        self.tpm.identity_public().await.expect("identity")
    }

    pub async fn ekpubhash(&self) -> EkPubHash {
        EkPubHash::of(&self.ek_pub().await)
    }

    /// Enroll the host directly through the store.
    pub async fn enroll(&self, profile: Option<&str>) -> EkPubHash {
        let ek_pub = self.ek_pub().await;
        self.store
            .add(&ek_pub, profile)
            .await
            .expect("enroll")
            .ekpubhash
    }

    /// Sealer able to open what this daemon issues to this host.
    pub fn host_sealer(&self) -> LocalSealer {
        LocalSealer::verifying(
            self.signer.public_key(),
            self.tpm.identity_secret().cloned(),
        )
    }

    /// Serve the API on an ephemeral port and return its base URL.
    pub async fn spawn(&self) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = create_router(self.state.clone(), 16 * 1024 * 1024);
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }
}
