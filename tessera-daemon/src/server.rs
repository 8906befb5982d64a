//! Wiring: turn a [`Config`] into a running HTTP service.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tessera_core::PlanContext;
use tessera_ports::fsutil::{create_private_dir, write_private};
use tessera_ports::issuer::Authority;
use tessera_ports::{
    CertIssuer, EmulatedTpm, Hxtool, KdcClient, KeytabSource, LocalCa, LocalSealer,
    SafebootTools, Sealer, Tpm2Tools, TpmPort,
};
use tokio::net::TcpListener;
use tokio::signal;

use crate::api::{create_router, AppState};
use crate::audit::AuditLog;
use crate::config::{CaFiles, Config, IssuerConfig, SealerConfig, TpmConfig};
use crate::keys::{load_or_create_signer, load_ticket_keys};
use crate::services::{AssetPipeline, AttestRateLimiter, AttestationService};
use crate::store::EnrollmentStore;

/// Build the shared handler state from configuration.
pub fn build_state(config: &Config) -> anyhow::Result<AppState> {
    create_private_dir(&config.state_dir)
        .with_context(|| format!("creating {}", config.state_dir.display()))?;
    let timeout = config.external_timeout();

    let store = Arc::new(EnrollmentStore::open(config.db_dir())?);
    let keys = Arc::new(load_ticket_keys(&config.ticket_key_dir())?);
    let signer = Arc::new(load_or_create_signer(&config.signer_path())?);
    let audit = Arc::new(match &config.audit_log {
        Some(path) => AuditLog::open(path)
            .with_context(|| format!("opening audit log {}", path.display()))?,
        None => AuditLog::tracing_only(),
    });

    let tpm: Arc<dyn TpmPort> = match &config.tpm {
        TpmConfig::Tools { program } => Arc::new(Tpm2Tools::new(program, timeout)),
        TpmConfig::Emulated => {
            tracing::warn!("Verifying quotes from the emulated TPM");
            Arc::new(EmulatedTpm::verifier())
        }
    };
    let issuer = build_issuer(config)?;
    let sealer: Arc<dyn Sealer> = match &config.sealer {
        SealerConfig::Tools { dir, signer } => {
            Arc::new(SafebootTools::new(dir, timeout).with_signer(signer))
        }
        SealerConfig::Local => Arc::new(LocalSealer::signing(Arc::clone(&signer))),
    };
    let keytabs: Arc<dyn KeytabSource> = Arc::new(KdcClient::new(
        config.keytab.cacert.as_deref(),
        config.keytab.clientcert.as_deref(),
        config.keytab.clientkey.as_deref(),
        timeout,
    )?);

    let pipeline = AssetPipeline::new(
        issuer,
        keytabs,
        sealer,
        PlanContext {
            domain: config.assets.domain.clone(),
        },
        timeout,
    );
    let attest = Arc::new(AttestationService::new(
        keys,
        tpm,
        Arc::clone(&store),
        pipeline,
        Arc::clone(&audit),
        config.pcrs.clone(),
        timeout,
    ));
    let limiter = config.rate_limit.enabled.then(|| {
        AttestRateLimiter::new(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst_size,
        )
    });

    Ok(AppState {
        store,
        attest,
        audit,
        signer_public: signer.public_key().to_hex(),
        limiter,
    })
}

fn build_issuer(config: &Config) -> anyhow::Result<Arc<dyn CertIssuer>> {
    let timeout = config.external_timeout();
    Ok(match &config.issuer {
        IssuerConfig::Hxtool {
            program,
            default_ca,
            https_client_ca,
        } => Arc::new(Hxtool::new(program, default_ca, https_client_ca, timeout)),
        IssuerConfig::Local {
            default_ca,
            https_client_ca,
        } => {
            let ca_dir = config.state_dir.join("ca");
            Arc::new(LocalCa::new(
                load_authority(default_ca.as_ref(), &ca_dir, "default", "Tessera Default CA")?,
                load_authority(
                    https_client_ca.as_ref(),
                    &ca_dir,
                    "https-client",
                    "Tessera HTTPS Client CA",
                )?,
            ))
        }
    })
}

/// Load a configured CA, else the one kept in `ca_dir`, else create it there.
fn load_authority(
    files: Option<&CaFiles>,
    ca_dir: &Path,
    name: &str,
    common_name: &str,
) -> anyhow::Result<Authority> {
    if let Some(files) = files {
        return Authority::load(&files.cert, &files.key)
            .with_context(|| format!("loading CA {}", files.cert.display()));
    }

    let (cert, key) = (ca_dir.join(format!("{name}.crt")), ca_dir.join(format!("{name}.key")));
    if cert.exists() && key.exists() {
        return Ok(Authority::load(&cert, &key)?);
    }

    create_private_dir(ca_dir)?;
    let authority = Authority::generate(common_name)?;
    std::fs::write(&cert, authority.certificate_pem())?;
    write_private(&key, authority.key_pem().as_bytes())?;
    tracing::info!(path = %cert.display(), "Generated local CA");
    Ok(authority)
}

/// Serve until SIGINT or SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let app = create_router(state, config.max_upload_bytes);

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!(addr = %config.listen, "tesserad listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Daemon shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_ca_persists_between_starts() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_authority(None, dir.path(), "default", "Test CA").unwrap();
        let second = load_authority(None, dir.path(), "default", "Test CA").unwrap();
        assert_eq!(first.certificate_pem(), second.certificate_pem());
    }

    #[tokio::test]
    async fn test_build_state_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            state_dir: dir.path().to_path_buf(),
            tpm: TpmConfig::Emulated,
            ..Config::default()
        };
        let state = build_state(&config).unwrap();
        assert_eq!(state.signer_public.len(), 64);
        assert!(state.limiter.is_some());
        assert!(dir.path().join("ticket-keys").is_dir());
        assert!(dir.path().join("ca/https-client.key").is_file());
    }
}
