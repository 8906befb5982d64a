//! Client side of the attestation protocol.
//!
//! [`initiate`], [`quote`] and [`complete`] are the three protocol steps;
//! [`attest`] runs them back to back and installs the result.

use std::path::{Path, PathBuf};

use tessera_auth::EkPubHash;
use tessera_core::wire::InitialContext;
use tessera_core::{ArchiveError, QuoteBundle};
use tessera_ports::{PortError, Sealer, TpmPort};

use crate::client::{ApiClient, ClientError};
use crate::hook::InstallHook;
use crate::unseal::{unseal, UnsealError, UnsealReport};

/// Marker written into the asset directory after a successful run.
pub const TOUCH_FILE: &str = "touch";

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("tpm: {0}")]
    Tpm(#[from] PortError),

    #[error("server answered for {got}, expected {expected}")]
    WrongIdentity { expected: EkPubHash, got: String },

    #[error("invalid nonce in initial context")]
    Nonce,

    #[error("quote bundle: {0}")]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Unseal(#[from] UnsealError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Hash of this host's identity key.
pub async fn ekpubhash(tpm: &dyn TpmPort) -> Result<EkPubHash, DriverError> {
    Ok(EkPubHash::of(&tpm.identity_public().await?))
}

/// Ask the server for a ticket bound to this host's identity.
pub async fn initiate(client: &ApiClient, tpm: &dyn TpmPort) -> Result<InitialContext, DriverError> {
    let hash = ekpubhash(tpm).await?;
    tracing::info!(ekpubhash = %hash, server = client.base(), "Initiating attestation");
    let initial = client.initiate(hash.as_str()).await?;
    if hash.as_str() != initial.ekpubhash {
        return Err(DriverError::WrongIdentity {
            expected: hash,
            got: initial.ekpubhash,
        });
    }
    Ok(initial)
}

/// Quote the ticket's PCR selection, qualified by its nonce.
pub async fn quote(tpm: &dyn TpmPort, initial: &InitialContext) -> Result<QuoteBundle, DriverError> {
    let nonce = hex::decode(&initial.nonce).map_err(|_| DriverError::Nonce)?;
    tracing::debug!(pcrs = %initial.pcrs, "Quoting");
    Ok(tpm.quote(&initial.pcrs, &nonce).await?)
}

/// Submit the quote and return the sealed asset archive.
pub async fn complete(
    client: &ApiClient,
    initial: &InitialContext,
    bundle: &QuoteBundle,
) -> Result<Vec<u8>, DriverError> {
    let archive = client.complete(initial, &bundle.to_archive()?).await?;
    tracing::info!(bytes = archive.len(), "Received asset archive");
    Ok(archive)
}

/// Run a full attestation and install the assets into `assetdir`.
pub async fn attest(
    client: &ApiClient,
    tpm: &dyn TpmPort,
    sealer: &dyn Sealer,
    assetdir: &Path,
    hook: Option<&dyn InstallHook>,
) -> Result<UnsealReport, DriverError> {
    let initial = initiate(client, tpm).await?;
    let bundle = quote(tpm, &initial).await?;
    let archive = complete(client, &initial, &bundle).await?;
    let report = unseal(&archive, assetdir, sealer, hook).await?;

    let touch = assetdir.join(TOUCH_FILE);
    std::fs::write(&touch, b"").map_err(|source| DriverError::Io {
        path: touch.clone(),
        source,
    })?;
    tracing::info!(
        installed = report.installed.len(),
        unchanged = report.unchanged.len(),
        "Attestation complete"
    );
    Ok(report)
}
