//! Asset generation and sealing for an attested host.

use std::sync::Arc;
use std::time::Duration;

use tessera_core::archive::AssetArchive;
use tessera_core::manifest::MANIFEST_NAME;
use tessera_core::{
    ArchiveError, AssetSource, AssetSpec, Manifest, ManifestEntry, ManifestError, PlanContext,
    Profile, ProfileError,
};
use tessera_ports::exec::with_timeout;
use tessera_ports::{CertIssuer, KeytabSource, PortError, Sealer};

use crate::store::Record;

/// Why an archive could not be produced. Nothing is returned in any case.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("stored profile is invalid: {0}")]
    Profile(#[from] ProfileError),
    #[error("{asset}: {source}")]
    Port {
        asset: String,
        #[source]
        source: PortError,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Produces the sealed asset archive for an enrolled identity.
pub struct AssetPipeline {
    issuer: Arc<dyn CertIssuer>,
    keytabs: Arc<dyn KeytabSource>,
    sealer: Arc<dyn Sealer>,
    ctx: PlanContext,
    timeout: Duration,
}

impl AssetPipeline {
    pub fn new(
        issuer: Arc<dyn CertIssuer>,
        keytabs: Arc<dyn KeytabSource>,
        sealer: Arc<dyn Sealer>,
        ctx: PlanContext,
        timeout: Duration,
    ) -> Self {
        Self {
            issuer,
            keytabs,
            sealer,
            ctx,
            timeout,
        }
    }

    /// Generate, seal and archive every asset the record's profile asks for.
    ///
    /// All-or-nothing: the first failure aborts the whole run.
    pub async fn generate(&self, record: &Record) -> Result<Vec<u8>, GenerationError> {
        let profile = match &record.profile {
            Some(json) => Profile::parse(json)?,
            None => Profile::default(),
        };
        let plan = profile.plan(&self.ctx);

        let mut manifest = Manifest::new();
        let mut archive = AssetArchive::default();
        for spec in plan {
            let sealed = self.produce(&spec, &record.ek_pub).await.map_err(|source| {
                GenerationError::Port {
                    asset: spec.name.clone(),
                    source,
                }
            })?;
            manifest.push(ManifestEntry::new(spec.name.clone(), spec.public))?;
            archive.assets.insert(spec.name, sealed);
        }

        let manifest_json = manifest.to_json();
        archive.manifest =
            with_timeout("seal", self.timeout, self.sealer.seal_public(&manifest_json))
                .await
                .map_err(|source| GenerationError::Port {
                    asset: MANIFEST_NAME.to_string(),
                    source,
                })?;

        tracing::info!(
            ekpubhash = %record.ekpubhash,
            assets = manifest.len(),
            "Generated assets"
        );
        Ok(archive.to_bytes()?)
    }

    async fn produce(&self, spec: &AssetSpec, ek_pub: &[u8]) -> Result<Vec<u8>, PortError> {
        let plaintext = match &spec.source {
            AssetSource::Certificate(request) => {
                with_timeout("issue", self.timeout, self.issuer.issue(request)).await?
            }
            AssetSource::Keytab { api, principals } => {
                with_timeout("keytab", self.timeout, self.keytabs.extract(api, principals)).await?
            }
            AssetSource::Rendered(bytes) => bytes.clone(),
        };
        tracing::debug!(asset = %spec.name, public = spec.public, "Sealing asset");

        if spec.public {
            with_timeout("seal", self.timeout, self.sealer.seal_public(&plaintext)).await
        } else {
            with_timeout("seal", self.timeout, self.sealer.seal_secret(&plaintext, ek_pub)).await
        }
    }
}
