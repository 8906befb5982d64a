//! Verify, decrypt and install an asset archive.
//!
//! The manifest is authenticated before any entry is looked at, and nothing
//! is written until it has been. Each asset is staged as `<name>.tmp` and
//! renamed into place; an install hook sees only assets whose content
//! changed. There is no rollback: assets installed before a failure stay.

use std::io;
use std::path::{Path, PathBuf};

use tessera_core::manifest::{MANIFEST_NAME, TEMP_SUFFIX};
use tessera_core::{ArchiveError, AssetArchive, Manifest, ManifestEntry, ManifestError};
use tessera_ports::{PortError, Sealer};

use crate::hook::InstallHook;

const SECRET_MODE: u32 = 0o600;
const PUBLIC_MODE: u32 = 0o644;

#[derive(Debug, thiserror::Error)]
pub enum UnsealError {
    #[error("invalid archive: {0}")]
    Archive(#[from] ArchiveError),

    #[error("manifest verification failed: {0}")]
    ManifestSignature(#[source] PortError),

    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("archive is missing {0}")]
    MissingAsset(String),

    #[error("{name}: unseal failed: {source}")]
    Asset {
        name: String,
        #[source]
        source: PortError,
    },

    #[error("{name}: {phase} hook failed: {source}")]
    Hook {
        name: String,
        phase: &'static str,
        #[source]
        source: PortError,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> UnsealError + '_ {
    move |source| UnsealError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What an unseal run did, in manifest order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnsealReport {
    /// Assets written because they were new or changed.
    pub installed: Vec<String>,
    /// Assets whose content matched the installed file.
    pub unchanged: Vec<String>,
}

/// Unseal `archive` into `outdir`.
pub async fn unseal(
    archive: &[u8],
    outdir: &Path,
    sealer: &dyn Sealer,
    hook: Option<&dyn InstallHook>,
) -> Result<UnsealReport, UnsealError> {
    let archive = AssetArchive::from_bytes(archive)?;
    let manifest_json = sealer
        .unseal_public(&archive.manifest)
        .await
        .map_err(UnsealError::ManifestSignature)?;
    let manifest = Manifest::from_json(&manifest_json)?;
    for entry in manifest.entries() {
        if !archive.assets.contains_key(&entry.name) {
            return Err(UnsealError::MissingAsset(entry.name.clone()));
        }
    }

    std::fs::create_dir_all(outdir).map_err(io_err(outdir))?;

    let mut report = UnsealReport::default();
    for entry in manifest.entries() {
        let sealed = &archive.assets[&entry.name];
        let changed = install(entry, sealed, outdir, sealer, hook).await?;
        if changed {
            tracing::info!(asset = %entry.name, public = entry.public, "Installed asset");
            report.installed.push(entry.name.clone());
        } else {
            tracing::debug!(asset = %entry.name, "Asset unchanged");
            report.unchanged.push(entry.name.clone());
        }
    }

    let path = outdir.join(MANIFEST_NAME);
    let staged = temp_path(outdir, MANIFEST_NAME);
    write_mode(&staged, &manifest_json, PUBLIC_MODE)?;
    std::fs::rename(&staged, &path).map_err(io_err(&path))?;
    Ok(report)
}

/// Install one entry. Returns whether its content changed.
async fn install(
    entry: &ManifestEntry,
    sealed: &[u8],
    outdir: &Path,
    sealer: &dyn Sealer,
    hook: Option<&dyn InstallHook>,
) -> Result<bool, UnsealError> {
    let name = entry.name.as_str();
    let (plaintext, mode) = if entry.public {
        (sealer.unseal_public(sealed).await, PUBLIC_MODE)
    } else {
        (sealer.unseal_secret(sealed).await, SECRET_MODE)
    };
    let plaintext = plaintext.map_err(|source| UnsealError::Asset {
        name: name.to_string(),
        source,
    })?;

    let path = outdir.join(name);
    let staged = temp_path(outdir, name);
    write_mode(&staged, &plaintext, mode)?;

    let changed = match std::fs::read(&path) {
        Ok(current) => current != plaintext,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => return Err(io_err(&path)(e)),
    };
    let hook = hook.filter(|_| changed);

    if let Some(hook) = hook {
        hook.before_install(name, &staged)
            .await
            .map_err(|source| UnsealError::Hook {
                name: name.to_string(),
                phase: "pre",
                source,
            })?;
    }
    std::fs::rename(&staged, &path).map_err(io_err(&path))?;
    if let Some(hook) = hook {
        hook.after_install(name, &path)
            .await
            .map_err(|source| UnsealError::Hook {
                name: name.to_string(),
                phase: "post",
                source,
            })?;
    }
    Ok(changed)
}

fn temp_path(outdir: &Path, name: &str) -> PathBuf {
    outdir.join(format!("{name}{TEMP_SUFFIX}"))
}

/// Write `bytes` to a fresh file created with `mode`.
fn write_mode(path: &Path, bytes: &[u8], mode: u32) -> Result<(), UnsealError> {
    use std::io::Write;

    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(path)(e)),
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path).map_err(io_err(path))?;
    file.write_all(bytes).map_err(io_err(path))?;
    file.sync_all().map_err(io_err(path))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // The creation mode is filtered by the umask.
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(io_err(path))?;
    }
    Ok(())
}
