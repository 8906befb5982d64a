//! Key material kept in the state directory.
//!
//! Ticket keys are raw 32-byte files named `{id}.key`. All of them are loaded
//! so tickets sealed before a rotation still open; the newest file is the one
//! new tickets are sealed under.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use tessera_auth::identity::PrivateKey;
use tessera_auth::ticket::{KeyRing, TicketKey, TicketKeyProvider};
use tessera_ports::fsutil::{create_private_dir, write_private};

const KEY_EXT: &str = "key";

/// Load every ticket key in `dir`, generating one if there are none.
pub fn load_ticket_keys(dir: &Path) -> anyhow::Result<KeyRing> {
    create_private_dir(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXT) {
            continue;
        }
        let modified = std::fs::metadata(&path)?.modified()?;
        found.push((modified, path));
    }
    found.sort();

    let Some((_, newest)) = found.pop() else {
        let key = rotate_ticket_key(dir)?;
        return Ok(KeyRing::new(key));
    };

    let mut ring = KeyRing::new(read_ticket_key(&newest)?);
    for (_, path) in &found {
        ring.retain(read_ticket_key(path)?);
    }
    tracing::info!(
        keys = ring.key_count(),
        current = format!("{:08x}", ring.current().id()),
        "Loaded ticket keys"
    );
    Ok(ring)
}

fn read_ticket_key(path: &Path) -> anyhow::Result<TicketKey> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    TicketKey::from_bytes(&bytes).with_context(|| format!("invalid ticket key {}", path.display()))
}

/// Write a fresh ticket key into `dir`. It becomes current on next load.
pub fn rotate_ticket_key(dir: &Path) -> anyhow::Result<TicketKey> {
    create_private_dir(dir)?;
    let key = TicketKey::generate();
    let path = dir.join(format!("{:08x}.{KEY_EXT}", key.id()));
    write_private(&path, key.as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(id = format!("{:08x}", key.id()), "Generated ticket key");
    Ok(key)
}

/// Load the asset signing key, generating it on first use.
pub fn load_or_create_signer(path: &Path) -> anyhow::Result<PrivateKey> {
    if path.exists() {
        let der = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        return PrivateKey::from_pkcs8_der(&der)
            .with_context(|| format!("invalid signer key {}", path.display()));
    }

    if let Some(parent) = path.parent() {
        create_private_dir(parent)?;
    }
    let key = PrivateKey::generate();
    write_private(path, key.to_pkcs8_der()?.as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        public_key = %key.public_key().to_hex(),
        "Generated asset signer"
    );
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_load_generates_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("ticket-keys");
        let ring = load_ticket_keys(&keys).unwrap();
        assert_eq!(ring.key_count(), 1);

        let again = load_ticket_keys(&keys).unwrap();
        assert_eq!(again.current().id(), ring.current().id());
    }

    #[test]
    fn test_rotated_key_is_current_and_old_key_retained() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_ticket_keys(dir.path()).unwrap().current().id();

        // mtime resolution can be coarse; make the order unambiguous
        std::thread::sleep(std::time::Duration::from_millis(20));
        let rotated = rotate_ticket_key(dir.path()).unwrap();
        let old = std::fs::File::options()
            .write(true)
            .open(dir.path().join(format!("{first:08x}.key")))
            .unwrap();
        old.set_modified(SystemTime::UNIX_EPOCH).unwrap();

        let ring = load_ticket_keys(dir.path()).unwrap();
        assert_eq!(ring.key_count(), 2);
        assert_eq!(ring.current().id(), rotated.id());
        assert!(ring.lookup(first).is_some());
    }

    #[test]
    fn test_signer_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/asset-signer.der");
        let first = load_or_create_signer(&path).unwrap();
        let second = load_or_create_signer(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }
}
