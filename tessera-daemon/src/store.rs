//! On-disk enrollment store with a sorted in-memory index.
//!
//! Layout under the store root:
//!
//! ```text
//! db/
//!   .staging/                 scratch for in-flight adds
//!   ab/abcd/abcd...64/        one directory per enrolled identity
//!     ek.pub
//!     ekpubhash
//!     profile                 (optional)
//! ```
//!
//! The index is rebuilt from the layout on open and by the janitor. Mutations
//! hold the index write lock for their whole duration; queries take the read
//! lock. File system work runs on the blocking pool.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use tessera_auth::identity::{EkPubHash, HashError, HashPrefix, EKPUBHASH_LEN};
use tessera_core::wire::{Entry, JanitorReport};
use tessera_core::{Profile, ProfileError};
use tokio::sync::RwLock;

const STAGING_DIR: &str = ".staging";
const EK_PUB_FILE: &str = "ek.pub";
const HASH_FILE: &str = "ekpubhash";
const PROFILE_FILE: &str = "profile";

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("identity already enrolled: {0}")]
    Conflict(EkPubHash),
    #[error("no records match {0:?}")]
    NotFound(String),
    #[error(transparent)]
    InvalidPrefix(#[from] HashError),
    #[error(transparent)]
    InvalidProfile(#[from] ProfileError),
    #[error("invalid identity key: {0}")]
    InvalidKey(&'static str),
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// An enrolled identity as stored on disk.
#[derive(Debug, Clone)]
pub struct Record {
    pub ekpubhash: EkPubHash,
    pub ek_pub: Vec<u8>,
    pub profile: Option<String>,
}

/// Enrollment records keyed by identity hash.
pub struct EnrollmentStore {
    layout: Layout,
    index: RwLock<BTreeSet<EkPubHash>>,
}

impl EnrollmentStore {
    /// Open the store at `root`, creating it if needed, and index its records.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let layout = Layout { root: root.into() };
        std::fs::create_dir_all(layout.staging())?;
        let scan = layout.scan()?;
        if !scan.malformed.is_empty() || !scan.empty.is_empty() {
            tracing::warn!(
                malformed = scan.malformed.len(),
                empty = scan.empty.len(),
                "Skipped unusable store entries"
            );
        }
        tracing::info!(
            root = %layout.root.display(),
            records = scan.index.len(),
            "Opened enrollment store"
        );
        Ok(Self {
            layout,
            index: RwLock::new(scan.index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    #[cfg(test)]
    fn staging(&self) -> PathBuf {
        self.layout.staging()
    }

    /// Enroll `ek_pub` with an optional profile.
    ///
    /// Fails with `Conflict` if the identity is already enrolled; the existing
    /// record is left untouched.
    pub async fn add(&self, ek_pub: &[u8], profile: Option<&str>) -> Result<Record, StoreError> {
        if ek_pub.is_empty() {
            return Err(StoreError::InvalidKey("ek.pub is empty"));
        }
        if let Some(profile) = profile {
            Profile::parse(profile)?;
        }
        let record = Record {
            ekpubhash: EkPubHash::of(ek_pub),
            ek_pub: ek_pub.to_vec(),
            profile: profile.map(str::to_string),
        };

        let mut index = self.index.write().await;
        if index.contains(&record.ekpubhash) {
            return Err(StoreError::Conflict(record.ekpubhash));
        }

        let layout = self.layout.clone();
        let staged = record.clone();
        blocking(move || layout.install(&staged)).await?;

        index.insert(record.ekpubhash.clone());
        tracing::info!(
            ekpubhash = %record.ekpubhash,
            profile = record.profile.is_some(),
            "Enrolled identity"
        );
        Ok(record)
    }

    /// All records whose hash starts with `prefix`, in ascending order.
    pub async fn query(&self, prefix: &str, with_files: bool) -> Result<Vec<Entry>, StoreError> {
        let prefix = HashPrefix::parse(prefix)?;
        let index = self.index.read().await;
        let matched = matching(&index, &prefix);
        let layout = self.layout.clone();
        blocking(move || layout.entries(&matched, with_files)).await
    }

    /// Delete every record matching `prefix`.
    ///
    /// Records removed before an I/O failure stay removed.
    pub async fn delete(&self, prefix: &str, with_files: bool) -> Result<Vec<Entry>, StoreError> {
        let prefix = HashPrefix::parse(prefix)?;
        let mut index = self.index.write().await;
        let matched = matching(&index, &prefix);
        if matched.is_empty() {
            return Err(StoreError::NotFound(prefix.to_string()));
        }

        let layout = self.layout.clone();
        let targets = matched.clone();
        let (entries, failure) = blocking(move || Ok(layout.remove_all(&targets, with_files))).await?;

        for hash in &matched[..entries.len()] {
            index.remove(hash);
            tracing::info!(ekpubhash = %hash, "Deleted enrollment");
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(entries),
        }
    }

    /// Select records for re-enrollment. Nothing is modified.
    pub async fn reenroll(&self, prefix: &str, with_files: bool) -> Result<Vec<Entry>, StoreError> {
        let prefix = HashPrefix::parse(prefix)?;
        let index = self.index.read().await;
        let matched = matching(&index, &prefix);
        if matched.is_empty() {
            return Err(StoreError::NotFound(prefix.to_string()));
        }
        let layout = self.layout.clone();
        blocking(move || layout.entries(&matched, with_files)).await
    }

    /// Load one record.
    pub async fn get(&self, hash: &EkPubHash) -> Result<Option<Record>, StoreError> {
        let index = self.index.read().await;
        if !index.contains(hash) {
            return Ok(None);
        }
        let layout = self.layout.clone();
        let hash = hash.clone();
        blocking(move || layout.load(hash).map(Some)).await
    }

    /// Remove abandoned staging directories and empty record directories,
    /// then rebuild the index from disk.
    pub async fn janitor(&self) -> Result<JanitorReport, StoreError> {
        let mut index = self.index.write().await;
        let layout = self.layout.clone();
        let (staging_removed, empty_removed, scan) = blocking(move || {
            let staging_removed = layout.sweep_staging()?;
            let found = layout.scan()?;
            for dir in &found.empty {
                std::fs::remove_dir(dir)?;
                layout.prune_empty_parents(dir);
            }
            Ok((staging_removed, found.empty.len(), found))
        })
        .await?;

        *index = scan.index;
        for path in &scan.malformed {
            tracing::warn!(path = %path, "Malformed store entry");
        }
        tracing::info!(
            records = index.len(),
            staging_removed,
            empty_removed,
            "Janitor pass complete"
        );
        Ok(JanitorReport {
            records: index.len(),
            staging_removed,
            empty_removed,
            malformed: scan.malformed,
        })
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }
}

/// Run blocking file system work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?
}

fn matching(index: &BTreeSet<EkPubHash>, prefix: &HashPrefix) -> Vec<EkPubHash> {
    index
        .range(prefix.lowest()..)
        .take_while(|hash| hash.matches(prefix))
        .cloned()
        .collect()
}

fn refuses_replace(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENOTEMPTY) | Some(libc::EEXIST))
}

fn is_hex_name(name: &str, len: usize) -> bool {
    name.len() == len && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn dir_names(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        names.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    Ok(names)
}

/// Result of walking the shard layout.
struct Scan {
    index: BTreeSet<EkPubHash>,
    /// Relative paths of anything that does not belong.
    malformed: Vec<String>,
    /// Record directories with nothing in them.
    empty: Vec<PathBuf>,
}

/// Synchronous view of the directory layout.
#[derive(Clone)]
struct Layout {
    root: PathBuf,
}

impl Layout {
    fn staging(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    fn record_dir(&self, hash: &EkPubHash) -> PathBuf {
        self.root
            .join(hash.shard())
            .join(hash.sub_shard())
            .join(hash.as_str())
    }

    /// Stage `record` and rename it into place.
    fn install(&self, record: &Record) -> Result<(), StoreError> {
        let hash = &record.ekpubhash;
        let dest = self.record_dir(hash);
        // Any directory already at the destination is someone else's, or the
        // remains of an interrupted delete that the janitor has to clear.
        match std::fs::symlink_metadata(&dest) {
            Ok(_) => {
                tracing::warn!(ekpubhash = %hash, "Record directory already on disk");
                return Err(StoreError::Conflict(hash.clone()));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let staged = tempfile::Builder::new()
            .prefix("add-")
            .tempdir_in(self.staging())?;
        std::fs::write(staged.path().join(EK_PUB_FILE), &record.ek_pub)?;
        std::fs::write(staged.path().join(HASH_FILE), format!("{hash}\n"))?;
        if let Some(profile) = &record.profile {
            std::fs::write(staged.path().join(PROFILE_FILE), profile)?;
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Another process may have won between the check and here; a
        // non-empty target makes the rename fail.
        std::fs::rename(staged.path(), &dest).map_err(|e| {
            if refuses_replace(&e) {
                tracing::warn!(ekpubhash = %hash, "Record appeared on disk during add");
                StoreError::Conflict(hash.clone())
            } else {
                e.into()
            }
        })
    }

    fn load(&self, hash: EkPubHash) -> Result<Record, StoreError> {
        let dir = self.record_dir(&hash);
        let ek_pub = std::fs::read(dir.join(EK_PUB_FILE))?;
        let profile = match std::fs::read_to_string(dir.join(PROFILE_FILE)) {
            Ok(profile) => Some(profile),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Record {
            ekpubhash: hash,
            ek_pub,
            profile,
        })
    }

    fn entries(&self, hashes: &[EkPubHash], with_files: bool) -> Result<Vec<Entry>, StoreError> {
        hashes.iter().map(|h| self.entry(h, with_files)).collect()
    }

    fn entry(&self, hash: &EkPubHash, with_files: bool) -> Result<Entry, StoreError> {
        let files = if with_files {
            let mut names = std::fs::read_dir(self.record_dir(hash))?
                .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
                .collect::<Result<Vec<_>, _>>()?;
            names.sort();
            Some(names)
        } else {
            None
        };
        Ok(Entry {
            ekpubhash: hash.to_string(),
            files,
        })
    }

    /// Remove records in order, stopping at the first failure. Returns the
    /// entries removed so far and the failure, if any.
    fn remove_all(&self, hashes: &[EkPubHash], with_files: bool) -> (Vec<Entry>, Option<StoreError>) {
        let mut removed = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let result = self.entry(hash, with_files).and_then(|entry| {
                let dir = self.record_dir(hash);
                std::fs::remove_dir_all(&dir)?;
                self.prune_empty_parents(&dir);
                Ok(entry)
            });
            match result {
                Ok(entry) => removed.push(entry),
                Err(e) => return (removed, Some(e)),
            }
        }
        (removed, None)
    }

    fn sweep_staging(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(self.staging())? {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            removed += 1;
        }
        Ok(removed)
    }

    /// Remove the sub-shard and shard directories of `record` if they are empty.
    fn prune_empty_parents(&self, record: &Path) {
        let mut dir = record.parent();
        while let Some(d) = dir {
            if d == self.root || std::fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }

    fn scan(&self) -> io::Result<Scan> {
        let mut scan = Scan {
            index: BTreeSet::new(),
            malformed: Vec::new(),
            empty: Vec::new(),
        };

        for (shard, shard_path) in dir_names(&self.root)? {
            if shard == STAGING_DIR {
                continue;
            }
            if !is_hex_name(&shard, 2) || !shard_path.is_dir() {
                scan.malformed.push(shard);
                continue;
            }
            for (sub, sub_path) in dir_names(&shard_path)? {
                if !is_hex_name(&sub, 4) || !sub.starts_with(&shard) || !sub_path.is_dir() {
                    scan.malformed.push(format!("{shard}/{sub}"));
                    continue;
                }
                for (leaf, leaf_path) in dir_names(&sub_path)? {
                    let rel = format!("{shard}/{sub}/{leaf}");
                    if !is_hex_name(&leaf, EKPUBHASH_LEN) || !leaf.starts_with(&sub) {
                        scan.malformed.push(rel);
                        continue;
                    }
                    if leaf_path.is_dir() && std::fs::read_dir(&leaf_path)?.next().is_none() {
                        scan.empty.push(leaf_path);
                        continue;
                    }
                    match std::fs::read(leaf_path.join(EK_PUB_FILE)) {
                        Ok(ek_pub) if EkPubHash::of(&ek_pub).as_str() == leaf => {
                            scan.index.insert(EkPubHash::of(&ek_pub));
                        }
                        Ok(_) | Err(_) => scan.malformed.push(rel),
                    }
                }
            }
        }
        scan.malformed.sort();
        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, EnrollmentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let (_dir, store) = store();
        let record = store.add(b"ek-one", Some(r#"{"certgen":[]}"#)).await.unwrap();
        assert_eq!(record.ekpubhash, EkPubHash::of(b"ek-one"));

        let loaded = store.get(&record.ekpubhash).await.unwrap().unwrap();
        assert_eq!(loaded.ek_pub, b"ek-one");
        assert_eq!(loaded.profile.as_deref(), Some(r#"{"certgen":[]}"#));

        let hash = &record.ekpubhash;
        assert!(store
            .root()
            .join(hash.shard())
            .join(hash.sub_shard())
            .join(hash.as_str())
            .join("ek.pub")
            .is_file());
    }

    #[tokio::test]
    async fn test_second_add_conflicts_and_keeps_record() {
        let (_dir, store) = store();
        store.add(b"ek", Some(r#"{"certgen":[]}"#)).await.unwrap();

        let err = store.add(b"ek", None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(h) if h == EkPubHash::of(b"ek")));

        let record = store.get(&EkPubHash::of(b"ek")).await.unwrap().unwrap();
        assert_eq!(record.profile.as_deref(), Some(r#"{"certgen":[]}"#));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_record_on_disk_but_not_indexed_conflicts() {
        let (_dir, store) = store();
        let other = EnrollmentStore::open(store.root()).unwrap();
        other.add(b"racer", None).await.unwrap();

        let err = store.add(b"racer", None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        // The losing add leaves nothing in staging.
        assert_eq!(std::fs::read_dir(store.staging()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_profile_rejected() {
        let (_dir, store) = store();
        let err = store
            .add(b"ek", Some(r#"{"certgen":["pkinit-kdc"]}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidProfile(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_query_by_prefix() {
        let (_dir, store) = store();
        let mut hashes = Vec::new();
        for i in 0..40u8 {
            let record = store.add(&[i; 8], None).await.unwrap();
            hashes.push(record.ekpubhash.to_string());
        }
        hashes.sort();

        let all: Vec<String> = store
            .query("", false)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.ekpubhash)
            .collect();
        assert_eq!(all, hashes);

        for prefix in [&hashes[7][..1], &hashes[7][..3], &hashes[7][..10], &hashes[7][..]] {
            let expected: Vec<&String> =
                hashes.iter().filter(|h| h.starts_with(prefix)).collect();
            let got = store.query(&prefix.to_uppercase(), false).await.unwrap();
            assert_eq!(got.len(), expected.len(), "prefix {prefix}");
            assert!(got.iter().zip(expected).all(|(e, h)| &e.ekpubhash == h));
        }
    }

    #[tokio::test]
    async fn test_query_files_sorted() {
        let (_dir, store) = store();
        store.add(b"ek", Some("{}")).await.unwrap();
        let entries = store.query("", true).await.unwrap();
        assert_eq!(
            entries[0].files.as_deref().unwrap(),
            ["ek.pub", "ekpubhash", "profile"]
        );
    }

    #[tokio::test]
    async fn test_query_rejects_bad_prefix() {
        let (_dir, store) = store();
        assert!(matches!(
            store.query("xyz", false).await,
            Err(StoreError::InvalidPrefix(HashError::NotHex))
        ));
        assert!(matches!(
            store.query(&"a".repeat(65), false).await,
            Err(StoreError::InvalidPrefix(HashError::PrefixTooLong(65)))
        ));
        assert!(store.query("ab", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_records_and_empty_shards() {
        let (_dir, store) = store();
        let record = store.add(b"doomed", None).await.unwrap();
        let hash = record.ekpubhash.to_string();

        let deleted = store.delete(&hash, true).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].files.as_deref().unwrap(), ["ek.pub", "ekpubhash"]);
        assert!(store.get(&record.ekpubhash).await.unwrap().is_none());
        assert!(!store.root().join(&hash[..2]).exists());

        assert!(matches!(
            store.delete(&hash, false).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reenroll_lists_without_mutation() {
        let (_dir, store) = store();
        let record = store.add(b"keep", None).await.unwrap();
        let listed = store.reenroll(record.ekpubhash.as_str(), false).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(store.get(&record.ekpubhash).await.unwrap().is_some());
        assert!(matches!(
            store.reenroll(&"0".repeat(64), false).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let (dir, store) = store();
        store.add(b"a", None).await.unwrap();
        store.add(b"b", None).await.unwrap();
        drop(store);

        let reopened = EnrollmentStore::open(dir.path().join("db")).unwrap();
        assert_eq!(reopened.len().await, 2);
        assert!(reopened.get(&EkPubHash::of(b"a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_janitor_sweeps_staging_and_reports_malformed() {
        let (_dir, store) = store();
        store.add(b"a", None).await.unwrap();
        std::fs::create_dir(store.staging().join("add-abandoned")).unwrap();
        std::fs::write(store.staging().join("add-abandoned/ek.pub"), b"x").unwrap();
        std::fs::create_dir(store.root().join("zz")).unwrap();

        // A record written behind the store's back is picked up.
        let other = EnrollmentStore::open(store.root()).unwrap();
        other.add(b"b", None).await.unwrap();

        let report = store.janitor().await.unwrap();
        assert_eq!(report.staging_removed, 1);
        assert_eq!(report.records, 2);
        assert_eq!(report.malformed, ["zz"]);
        assert!(store.root().join("zz").exists());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_leftover_empty_record_dir_blocks_add_until_janitor() {
        let (_dir, store) = store();
        let hash = EkPubHash::of(b"interrupted");
        let leftover = store
            .root()
            .join(hash.shard())
            .join(hash.sub_shard())
            .join(hash.as_str());
        std::fs::create_dir_all(&leftover).unwrap();

        let err = store.add(b"interrupted", None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(h) if h == hash));
        assert!(std::fs::read_dir(&leftover).unwrap().next().is_none());
        assert!(store.is_empty().await);

        let report = store.janitor().await.unwrap();
        assert_eq!(report.empty_removed, 1);
        assert!(report.malformed.is_empty());
        assert!(!store.root().join(hash.shard()).exists());

        store.add(b"interrupted", None).await.unwrap();
        assert!(leftover.join("ek.pub").is_file());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_adds_admit_one() {
        let (_dir, store) = store();
        let store = std::sync::Arc::new(store);
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move { store.add(b"contended", None).await })
            })
            .collect();

        let mut enrolled = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => enrolled += 1,
                Err(StoreError::Conflict(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(enrolled, 1);
        assert_eq!(std::fs::read_dir(store.staging()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_query_prefix_at_top_of_range() {
        let (_dir, store) = store();
        let mut hashes = Vec::new();
        for i in 0..64u8 {
            hashes.push(store.add(&[i, 1], None).await.unwrap().ekpubhash);
        }
        hashes.sort();
        let last = hashes.last().unwrap().as_str();

        let got = store.query(&last[..1], false).await.unwrap();
        let expected = hashes.iter().filter(|h| h.as_str().starts_with(&last[..1])).count();
        assert_eq!(got.len(), expected);
        assert!(store.query("ff", false).await.is_ok());
    }
}
