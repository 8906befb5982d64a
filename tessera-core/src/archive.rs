//! In-memory ZIP archives for quote bundles and asset archives.
//!
//! Both directions work on byte buffers; nothing is extracted to disk. Reads
//! are bounded by [`MAX_MEMBERS`] and [`MAX_MEMBER_SIZE`] and every member name
//! must be a single path component.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::manifest::{validate_name, MANIFEST_NAME};

/// Most members accepted in one archive.
pub const MAX_MEMBERS: usize = 64;

/// Largest uncompressed member accepted.
pub const MAX_MEMBER_SIZE: u64 = 16 * 1024 * 1024;

/// Errors from archive encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ArchiveError {
    #[error("archive is not a valid zip: {0}")]
    Format(String),

    #[error("archive has more than {MAX_MEMBERS} members")]
    TooManyMembers,

    #[error("archive member {0:?} exceeds size limit")]
    TooLarge(String),

    #[error("archive member name {0:?} is not allowed")]
    BadName(String),

    #[error("archive member {0:?} appears twice")]
    Duplicate(String),

    #[error("archive is missing {0:?}")]
    Missing(String),

    #[error("archive has unexpected member {0:?}")]
    Unexpected(String),
}

fn format_err(e: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Format(e.to_string())
}

/// Write `members` into a deflated ZIP, in the given order.
///
/// # Errors
///
/// Returns `ArchiveError::TooManyMembers` past [`MAX_MEMBERS`], so nothing is
/// written that [`read_members`] would refuse, or `ArchiveError::Format` if
/// the writer fails.
pub fn write_members<'a, I>(members: I) -> Result<Vec<u8>, ArchiveError>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (count, (name, data)) in members.into_iter().enumerate() {
        if count == MAX_MEMBERS {
            return Err(ArchiveError::TooManyMembers);
        }
        writer.start_file(name, options).map_err(format_err)?;
        writer.write_all(data).map_err(format_err)?;
    }
    let cursor = writer.finish().map_err(format_err)?;
    Ok(cursor.into_inner())
}

/// Read every member of a ZIP into memory.
///
/// # Errors
///
/// Returns an error on a malformed archive, too many or too large members,
/// directories, duplicate or unsafe names.
pub fn read_members(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(format_err)?;
    if archive.len() > MAX_MEMBERS {
        return Err(ArchiveError::TooManyMembers);
    }

    let mut members = BTreeMap::new();
    for index in 0..archive.len() {
        let file = archive.by_index(index).map_err(format_err)?;
        let name = file.name().to_string();
        if file.is_dir() || !is_safe_member(&name) {
            return Err(ArchiveError::BadName(name));
        }
        if file.size() > MAX_MEMBER_SIZE {
            return Err(ArchiveError::TooLarge(name));
        }

        // The declared size can lie; cap the actual read as well.
        let mut data = Vec::new();
        file.take(MAX_MEMBER_SIZE + 1)
            .read_to_end(&mut data)
            .map_err(format_err)?;
        if data.len() as u64 > MAX_MEMBER_SIZE {
            return Err(ArchiveError::TooLarge(name));
        }

        if members.insert(name.clone(), data).is_some() {
            return Err(ArchiveError::Duplicate(name));
        }
    }
    Ok(members)
}

fn is_safe_member(name: &str) -> bool {
    name == MANIFEST_NAME || validate_name(name).is_ok()
}

/// Names of the six quote bundle members.
pub const QUOTE_MEMBERS: [&str; 6] = [
    "ek.pub",
    "ak.pub",
    "ak.ctx",
    "quote.out",
    "quote.sig",
    "quote.pcr",
];

/// The evidence a client returns to Complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteBundle {
    pub ek_pub: Vec<u8>,
    pub ak_pub: Vec<u8>,
    pub ak_ctx: Vec<u8>,
    pub quote_out: Vec<u8>,
    pub quote_sig: Vec<u8>,
    pub quote_pcr: Vec<u8>,
}

impl QuoteBundle {
    /// Encode as a ZIP with the six standard members.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Format` if encoding fails.
    pub fn to_archive(&self) -> Result<Vec<u8>, ArchiveError> {
        write_members(QUOTE_MEMBERS.into_iter().zip([
            self.ek_pub.as_slice(),
            self.ak_pub.as_slice(),
            self.ak_ctx.as_slice(),
            self.quote_out.as_slice(),
            self.quote_sig.as_slice(),
            self.quote_pcr.as_slice(),
        ]))
    }

    /// Decode a ZIP that contains exactly the six standard members.
    ///
    /// # Errors
    ///
    /// Returns `Missing` or `Unexpected` if the member set differs, or any
    /// error from [`read_members`].
    pub fn from_archive(bytes: &[u8]) -> Result<Self, ArchiveError> {
        let mut members = read_members(bytes)?;
        if let Some(extra) = members.keys().find(|k| !QUOTE_MEMBERS.contains(&k.as_str())) {
            return Err(ArchiveError::Unexpected(extra.clone()));
        }
        let mut take = |name: &str| {
            members
                .remove(name)
                .ok_or_else(|| ArchiveError::Missing(name.to_string()))
        };
        Ok(Self {
            ek_pub: take("ek.pub")?,
            ak_pub: take("ak.pub")?,
            ak_ctx: take("ak.ctx")?,
            quote_out: take("quote.out")?,
            quote_sig: take("quote.sig")?,
            quote_pcr: take("quote.pcr")?,
        })
    }
}

/// Sealed manifest plus sealed assets, as returned by Complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetArchive {
    pub manifest: Vec<u8>,
    pub assets: BTreeMap<String, Vec<u8>>,
}

impl AssetArchive {
    /// Encode with `manifest` first, then assets.
    ///
    /// # Errors
    ///
    /// Returns `BadName` for an unsafe asset name, or `Format` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        for name in self.assets.keys() {
            validate_name(name).map_err(|_| ArchiveError::BadName(name.clone()))?;
        }
        let members = std::iter::once((MANIFEST_NAME, self.manifest.as_slice())).chain(
            self.assets
                .iter()
                .map(|(name, data)| (name.as_str(), data.as_slice())),
        );
        write_members(members)
    }

    /// Decode an asset archive.
    ///
    /// # Errors
    ///
    /// Returns `Missing("manifest")` when there is no manifest, or any error
    /// from [`read_members`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArchiveError> {
        let mut assets = read_members(bytes)?;
        let manifest = assets
            .remove(MANIFEST_NAME)
            .ok_or_else(|| ArchiveError::Missing(MANIFEST_NAME.to_string()))?;
        Ok(Self { manifest, assets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> QuoteBundle {
        QuoteBundle {
            ek_pub: b"ek".to_vec(),
            ak_pub: b"ak".to_vec(),
            ak_ctx: b"ctx".to_vec(),
            quote_out: b"out".to_vec(),
            quote_sig: b"sig".to_vec(),
            quote_pcr: b"pcr".to_vec(),
        }
    }

    #[test]
    fn test_quote_bundle_members() {
        let bytes = bundle().to_archive().unwrap();
        let members = read_members(&bytes).unwrap();
        assert_eq!(members.len(), 6);
        assert_eq!(QuoteBundle::from_archive(&bytes).unwrap(), bundle());
    }

    #[test]
    fn test_quote_bundle_missing_member() {
        let bytes = write_members([("ek.pub", b"ek".as_slice())]).unwrap();
        assert!(matches!(
            QuoteBundle::from_archive(&bytes),
            Err(ArchiveError::Missing(_))
        ));
    }

    #[test]
    fn test_quote_bundle_extra_member() {
        let b = bundle();
        let mut members: Vec<(&str, &[u8])> = QUOTE_MEMBERS
            .into_iter()
            .zip([
                b.ek_pub.as_slice(),
                b.ak_pub.as_slice(),
                b.ak_ctx.as_slice(),
                b.quote_out.as_slice(),
                b.quote_sig.as_slice(),
                b.quote_pcr.as_slice(),
            ])
            .collect();
        members.push(("notes.txt", b"hi"));
        let bytes = write_members(members).unwrap();
        assert_eq!(
            QuoteBundle::from_archive(&bytes),
            Err(ArchiveError::Unexpected("notes.txt".into()))
        );
    }

    #[test]
    fn test_traversal_member_rejected() {
        let bytes = write_members([("../evil", b"x".as_slice())]).unwrap();
        assert_eq!(
            read_members(&bytes),
            Err(ArchiveError::BadName("../evil".into()))
        );
    }

    #[test]
    fn test_asset_archive_requires_manifest() {
        let bytes = write_members([("krb5.conf", b"x".as_slice())]).unwrap();
        assert_eq!(
            AssetArchive::from_bytes(&bytes),
            Err(ArchiveError::Missing("manifest".into()))
        );
    }

    #[test]
    fn test_asset_archive_layout() {
        let mut archive = AssetArchive {
            manifest: b"[]".to_vec(),
            ..Default::default()
        };
        archive.assets.insert("keytab-host".into(), b"kt".to_vec());
        let bytes = archive.to_bytes().unwrap();

        let decoded = AssetArchive::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, archive);
    }

    fn archive_with(count: usize) -> AssetArchive {
        let mut archive = AssetArchive {
            manifest: b"[]".to_vec(),
            ..Default::default()
        };
        for i in 0..count {
            archive.assets.insert(format!("asset-{i}"), vec![b'x']);
        }
        archive
    }

    #[test]
    fn test_writer_refuses_what_reader_would() {
        let full = archive_with(MAX_MEMBERS - 1).to_bytes().unwrap();
        assert_eq!(AssetArchive::from_bytes(&full).unwrap().assets.len(), 63);

        assert_eq!(
            archive_with(MAX_MEMBERS).to_bytes(),
            Err(ArchiveError::TooManyMembers)
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            read_members(b"definitely not a zip"),
            Err(ArchiveError::Format(_))
        ));
    }
}
