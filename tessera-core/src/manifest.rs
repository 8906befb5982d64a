//! Asset manifests: the signed list of what an archive carries.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Archive member holding the sealed manifest.
pub const MANIFEST_NAME: &str = "manifest";

/// Suffix used for files being installed.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Errors from manifest parsing and name validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ManifestError {
    #[error("invalid asset name {0:?}")]
    InvalidName(String),

    #[error("duplicate asset name {0:?}")]
    Duplicate(String),

    #[error("manifest is not valid JSON: {0}")]
    Json(String),
}

/// Check that `name` is a single, safe path component.
///
/// # Errors
///
/// Returns `ManifestError::InvalidName` for empty names, separators, `.`/`..`,
/// the reserved manifest name, and names ending in the install suffix.
pub fn validate_name(name: &str) -> Result<(), ManifestError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name == MANIFEST_NAME
        || name.ends_with(TEMP_SUFFIX)
        || name.contains(['/', '\\', '\0']);
    if bad {
        Err(ManifestError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

/// One manifest entry, serialized as `["name", is_public]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, bool)", into = "(String, bool)")]
pub struct ManifestEntry {
    pub name: String,
    pub public: bool,
}

impl ManifestEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, public: bool) -> Self {
        Self {
            name: name.into(),
            public,
        }
    }
}

impl From<(String, bool)> for ManifestEntry {
    fn from((name, public): (String, bool)) -> Self {
        Self { name, public }
    }
}

impl From<ManifestEntry> for (String, bool) {
    fn from(entry: ManifestEntry) -> Self {
        (entry.name, entry.public)
    }
}

/// Ordered list of assets in an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Vec<ManifestEntry>);

impl Manifest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    ///
    /// # Errors
    ///
    /// Rejects invalid and duplicate names.
    pub fn push(&mut self, entry: ManifestEntry) -> Result<(), ManifestError> {
        validate_name(&entry.name)?;
        if self.0.iter().any(|e| e.name == entry.name) {
            return Err(ManifestError::Duplicate(entry.name));
        }
        self.0.push(entry);
        Ok(())
    }

    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize as the JSON array that gets sealed.
    #[must_use]
    pub fn to_json(&self) -> Vec<u8> {
        // A Vec of (String, bool) has no map keys or non-finite floats, so this
        // cannot fail.
        serde_json::to_vec(&self.0).unwrap_or_else(|_| b"[]".to_vec())
    }

    /// Parse and validate a manifest.
    ///
    /// # Errors
    ///
    /// Returns `Json` for malformed input, or the name errors of [`Manifest::push`].
    pub fn from_json(bytes: &[u8]) -> Result<Self, ManifestError> {
        let entries: Vec<ManifestEntry> =
            serde_json::from_slice(bytes).map_err(|e| ManifestError::Json(e.to_string()))?;
        let mut seen = HashSet::new();
        for entry in &entries {
            validate_name(&entry.name)?;
            if !seen.insert(entry.name.as_str()) {
                return Err(ManifestError::Duplicate(entry.name.clone()));
            }
        }
        Ok(Self(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_wire_shape() {
        let mut manifest = Manifest::new();
        manifest.push(ManifestEntry::new("krb5.conf", true)).unwrap();
        manifest.push(ManifestEntry::new("keytab-host", false)).unwrap();

        assert_eq!(
            String::from_utf8(manifest.to_json()).unwrap(),
            r#"[["krb5.conf",true],["keytab-host",false]]"#
        );
        assert_eq!(Manifest::from_json(&manifest.to_json()).unwrap(), manifest);
    }

    #[test]
    fn test_rejects_traversal_names() {
        for name in ["", ".", "..", "../etc/passwd", "a/b", "a\\b", "manifest", "x.tmp"] {
            assert!(validate_name(name).is_err(), "{name:?} should be rejected");
        }
        assert!(validate_name("https-server-host.example.org.pem").is_ok());
    }

    #[test]
    fn test_from_json_rejects_bad_entries() {
        assert!(matches!(
            Manifest::from_json(br#"[["../x",true]]"#),
            Err(ManifestError::InvalidName(_))
        ));
        assert!(matches!(
            Manifest::from_json(br#"[["a",true],["a",false]]"#),
            Err(ManifestError::Duplicate(_))
        ));
        assert!(matches!(
            Manifest::from_json(br#"{"a":true}"#),
            Err(ManifestError::Json(_))
        ));
    }

    #[test]
    fn test_push_rejects_duplicates() {
        let mut manifest = Manifest::new();
        manifest.push(ManifestEntry::new("a", true)).unwrap();
        assert!(manifest.push(ManifestEntry::new("a", false)).is_err());
        assert_eq!(manifest.len(), 1);
    }
}
