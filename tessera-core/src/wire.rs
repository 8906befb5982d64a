//! JSON bodies exchanged over HTTP.

use serde::{Deserialize, Serialize};

/// Response of Initiate, saved by the client and echoed back to Complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialContext {
    pub ekpubhash: String,
    #[serde(rename = "PCRs")]
    pub pcrs: String,
    pub nonce: String,
    pub ticket: String,
}

/// Response of a successful add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollResponse {
    pub ekpubhash: String,
}

/// One record in a query, delete or reenroll listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub ekpubhash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

/// Listing returned by query, delete and reenroll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryList {
    pub entries: Vec<Entry>,
}

/// Result of a janitor pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JanitorReport {
    /// Records present after the sweep.
    pub records: usize,
    /// Abandoned staging directories removed.
    pub staging_removed: usize,
    /// Empty record directories removed, left behind by interrupted deletes.
    #[serde(default)]
    pub empty_removed: usize,
    /// Paths in the layout that are not valid records (left in place).
    pub malformed: Vec<String>,
}

/// Error body for every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ekpubhash: Option<String>,
}

/// Health check body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub version: String,
}
