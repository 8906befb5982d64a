//! Enrollment administration: add, query, delete, reenroll, janitor.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use tessera_auth::EkPubHash;
use tessera_core::wire::{EntryList, JanitorReport};
use tessera_core::Profile;

use crate::client::ApiClient;

/// Read and validate a profile file before sending it.
pub fn read_profile(path: &Path) -> Result<String> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile {}", path.display()))?;
    Profile::parse(&json).with_context(|| format!("Invalid profile {}", path.display()))?;
    Ok(json)
}

/// Enroll the identity key in `ek_pub_path`.
pub async fn add(client: &ApiClient, ek_pub_path: &Path, profile: Option<&Path>) -> Result<String> {
    let ek_pub = std::fs::read(ek_pub_path)
        .with_context(|| format!("Failed to read {}", ek_pub_path.display()))?;
    let profile = profile.map(read_profile).transpose()?;

    let expected = EkPubHash::of(&ek_pub);
    let added = client
        .add(&ek_pub, profile.as_deref())
        .await
        .context("Enrollment failed")?;
    anyhow::ensure!(
        added.ekpubhash == expected.as_str(),
        "server enrolled {} but ek.pub hashes to {expected}",
        added.ekpubhash
    );
    Ok(added.ekpubhash)
}

/// One hash per line, followed by its files when listed.
pub fn format_entries(list: &EntryList) -> String {
    let mut out = String::new();
    for entry in &list.entries {
        let _ = writeln!(out, "{}", entry.ekpubhash);
        for file in entry.files.iter().flatten() {
            let _ = writeln!(out, "    {file}");
        }
    }
    out
}

pub fn format_janitor(report: &JanitorReport) -> String {
    let mut out = format!(
        "records: {}\nstaging removed: {}\nempty removed: {}\n",
        report.records, report.staging_removed, report.empty_removed
    );
    for path in &report.malformed {
        let _ = writeln!(out, "malformed: {path}");
    }
    out
}
