//! # Tessera Core
//!
//! Domain types for the Tessera attestation and enrollment system.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No subprocesses
//!
//! Archives are built and read in memory. The actual IO (the enrollment store,
//! TPM tools, certificate issuers) lives in `tessera-ports` and
//! `tessera-daemon`.
//!
//! ## Stability
//!
//! The serde formats of [`wire`], [`manifest`] and [`audit`] types are part of
//! the public API: clients and servers of different versions exchange them.
//!
//! ## Modules
//!
//! - [`profile`] - per-host enrollment profiles and asset planning
//! - [`manifest`] - the signed asset list
//! - [`archive`] - quote bundles and asset archives
//! - [`wire`] - HTTP request and response bodies
//! - [`audit`] - audit events

pub mod archive;
pub mod audit;
pub mod cert;
pub mod krb5;
pub mod manifest;
pub mod outcome;
pub mod profile;
pub mod wire;

pub use archive::{ArchiveError, AssetArchive, QuoteBundle};
pub use audit::{AuditAction, AuditEvent, AuditTarget};
pub use cert::{CaRole, CertKind, CertRequest, CertType};
pub use manifest::{Manifest, ManifestEntry, ManifestError};
pub use outcome::{AttestOutcome, VerificationFailure};
pub use profile::{AssetSource, AssetSpec, PlanContext, Profile, ProfileError};
pub use wire::{Entry, EntryList, InitialContext, JanitorReport};
