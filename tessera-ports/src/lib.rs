//! Collaborator ports for Tessera.
//!
//! Each external collaborator sits behind an async trait so the daemon and the
//! client can be wired with production, emulated or test adapters:
//!
//! - [`TpmPort`] - identity key, quotes and quote verification
//! - [`CertIssuer`] - certificate and key issuance
//! - [`Sealer`] - sealing assets to an identity and verifying them
//! - [`KeytabSource`] - Kerberos keytab extraction
//!
//! Production adapters shell out or call HTTP services, always under an
//! explicit time budget ([`exec::run_checked`]).

pub mod error;
pub mod exec;
pub mod fsutil;
pub mod issuer;
pub mod keytab;
pub mod sealer;
pub mod tpm;

pub use error::PortError;
pub use issuer::{CertIssuer, Hxtool, LocalCa};
pub use keytab::{KdcClient, KeytabSource};
pub use sealer::{LocalSealer, SafebootTools, Sealer};
pub use tpm::{EmulatedTpm, Tpm2Tools, TpmPort};
