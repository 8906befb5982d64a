//! Tessera daemon: attestation sessions, asset delivery and the enrollment
//! store behind one HTTP API.

pub mod api;
pub mod audit;
pub mod config;
pub mod keys;
pub mod server;
pub mod services;
pub mod store;

pub use config::Config;
pub use server::{build_state, run};
