//! Tessera client library.
//!
//! - [`driver`] - initiate, quote and complete against tesserad
//! - [`unseal`] - verify and install a returned asset archive
//! - [`client`] - the HTTP client with bounded retries
//! - [`enroll`] - enrollment administration helpers

pub mod client;
pub mod config;
pub mod driver;
pub mod enroll;
pub mod hook;
pub mod unseal;

pub use client::{ApiClient, ClientError, ClientOptions};
pub use driver::DriverError;
pub use unseal::{UnsealError, UnsealReport};
