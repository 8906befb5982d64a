//! Port error type.

use tessera_auth::{QuoteError, SealError};

/// Errors returned by collaborator ports.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PortError {
    /// The collaborator did not answer within its budget.
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    /// A subprocess could not be started.
    #[error("{tool} failed to execute: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// A subprocess ran and exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The collaborator returned something unusable.
    #[error("invalid response: {0}")]
    Invalid(String),

    /// An HTTP collaborator could not be reached or refused the request.
    #[error("http error: {0}")]
    Http(String),

    /// The adapter cannot do what was asked (e.g. an RSA key in the local CA).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Quote verification failed.
    #[error(transparent)]
    Quote(#[from] QuoteError),

    /// Sealing or unsealing failed.
    #[error(transparent)]
    Seal(#[from] SealError),
}

impl From<reqwest::Error> for PortError {
    fn from(e: reqwest::Error) -> Self {
        PortError::Http(e.to_string())
    }
}
