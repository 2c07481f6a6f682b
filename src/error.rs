//! Error types for the sigchain crate.

use thiserror::Error;

/// Main error type for chain, key, and store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A key thumbprint could not be resolved, locally or remotely.
    #[error("Encryption key not found: {0}")]
    KeyNotFound(String),

    /// A chain subject is unknown to the store.
    #[error("Block chain not found: {0}")]
    ChainNotFound(String),

    /// Chain validation failed. The reason states which invariant broke.
    #[error("Chain validation failed: {0}")]
    ChainValidation(String),

    /// ES256 signature verification failed.
    #[error("Invalid signature")]
    Signature,

    /// A remote store request failed (non-success HTTP status or transport).
    #[error("Request failed: {0}")]
    Request(String),

    /// A precondition on a value failed.
    #[error("Invalid value: {0}")]
    Value(String),

    /// The operation is defined by the protocol but not supported yet.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Malformed input data (JWS, JWK, or chain serialization).
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// JSON processing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Cryptographic operation error.
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Request(err.to_string())
    }
}

/// Result type alias for sigchain operations.
pub type Result<T> = std::result::Result<T, Error>;
