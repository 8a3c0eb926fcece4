//! Error types for depbundle-state

use thiserror::Error;

/// Errors that can occur in the build-cache persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Fingerprint is not 64 hex characters
    #[error("invalid fingerprint: {fingerprint}")]
    InvalidFingerprint { fingerprint: String },

    /// Only `Ready` artifacts may enter the cache
    #[error("refusing to cache {status} artifact for fingerprint {fingerprint}")]
    NotReady { fingerprint: String, status: String },

    /// A stored record does not belong to the key it was stored under
    #[error("cache record under {key} belongs to fingerprint {found}")]
    FingerprintMismatch { key: String, found: String },

    /// Platform name not recognized
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization error
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Background task failed to complete
    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Task(err.to_string())
    }
}
