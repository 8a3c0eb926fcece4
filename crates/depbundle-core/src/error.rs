//! Error taxonomy for depbundle-core.

use depbundle_state::StorageError;

use crate::consolidate::{ConstraintConflict, ThirdPartyConflict};
use crate::orchestrator::BuildStage;
use crate::requirement::{ConstraintError, InvalidPackageName};

/// Errors produced while reading or rendering a manifest.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid TOML: {0}")]
    Toml(String),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("dependency '{package}': {reason}")]
    InvalidDependency { package: String, reason: String },

    #[error("dependency '{package}': {source}")]
    Constraint {
        package: String,
        source: ConstraintError,
    },

    #[error(transparent)]
    InvalidName(#[from] InvalidPackageName),

    #[error("third-party tool '{tool}': {reason}")]
    InvalidThirdParty { tool: String, reason: String },

    #[error("cannot render manifest: {0}")]
    Render(String),
}

/// Errors reported by the addon registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("bundle '{0}' not found")]
    BundleNotFound(String),

    #[error("registry request failed: {0}")]
    Request(String),

    #[error("artifact rejected: {0}")]
    Rejected(String),
}

/// Errors reported by the external resolver/packager.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionError {
    #[error("resolver failed: {0}")]
    Resolver(String),

    #[error("third-party binary '{tool}' could not be downloaded: {reason}")]
    Download { tool: String, reason: String },

    #[error("hash mismatch for third-party binary '{tool}': expected {expected}, got {actual}")]
    HashMismatch {
        tool: String,
        expected: String,
        actual: String,
    },
}

/// Errors while writing or reading an artifact archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("archive is missing entry '{0}'")]
    MissingEntry(String),
}

/// Build errors. Every failed attempt ends in exactly one of these.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("malformed manifest for addon '{addon}': {source}")]
    MalformedManifest {
        addon: String,
        source: ManifestError,
    },

    #[error("constraint conflict: {0}")]
    ConstraintConflict(#[from] ConstraintConflict),

    #[error("third-party conflict: {0}")]
    ThirdPartyConflict(#[from] ThirdPartyConflict),

    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("upload failed after {attempts} attempt(s): {reason}")]
    Upload { attempts: u32, reason: String },

    #[error("cache inconsistency for {fingerprint}: {reason}")]
    CacheInconsistency { fingerprint: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("build cancelled")]
    Cancelled,

    #[error("a build of bundle '{bundle}' is already in progress")]
    BuildInProgress { bundle: String },

    #[error("invalid stage transition {from} -> {to}")]
    InvalidTransition { from: BuildStage, to: BuildStage },
}

/// Result type for depbundle-core operations.
pub type Result<T> = std::result::Result<T, BuildError>;
