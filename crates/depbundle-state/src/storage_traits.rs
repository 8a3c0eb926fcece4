//! Storage trait definitions for depbundle
//!
//! These types define the persisted build-cache contract:
//! - `BuildFingerprint`: content digest identifying a consolidated requirement set
//! - `BuildArtifact`: a produced dependency package and its lifecycle status
//! - `ArtifactCache`: keyed store `fingerprint -> BuildArtifact`
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// BuildFingerprint
// ---------------------------------------------------------------------------

/// Build fingerprint (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildFingerprint(String);

impl BuildFingerprint {
    /// Compute the SHA-256 fingerprint of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        BuildFingerprint(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for BuildFingerprint {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidFingerprint { fingerprint: s });
        }
        Ok(BuildFingerprint(s.to_ascii_lowercase()))
    }
}

impl From<BuildFingerprint> for String {
    fn from(fingerprint: BuildFingerprint) -> Self {
        fingerprint.0
    }
}

impl std::fmt::Display for BuildFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Target platform of a dependency package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Darwin,
}

impl Platform {
    /// All supported platforms.
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::Linux, Platform::Darwin];

    /// Platform of the running host, if supported.
    pub fn current() -> Option<Self> {
        std::env::consts::OS.parse().ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Darwin => "darwin",
        }
    }
}

impl FromStr for Platform {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "darwin" | "macos" => Ok(Platform::Darwin),
            _ => Err(StorageError::UnknownPlatform(s.to_string())),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// BuildArtifact
// ---------------------------------------------------------------------------

/// Lifecycle status of a build artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Building,
    Ready,
    Failed,
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArtifactStatus::Building => "building",
            ArtifactStatus::Ready => "ready",
            ArtifactStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where an uploaded artifact lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Archive file name
    pub filename: String,
    /// Server URL or local path of the archive
    pub location: String,
}

/// A dependency package produced for one fingerprint and platform.
///
/// Lifecycle: `Building` → `Ready` | `Failed`. Only `Ready` artifacts are
/// ever stored in an [`ArtifactCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub id: Uuid,
    pub fingerprint: BuildFingerprint,
    pub bundle_name: String,
    pub platform: Platform,
    pub created_at: DateTime<Utc>,
    /// Set once the archive has been stored somewhere
    pub location: Option<ArtifactRef>,
    /// SHA-256 of the archive bytes
    pub checksum: Option<String>,
    /// Archive size in bytes
    pub size: Option<u64>,
    pub status: ArtifactStatus,
}

impl BuildArtifact {
    /// Start a new artifact in `Building`.
    pub fn building(fingerprint: BuildFingerprint, bundle_name: &str, platform: Platform) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            bundle_name: bundle_name.to_string(),
            platform,
            created_at: Utc::now(),
            location: None,
            checksum: None,
            size: None,
            status: ArtifactStatus::Building,
        }
    }

    /// Transition to `Ready` with the stored location.
    pub fn mark_ready(&mut self, location: ArtifactRef, checksum: String, size: u64) {
        self.location = Some(location);
        self.checksum = Some(checksum);
        self.size = Some(size);
        self.status = ArtifactStatus::Ready;
    }

    /// Transition to `Failed`.
    pub fn mark_failed(&mut self) {
        self.status = ArtifactStatus::Failed;
    }

    pub fn is_ready(&self) -> bool {
        self.status == ArtifactStatus::Ready
    }
}

// ---------------------------------------------------------------------------
// ArtifactCache: fingerprint → artifact
// ---------------------------------------------------------------------------

/// Persisted build cache.
///
/// Guarantees:
/// - `cache_put` accepts only `Ready` artifacts whose fingerprint equals the key.
/// - A second `Ready` artifact for the same fingerprint replaces the first
///   (last writer wins).
/// - `cache_get` returns exactly the last artifact put for the key.
#[async_trait]
pub trait ArtifactCache: Send + Sync {
    /// Look up the artifact recorded for a fingerprint.
    async fn cache_get(&self, fingerprint: &BuildFingerprint)
        -> StorageResult<Option<BuildArtifact>>;

    /// Record a `Ready` artifact for a fingerprint.
    async fn cache_put(
        &self,
        fingerprint: &BuildFingerprint,
        artifact: BuildArtifact,
    ) -> StorageResult<()>;
}

/// Validate an artifact before it is written under `fingerprint`.
pub fn check_cacheable(fingerprint: &BuildFingerprint, artifact: &BuildArtifact) -> StorageResult<()> {
    if artifact.status != ArtifactStatus::Ready {
        return Err(StorageError::NotReady {
            fingerprint: fingerprint.to_string(),
            status: artifact.status.to_string(),
        });
    }
    if &artifact.fingerprint != fingerprint {
        return Err(StorageError::FingerprintMismatch {
            key: fingerprint.to_string(),
            found: artifact.fingerprint.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_rejects_short_hex() {
        let err = BuildFingerprint::try_from("abcd".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidFingerprint { .. }));
    }

    #[test]
    fn test_fingerprint_lowercases_valid_hex() {
        let upper = "AB".repeat(32);
        let fp = BuildFingerprint::try_from(upper).unwrap();
        assert_eq!(fp.as_str(), "ab".repeat(32));
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn test_fingerprint_serializes_as_plain_string() {
        let fp = BuildFingerprint::from_bytes(b"requests>=2.5,<3.0");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.as_str()));
        let back: BuildFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn test_fingerprint_deserialize_rejects_garbage() {
        assert!(serde_json::from_str::<BuildFingerprint>("\"not-hex\"").is_err());
    }

    #[test]
    fn test_platform_parses_aliases() {
        assert_eq!("Linux".parse::<Platform>().unwrap(), Platform::Linux);
        assert_eq!("macos".parse::<Platform>().unwrap(), Platform::Darwin);
        assert!("beos".parse::<Platform>().is_err());
    }

    #[test]
    fn test_artifact_lifecycle() {
        let fp = BuildFingerprint::from_bytes(b"x");
        let mut artifact = BuildArtifact::building(fp.clone(), "Demo", Platform::Linux);
        assert_eq!(artifact.status, ArtifactStatus::Building);
        assert!(check_cacheable(&fp, &artifact).is_err());

        artifact.mark_ready(
            ArtifactRef {
                filename: "demo.tar.gz".to_string(),
                location: "mem://demo.tar.gz".to_string(),
            },
            "00".repeat(32),
            42,
        );
        assert!(artifact.is_ready());
        assert!(check_cacheable(&fp, &artifact).is_ok());

        let other = BuildFingerprint::from_bytes(b"y");
        assert!(matches!(
            check_cacheable(&other, &artifact),
            Err(StorageError::FingerprintMismatch { .. })
        ));
    }
}
