//! Fingerprint index over an [`ArtifactCache`].
//!
//! The raw store only knows keys and records. This layer decides what counts
//! as a usable hit: the record must be `Ready`, belong to the fingerprint it
//! is stored under, have a location, and that location must still exist.

use std::sync::Arc;

use depbundle_state::{
    check_cacheable, ArtifactCache, BuildArtifact, BuildFingerprint, StorageError,
};
use tracing::{debug, warn};

use crate::error::{BuildError, Result};
use crate::registry::AddonRegistry;

/// Classification of a cache record.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(BuildArtifact),
    Miss,
    /// A record exists but cannot be used.
    Inconsistent(String),
}

/// Cache lookups and records keyed by [`BuildFingerprint`].
#[derive(Clone)]
pub struct FingerprintIndex {
    cache: Arc<dyn ArtifactCache>,
}

impl FingerprintIndex {
    pub fn new(cache: Arc<dyn ArtifactCache>) -> Self {
        Self { cache }
    }

    /// Classify the stored record without checking remote availability.
    ///
    /// A record the store cannot decode is inconsistent, not an error; only
    /// failures to reach the store propagate.
    pub async fn inspect(&self, fingerprint: &BuildFingerprint) -> Result<CacheLookup> {
        let stored = match self.cache.cache_get(fingerprint).await {
            Ok(stored) => stored,
            Err(StorageError::Serialization(err)) => {
                return Ok(CacheLookup::Inconsistent(format!("unreadable record: {err}")));
            }
            Err(err) => return Err(err.into()),
        };
        let Some(artifact) = stored else {
            return Ok(CacheLookup::Miss);
        };
        if !artifact.is_ready() {
            // never written by record(); treat like an empty slot
            return Ok(CacheLookup::Miss);
        }
        if &artifact.fingerprint != fingerprint {
            return Ok(CacheLookup::Inconsistent(format!(
                "record belongs to fingerprint {}",
                artifact.fingerprint
            )));
        }
        if artifact.location.is_none() {
            return Ok(CacheLookup::Inconsistent(
                "ready record has no location".to_string(),
            ));
        }
        Ok(CacheLookup::Hit(artifact))
    }

    /// Usable artifact for `fingerprint`, if any.
    ///
    /// Inconsistent records are logged and reported as a miss, so the caller
    /// rebuilds and the next [`record`](Self::record) overwrites them.
    pub async fn lookup(
        &self,
        fingerprint: &BuildFingerprint,
        registry: &dyn AddonRegistry,
    ) -> Result<Option<BuildArtifact>> {
        let artifact = match self.inspect(fingerprint).await? {
            CacheLookup::Hit(artifact) => artifact,
            CacheLookup::Miss => {
                debug!(fingerprint = %fingerprint.short(), "cache miss");
                return Ok(None);
            }
            CacheLookup::Inconsistent(reason) => {
                report_inconsistency(fingerprint, reason);
                return Ok(None);
            }
        };

        let Some(location) = &artifact.location else {
            return Ok(None);
        };
        if !registry.artifact_exists(location).await? {
            report_inconsistency(
                fingerprint,
                format!("artifact {} is no longer available", location.location),
            );
            return Ok(None);
        }
        Ok(Some(artifact))
    }

    /// Upsert a `Ready` artifact. Anything else is refused.
    pub async fn record(&self, fingerprint: &BuildFingerprint, artifact: BuildArtifact) -> Result<()> {
        check_cacheable(fingerprint, &artifact)?;
        self.cache.cache_put(fingerprint, artifact).await?;
        debug!(fingerprint = %fingerprint.short(), "recorded artifact");
        Ok(())
    }
}

fn report_inconsistency(fingerprint: &BuildFingerprint, reason: String) {
    let err = BuildError::CacheInconsistency {
        fingerprint: fingerprint.to_string(),
        reason,
    };
    warn!(event = "cache.inconsistent", fingerprint = %fingerprint.short(), error = %err, "ignoring cache record");
}
