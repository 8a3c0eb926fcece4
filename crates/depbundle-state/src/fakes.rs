//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryArtifactCache` that satisfies the `ArtifactCache` contract
//! without any external dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryArtifactCache
// ---------------------------------------------------------------------------

/// In-memory build cache backed by a `HashMap<fingerprint, artifact>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactCache {
    entries: Mutex<HashMap<String, BuildArtifact>>,
    puts: AtomicUsize,
}

impl MemoryArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `cache_put` calls.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of cached fingerprints.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a record without validation, to simulate a corrupted store.
    pub fn insert_raw(&self, fingerprint: &BuildFingerprint, artifact: BuildArtifact) {
        self.entries
            .lock()
            .unwrap()
            .insert(fingerprint.as_str().to_string(), artifact);
    }
}

#[async_trait]
impl ArtifactCache for MemoryArtifactCache {
    async fn cache_get(
        &self,
        fingerprint: &BuildFingerprint,
    ) -> StorageResult<Option<BuildArtifact>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(fingerprint.as_str()).cloned())
    }

    async fn cache_put(
        &self,
        fingerprint: &BuildFingerprint,
        artifact: BuildArtifact,
    ) -> StorageResult<()> {
        check_cacheable(fingerprint, &artifact)?;
        let mut entries = self.entries.lock().unwrap();
        entries.insert(fingerprint.as_str().to_string(), artifact);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
