use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{
    check_cacheable, ArtifactCache, BuildArtifact, BuildFingerprint, StorageResult,
};

/// Filesystem-backed build cache with git-style 2-char sharding.
///
/// Layout: `<root>/entries/<first 2 hex chars>/<remaining hex chars>.json`
#[derive(Debug, Clone)]
pub struct FsArtifactCache {
    entries_dir: PathBuf,
}

impl FsArtifactCache {
    /// Create a new `FsArtifactCache` rooted at `root`. Creates `root/entries/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let entries_dir = root.as_ref().join("entries");
        fs::create_dir_all(&entries_dir)?;
        Ok(Self { entries_dir })
    }

    fn entry_path(&self, fingerprint: &BuildFingerprint) -> PathBuf {
        let hex = fingerprint.as_str();
        self.entries_dir
            .join(&hex[..2])
            .join(format!("{}.json", &hex[2..]))
    }
}

fn read_entry(path: &Path) -> StorageResult<Option<BuildArtifact>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}

fn write_entry(path: &Path, data: &[u8]) -> StorageResult<()> {
    let shard_dir = path.parent().ok_or_else(|| {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "entry path has no parent",
        ))
    })?;
    fs::create_dir_all(shard_dir)?;

    // Write to a temp file in the same directory, then rename over the entry.
    let mut tmp = NamedTempFile::new_in(shard_dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl ArtifactCache for FsArtifactCache {
    async fn cache_get(
        &self,
        fingerprint: &BuildFingerprint,
    ) -> StorageResult<Option<BuildArtifact>> {
        let path = self.entry_path(fingerprint);
        tokio::task::spawn_blocking(move || read_entry(&path)).await?
    }

    async fn cache_put(
        &self,
        fingerprint: &BuildFingerprint,
        artifact: BuildArtifact,
    ) -> StorageResult<()> {
        check_cacheable(fingerprint, &artifact)?;
        let path = self.entry_path(fingerprint);
        let data = serde_json::to_vec_pretty(&artifact)?;
        debug!(fingerprint = %fingerprint.short(), path = %path.display(), "writing cache entry");
        tokio::task::spawn_blocking(move || write_entry(&path, &data)).await?
    }
}
