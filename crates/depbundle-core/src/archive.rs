//! Dependency package archives.
//!
//! A package is a gzip-compressed tar with three entries:
//!
//! | entry | content |
//! |---|---|
//! | `pyproject.toml` | the exact consolidated manifest handed to the resolver |
//! | `metadata.json` | [`PackageMetadata`] |
//! | `environment/packages.bin` | resolver output |
//!
//! Entry headers carry no timestamps, so identical inputs produce
//! byte-identical archives apart from the metadata's `created_at`.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use depbundle_state::{BuildFingerprint, Platform};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tar::{Archive, Builder, Header};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::consolidate::{ConsolidatedRequirementSet, Contributor};
use crate::error::ArchiveError;
use crate::manifest::ThirdPartyDescriptor;

pub const MANIFEST_ENTRY: &str = "pyproject.toml";
pub const METADATA_ENTRY: &str = "metadata.json";
pub const ENVIRONMENT_ENTRY: &str = "environment/packages.bin";

/// Description of a package, stored inside the archive and next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub bundle_name: String,
    pub platform: Platform,
    pub fingerprint: BuildFingerprint,
    /// Normalized package name → canonical constraint or direct reference
    pub packages: BTreeMap<String, String>,
    pub third_party: BTreeMap<String, ThirdPartyDescriptor>,
    pub contributors: Vec<Contributor>,
    pub created_at: DateTime<Utc>,
}

impl PackageMetadata {
    pub fn new(
        bundle_name: &str,
        platform: Platform,
        fingerprint: BuildFingerprint,
        set: &ConsolidatedRequirementSet,
        third_party: &BTreeMap<String, ThirdPartyDescriptor>,
    ) -> Self {
        Self {
            bundle_name: bundle_name.to_string(),
            platform,
            fingerprint,
            packages: set
                .packages()
                .map(|m| (m.name.to_string(), m.spec.to_string()))
                .collect(),
            third_party: third_party.clone(),
            contributors: set.contributors().to_vec(),
            created_at: Utc::now(),
        }
    }
}

/// A packed archive ready for upload.
#[derive(Debug, Clone)]
pub struct PackagedArtifact {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// SHA-256 of `bytes`, lowercase hex
    pub checksum: String,
    pub metadata: PackageMetadata,
}

impl PackagedArtifact {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Archive name: `<bundle>-<platform>-<short fingerprint>.tar.gz`.
pub fn artifact_filename(bundle_name: &str, platform: Platform, fingerprint: &BuildFingerprint) -> String {
    let bundle: String = bundle_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{bundle}-{platform}-{}.tar.gz", fingerprint.short())
}

/// SHA-256 hex digest of archive bytes.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn append_entry<W: Write>(builder: &mut Builder<W>, path: &str, data: &[u8]) -> Result<(), ArchiveError> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

/// Pack manifest, metadata and resolver output into a `.tar.gz`.
pub fn package(
    manifest_text: &str,
    metadata: PackageMetadata,
    environment: &[u8],
) -> Result<PackagedArtifact, ArchiveError> {
    let metadata_json = serde_json::to_vec_pretty(&metadata)?;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    append_entry(&mut builder, MANIFEST_ENTRY, manifest_text.as_bytes())?;
    append_entry(&mut builder, METADATA_ENTRY, &metadata_json)?;
    append_entry(&mut builder, ENVIRONMENT_ENTRY, environment)?;
    let encoder = builder.into_inner()?;
    let bytes = encoder.finish()?;

    let filename = artifact_filename(&metadata.bundle_name, metadata.platform, &metadata.fingerprint);
    let checksum = checksum(&bytes);
    debug!(filename = %filename, size = bytes.len(), checksum = %checksum, "packed archive");

    Ok(PackagedArtifact {
        filename,
        bytes,
        checksum,
        metadata,
    })
}

/// Entries of an unpacked archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveContents {
    pub manifest_text: String,
    pub metadata: PackageMetadata,
    pub environment: Vec<u8>,
}

/// Read back an archive produced by [`package`].
pub fn unpack(bytes: &[u8]) -> Result<ArchiveContents, ArchiveError> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        entries.insert(path, data);
    }

    let mut take = |name: &str| {
        entries
            .remove(name)
            .ok_or_else(|| ArchiveError::MissingEntry(name.to_string()))
    };
    let manifest = take(MANIFEST_ENTRY)?;
    let metadata = take(METADATA_ENTRY)?;
    let environment = take(ENVIRONMENT_ENTRY)?;

    Ok(ArchiveContents {
        manifest_text: String::from_utf8_lossy(&manifest).into_owned(),
        metadata: serde_json::from_slice(&metadata)?,
        environment,
    })
}

fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> Result<(), ArchiveError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Copy the archive and a metadata JSON next to it into `dir`.
///
/// Returns the archive path. Existing files with the same names are replaced.
pub fn store_to_dir(dir: &Path, artifact: &PackagedArtifact) -> Result<PathBuf, ArchiveError> {
    fs::create_dir_all(dir)?;
    let archive_path = dir.join(&artifact.filename);
    let stem = artifact
        .filename
        .strip_suffix(".tar.gz")
        .unwrap_or(&artifact.filename);
    let metadata_path = dir.join(format!("{stem}.json"));

    write_atomic(dir, &archive_path, &artifact.bytes)?;
    write_atomic(dir, &metadata_path, &serde_json::to_vec_pretty(&artifact.metadata)?)?;
    debug!(path = %archive_path.display(), "stored archive locally");
    Ok(archive_path)
}
