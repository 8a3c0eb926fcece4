//! In-memory collaborators for tests
//!
//! `MemoryRegistry` stands in for the addon server and `RecordingPackager`
//! for the external resolver. Both count their calls so tests can assert
//! what a build did or skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use depbundle_state::{ArtifactRef, Platform};

use crate::archive::PackagedArtifact;
use crate::error::{RegistryError, ResolutionError};
use crate::registry::{AddonRegistry, BundleAddon, Packager};

// ---------------------------------------------------------------------------
// MemoryRegistry
// ---------------------------------------------------------------------------

/// Addon server backed by hash maps.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    bundles: Mutex<HashMap<String, Vec<BundleAddon>>>,
    base_manifests: Mutex<HashMap<String, String>>,
    uploads: Mutex<HashMap<String, Vec<u8>>>,
    assignments: Mutex<HashMap<(String, Platform), ArtifactRef>>,
    upload_attempts: AtomicUsize,
    upload_successes: AtomicUsize,
    failing_uploads: AtomicU32,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the addon list of a bundle.
    pub fn set_bundle(&self, bundle_name: &str, addons: Vec<BundleAddon>) {
        self.bundles
            .lock()
            .unwrap()
            .insert(bundle_name.to_string(), addons);
    }

    /// Append one addon to a bundle, creating the bundle if needed.
    pub fn add_addon(&self, bundle_name: &str, addon: BundleAddon) {
        self.bundles
            .lock()
            .unwrap()
            .entry(bundle_name.to_string())
            .or_default()
            .push(addon);
    }

    pub fn set_base_manifest(&self, bundle_name: &str, manifest_text: &str) {
        self.base_manifests
            .lock()
            .unwrap()
            .insert(bundle_name.to_string(), manifest_text.to_string());
    }

    /// Make the next `n` uploads fail with a transient error.
    pub fn fail_next_uploads(&self, n: u32) {
        self.failing_uploads.store(n, Ordering::SeqCst);
    }

    /// Number of `upload_artifact` calls, failed ones included.
    pub fn upload_attempts(&self) -> usize {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    /// Number of uploads that were stored.
    pub fn upload_count(&self) -> usize {
        self.upload_successes.load(Ordering::SeqCst)
    }

    /// Store bytes as if uploaded and return their location.
    pub fn insert_upload(&self, filename: &str, bytes: Vec<u8>) -> String {
        let location = format!("mem://artifacts/{filename}");
        self.uploads.lock().unwrap().insert(location.clone(), bytes);
        location
    }

    /// Delete an uploaded archive, simulating server-side cleanup.
    pub fn remove_upload(&self, location: &str) -> bool {
        self.uploads.lock().unwrap().remove(location).is_some()
    }

    pub fn uploaded_bytes(&self, location: &str) -> Option<Vec<u8>> {
        self.uploads.lock().unwrap().get(location).cloned()
    }

    /// Artifact currently assigned to a bundle for a platform.
    pub fn assignment(&self, bundle_name: &str, platform: Platform) -> Option<ArtifactRef> {
        self.assignments
            .lock()
            .unwrap()
            .get(&(bundle_name.to_string(), platform))
            .cloned()
    }
}

#[async_trait]
impl AddonRegistry for MemoryRegistry {
    async fn fetch_bundle_addons(&self, bundle_name: &str) -> Result<Vec<BundleAddon>, RegistryError> {
        self.bundles
            .lock()
            .unwrap()
            .get(bundle_name)
            .cloned()
            .ok_or_else(|| RegistryError::BundleNotFound(bundle_name.to_string()))
    }

    async fn fetch_base_manifest(&self, bundle_name: &str) -> Result<Option<String>, RegistryError> {
        Ok(self.base_manifests.lock().unwrap().get(bundle_name).cloned())
    }

    async fn upload_artifact(
        &self,
        _bundle_name: &str,
        _platform: Platform,
        artifact: &PackagedArtifact,
    ) -> Result<ArtifactRef, RegistryError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(RegistryError::Request("503 service unavailable".to_string()));
        }

        let location = self.insert_upload(&artifact.filename, artifact.bytes.clone());
        self.upload_successes.fetch_add(1, Ordering::SeqCst);
        Ok(ArtifactRef {
            filename: artifact.filename.clone(),
            location,
        })
    }

    async fn artifact_exists(&self, artifact: &ArtifactRef) -> Result<bool, RegistryError> {
        Ok(self.uploads.lock().unwrap().contains_key(&artifact.location))
    }

    async fn assign_artifact(
        &self,
        bundle_name: &str,
        platform: Platform,
        artifact: &ArtifactRef,
    ) -> Result<(), RegistryError> {
        self.assignments
            .lock()
            .unwrap()
            .insert((bundle_name.to_string(), platform), artifact.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingPackager
// ---------------------------------------------------------------------------

/// Resolver stand-in that echoes the manifest it was given.
#[derive(Debug, Default)]
pub struct RecordingPackager {
    calls: AtomicUsize,
    delay: Option<Duration>,
    failure: Mutex<Option<ResolutionError>>,
    last_manifest: Mutex<Option<String>>,
}

impl RecordingPackager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call, to widen race windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every following call with `error`.
    pub fn fail_with(&self, error: ResolutionError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Manifest text passed to the most recent call.
    pub fn last_manifest(&self) -> Option<String> {
        self.last_manifest.lock().unwrap().clone()
    }
}

#[async_trait]
impl Packager for RecordingPackager {
    async fn resolve_and_package(
        &self,
        manifest_text: &str,
        platform: Platform,
    ) -> Result<Vec<u8>, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_manifest.lock().unwrap() = Some(manifest_text.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(format!("resolved for {platform}\n{manifest_text}").into_bytes())
    }
}
