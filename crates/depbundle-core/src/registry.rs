//! External collaborators of the build orchestrator.
//!
//! The addon registry (server API) and the resolver/packager are injected as
//! trait objects. In-memory implementations live in [`crate::fakes`].

use async_trait::async_trait;
use depbundle_state::{ArtifactRef, Platform};
use serde::{Deserialize, Serialize};

use crate::archive::PackagedArtifact;
use crate::error::{RegistryError, ResolutionError};

/// An addon enabled in a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleAddon {
    pub name: String,
    pub version: String,
    /// Raw manifest text, `None` when the addon declares no dependencies
    pub manifest: Option<String>,
    /// A malformed manifest of a required addon fails the build
    #[serde(default)]
    pub required: bool,
}

impl BundleAddon {
    pub fn new(name: &str, version: &str, manifest: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            manifest: manifest.map(str::to_string),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Server-side view of bundles and their dependency packages.
#[async_trait]
pub trait AddonRegistry: Send + Sync {
    /// Addons enabled in `bundle_name`. An empty list is valid.
    async fn fetch_bundle_addons(&self, bundle_name: &str) -> Result<Vec<BundleAddon>, RegistryError>;

    /// Pinned manifest of the target application, if the bundle has one.
    async fn fetch_base_manifest(&self, bundle_name: &str) -> Result<Option<String>, RegistryError>;

    /// Store a packed archive. Returns where it now lives.
    async fn upload_artifact(
        &self,
        bundle_name: &str,
        platform: Platform,
        artifact: &PackagedArtifact,
    ) -> Result<ArtifactRef, RegistryError>;

    /// Whether a previously uploaded archive is still available.
    async fn artifact_exists(&self, artifact: &ArtifactRef) -> Result<bool, RegistryError>;

    /// Point the bundle at an archive for one platform.
    async fn assign_artifact(
        &self,
        bundle_name: &str,
        platform: Platform,
        artifact: &ArtifactRef,
    ) -> Result<(), RegistryError>;
}

/// Turns a consolidated manifest into an installable environment.
///
/// Implementations run the dependency resolver, fetch third-party binaries
/// and verify their hashes. The returned bytes are opaque to the engine.
#[async_trait]
pub trait Packager: Send + Sync {
    async fn resolve_and_package(
        &self,
        manifest_text: &str,
        platform: Platform,
    ) -> Result<Vec<u8>, ResolutionError>;
}
