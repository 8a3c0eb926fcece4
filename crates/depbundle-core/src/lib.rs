//! depbundle Core Library
//!
//! Merges the Python requirements declared by every addon of a bundle into one
//! feasible set, fingerprints it, and builds or reuses the dependency package
//! for that fingerprint.

pub mod archive;
pub mod cache;
pub mod consolidate;
pub mod error;
pub mod fakes;
pub mod fingerprint;
pub mod manifest;
pub mod obs;
pub mod orchestrator;
pub mod registry;
pub mod requirement;
pub mod telemetry;

pub use archive::{PackageMetadata, PackagedArtifact};
pub use cache::{CacheLookup, FingerprintIndex};
pub use consolidate::{
    consolidate, ConsolidatedRequirementSet, ConstraintConflict, MergedRequirement,
    PackageConflict, RequirementSource, ThirdPartyConflict,
};
pub use error::{
    ArchiveError, BuildError, ManifestError, RegistryError, ResolutionError, Result,
};
pub use fingerprint::fingerprint;
pub use manifest::{serialize, serialize_with_third_party, AddonManifest, ThirdPartyDescriptor};
pub use orchestrator::{
    BuildConfig, BuildFailure, BuildOrchestrator, BuildOutcome, BuildStage, CancelHandle,
    LockPolicy, RetryConfig,
};
pub use registry::{AddonRegistry, BundleAddon, Packager};
pub use telemetry::{init_tracing, LogFormat};
pub use requirement::{
    DirectReference, PackageName, PackageRequirement, RequirementSpec, Version, VersionConstraint,
};

pub use depbundle_state::{
    ArtifactCache, ArtifactRef, ArtifactStatus, BuildArtifact, BuildFingerprint, FsArtifactCache,
    Platform,
};

/// depbundle version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
