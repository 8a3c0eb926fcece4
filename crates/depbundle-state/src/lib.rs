//! depbundle-state: Build-Cache Persistence for depbundle
//!
//! This crate provides the persisted state contract for the dependency
//! package builder. It defines what a cached build looks like and how the
//! fingerprint → artifact mapping is stored.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: cache integrity. Only `Ready` artifacts are ever recorded, and a
//! record always belongs to the fingerprint it is stored under.
//!
//! ## Key Components
//!
//! - `BuildFingerprint`: content digest identifying a consolidated requirement set
//! - `BuildArtifact`: produced dependency package with `Building`/`Ready`/`Failed` status
//! - `ArtifactCache`: async keyed store, with `MemoryArtifactCache` and `FsArtifactCache`

mod error;
pub mod fakes;
mod fs_cache;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_cache::FsArtifactCache;
pub use storage_traits::{
    check_cacheable, ArtifactCache, ArtifactRef, ArtifactStatus, BuildArtifact,
    BuildFingerprint, Platform, StorageResult,
};

/// Result type for depbundle-state operations
pub type Result<T> = std::result::Result<T, StorageError>;
