//! Requirement model: package names, PEP 440 versions and constraints.

pub mod constraint;
pub mod name;
#[allow(clippy::module_inception)]
pub mod requirement;
pub mod version;

pub use constraint::{Bound, ConstraintError, VersionConstraint};
pub use name::{InvalidPackageName, PackageName};
pub use requirement::{DirectReference, PackageRequirement, RequirementSpec};
pub use version::{PreRelease, Version};
