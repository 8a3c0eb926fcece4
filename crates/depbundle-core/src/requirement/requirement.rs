use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::constraint::VersionConstraint;
use super::name::PackageName;

/// A requirement pinned to a source instead of a version range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DirectReference {
    Git {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rev: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
    Url {
        url: String,
    },
    Path {
        path: String,
    },
}

impl fmt::Display for DirectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectReference::Git {
                url,
                rev,
                branch,
                tag,
            } => {
                write!(f, "git+{url}")?;
                if let Some(reference) = rev.as_ref().or(tag.as_ref()).or(branch.as_ref()) {
                    write!(f, "@{reference}")?;
                }
                Ok(())
            }
            DirectReference::Url { url } => f.write_str(url),
            DirectReference::Path { path } => write!(f, "file:{path}"),
        }
    }
}

/// What a requirement asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementSpec {
    Version(VersionConstraint),
    Direct(DirectReference),
}

impl RequirementSpec {
    pub fn as_version(&self) -> Option<&VersionConstraint> {
        match self {
            RequirementSpec::Version(constraint) => Some(constraint),
            RequirementSpec::Direct(_) => None,
        }
    }

    pub fn as_direct(&self) -> Option<&DirectReference> {
        match self {
            RequirementSpec::Direct(reference) => Some(reference),
            RequirementSpec::Version(_) => None,
        }
    }
}

impl fmt::Display for RequirementSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequirementSpec::Version(constraint) => constraint.fmt(f),
            RequirementSpec::Direct(reference) => reference.fmt(f),
        }
    }
}

/// One dependency declared by one addon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequirement {
    pub package_name: PackageName,
    pub spec: RequirementSpec,
    /// Constraint text exactly as the addon wrote it, for diagnostics
    pub declared: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub extras: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markers: Option<String>,
    pub source_addon: String,
}

impl PackageRequirement {
    /// A plain version requirement with no extras or markers.
    pub fn version(
        package_name: PackageName,
        constraint: VersionConstraint,
        declared: &str,
        source_addon: &str,
    ) -> Self {
        Self {
            package_name,
            spec: RequirementSpec::Version(constraint),
            declared: declared.to_string(),
            extras: BTreeSet::new(),
            markers: None,
            source_addon: source_addon.to_string(),
        }
    }

    pub fn version_constraint(&self) -> Option<&VersionConstraint> {
        self.spec.as_version()
    }
}
