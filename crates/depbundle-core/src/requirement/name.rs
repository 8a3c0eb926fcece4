//! PEP 503 package-name normalization.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?i)[a-z0-9](?:[a-z0-9._-]*[a-z0-9])?$")
            .expect("package name pattern is a valid regex")
    })
}

fn separator_runs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[-_.]+").expect("separator pattern is a valid regex"))
}

/// Normalized identity of a Python distribution.
///
/// `My-Package`, `my_package` and `my.package` all normalize to `my-package`
/// and compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Validate and normalize a raw distribution name.
    pub fn new(raw: &str) -> Result<Self, InvalidPackageName> {
        let trimmed = raw.trim();
        if !name_pattern().is_match(trimmed) {
            return Err(InvalidPackageName(raw.to_string()));
        }
        let normalized = separator_runs()
            .replace_all(&trimmed.to_ascii_lowercase(), "-")
            .into_owned();
        Ok(PackageName(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A dependency key that is not a valid distribution name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid package name '{0}'")]
pub struct InvalidPackageName(pub String);

impl TryFrom<String> for PackageName {
    type Error = InvalidPackageName;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        PackageName::new(&raw)
    }
}

impl From<PackageName> for String {
    fn from(name: PackageName) -> Self {
        name.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
