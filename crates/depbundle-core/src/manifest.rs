//! Addon manifests: the pyproject-style TOML each addon ships.
//!
//! ```toml
//! [tool.poetry]
//! name = "core"
//! version = "1.0.0"
//!
//! [tool.poetry.dependencies]
//! requests = ">=2.0,<3.0"
//! pillow = { version = "^9.0", extras = ["jpeg"] }
//!
//! [tool.addon.thirdparty.ffmpeg.linux]
//! version = "4.4"
//! url = "https://example.com/ffmpeg-4.4-linux.tgz"
//! hash = "sha256:..."
//! ```
//!
//! Parsing fails closed: anything the consolidator could misread is a
//! [`ManifestError`]. Tables that carry no dependency data are kept as-is in
//! [`AddonManifest::extra_sections`].

use std::collections::{BTreeMap, BTreeSet};

use depbundle_state::Platform;
use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use crate::consolidate::{ConsolidatedRequirementSet, MergedRequirement};
use crate::error::ManifestError;
use crate::requirement::{
    DirectReference, PackageName, PackageRequirement, RequirementSpec, VersionConstraint,
};

/// Provenance label for requirements coming from the base manifest.
pub const BASE_SOURCE: &str = "base";

const DEFAULT_NAME: &str = "depbundle-environment";
const DEFAULT_VERSION: &str = "1.0.0";

const DEPENDENCY_KEYS: [&str; 9] = [
    "version", "extras", "markers", "git", "rev", "branch", "tag", "url", "path",
];

/// A prebuilt binary an addon needs next to its Python packages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThirdPartyDescriptor {
    pub version: String,
    pub url: String,
    pub hash: String,
}

/// Third-party descriptor key. `platform: None` applies to every platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThirdPartyKey {
    pub tool: String,
    pub platform: Option<Platform>,
}

/// One parsed addon (or base) manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct AddonManifest {
    pub name: String,
    pub version: String,
    /// Label every requirement of this manifest is attributed to
    pub source: String,
    /// Production requirements, ordered by dependency key
    pub requirements: Vec<PackageRequirement>,
    /// Development requirements, never part of the production set
    pub dev_requirements: Vec<PackageRequirement>,
    pub third_party: BTreeMap<ThirdPartyKey, ThirdPartyDescriptor>,
    /// Everything except dependency data, including `[tool.poetry]` metadata
    pub extra_sections: Table,
}

impl AddonManifest {
    /// Parse an addon manifest. Requirements are attributed to `source_addon`.
    pub fn parse(manifest_text: &str, source_addon: &str) -> Result<Self, ManifestError> {
        let document = parse_document(manifest_text)?;
        let poetry = poetry_table(&document)?;
        let name = required_string(poetry, "name", "tool.poetry.name")?;
        let version = required_string(poetry, "version", "tool.poetry.version")?;
        Self::from_document(document, name, version, source_addon)
    }

    /// Parse the base manifest of the target application.
    ///
    /// Same grammar as [`AddonManifest::parse`], but `name` and `version`
    /// are optional.
    pub fn parse_base(manifest_text: &str) -> Result<Self, ManifestError> {
        let document = parse_document(manifest_text)?;
        let poetry = poetry_table(&document)?;
        let name = optional_string(poetry, "name")?.unwrap_or_else(|| BASE_SOURCE.to_string());
        let version =
            optional_string(poetry, "version")?.unwrap_or_else(|| DEFAULT_VERSION.to_string());
        Self::from_document(document, name, version, BASE_SOURCE)
    }

    fn from_document(
        document: Table,
        name: String,
        version: String,
        source_addon: &str,
    ) -> Result<Self, ManifestError> {
        let poetry = poetry_table(&document)?;

        let requirements = match poetry.get("dependencies") {
            Some(value) => parse_dependencies(value, "tool.poetry.dependencies", source_addon)?,
            None => Vec::new(),
        };

        let mut dev_requirements = match poetry.get("dev-dependencies") {
            Some(value) => parse_dependencies(value, "tool.poetry.dev-dependencies", source_addon)?,
            None => Vec::new(),
        };
        if let Some(groups) = poetry.get("group") {
            let groups = as_table(groups, "tool.poetry.group")?;
            for (group, body) in groups {
                let body = as_table(body, "tool.poetry.group")?;
                if let Some(value) = body.get("dependencies") {
                    let path = format!("tool.poetry.group.{group}.dependencies");
                    dev_requirements.extend(parse_dependencies(value, &path, source_addon)?);
                }
            }
        }

        let third_party = match document
            .get("tool")
            .and_then(Value::as_table)
            .and_then(|tool| tool.get("addon"))
            .and_then(Value::as_table)
            .and_then(|addon| addon.get("thirdparty"))
        {
            Some(value) => parse_third_party(value)?,
            None => BTreeMap::new(),
        };

        Ok(AddonManifest {
            name,
            version,
            source: source_addon.to_string(),
            requirements,
            dev_requirements,
            third_party,
            extra_sections: strip_dependency_data(document),
        })
    }

    /// Descriptors that apply to `platform`, keyed by tool.
    ///
    /// A platform-specific entry shadows the platform-agnostic one.
    pub fn third_party_for(&self, platform: Platform) -> BTreeMap<String, ThirdPartyDescriptor> {
        descriptors_for(&self.third_party, platform)
    }
}

pub(crate) fn descriptors_for(
    descriptors: &BTreeMap<ThirdPartyKey, ThirdPartyDescriptor>,
    platform: Platform,
) -> BTreeMap<String, ThirdPartyDescriptor> {
    let mut resolved = BTreeMap::new();
    for (key, descriptor) in descriptors {
        if key.platform.is_none() {
            resolved.insert(key.tool.clone(), descriptor.clone());
        }
    }
    for (key, descriptor) in descriptors {
        if key.platform == Some(platform) {
            resolved.insert(key.tool.clone(), descriptor.clone());
        }
    }
    resolved
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_document(manifest_text: &str) -> Result<Table, ManifestError> {
    manifest_text
        .parse::<Table>()
        .map_err(|e| ManifestError::Toml(e.to_string()))
}

fn poetry_table(document: &Table) -> Result<&Table, ManifestError> {
    document
        .get("tool")
        .and_then(Value::as_table)
        .and_then(|tool| tool.get("poetry"))
        .and_then(Value::as_table)
        .ok_or_else(|| ManifestError::MissingField("tool.poetry".to_string()))
}

fn as_table<'a>(value: &'a Value, path: &str) -> Result<&'a Table, ManifestError> {
    value
        .as_table()
        .ok_or_else(|| ManifestError::Toml(format!("'{path}' must be a table")))
}

fn required_string(table: &Table, key: &str, path: &str) -> Result<String, ManifestError> {
    optional_string(table, key)?.ok_or_else(|| ManifestError::MissingField(path.to_string()))
}

fn optional_string(table: &Table, key: &str) -> Result<Option<String>, ManifestError> {
    match table.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ManifestError::Toml(format!("'{key}' must be a string"))),
    }
}

fn parse_dependencies(
    value: &Value,
    path: &str,
    source_addon: &str,
) -> Result<Vec<PackageRequirement>, ManifestError> {
    as_table(value, path)?
        .iter()
        .map(|(name, spec)| parse_dependency(name, spec, source_addon))
        .collect()
}

fn parse_constraint(package: &str, raw: &str) -> Result<VersionConstraint, ManifestError> {
    raw.parse().map_err(|source| ManifestError::Constraint {
        package: package.to_string(),
        source,
    })
}

/// Version-less dependency strings such as
/// `git+https://github.com/org/repo.git@v1.2` or `https://host/pkg.whl`.
///
/// Any `#fragment` is dropped. For git URLs an `@ref` after the last path
/// separator becomes `rev`.
fn direct_reference_from_str(raw: &str) -> Option<DirectReference> {
    let raw = raw.trim();
    let url = raw.split_once('#').map_or(raw, |(head, _)| head);

    let git_url = url
        .strip_prefix("git+")
        .filter(|rest| rest.contains("://"))
        .or_else(|| url.starts_with("git://").then_some(url));
    if let Some(git_url) = git_url {
        let (url, rev) = split_git_revision(git_url);
        return Some(DirectReference::Git {
            url,
            rev,
            branch: None,
            tag: None,
        });
    }
    if url.starts_with("https://") || url.starts_with("http://") {
        return Some(DirectReference::Url {
            url: url.to_string(),
        });
    }
    None
}

fn split_git_revision(url: &str) -> (String, Option<String>) {
    // `user@host` in the authority is not a revision
    let path_start = url
        .find("://")
        .map(|i| i + 3)
        .and_then(|authority| url[authority..].find('/').map(|i| authority + i));
    let at = path_start.and_then(|start| url[start..].rfind('@').map(|i| start + i));
    match at {
        Some(at) if at + 1 < url.len() => (url[..at].to_string(), Some(url[at + 1..].to_string())),
        _ => (url.to_string(), None),
    }
}

fn parse_dependency(
    raw_name: &str,
    value: &Value,
    source_addon: &str,
) -> Result<PackageRequirement, ManifestError> {
    let package_name = PackageName::new(raw_name)?;
    let invalid = |reason: &str| ManifestError::InvalidDependency {
        package: raw_name.to_string(),
        reason: reason.to_string(),
    };

    let table = match value {
        Value::String(raw) => {
            if let Some(reference) = direct_reference_from_str(raw) {
                return Ok(PackageRequirement {
                    package_name,
                    spec: RequirementSpec::Direct(reference),
                    declared: raw.clone(),
                    extras: BTreeSet::new(),
                    markers: None,
                    source_addon: source_addon.to_string(),
                });
            }
            let constraint = parse_constraint(raw_name, raw)?;
            return Ok(PackageRequirement::version(
                package_name,
                constraint,
                raw,
                source_addon,
            ));
        }
        Value::Table(table) => table,
        Value::Array(_) => return Err(invalid("multiple-constraint dependencies are not supported")),
        _ => return Err(invalid("expected a constraint string or table")),
    };

    if let Some(unknown) = table.keys().find(|k| !DEPENDENCY_KEYS.contains(&k.as_str())) {
        return Err(invalid(&format!("unsupported key '{unknown}'")));
    }

    let text = |key: &str| -> Result<Option<String>, ManifestError> {
        match table.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(invalid(&format!("'{key}' must be a string"))),
        }
    };

    let version = text("version")?;
    let git = text("git")?;
    let url = text("url")?;
    let path = text("path")?;
    let rev = text("rev")?;
    let branch = text("branch")?;
    let tag = text("tag")?;

    let source_count = [&git, &url, &path].iter().filter(|s| s.is_some()).count();
    if source_count > 1 {
        return Err(invalid("only one of 'git', 'url' or 'path' may be given"));
    }
    if source_count == 1 && version.is_some() {
        return Err(invalid("'version' cannot be combined with a direct reference"));
    }
    if git.is_none() && (rev.is_some() || branch.is_some() || tag.is_some()) {
        return Err(invalid("'rev', 'branch' and 'tag' require 'git'"));
    }

    let (spec, declared) = if let Some(raw) = version {
        let constraint = parse_constraint(raw_name, &raw)?;
        (RequirementSpec::Version(constraint), raw)
    } else {
        let reference = if let Some(url) = git {
            DirectReference::Git {
                url,
                rev,
                branch,
                tag,
            }
        } else if let Some(url) = url {
            DirectReference::Url { url }
        } else if let Some(path) = path {
            DirectReference::Path { path }
        } else {
            return Err(invalid("expected 'version', 'git', 'url' or 'path'"));
        };
        let declared = reference.to_string();
        (RequirementSpec::Direct(reference), declared)
    };

    let extras: BTreeSet<String> = match table.get("extras") {
        None => BTreeSet::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.trim().to_ascii_lowercase())
                    .ok_or_else(|| invalid("'extras' must be a list of strings"))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(invalid("'extras' must be a list of strings")),
    };

    Ok(PackageRequirement {
        package_name,
        spec,
        declared,
        extras,
        markers: text("markers")?.map(|m| m.trim().to_string()),
        source_addon: source_addon.to_string(),
    })
}

fn parse_third_party(
    value: &Value,
) -> Result<BTreeMap<ThirdPartyKey, ThirdPartyDescriptor>, ManifestError> {
    let mut descriptors = BTreeMap::new();
    for (tool, body) in as_table(value, "tool.addon.thirdparty")? {
        let body = body.as_table().ok_or_else(|| ManifestError::InvalidThirdParty {
            tool: tool.clone(),
            reason: "expected a table".to_string(),
        })?;

        let is_generic = ["version", "url", "hash"].iter().any(|k| body.contains_key(*k));
        if is_generic {
            let key = ThirdPartyKey {
                tool: tool.clone(),
                platform: None,
            };
            descriptors.insert(key, parse_descriptor(tool, body)?);
            continue;
        }

        for (platform_name, entry) in body {
            let platform = platform_name.parse::<Platform>().map_err(|_| {
                ManifestError::InvalidThirdParty {
                    tool: tool.clone(),
                    reason: format!("unknown platform '{platform_name}'"),
                }
            })?;
            let entry = entry.as_table().ok_or_else(|| ManifestError::InvalidThirdParty {
                tool: tool.clone(),
                reason: format!("'{platform_name}' must be a table"),
            })?;
            let key = ThirdPartyKey {
                tool: tool.clone(),
                platform: Some(platform),
            };
            descriptors.insert(key, parse_descriptor(tool, entry)?);
        }
    }
    Ok(descriptors)
}

fn parse_descriptor(tool: &str, table: &Table) -> Result<ThirdPartyDescriptor, ManifestError> {
    let field = |key: &str| -> Result<String, ManifestError> {
        match table.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
            Some(_) => Err(ManifestError::InvalidThirdParty {
                tool: tool.to_string(),
                reason: format!("'{key}' must be a non-empty string"),
            }),
            None => Err(ManifestError::InvalidThirdParty {
                tool: tool.to_string(),
                reason: format!("missing '{key}'"),
            }),
        }
    };
    if let Some(unknown) = table
        .keys()
        .find(|k| !["version", "url", "hash"].contains(&k.as_str()))
    {
        return Err(ManifestError::InvalidThirdParty {
            tool: tool.to_string(),
            reason: format!("unsupported key '{unknown}'"),
        });
    }
    Ok(ThirdPartyDescriptor {
        version: field("version")?,
        url: field("url")?,
        hash: field("hash")?,
    })
}

/// Remove dependency tables and drop containers left empty.
fn strip_dependency_data(mut document: Table) -> Table {
    if let Some(Value::Table(tool)) = document.get_mut("tool") {
        if let Some(Value::Table(poetry)) = tool.get_mut("poetry") {
            poetry.remove("dependencies");
            poetry.remove("dev-dependencies");
            poetry.remove("group");
        }
        if let Some(Value::Table(addon)) = tool.get_mut("addon") {
            addon.remove("thirdparty");
            if addon.is_empty() {
                tool.remove("addon");
            }
        }
        if tool.is_empty() {
            document.remove("tool");
        }
    }
    document
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the consolidated set as the manifest the resolver consumes.
///
/// Package names are normalized, constraints canonical and entries sorted by
/// name. Non-dependency tables of the base manifest pass through unchanged.
pub fn serialize(set: &ConsolidatedRequirementSet) -> Result<String, ManifestError> {
    render(set, None)
}

/// Like [`serialize`], with the third-party descriptors resolved for one
/// platform written under `[tool.addon.thirdparty.<tool>]`.
pub fn serialize_with_third_party(
    set: &ConsolidatedRequirementSet,
    third_party: &BTreeMap<String, ThirdPartyDescriptor>,
) -> Result<String, ManifestError> {
    render(set, Some(third_party))
}

fn render(
    set: &ConsolidatedRequirementSet,
    third_party: Option<&BTreeMap<String, ThirdPartyDescriptor>>,
) -> Result<String, ManifestError> {
    let mut document = set.passthrough().clone();

    let tool = child_table(&mut document, "tool")?;
    let poetry = child_table(tool, "poetry")?;
    poetry
        .entry("name")
        .or_insert_with(|| Value::String(DEFAULT_NAME.to_string()));
    poetry
        .entry("version")
        .or_insert_with(|| Value::String(DEFAULT_VERSION.to_string()));
    poetry
        .entry("description")
        .or_insert_with(|| Value::String("Consolidated addon dependencies".to_string()));
    poetry
        .entry("authors")
        .or_insert_with(|| Value::Array(Vec::new()));
    poetry.insert(
        "dependencies".to_string(),
        Value::Table(dependency_table(set.packages())),
    );
    let dev = dependency_table(set.dev_packages());
    if !dev.is_empty() {
        poetry.insert("dev-dependencies".to_string(), Value::Table(dev));
    }

    if let Some(descriptors) = third_party.filter(|d| !d.is_empty()) {
        let addon = child_table(tool, "addon")?;
        let mut rendered = Table::new();
        for (name, descriptor) in descriptors {
            let mut entry = Table::new();
            entry.insert("version".into(), Value::String(descriptor.version.clone()));
            entry.insert("url".into(), Value::String(descriptor.url.clone()));
            entry.insert("hash".into(), Value::String(descriptor.hash.clone()));
            rendered.insert(name.clone(), Value::Table(entry));
        }
        addon.insert("thirdparty".to_string(), Value::Table(rendered));
    }

    toml::to_string(&document).map_err(|e| ManifestError::Render(e.to_string()))
}

fn child_table<'a>(parent: &'a mut Table, key: &str) -> Result<&'a mut Table, ManifestError> {
    parent
        .entry(key)
        .or_insert_with(|| Value::Table(Table::new()))
        .as_table_mut()
        .ok_or_else(|| ManifestError::Render(format!("'{key}' is not a table")))
}

fn dependency_table<'a>(packages: impl Iterator<Item = &'a MergedRequirement>) -> Table {
    let mut table = Table::new();
    for merged in packages {
        table.insert(merged.name.to_string(), dependency_value(merged));
    }
    table
}

fn dependency_value(merged: &MergedRequirement) -> Value {
    let plain = merged.extras.is_empty() && merged.markers.is_none();
    let mut entry = Table::new();
    match &merged.spec {
        RequirementSpec::Version(constraint) if plain => {
            return Value::String(constraint.to_string());
        }
        RequirementSpec::Version(constraint) => {
            entry.insert("version".into(), Value::String(constraint.to_string()));
        }
        RequirementSpec::Direct(DirectReference::Git {
            url,
            rev,
            branch,
            tag,
        }) => {
            entry.insert("git".into(), Value::String(url.clone()));
            for (key, value) in [("rev", rev), ("branch", branch), ("tag", tag)] {
                if let Some(value) = value {
                    entry.insert(key.into(), Value::String(value.clone()));
                }
            }
        }
        RequirementSpec::Direct(DirectReference::Url { url }) => {
            entry.insert("url".into(), Value::String(url.clone()));
        }
        RequirementSpec::Direct(DirectReference::Path { path }) => {
            entry.insert("path".into(), Value::String(path.clone()));
        }
    }
    if !merged.extras.is_empty() {
        let extras = merged.extras.iter().cloned().map(Value::String).collect();
        entry.insert("extras".into(), Value::Array(extras));
    }
    if let Some(markers) = &merged.markers {
        entry.insert("markers".into(), Value::String(markers.clone()));
    }
    Value::Table(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORE: &str = r#"
[tool.poetry]
name = "core"
version = "1.0.0"

[tool.poetry.dependencies]
Requests = ">=2.0,<3.0"
pillow = { version = "^9.0", extras = ["JPEG"], markers = "sys_platform == 'linux'" }
mylib = { git = "https://example.com/mylib.git", rev = "v1.2" }

[tool.poetry.dev-dependencies]
pytest = "^7.0"

[tool.poetry.group.lint.dependencies]
ruff = "*"

[tool.addon.thirdparty.ffmpeg.linux]
version = "4.4"
url = "https://example.com/ffmpeg-4.4-linux.tgz"
hash = "sha256:aa"

[tool.addon.thirdparty.ffmpeg.windows]
version = "4.4"
url = "https://example.com/ffmpeg-4.4-win.zip"
hash = "sha256:bb"

[tool.addon.thirdparty.ocioconfig]
version = "1.0.2"
url = "https://example.com/ocio.zip"
hash = "sha256:cc"

[tool.ruff]
line-length = 88
"#;

    #[test]
    fn test_parses_full_manifest() {
        let manifest = AddonManifest::parse(CORE, "core").unwrap();
        assert_eq!(manifest.name, "core");
        assert_eq!(manifest.version, "1.0.0");
        assert_eq!(manifest.requirements.len(), 3);

        // Keys come back sorted, and uppercase sorts first.
        let requests = &manifest.requirements[0];
        assert_eq!(requests.package_name.as_str(), "requests");
        assert_eq!(requests.spec.to_string(), ">=2.0,<3.0");
        assert_eq!(requests.declared, ">=2.0,<3.0");
        assert_eq!(requests.source_addon, "core");

        let pillow = manifest
            .requirements
            .iter()
            .find(|r| r.package_name.as_str() == "pillow")
            .unwrap();
        assert!(pillow.extras.contains("jpeg"));
        assert_eq!(pillow.markers.as_deref(), Some("sys_platform == 'linux'"));

        let mylib = manifest
            .requirements
            .iter()
            .find(|r| r.package_name.as_str() == "mylib")
            .unwrap();
        assert!(matches!(
            mylib.spec,
            RequirementSpec::Direct(DirectReference::Git { .. })
        ));

        let dev: Vec<_> = manifest
            .dev_requirements
            .iter()
            .map(|r| r.package_name.as_str())
            .collect();
        assert_eq!(dev, vec!["pytest", "ruff"]);
        assert_eq!(manifest.third_party.len(), 3);
    }

    #[test]
    fn test_extra_sections_drop_dependency_data() {
        let manifest = AddonManifest::parse(CORE, "core").unwrap();
        let tool = manifest.extra_sections["tool"].as_table().unwrap();
        assert!(tool.contains_key("ruff"));
        assert!(!tool.contains_key("addon"));
        let poetry = tool["poetry"].as_table().unwrap();
        assert!(!poetry.contains_key("dependencies"));
        assert!(!poetry.contains_key("group"));
        assert_eq!(poetry["name"].as_str(), Some("core"));
    }

    #[test]
    fn test_third_party_prefers_platform_entry() {
        let manifest = AddonManifest::parse(CORE, "core").unwrap();
        let linux = manifest.third_party_for(Platform::Linux);
        assert_eq!(linux["ffmpeg"].hash, "sha256:aa");
        assert_eq!(linux["ocioconfig"].version, "1.0.2");

        let darwin = manifest.third_party_for(Platform::Darwin);
        assert!(!darwin.contains_key("ffmpeg"));
        assert!(darwin.contains_key("ocioconfig"));
    }

    #[test]
    fn test_missing_identity_is_malformed() {
        let err = AddonManifest::parse("[tool.poetry]\nname = \"x\"\n", "x").unwrap_err();
        assert_eq!(
            err,
            ManifestError::MissingField("tool.poetry.version".to_string())
        );
        let err = AddonManifest::parse("[project]\nname = \"x\"\n", "x").unwrap_err();
        assert_eq!(err, ManifestError::MissingField("tool.poetry".to_string()));
    }

    #[test]
    fn test_invalid_toml_is_malformed() {
        let err = AddonManifest::parse("[tool.poetry\nname=", "x").unwrap_err();
        assert!(matches!(err, ManifestError::Toml(_)));
    }

    fn with_deps(deps: &str) -> String {
        format!("[tool.poetry]\nname = \"a\"\nversion = \"1\"\n\n[tool.poetry.dependencies]\n{deps}\n")
    }

    #[test]
    fn test_rejects_unknown_dependency_key() {
        let err = AddonManifest::parse(&with_deps("foo = { version = \"1\", optional = true }"), "a")
            .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDependency { .. }));
    }

    #[test]
    fn test_rejects_unrecognized_constraint() {
        let err = AddonManifest::parse(&with_deps("foo = \"^1 || ^2\""), "a").unwrap_err();
        assert!(matches!(err, ManifestError::Constraint { .. }));
        let err = AddonManifest::parse(&with_deps("foo = \"latest\""), "a").unwrap_err();
        assert!(matches!(err, ManifestError::Constraint { .. }));
    }

    #[test]
    fn test_rejects_version_with_direct_reference() {
        let err = AddonManifest::parse(
            &with_deps("foo = { version = \"1\", git = \"https://x/y.git\" }"),
            "a",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDependency { .. }));
    }

    #[test]
    fn test_rejects_incomplete_third_party() {
        let text = "[tool.poetry]\nname = \"a\"\nversion = \"1\"\n\n[tool.addon.thirdparty.ffmpeg]\nversion = \"4\"\nurl = \"u\"\n";
        let err = AddonManifest::parse(text, "a").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidThirdParty { .. }));

        let text = "[tool.poetry]\nname = \"a\"\nversion = \"1\"\n\n[tool.addon.thirdparty.ffmpeg.beos]\nversion = \"4\"\nurl = \"u\"\nhash = \"h\"\n";
        let err = AddonManifest::parse(text, "a").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidThirdParty { .. }));
    }

    #[test]
    fn test_git_url_strings_become_direct_references() {
        let base = AddonManifest::parse_base(&with_deps(concat!(
            "acre = \"git+https://github.com/pypeclub/acre.git@abc123\"\n",
            "tool = \"git+ssh://git@example.com/org/tool.git\"\n",
            "plain = \"git://example.com/plain.git#egg=plain\"\n",
            "wheel = \"https://example.com/wheel-1.0-py3-none-any.whl\"\n",
        )))
        .unwrap();
        let spec = |name: &str| {
            base.requirements
                .iter()
                .find(|r| r.package_name.as_str() == name)
                .map(|r| r.spec.clone())
                .unwrap()
        };

        assert_eq!(
            spec("acre"),
            RequirementSpec::Direct(DirectReference::Git {
                url: "https://github.com/pypeclub/acre.git".to_string(),
                rev: Some("abc123".to_string()),
                branch: None,
                tag: None,
            })
        );
        assert_eq!(
            spec("tool"),
            RequirementSpec::Direct(DirectReference::Git {
                url: "ssh://git@example.com/org/tool.git".to_string(),
                rev: None,
                branch: None,
                tag: None,
            })
        );
        assert_eq!(
            spec("plain"),
            RequirementSpec::Direct(DirectReference::Git {
                url: "git://example.com/plain.git".to_string(),
                rev: None,
                branch: None,
                tag: None,
            })
        );
        assert_eq!(
            spec("wheel"),
            RequirementSpec::Direct(DirectReference::Url {
                url: "https://example.com/wheel-1.0-py3-none-any.whl".to_string(),
            })
        );
    }

    #[test]
    fn test_git_string_matches_git_table() {
        let from_string = AddonManifest::parse(
            &with_deps("acre = \"git+https://github.com/pypeclub/acre.git@abc123\""),
            "a",
        )
        .unwrap();
        let from_table = AddonManifest::parse(
            &with_deps("acre = { git = \"https://github.com/pypeclub/acre.git\", rev = \"abc123\" }"),
            "b",
        )
        .unwrap();
        assert_eq!(from_string.requirements[0].spec, from_table.requirements[0].spec);
    }

    #[test]
    fn test_serialized_manifest_parses_back() {
        let base = AddonManifest::parse_base(concat!(
            "[tool.poetry.dependencies]\n",
            "python = \">=3.9,<3.10\"\n",
            "acre = \"git+https://github.com/pypeclub/acre.git@abc123\"\n",
            "\n[tool.ruff]\nline-length = 88\n",
        ))
        .unwrap();
        let addon = AddonManifest::parse(
            &with_deps(concat!(
                "pillow = { version = \">=9.0\", extras = [\"jpeg\"] }\n",
                "requests = \">=2.0,!=2.3\"\n",
            )),
            "a",
        )
        .unwrap();
        let set = crate::consolidate::consolidate(Some(&base), &[addon]).unwrap();

        let rendered = serialize(&set).unwrap();
        assert!(rendered.contains("[tool.ruff]"));
        assert!(rendered.contains("line-length = 88"));

        let reparsed = AddonManifest::parse(&rendered, "rendered").unwrap();
        assert_eq!(reparsed.requirements.len(), set.len());
        for requirement in &reparsed.requirements {
            let merged = set.get(requirement.package_name.as_str()).unwrap();
            assert_eq!(requirement.spec, merged.spec, "{}", requirement.package_name);
            assert_eq!(requirement.extras, merged.extras);
        }
        let pillow = set.get("pillow").unwrap();
        assert!(pillow.extras.contains("jpeg"));
        assert_eq!(set.get("requests").unwrap().spec.to_string(), ">=2.0,!=2.3");
    }

    #[test]
    fn test_base_manifest_identity_is_optional() {
        let base = AddonManifest::parse_base("[tool.poetry.dependencies]\npython = \">=3.9,<3.10\"\n")
            .unwrap();
        assert_eq!(base.name, BASE_SOURCE);
        assert_eq!(base.requirements[0].source_addon, BASE_SOURCE);
        assert_eq!(base.requirements[0].spec.to_string(), ">=3.9,<3.10");
    }
}
