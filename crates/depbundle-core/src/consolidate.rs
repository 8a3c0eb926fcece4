//! Constraint consolidation.
//!
//! Merges every addon's requirements for a package into one constraint whose
//! satisfying set is the intersection of all of them. Infeasible packages
//! are collected, not short-circuited, so a single report names every
//! conflict in the bundle.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use depbundle_state::Platform;
use serde::{Deserialize, Serialize};
use toml::Table;
use tracing::{debug, warn};

use crate::manifest::{descriptors_for, AddonManifest, ThirdPartyDescriptor, ThirdPartyKey};
use crate::requirement::{
    DirectReference, PackageName, PackageRequirement, RequirementSpec, VersionConstraint,
};

// ---------------------------------------------------------------------------
// Provenance and conflicts
// ---------------------------------------------------------------------------

/// One `(addon, constraint)` contribution to a package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequirementSource {
    pub addon: String,
    /// Constraint text as the addon declared it
    pub constraint: String,
}

impl fmt::Display for RequirementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addon, self.constraint)
    }
}

/// A package whose contributions have no common satisfying version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConflict {
    pub package: PackageName,
    /// Every contribution, sorted by addon
    pub sources: Vec<RequirementSource>,
}

impl PackageConflict {
    /// Multi-line report suitable for showing to an addon author.
    pub fn report(&self) -> String {
        let mut report = format!("Version conflict for package '{}':\n", self.package);
        for source in &self.sources {
            report.push_str(&format!("  {} requires {}\n", source.addon, source.constraint));
        }
        report
    }
}

impl fmt::Display for PackageConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<String> = self.sources.iter().map(|s| s.to_string()).collect();
        write!(f, "{} [{}]", self.package, sources.join(", "))
    }
}

/// Every infeasible package of one consolidation, sorted by package name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintConflict {
    pub conflicts: Vec<PackageConflict>,
}

impl ConstraintConflict {
    pub fn packages(&self) -> impl Iterator<Item = &PackageName> {
        self.conflicts.iter().map(|c| &c.package)
    }

    pub fn get(&self, package: &str) -> Option<&PackageConflict> {
        let name = PackageName::new(package).ok()?;
        self.conflicts.iter().find(|c| c.package == name)
    }
}

impl fmt::Display for ConstraintConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.conflicts.iter().map(|c| c.to_string()).collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ConstraintConflict {}

/// Addons disagreeing about one third-party binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConflict {
    pub tool: String,
    /// `(addon, descriptor)` pairs, sorted by addon
    pub sources: Vec<(String, ThirdPartyDescriptor)>,
}

/// Third-party descriptors that cannot be reconciled for a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThirdPartyConflict {
    pub platform: Platform,
    pub conflicts: Vec<ToolConflict>,
}

impl fmt::Display for ThirdPartyConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .conflicts
            .iter()
            .map(|c| {
                let sources: Vec<String> = c
                    .sources
                    .iter()
                    .map(|(addon, d)| format!("{addon}:{}@{}", d.version, d.url))
                    .collect();
                format!("{} ({}) [{}]", c.tool, self.platform, sources.join(", "))
            })
            .collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ThirdPartyConflict {}

// ---------------------------------------------------------------------------
// ConsolidatedRequirementSet
// ---------------------------------------------------------------------------

/// The merged requirement for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRequirement {
    pub name: PackageName,
    pub spec: RequirementSpec,
    pub extras: BTreeSet<String>,
    pub markers: Option<String>,
    /// Every contribution, sorted by addon
    pub sources: Vec<RequirementSource>,
}

/// `name@version` of a contributing manifest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Contributor {
    pub name: String,
    pub version: String,
}

/// Result of consolidating a bundle. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedRequirementSet {
    packages: BTreeMap<PackageName, MergedRequirement>,
    dev_packages: BTreeMap<PackageName, MergedRequirement>,
    dev_conflicts: Vec<PackageConflict>,
    third_party: Vec<(String, BTreeMap<ThirdPartyKey, ThirdPartyDescriptor>)>,
    contributors: Vec<Contributor>,
    passthrough: Table,
}

impl ConsolidatedRequirementSet {
    /// Production packages, sorted by name.
    pub fn packages(&self) -> impl Iterator<Item = &MergedRequirement> {
        self.packages.values()
    }

    /// Development packages, sorted by name.
    pub fn dev_packages(&self) -> impl Iterator<Item = &MergedRequirement> {
        self.dev_packages.values()
    }

    /// Look up a production package by any spelling of its name.
    pub fn get(&self, package: &str) -> Option<&MergedRequirement> {
        let name = PackageName::new(package).ok()?;
        self.packages.get(&name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Development packages that could not be merged. Never fatal.
    pub fn dev_conflicts(&self) -> &[PackageConflict] {
        &self.dev_conflicts
    }

    /// Manifests that took part, sorted by name.
    pub fn contributors(&self) -> &[Contributor] {
        &self.contributors
    }

    /// Non-dependency tables of the base manifest.
    pub fn passthrough(&self) -> &Table {
        &self.passthrough
    }

    /// Third-party binaries for `platform`, keyed by tool.
    ///
    /// Each contributor's platform-specific entry shadows its generic one;
    /// contributors naming the same tool must then agree exactly.
    pub fn third_party_for(
        &self,
        platform: Platform,
    ) -> Result<BTreeMap<String, ThirdPartyDescriptor>, ThirdPartyConflict> {
        let mut by_tool: BTreeMap<String, Vec<(String, ThirdPartyDescriptor)>> = BTreeMap::new();
        for (addon, descriptors) in &self.third_party {
            for (tool, descriptor) in descriptors_for(descriptors, platform) {
                by_tool.entry(tool).or_default().push((addon.clone(), descriptor));
            }
        }

        let mut resolved = BTreeMap::new();
        let mut conflicts = Vec::new();
        for (tool, sources) in by_tool {
            let first = &sources[0].1;
            if sources.iter().all(|(_, d)| d == first) {
                resolved.insert(tool, first.clone());
            } else {
                conflicts.push(ToolConflict { tool, sources });
            }
        }

        if conflicts.is_empty() {
            Ok(resolved)
        } else {
            Err(ThirdPartyConflict {
                platform,
                conflicts,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Consolidation
// ---------------------------------------------------------------------------

/// Merge the base manifest and every addon manifest into one set.
///
/// The result depends only on the multiset of inputs, never their order.
/// Development requirements are merged separately; their conflicts are
/// reported on the set instead of failing.
pub fn consolidate(
    base: Option<&AddonManifest>,
    addons: &[AddonManifest],
) -> Result<ConsolidatedRequirementSet, ConstraintConflict> {
    let manifests: Vec<&AddonManifest> = base.into_iter().chain(addons.iter()).collect();

    let production = manifests.iter().flat_map(|m| m.requirements.iter());
    let (packages, conflicts) = merge_requirements(production);
    if !conflicts.is_empty() {
        return Err(ConstraintConflict { conflicts });
    }

    let development = manifests.iter().flat_map(|m| m.dev_requirements.iter());
    let (dev_packages, dev_conflicts) = merge_requirements(development);
    for conflict in &dev_conflicts {
        warn!(package = %conflict.package, sources = %conflict, "development requirement conflict ignored");
    }

    let mut third_party: Vec<_> = manifests
        .iter()
        .filter(|m| !m.third_party.is_empty())
        .map(|m| (m.source.clone(), m.third_party.clone()))
        .collect();
    third_party.sort_by(|a, b| a.0.cmp(&b.0));

    let mut contributors: Vec<Contributor> = manifests
        .iter()
        .map(|m| Contributor {
            name: m.name.clone(),
            version: m.version.clone(),
        })
        .collect();
    contributors.sort();

    debug!(
        packages = packages.len(),
        dev_packages = dev_packages.len(),
        addons = addons.len(),
        "consolidated requirements"
    );

    Ok(ConsolidatedRequirementSet {
        packages,
        dev_packages,
        dev_conflicts,
        third_party,
        contributors,
        passthrough: base.map(|b| b.extra_sections.clone()).unwrap_or_default(),
    })
}

fn merge_requirements<'a>(
    requirements: impl Iterator<Item = &'a PackageRequirement>,
) -> (BTreeMap<PackageName, MergedRequirement>, Vec<PackageConflict>) {
    let mut grouped: BTreeMap<PackageName, Vec<&PackageRequirement>> = BTreeMap::new();
    for requirement in requirements {
        grouped
            .entry(requirement.package_name.clone())
            .or_default()
            .push(requirement);
    }

    let mut merged = BTreeMap::new();
    let mut conflicts = Vec::new();
    for (name, mut group) in grouped {
        group.sort_by(|a, b| {
            a.source_addon
                .cmp(&b.source_addon)
                .then_with(|| a.declared.cmp(&b.declared))
        });
        let sources: Vec<RequirementSource> = group
            .iter()
            .map(|r| RequirementSource {
                addon: r.source_addon.clone(),
                constraint: r.declared.clone(),
            })
            .collect();

        match merge_specs(&group) {
            Some(spec) => {
                let extras = group.iter().flat_map(|r| r.extras.iter().cloned()).collect();
                let markers = merge_markers(&name, &group);
                merged.insert(
                    name.clone(),
                    MergedRequirement {
                        name,
                        spec,
                        extras,
                        markers,
                        sources,
                    },
                );
            }
            None => conflicts.push(PackageConflict {
                package: name,
                sources,
            }),
        }
    }
    (merged, conflicts)
}

/// Intersect one package's specs, `None` when infeasible.
fn merge_specs(group: &[&PackageRequirement]) -> Option<RequirementSpec> {
    let mut directs: BTreeSet<&DirectReference> = BTreeSet::new();
    let mut versions: Vec<&VersionConstraint> = Vec::new();
    for requirement in group {
        match &requirement.spec {
            RequirementSpec::Direct(reference) => {
                directs.insert(reference);
            }
            RequirementSpec::Version(constraint) => versions.push(constraint),
        }
    }

    match directs.len() {
        0 => VersionConstraint::intersect_all(versions).map(RequirementSpec::Version),
        1 if versions.iter().all(|c| c.is_any()) => directs
            .into_iter()
            .next()
            .map(|d| RequirementSpec::Direct(d.clone())),
        _ => None,
    }
}

/// Keep markers only when every contributor agrees on them.
fn merge_markers(name: &PackageName, group: &[&PackageRequirement]) -> Option<String> {
    let distinct: BTreeSet<Option<&str>> = group.iter().map(|r| r.markers.as_deref()).collect();
    if distinct.len() == 1 {
        return distinct.into_iter().next().flatten().map(str::to_string);
    }
    warn!(
        package = %name,
        markers = ?distinct,
        "addons disagree on environment markers, dropping them"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addon(name: &str, deps: &[(&str, &str)]) -> AddonManifest {
        let mut text = format!(
            "[tool.poetry]\nname = \"{name}\"\nversion = \"1.0.0\"\n\n[tool.poetry.dependencies]\n"
        );
        for (package, constraint) in deps {
            text.push_str(&format!("{package} = \"{constraint}\"\n"));
        }
        AddonManifest::parse(&text, name).unwrap()
    }

    fn addon_text(name: &str, body: &str) -> AddonManifest {
        let text = format!("[tool.poetry]\nname = \"{name}\"\nversion = \"1.0.0\"\n\n{body}");
        AddonManifest::parse(&text, name).unwrap()
    }

    #[test]
    fn test_intersects_overlapping_ranges() {
        let a = addon("A", &[("foo", ">=1.0,<2.0")]);
        let b = addon("B", &[("foo", ">=1.5,<3.0")]);
        let set = consolidate(None, &[a, b]).unwrap();
        let foo = set.get("foo").unwrap();
        assert_eq!(foo.spec.to_string(), ">=1.5,<2.0");
        assert_eq!(foo.sources.len(), 2);
    }

    #[test]
    fn test_different_pins_conflict_with_provenance() {
        let a = addon("A", &[("bar", "==1.0.0")]);
        let b = addon("B", &[("bar", "==2.0.0")]);
        let conflict = consolidate(None, &[b, a]).unwrap_err();
        assert_eq!(conflict.conflicts.len(), 1);
        let bar = conflict.get("bar").unwrap();
        let sources: Vec<String> = bar.sources.iter().map(|s| s.to_string()).collect();
        assert_eq!(sources, vec!["A:==1.0.0", "B:==2.0.0"]);
        assert_eq!(conflict.to_string(), "bar [A:==1.0.0, B:==2.0.0]");
    }

    #[test]
    fn test_reports_every_conflicting_package() {
        let a = addon("A", &[("bar", "==1.0"), ("baz", "<1"), ("ok", ">=1")]);
        let b = addon("B", &[("bar", "==2.0"), ("baz", ">2"), ("ok", "<3")]);
        let conflict = consolidate(None, &[a, b]).unwrap_err();
        let names: Vec<&str> = conflict.packages().map(|p| p.as_str()).collect();
        assert_eq!(names, vec!["bar", "baz"]);
        assert!(conflict.conflicts[0].report().contains("A requires ==1.0"));
    }

    #[test]
    fn test_names_are_normalized_across_addons() {
        let a = addon("A", &[("My-Package", ">=1.0")]);
        let b = addon("B", &[("my_package", "<2.0")]);
        let set = consolidate(None, &[a, b]).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("my.package").unwrap().spec.to_string(), ">=1.0,<2.0");
    }

    #[test]
    fn test_identical_constraints_merge_silently() {
        let a = addon("A", &[("foo", "^1.2")]);
        let b = addon("B", &[("foo", "^1.2")]);
        let set = consolidate(None, &[a, b]).unwrap();
        let foo = set.get("foo").unwrap();
        assert_eq!(foo.spec.to_string(), ">=1.2,<2.0");
        assert_eq!(foo.sources.len(), 2);
    }

    #[test]
    fn test_base_manifest_contributes_and_passes_through() {
        let base = AddonManifest::parse_base(
            "[tool.poetry]\nname = \"app\"\nversion = \"3.0\"\n\n[tool.poetry.dependencies]\npython = \">=3.9,<3.10\"\nfoo = \"==1.4\"\n\n[tool.ruff]\nline-length = 100\n",
        )
        .unwrap();
        let a = addon("A", &[("foo", ">=1.0")]);
        let set = consolidate(Some(&base), &[a]).unwrap();
        assert_eq!(set.get("foo").unwrap().spec.to_string(), "==1.4");
        assert_eq!(set.get("python").unwrap().sources[0].addon, "base");
        assert!(set.passthrough()["tool"].as_table().unwrap().contains_key("ruff"));
        assert_eq!(set.contributors().len(), 2);
    }

    #[test]
    fn test_direct_references_must_agree() {
        let git = "[tool.poetry.dependencies]\nlib = { git = \"https://x/lib.git\", rev = \"a1\" }\n";
        let other = "[tool.poetry.dependencies]\nlib = { git = \"https://x/lib.git\", rev = \"b2\" }\n";
        let star = "[tool.poetry.dependencies]\nlib = \"*\"\n";
        let ranged = "[tool.poetry.dependencies]\nlib = \">=1\"\n";

        let set = consolidate(None, &[addon_text("A", git), addon_text("B", star)]).unwrap();
        assert_eq!(
            set.get("lib").unwrap().spec.to_string(),
            "git+https://x/lib.git@a1"
        );

        assert!(consolidate(None, &[addon_text("A", git), addon_text("B", other)]).is_err());
        assert!(consolidate(None, &[addon_text("A", git), addon_text("B", ranged)]).is_err());
    }

    #[test]
    fn test_extras_union_and_markers_policy() {
        let a = addon_text(
            "A",
            "[tool.poetry.dependencies]\npillow = { version = \">=9\", extras = [\"jpeg\"], markers = \"os_name == 'nt'\" }\n",
        );
        let b = addon_text(
            "B",
            "[tool.poetry.dependencies]\npillow = { version = \"<11\", extras = [\"webp\"], markers = \"os_name == 'nt'\" }\n",
        );
        let c = addon_text("C", "[tool.poetry.dependencies]\npillow = \">=9.1\"\n");

        let agreed = consolidate(None, &[a.clone(), b.clone()]).unwrap();
        let pillow = agreed.get("pillow").unwrap();
        assert_eq!(pillow.extras.len(), 2);
        assert_eq!(pillow.markers.as_deref(), Some("os_name == 'nt'"));

        let mixed = consolidate(None, &[a, b, c]).unwrap();
        let pillow = mixed.get("pillow").unwrap();
        assert!(pillow.markers.is_none());
        assert_eq!(pillow.spec.to_string(), ">=9.1,<11");
    }

    #[test]
    fn test_dev_conflicts_do_not_block_production() {
        let a = addon_text(
            "A",
            "[tool.poetry.dependencies]\nfoo = \">=1\"\n\n[tool.poetry.dev-dependencies]\npytest = \"==7.0\"\n",
        );
        let b = addon_text(
            "B",
            "[tool.poetry.dependencies]\nfoo = \"<2\"\n\n[tool.poetry.dev-dependencies]\npytest = \"==8.0\"\nruff = \"*\"\n",
        );
        let set = consolidate(None, &[a, b]).unwrap();
        assert_eq!(set.get("foo").unwrap().spec.to_string(), ">=1,<2");
        assert_eq!(set.dev_conflicts().len(), 1);
        assert_eq!(set.dev_conflicts()[0].package.as_str(), "pytest");
        assert_eq!(set.dev_packages().count(), 1);
        assert!(set.get("pytest").is_none());
    }

    #[test]
    fn test_third_party_agreement_per_platform() {
        let ffmpeg_linux = "[tool.addon.thirdparty.ffmpeg.linux]\nversion = \"4.4\"\nurl = \"https://x/ff-linux\"\nhash = \"h1\"\n";
        let ffmpeg_generic = "[tool.addon.thirdparty.ffmpeg]\nversion = \"5.0\"\nurl = \"https://x/ff\"\nhash = \"h2\"\n";

        let a = addon_text("A", ffmpeg_linux);
        let b = addon_text("B", ffmpeg_generic);
        let set = consolidate(None, &[a.clone(), b]).unwrap();

        let conflict = set.third_party_for(Platform::Linux).unwrap_err();
        assert_eq!(conflict.conflicts[0].tool, "ffmpeg");
        assert_eq!(conflict.conflicts[0].sources[0].0, "A");

        let windows = set.third_party_for(Platform::Windows).unwrap();
        assert_eq!(windows["ffmpeg"].version, "5.0");

        let twin = addon_text("C", ffmpeg_linux);
        let agreed = consolidate(None, &[a, twin]).unwrap();
        assert_eq!(agreed.third_party_for(Platform::Linux).unwrap()["ffmpeg"].hash, "h1");
    }

    #[test]
    fn test_consolidation_is_order_independent() {
        let a = addon("A", &[("foo", ">=2.0"), ("bar", "!=1.5")]);
        let b = addon("B", &[("foo", ">=2.0.0,<3"), ("bar", ">=1.0,<2.0")]);
        let c = addon("C", &[("foo", ">2.0"), ("bar", "^1.1")]);
        let one = consolidate(None, &[a.clone(), b.clone(), c.clone()]).unwrap();
        let two = consolidate(None, &[c, a, b]).unwrap();
        assert_eq!(one, two);
        assert_eq!(one.get("foo").unwrap().spec.to_string(), ">2.0,<3");
        assert_eq!(one.get("bar").unwrap().spec.to_string(), ">=1.1,<2.0,!=1.5");
    }
}
