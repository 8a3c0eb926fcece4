//! Canonical JSON and build fingerprints.
//!
//! The fingerprint is the SHA-256 of a canonical JSON document describing
//! everything that determines a build's content:
//! - the target platform
//! - every production package (normalized name, canonical constraint,
//!   extras, markers or direct reference)
//! - the third-party binaries resolved for that platform
//!
//! Object keys are sorted recursively, so map iteration order never leaks
//! into the digest. Development requirements are not part of it.

use std::collections::BTreeMap;

use depbundle_state::{BuildFingerprint, Platform};
use serde_json::{json, Map, Value};

use crate::consolidate::ConsolidatedRequirementSet;
use crate::error::Result;
use crate::manifest::ThirdPartyDescriptor;
use crate::requirement::RequirementSpec;

/// Bumped whenever the fingerprint document changes shape.
const FINGERPRINT_SCHEMA: u64 = 1;

/// Recursively sort JSON object keys.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.to_string(), sort_keys(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with recursively sorted keys.
pub fn canonical_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&sort_keys(value))?)
}

/// The document a fingerprint is computed over.
pub fn fingerprint_document(
    set: &ConsolidatedRequirementSet,
    platform: Platform,
    third_party: &BTreeMap<String, ThirdPartyDescriptor>,
) -> Value {
    let mut packages = Map::new();
    for merged in set.packages() {
        let mut entry = Map::new();
        match &merged.spec {
            RequirementSpec::Version(constraint) => {
                entry.insert("constraint".into(), Value::String(constraint.to_string()));
            }
            RequirementSpec::Direct(reference) => {
                entry.insert("direct".into(), json!(reference));
            }
        }
        if !merged.extras.is_empty() {
            entry.insert("extras".into(), json!(merged.extras));
        }
        if let Some(markers) = &merged.markers {
            entry.insert("markers".into(), Value::String(markers.clone()));
        }
        packages.insert(merged.name.to_string(), Value::Object(entry));
    }

    json!({
        "schema": FINGERPRINT_SCHEMA,
        "platform": platform.as_str(),
        "packages": packages,
        "third_party": third_party,
    })
}

/// Fingerprint a consolidated set for one platform.
pub fn fingerprint(
    set: &ConsolidatedRequirementSet,
    platform: Platform,
    third_party: &BTreeMap<String, ThirdPartyDescriptor>,
) -> Result<BuildFingerprint> {
    let canonical = canonical_json(&fingerprint_document(set, platform, third_party))?;
    Ok(BuildFingerprint::from_bytes(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::consolidate;
    use crate::manifest::AddonManifest;

    fn set_of(manifests: &[(&str, &str)]) -> ConsolidatedRequirementSet {
        let parsed: Vec<_> = manifests
            .iter()
            .map(|(name, deps)| {
                let text = format!(
                    "[tool.poetry]\nname = \"{name}\"\nversion = \"1\"\n\n[tool.poetry.dependencies]\n{deps}\n"
                );
                AddonManifest::parse(&text, name).expect("parse")
            })
            .collect();
        consolidate(None, &parsed).expect("consolidate")
    }

    fn fp(set: &ConsolidatedRequirementSet, platform: Platform) -> BuildFingerprint {
        fingerprint(set, platform, &BTreeMap::new()).expect("fingerprint")
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let input = json!({ "b": { "z": 1, "a": 2 }, "a": [ { "y": 1, "x": 2 } ] });
        let canonical = canonical_json(&input).expect("canonical_json");
        assert_eq!(canonical, r#"{"a":[{"x":2,"y":1}],"b":{"a":2,"z":1}}"#);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let set = set_of(&[("A", "foo = \">=1.0\"")]);
        assert_eq!(fp(&set, Platform::Linux), fp(&set, Platform::Linux));
        assert_eq!(fp(&set, Platform::Linux).as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_ignores_addon_order_and_spelling() {
        let one = set_of(&[("A", "foo = \">=1.0\""), ("B", "Bar_Baz = \"<2\"")]);
        let two = set_of(&[("B", "bar.baz = \"<2\""), ("A", "foo = \">=1.0\"")]);
        assert_eq!(fp(&one, Platform::Linux), fp(&two, Platform::Linux));
    }

    #[test]
    fn test_fingerprint_changes_with_constraint() {
        let before = set_of(&[("A", "foo = \">=1.0\"")]);
        let after = set_of(&[("A", "foo = \">=1.1\"")]);
        assert_ne!(fp(&before, Platform::Linux), fp(&after, Platform::Linux));
    }

    #[test]
    fn test_fingerprint_changes_with_platform() {
        let set = set_of(&[("A", "foo = \">=1.0\"")]);
        assert_ne!(fp(&set, Platform::Linux), fp(&set, Platform::Windows));
    }

    #[test]
    fn test_fingerprint_changes_with_third_party() {
        let set = set_of(&[("A", "foo = \">=1.0\"")]);
        let mut third_party = BTreeMap::new();
        third_party.insert(
            "ffmpeg".to_string(),
            ThirdPartyDescriptor {
                version: "4.4".to_string(),
                url: "https://example.com/ffmpeg.tgz".to_string(),
                hash: "sha256:00".to_string(),
            },
        );
        let with = fingerprint(&set, Platform::Linux, &third_party).expect("fingerprint");
        assert_ne!(with, fp(&set, Platform::Linux));
    }

    #[test]
    fn test_fingerprint_ignores_provenance() {
        let solo = set_of(&[("A", "foo = \">=1.0,<2\"")]);
        let split = set_of(&[("A", "foo = \">=1.0\""), ("B", "foo = \"<2\"")]);
        assert_eq!(fp(&solo, Platform::Darwin), fp(&split, Platform::Darwin));
    }
}
