//! PEP 440 versions (public subset).
//!
//! Supported: optional epoch (`1!`), dotted release, pre-release
//! (`a`/`b`/`rc` and their long spellings), `.postN` and `.devN`.
//! Local version labels (`+ubuntu1`) are rejected.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use super::constraint::ConstraintError;

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?ix)^
            v?
            (?:(?P<epoch>[0-9]+)!)?
            (?P<release>[0-9]+(?:\.[0-9]+)*)
            (?:[-_.]?(?P<pre_l>alpha|beta|preview|pre|rc|a|b|c)[-_.]?(?P<pre_n>[0-9]+)?)?
            (?:-(?P<post_implicit>[0-9]+)|[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n>[0-9]+)?)?
            (?:[-_.]?(?P<dev_l>dev)[-_.]?(?P<dev_n>[0-9]+)?)?
            $",
        )
        .expect("version pattern is a valid regex")
    })
}

/// Pre-release phase. Declaration order is sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PreRelease {
    Alpha,
    Beta,
    Rc,
}

impl PreRelease {
    fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "a" | "alpha" => PreRelease::Alpha,
            "b" | "beta" => PreRelease::Beta,
            _ => PreRelease::Rc,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            PreRelease::Alpha => "a",
            PreRelease::Beta => "b",
            PreRelease::Rc => "rc",
        }
    }
}

/// A parsed PEP 440 version.
///
/// Equality and ordering follow PEP 440: release segments are compared as if
/// zero-padded (`2.4 == 2.4.0`) and phases sort `dev < pre < final < post`.
/// `Display` always renders the normalized spelling.
#[derive(Debug, Clone)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreRelease, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
}

/// Sort key for the pre-release slot.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PreKey {
    /// `1.0.dev1` sorts below every pre-release of `1.0`.
    DevOnly,
    Pre(PreRelease, u64),
    Final,
}

impl Version {
    /// A final release with the given segments.
    pub fn from_release(release: Vec<u64>) -> Self {
        Self {
            epoch: 0,
            release,
            pre: None,
            post: None,
            dev: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    pub fn is_postrelease(&self) -> bool {
        self.post.is_some()
    }

    /// Release without trailing zero segments, used for comparison and hashing.
    fn trimmed_release(&self) -> &[u64] {
        let end = self
            .release
            .iter()
            .rposition(|segment| *segment != 0)
            .map_or(0, |i| i + 1);
        &self.release[..end]
    }

    fn pre_key(&self) -> PreKey {
        match (self.pre, self.post, self.dev) {
            (Some((phase, n)), _, _) => PreKey::Pre(phase, n),
            (None, None, Some(_)) => PreKey::DevOnly,
            _ => PreKey::Final,
        }
    }

    fn dev_key(&self) -> (bool, u64) {
        (self.dev.is_none(), self.dev.unwrap_or(0))
    }

    /// Next release boundary: segment `index` incremented, later segments
    /// zeroed, result padded or truncated to `len` segments.
    ///
    /// `bump(1, 3)` on `1.2.3` yields `1.3.0`; `bump(0, 1)` on `2.2` yields `3`.
    pub(crate) fn bump(&self, index: usize, len: usize) -> Version {
        let len = len.max(index + 1);
        let mut release = Vec::with_capacity(len);
        for i in 0..len {
            let segment = self.release.get(i).copied().unwrap_or(0);
            let value = match i.cmp(&index) {
                Ordering::Less => segment,
                Ordering::Equal => segment.saturating_add(1),
                Ordering::Greater => 0,
            };
            release.push(value);
        }
        Version {
            epoch: self.epoch,
            release,
            pre: None,
            post: None,
            dev: None,
        }
    }

    /// Ordering that also separates equal versions by their rendered spelling.
    ///
    /// Used wherever two equal-valued bounds compete so the pick does not
    /// depend on which one was seen first.
    pub fn canonical_cmp(&self, other: &Version) -> Ordering {
        self.cmp(other)
            .then_with(|| self.to_string().cmp(&other.to_string()))
    }
}

fn parse_number(raw: &str, input: &str) -> Result<u64, ConstraintError> {
    raw.parse::<u64>()
        .map_err(|_| ConstraintError::InvalidVersion(input.to_string()))
}

impl FromStr for Version {
    type Err = ConstraintError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.contains('+') {
            return Err(ConstraintError::Unsupported {
                clause: input.to_string(),
                reason: "local version labels are not supported".to_string(),
            });
        }
        let caps = version_pattern()
            .captures(trimmed)
            .ok_or_else(|| ConstraintError::InvalidVersion(input.to_string()))?;

        let epoch = match caps.name("epoch") {
            Some(m) => parse_number(m.as_str(), input)?,
            None => 0,
        };

        let release = caps
            .name("release")
            .map(|m| m.as_str())
            .unwrap_or_default()
            .split('.')
            .map(|segment| parse_number(segment, input))
            .collect::<Result<Vec<_>, _>>()?;

        let pre = match caps.name("pre_l") {
            Some(label) => {
                let n = match caps.name("pre_n") {
                    Some(m) => parse_number(m.as_str(), input)?,
                    None => 0,
                };
                Some((PreRelease::from_label(label.as_str()), n))
            }
            None => None,
        };

        let post = if let Some(m) = caps.name("post_implicit") {
            Some(parse_number(m.as_str(), input)?)
        } else if caps.name("post_l").is_some() {
            match caps.name("post_n") {
                Some(m) => Some(parse_number(m.as_str(), input)?),
                None => Some(0),
            }
        } else {
            None
        };

        let dev = if caps.name("dev_l").is_some() {
            match caps.name("dev_n") {
                Some(m) => Some(parse_number(m.as_str(), input)?),
                None => Some(0),
            }
        } else {
            None
        };

        Ok(Version {
            epoch,
            release,
            pre,
            post,
            dev,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(|s| s.to_string()).collect();
        f.write_str(&release.join("."))?;
        if let Some((phase, n)) = self.pre {
            write!(f, "{}{}", phase.as_str(), n)?;
        }
        if let Some(n) = self.post {
            write!(f, ".post{n}")?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{n}")?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.trimmed_release().cmp(other.trimmed_release()))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        self.trimmed_release().hash(state);
        self.pre.hash(state);
        self.post.hash(state);
        self.dev.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_parses_plain_release() {
        let version = v("2.31.0");
        assert_eq!(version.release(), &[2, 31, 0]);
        assert_eq!(version.to_string(), "2.31.0");
        assert!(!version.is_prerelease());
    }

    #[test]
    fn test_normalizes_spellings() {
        assert_eq!(v("1.0-alpha1").to_string(), "1.0a1");
        assert_eq!(v("1.0.RC2").to_string(), "1.0rc2");
        assert_eq!(v("1.0c1").to_string(), "1.0rc1");
        assert_eq!(v("1.0-1").to_string(), "1.0.post1");
        assert_eq!(v("1.0.post").to_string(), "1.0.post0");
        assert_eq!(v("1.0dev").to_string(), "1.0.dev0");
        assert_eq!(v("v3.1").to_string(), "3.1");
        assert_eq!(v("1!2.0").to_string(), "1!2.0");
    }

    #[test]
    fn test_zero_padding_is_equal() {
        assert_eq!(v("2.4"), v("2.4.0"));
        assert_eq!(v("2"), v("2.0.0.0"));
        assert_ne!(v("2.4"), v("2.4.1"));
    }

    #[test]
    fn test_equal_versions_hash_equal() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(v("1.2"));
        assert!(set.contains(&v("1.2.0")));
    }

    #[test]
    fn test_phase_ordering() {
        let ordered = [
            "1.0.dev0",
            "1.0a1.dev1",
            "1.0a1",
            "1.0b1",
            "1.0rc1",
            "1.0",
            "1.0.post1.dev0",
            "1.0.post1",
            "1.0.1",
            "1!0.1",
        ];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_release_compares_numerically() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("1.0.1") > v("1"));
    }

    #[test]
    fn test_rejects_local_and_garbage() {
        assert!("1.0+ubuntu1".parse::<Version>().is_err());
        assert!("latest".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
        assert!("1..2".parse::<Version>().is_err());
        assert!("99999999999999999999999".parse::<Version>().is_err());
    }

    #[test]
    fn test_bump_boundaries() {
        assert_eq!(v("1.2.3").bump(0, 3).to_string(), "2.0.0");
        assert_eq!(v("1.2.3").bump(1, 3).to_string(), "1.3.0");
        assert_eq!(v("1.4.5").bump(1, 2).to_string(), "1.5");
        assert_eq!(v("2.2").bump(0, 1).to_string(), "3");
        assert_eq!(v("1").bump(1, 2).to_string(), "1.1");
        assert_eq!(v("1.0rc1").bump(0, 2).to_string(), "2.0");
    }

    #[test]
    fn test_canonical_cmp_breaks_ties_by_spelling() {
        assert_eq!(v("2.0").canonical_cmp(&v("2.0.0")), Ordering::Less);
        assert_eq!(v("2.0.0").canonical_cmp(&v("2.0")), Ordering::Greater);
        assert_eq!(v("1.0").canonical_cmp(&v("2.0.0")), Ordering::Less);
    }
}
