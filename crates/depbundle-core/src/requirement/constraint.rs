//! Version constraints in canonical interval form.
//!
//! Every accepted constraint string (`>=2.0,<3.0`, `^1.2`, `~=1.4.5`,
//! `1.7.*`, `!=2.1`, ...) is reduced to one optional lower bound, one
//! optional upper bound and a sorted set of excluded versions. Merging
//! constraints is then bound arithmetic, and rendering the result is
//! deterministic no matter which order the inputs arrived in.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::version::Version;

/// Errors from parsing a constraint string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstraintError {
    #[error("empty version constraint")]
    Empty,

    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("unsupported constraint '{clause}': {reason}")]
    Unsupported { clause: String, reason: String },

    #[error("constraint '{0}' can never be satisfied")]
    Unsatisfiable(String),
}

/// One end of an interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

impl Bound {
    fn inclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: true,
        }
    }

    fn exclusive(version: Version) -> Self {
        Self {
            version,
            inclusive: false,
        }
    }
}

/// How much tighter lower bound `a` is than `b`. `Greater` means `a` wins.
fn lower_tightness(a: &Bound, b: &Bound) -> Ordering {
    a.version
        .cmp(&b.version)
        .then_with(|| (!a.inclusive).cmp(&!b.inclusive))
        .then_with(|| b.version.to_string().cmp(&a.version.to_string()))
}

/// How much tighter upper bound `a` is than `b`. `Greater` means `a` wins.
fn upper_tightness(a: &Bound, b: &Bound) -> Ordering {
    b.version
        .cmp(&a.version)
        .then_with(|| (!a.inclusive).cmp(&!b.inclusive))
        .then_with(|| b.version.to_string().cmp(&a.version.to_string()))
}

fn smaller_spelling(a: Version, b: Version) -> Version {
    if b.to_string() < a.to_string() {
        b
    } else {
        a
    }
}

/// A set of acceptable versions: `[lower, upper]` minus `exclusions`.
///
/// Values are always normalized: exclusions lie strictly inside the
/// interval, an exclusion touching an inclusive bound has turned that bound
/// exclusive, and an interval that collapses to one point is a pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    lower: Option<Bound>,
    upper: Option<Bound>,
    exclusions: Vec<Version>,
}

impl VersionConstraint {
    /// The unconstrained set (`*`).
    pub fn any() -> Self {
        Self {
            lower: None,
            upper: None,
            exclusions: Vec::new(),
        }
    }

    /// Exactly one version (`==v`).
    pub fn exact(version: Version) -> Self {
        Self {
            lower: Some(Bound::inclusive(version.clone())),
            upper: Some(Bound::inclusive(version)),
            exclusions: Vec::new(),
        }
    }

    pub fn lower(&self) -> Option<&Bound> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Bound> {
        self.upper.as_ref()
    }

    pub fn exclusions(&self) -> &[Version] {
        &self.exclusions
    }

    pub fn is_any(&self) -> bool {
        self.lower.is_none() && self.upper.is_none() && self.exclusions.is_empty()
    }

    /// The pinned version if this constraint admits exactly one.
    pub fn pin(&self) -> Option<&Version> {
        match (&self.lower, &self.upper) {
            (Some(l), Some(u)) if l.inclusive && u.inclusive && l.version == u.version => {
                Some(&l.version)
            }
            _ => None,
        }
    }

    /// Whether `version` lies in the satisfying set.
    pub fn allows(&self, version: &Version) -> bool {
        let above_lower = match &self.lower {
            Some(b) if b.inclusive => version >= &b.version,
            Some(b) => version > &b.version,
            None => true,
        };
        let below_upper = match &self.upper {
            Some(b) if b.inclusive => version <= &b.version,
            Some(b) => version < &b.version,
            None => true,
        };
        above_lower && below_upper && !self.exclusions.contains(version)
    }

    /// Intersection of two constraints, `None` when it is empty.
    pub fn intersect(&self, other: &VersionConstraint) -> Option<VersionConstraint> {
        Self::intersect_all([self, other])
    }

    /// Intersection of any number of constraints, `None` when it is empty.
    ///
    /// The tightest bounds are picked over the whole collection before
    /// normalizing, so the result does not depend on iteration order.
    pub fn intersect_all<'a, I>(constraints: I) -> Option<VersionConstraint>
    where
        I: IntoIterator<Item = &'a VersionConstraint>,
    {
        let mut lower: Option<Bound> = None;
        let mut upper: Option<Bound> = None;
        let mut exclusions = Vec::new();

        for constraint in constraints {
            if let Some(candidate) = &constraint.lower {
                let replace = match &lower {
                    Some(current) => lower_tightness(candidate, current) == Ordering::Greater,
                    None => true,
                };
                if replace {
                    lower = Some(candidate.clone());
                }
            }
            if let Some(candidate) = &constraint.upper {
                let replace = match &upper {
                    Some(current) => upper_tightness(candidate, current) == Ordering::Greater,
                    None => true,
                };
                if replace {
                    upper = Some(candidate.clone());
                }
            }
            exclusions.extend(constraint.exclusions.iter().cloned());
        }

        Self::normalized(lower, upper, exclusions)
    }

    fn normalized(
        mut lower: Option<Bound>,
        mut upper: Option<Bound>,
        mut exclusions: Vec<Version>,
    ) -> Option<VersionConstraint> {
        exclusions.sort_by(|a, b| a.canonical_cmp(b));
        exclusions.dedup_by(|later, earlier| later == earlier);

        if let (Some(l), Some(u)) = (&lower, &upper) {
            match l.version.cmp(&u.version) {
                Ordering::Greater => return None,
                Ordering::Equal => {
                    if !(l.inclusive && u.inclusive) || exclusions.contains(&l.version) {
                        return None;
                    }
                    let point = smaller_spelling(l.version.clone(), u.version.clone());
                    return Some(VersionConstraint::exact(point));
                }
                Ordering::Less => {}
            }
        }

        let mut kept = Vec::with_capacity(exclusions.len());
        for excluded in exclusions {
            if let Some(l) = lower.as_mut() {
                match excluded.cmp(&l.version) {
                    Ordering::Less => continue,
                    Ordering::Equal => {
                        if l.inclusive {
                            l.inclusive = false;
                            l.version = smaller_spelling(l.version.clone(), excluded);
                        }
                        continue;
                    }
                    Ordering::Greater => {}
                }
            }
            if let Some(u) = upper.as_mut() {
                match excluded.cmp(&u.version) {
                    Ordering::Greater => continue,
                    Ordering::Equal => {
                        if u.inclusive {
                            u.inclusive = false;
                            u.version = smaller_spelling(u.version.clone(), excluded);
                        }
                        continue;
                    }
                    Ordering::Less => {}
                }
            }
            kept.push(excluded);
        }

        Some(VersionConstraint {
            lower,
            upper,
            exclusions: kept,
        })
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

const OPERATORS: [&str; 11] = [
    "===", "==", "!=", "~=", "<=", ">=", "<", ">", "=", "^", "~",
];

fn split_operator(clause: &str) -> (Option<&'static str>, &str) {
    for op in OPERATORS {
        if let Some(rest) = clause.strip_prefix(op) {
            return (Some(op), rest);
        }
    }
    (None, clause)
}

/// Split `>=1.0 <2.0, !=1.5` into `(operator, version)` clauses.
fn tokenize(input: &str) -> Result<Vec<(Option<&'static str>, &str)>, ConstraintError> {
    if input.contains("://") {
        return Err(ConstraintError::Unsupported {
            clause: input.to_string(),
            reason: "URLs are direct references, not version constraints".to_string(),
        });
    }
    if input.contains('|') {
        return Err(ConstraintError::Unsupported {
            clause: input.to_string(),
            reason: "alternatives ('||') are not supported".to_string(),
        });
    }
    if input.trim().is_empty() {
        return Err(ConstraintError::Empty);
    }

    let mut clauses = Vec::new();
    for part in input.split(',') {
        let mut rest = part.trim();
        if rest.is_empty() {
            return Err(ConstraintError::Empty);
        }
        while !rest.is_empty() {
            let (op, tail) = split_operator(rest);
            let tail = tail.trim_start();
            let end = tail.find(char::is_whitespace).unwrap_or(tail.len());
            let (version, remainder) = tail.split_at(end);
            if version.is_empty() {
                return Err(ConstraintError::InvalidVersion(rest.to_string()));
            }
            clauses.push((op, version));
            rest = remainder.trim_start();
        }
    }
    Ok(clauses)
}

fn parse_release_prefix(prefix: &str, clause: &str) -> Result<Version, ConstraintError> {
    let version: Version = prefix.parse()?;
    if version.is_prerelease() || version.is_postrelease() {
        return Err(ConstraintError::Unsupported {
            clause: clause.to_string(),
            reason: "wildcards apply to release segments only".to_string(),
        });
    }
    Ok(version)
}

fn clause_constraint(op: Option<&str>, raw: &str) -> Result<VersionConstraint, ConstraintError> {
    let clause = format!("{}{}", op.unwrap_or(""), raw);
    let unsupported = |reason: &str| ConstraintError::Unsupported {
        clause: clause.clone(),
        reason: reason.to_string(),
    };

    if raw == "*" {
        return match op {
            None | Some("==") | Some("=") => Ok(VersionConstraint::any()),
            Some(_) => Err(unsupported("'*' cannot be combined with an operator")),
        };
    }

    if let Some(prefix) = raw.strip_suffix(".*") {
        return match op {
            None | Some("==") | Some("=") => {
                let base = parse_release_prefix(prefix, &clause)?;
                let len = base.release().len();
                let upper = base.bump(len - 1, len);
                Ok(range(Bound::inclusive(base), Bound::exclusive(upper)))
            }
            Some("!=") => Err(unsupported("excluding a wildcard range is not supported")),
            Some(_) => Err(unsupported("wildcards are only valid with '=='")),
        };
    }

    let version: Version = raw.parse()?;
    let len = version.release().len();
    let constraint = match op {
        None | Some("==") | Some("=") => VersionConstraint::exact(version),
        Some("!=") => VersionConstraint {
            lower: None,
            upper: None,
            exclusions: vec![version],
        },
        Some(">=") => lower_only(Bound::inclusive(version)),
        Some(">") => lower_only(Bound::exclusive(version)),
        Some("<=") => upper_only(Bound::inclusive(version)),
        Some("<") => upper_only(Bound::exclusive(version)),
        Some("^") => {
            let index = version
                .release()
                .iter()
                .position(|segment| *segment != 0)
                .unwrap_or(len - 1);
            let upper = version.bump(index, len);
            range(Bound::inclusive(version), Bound::exclusive(upper))
        }
        Some("~") => {
            let index = if len >= 2 { 1 } else { 0 };
            let upper = version.bump(index, len);
            range(Bound::inclusive(version), Bound::exclusive(upper))
        }
        Some("~=") => {
            if len < 2 {
                return Err(unsupported("'~=' needs at least two release segments"));
            }
            let upper = version.bump(len - 2, len - 1);
            range(Bound::inclusive(version), Bound::exclusive(upper))
        }
        Some("===") => return Err(unsupported("arbitrary equality is not supported")),
        Some(other) => return Err(unsupported(&format!("unknown operator '{other}'"))),
    };
    Ok(constraint)
}

fn range(lower: Bound, upper: Bound) -> VersionConstraint {
    VersionConstraint {
        lower: Some(lower),
        upper: Some(upper),
        exclusions: Vec::new(),
    }
}

fn lower_only(bound: Bound) -> VersionConstraint {
    VersionConstraint {
        lower: Some(bound),
        upper: None,
        exclusions: Vec::new(),
    }
}

fn upper_only(bound: Bound) -> VersionConstraint {
    VersionConstraint {
        lower: None,
        upper: Some(bound),
        exclusions: Vec::new(),
    }
}

impl FromStr for VersionConstraint {
    type Err = ConstraintError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let pieces = tokenize(input)?
            .into_iter()
            .map(|(op, raw)| clause_constraint(op, raw))
            .collect::<Result<Vec<_>, _>>()?;
        VersionConstraint::intersect_all(&pieces)
            .ok_or_else(|| ConstraintError::Unsatisfiable(input.trim().to_string()))
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("*");
        }
        if let Some(pin) = self.pin() {
            return write!(f, "=={pin}");
        }
        let mut parts = Vec::new();
        if let Some(b) = &self.lower {
            let op = if b.inclusive { ">=" } else { ">" };
            parts.push(format!("{op}{}", b.version));
        }
        if let Some(b) = &self.upper {
            let op = if b.inclusive { "<=" } else { "<" };
            parts.push(format!("{op}{}", b.version));
        }
        for excluded in &self.exclusions {
            parts.push(format!("!={excluded}"));
        }
        f.write_str(&parts.join(","))
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> VersionConstraint {
        s.parse().unwrap()
    }

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn merged(parts: &[&str]) -> Option<String> {
        let parsed: Vec<_> = parts.iter().map(|p| c(p)).collect();
        VersionConstraint::intersect_all(&parsed).map(|m| m.to_string())
    }

    #[test]
    fn test_canonical_rendering() {
        assert_eq!(c("*").to_string(), "*");
        assert_eq!(c("2.4").to_string(), "==2.4");
        assert_eq!(c("=2.4").to_string(), "==2.4");
        assert_eq!(c("<3.0, >=2.0").to_string(), ">=2.0,<3.0");
        assert_eq!(c(">=2.0 <3.0").to_string(), ">=2.0,<3.0");
        assert_eq!(c(">= 2.0").to_string(), ">=2.0");
        assert_eq!(c("!=2.2,!=2.1").to_string(), "!=2.1,!=2.2");
    }

    #[test]
    fn test_caret_and_tilde_expansion() {
        assert_eq!(c("^1.2.3").to_string(), ">=1.2.3,<2.0.0");
        assert_eq!(c("^1.2").to_string(), ">=1.2,<2.0");
        assert_eq!(c("^0.2.3").to_string(), ">=0.2.3,<0.3.0");
        assert_eq!(c("^0.0.3").to_string(), ">=0.0.3,<0.0.4");
        assert_eq!(c("^0").to_string(), ">=0,<1");
        assert_eq!(c("~1.2.3").to_string(), ">=1.2.3,<1.3.0");
        assert_eq!(c("~1").to_string(), ">=1,<2");
    }

    #[test]
    fn test_compatible_release_and_wildcards() {
        assert_eq!(c("~=1.4.5").to_string(), ">=1.4.5,<1.5");
        assert_eq!(c("~=2.2").to_string(), ">=2.2,<3");
        assert_eq!(c("1.7.*").to_string(), ">=1.7,<1.8");
        assert_eq!(c("==2.*").to_string(), ">=2,<3");
    }

    #[test]
    fn test_rejects_unsupported_syntax() {
        assert!(matches!(
            "^1.0 || ^2.0".parse::<VersionConstraint>(),
            Err(ConstraintError::Unsupported { .. })
        ));
        assert!(matches!(
            "===1.0".parse::<VersionConstraint>(),
            Err(ConstraintError::Unsupported { .. })
        ));
        assert!(matches!(
            "!=1.*".parse::<VersionConstraint>(),
            Err(ConstraintError::Unsupported { .. })
        ));
        assert!(matches!(
            "~=1".parse::<VersionConstraint>(),
            Err(ConstraintError::Unsupported { .. })
        ));
        assert!(matches!(
            "svn+https://example.com/repo".parse::<VersionConstraint>(),
            Err(ConstraintError::Unsupported { reason, .. }) if reason.contains("direct references")
        ));
        assert_eq!("".parse::<VersionConstraint>(), Err(ConstraintError::Empty));
        assert_eq!(
            ">=1.0,,<2".parse::<VersionConstraint>(),
            Err(ConstraintError::Empty)
        );
        assert!(">=banana".parse::<VersionConstraint>().is_err());
        assert!(">=".parse::<VersionConstraint>().is_err());
    }

    #[test]
    fn test_self_contradicting_constraint_is_unsatisfiable() {
        assert_eq!(
            ">2,<1".parse::<VersionConstraint>(),
            Err(ConstraintError::Unsatisfiable(">2,<1".to_string()))
        );
    }

    #[test]
    fn test_overlapping_ranges_intersect() {
        assert_eq!(
            merged(&[">=1.0,<2.0", ">=1.5,<3.0"]).as_deref(),
            Some(">=1.5,<2.0")
        );
        assert_eq!(
            merged(&[">=2.0,<3.0", ">=2.5"]).as_deref(),
            Some(">=2.5,<3.0")
        );
    }

    #[test]
    fn test_different_pins_are_empty() {
        assert_eq!(merged(&["==1.0.0", "==2.0.0"]), None);
        assert_eq!(merged(&["==2.4", ">=2.5"]), None);
    }

    #[test]
    fn test_exclusive_wins_a_tie() {
        assert_eq!(merged(&[">=1.0", ">1.0"]).as_deref(), Some(">1.0"));
        assert_eq!(merged(&["<=2.0", "<2.0"]).as_deref(), Some("<2.0"));
    }

    #[test]
    fn test_closed_point_becomes_pin() {
        assert_eq!(merged(&[">=1.5", "<=1.5"]).as_deref(), Some("==1.5"));
        assert_eq!(merged(&[">=1.5", "<1.5"]), None);
        assert_eq!(merged(&[">=1.5,<=1.5", "!=1.5"]), None);
    }

    #[test]
    fn test_exclusions_are_pruned_to_interval() {
        assert_eq!(
            merged(&[">=1.0,<2.0", "!=0.9", "!=1.5", "!=2.5"]).as_deref(),
            Some(">=1.0,<2.0,!=1.5")
        );
        assert_eq!(merged(&[">=1.0", "!=1.0"]).as_deref(), Some(">1.0"));
        assert_eq!(merged(&["==1.0", "!=2.0"]).as_deref(), Some("==1.0"));
    }

    #[test]
    fn test_equal_spellings_pick_smaller_text_in_any_order() {
        assert_eq!(merged(&[">=2.0", ">=2.0.0"]).as_deref(), Some(">=2.0"));
        assert_eq!(merged(&[">=2.0.0", ">=2.0"]).as_deref(), Some(">=2.0"));
        assert_eq!(merged(&["==2.0.0", "==2.0"]).as_deref(), Some("==2.0"));

        let a = merged(&[">=1.0", "!=1.0", ">1.0.0"]);
        let b = merged(&[">1.0.0", "!=1.0", ">=1.0"]);
        let d = merged(&["!=1.0", ">1.0.0", ">=1.0"]);
        assert_eq!(a, b);
        assert_eq!(b, d);
    }

    #[test]
    fn test_allows_respects_bounds_and_exclusions() {
        let constraint = c(">=1.0,<2.0,!=1.5");
        assert!(constraint.allows(&v("1.0")));
        assert!(constraint.allows(&v("1.9.9")));
        assert!(!constraint.allows(&v("1.5.0")));
        assert!(!constraint.allows(&v("2.0")));
        assert!(!constraint.allows(&v("0.9")));
        assert!(VersionConstraint::any().allows(&v("99")));
    }

    #[test]
    fn test_canonical_text_reparses_to_same_set() {
        for raw in ["^1.2", ">=1.0,<2.0,!=1.5", "==3.1", "*", "~=1.4.5", ">1.0"] {
            let once = c(raw);
            let twice = c(&once.to_string());
            assert_eq!(once, twice, "{raw}");
            assert_eq!(once.to_string(), twice.to_string());
        }
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let json = serde_json::to_string(&c("<3.0,>=2.0")).unwrap();
        assert_eq!(json, "\">=2.0,<3.0\"");
        let back: VersionConstraint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c(">=2.0,<3.0"));
    }
}
