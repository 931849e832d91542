use crate::core::patterns::GlobList;
use crate::domain::errors::ConfigError;
use crate::domain::models::{PathCandidate, SelectedFile, Selection, Slice};
use log::{debug, info};
use std::collections::BTreeMap;

/// A run-time `+name` / `-name` slice toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modifier {
    pub name: String,
    pub enable: bool,
}

pub fn is_valid_slice_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn is_modifier(arg: &str) -> bool {
    arg.starts_with('+') || arg.starts_with('-')
}

pub fn parse_modifiers<S: AsRef<str>>(args: &[S]) -> Result<Vec<Modifier>, ConfigError> {
    let mut mods = Vec::with_capacity(args.len());
    for arg in args.iter().map(AsRef::as_ref) {
        if arg.is_empty() {
            continue;
        }
        let enable = match arg.as_bytes()[0] {
            b'+' => true,
            b'-' => false,
            _ => return Err(ConfigError::InvalidModifier(arg.to_string())),
        };
        let name = &arg[1..];
        if !is_valid_slice_name(name) {
            return Err(ConfigError::InvalidSliceName(name.to_string()));
        }
        mods.push(Modifier {
            name: name.to_string(),
            enable,
        });
    }
    Ok(mods)
}

/// Resolves the enabled slice set for a profile's list plus modifiers, name-ascending.
pub fn resolve_enabled(
    profile_enables: &[String],
    known: &BTreeMap<String, Slice>,
    mods: &[Modifier],
) -> Result<Vec<String>, ConfigError> {
    let mut enabled: BTreeMap<&str, bool> = BTreeMap::new();
    for name in profile_enables {
        if !known.contains_key(name) {
            return Err(ConfigError::UnknownSlice(name.clone()));
        }
        enabled.insert(name, true);
    }
    for m in mods {
        if !known.contains_key(&m.name) {
            return Err(ConfigError::UnknownSlice(m.name.clone()));
        }
        enabled.insert(&m.name, m.enable);
    }
    Ok(enabled
        .into_iter()
        .filter(|(_, on)| *on)
        .map(|(name, _)| name.to_string())
        .collect())
}

/// Display order: priority descending, then name ascending.
pub fn order_by_priority(enabled: &[String], known: &BTreeMap<String, Slice>) -> Vec<String> {
    let mut out = enabled.to_vec();
    out.sort_by(|a, b| {
        let pa = known.get(a).map_or(0, |s| s.priority);
        let pb = known.get(b).map_or(0, |s| s.priority);
        pb.cmp(&pa).then_with(|| a.cmp(b))
    });
    out
}

/// Outcome of matching one path against one slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceMatch {
    pub member: bool,
    pub include_pattern: Option<String>,
    pub include_explicit_hidden: bool,
    pub exclude_pattern: Option<String>,
    pub hidden_blocked: bool,
}

/// One slice with its globs compiled.
#[derive(Debug, Clone)]
pub struct SliceMatcher {
    pub name: String,
    pub priority: i32,
    include: GlobList,
    exclude: GlobList,
}

impl SliceMatcher {
    pub fn new(slice: &Slice) -> Self {
        Self {
            name: slice.name.clone(),
            priority: slice.priority,
            include: GlobList::new(&slice.include),
            exclude: GlobList::new(&slice.exclude),
        }
    }

    /// Member iff an include glob matches and no exclude glob does. Hidden paths
    /// additionally need `allow_hidden` or an include pattern that names a
    /// dot-segment explicitly.
    pub fn match_path(&self, rel_path: &str, is_hidden: bool, allow_hidden: bool) -> SliceMatch {
        let include_pattern = self.include.first_match(rel_path).map(str::to_string);
        let exclude_pattern = self.exclude.first_match(rel_path).map(str::to_string);
        let include_explicit_hidden =
            include_pattern.is_some() && self.include.matches_explicit_hidden(rel_path);
        let hidden_blocked =
            include_pattern.is_some() && is_hidden && !allow_hidden && !include_explicit_hidden;

        SliceMatch {
            member: include_pattern.is_some() && exclude_pattern.is_none() && !hidden_blocked,
            include_pattern,
            include_explicit_hidden,
            exclude_pattern,
            hidden_blocked,
        }
    }
}

/// Assigns member slices and a primary slice to every candidate.
pub struct MembershipResolver {
    matchers: Vec<SliceMatcher>,
    allow_hidden: bool,
}

impl MembershipResolver {
    pub fn new(enabled: &[&Slice], allow_hidden: bool) -> Result<Self, ConfigError> {
        if enabled.is_empty() {
            return Err(ConfigError::NoEnabledSlices);
        }
        let mut matchers: Vec<SliceMatcher> = enabled.iter().map(|s| SliceMatcher::new(s)).collect();
        matchers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self {
            matchers,
            allow_hidden,
        })
    }

    /// Member slice names, ascending.
    pub fn members(&self, rel_path: &str, is_hidden: bool) -> Vec<&SliceMatcher> {
        self.matchers
            .iter()
            .filter(|m| m.match_path(rel_path, is_hidden, self.allow_hidden).member)
            .collect()
    }

    /// Splits candidates into included and dropped selections. Files outside
    /// every enabled slice are left out entirely.
    pub fn resolve(&self, candidates: &[PathCandidate]) -> Selection {
        let mut selection = Selection::default();

        for candidate in candidates {
            let members = self.members(&candidate.rel_path, candidate.is_hidden);
            let Some((primary_slice, primary_priority)) = primary(&members) else {
                continue;
            };

            let file = SelectedFile {
                rel_path: candidate.rel_path.clone(),
                abs_path: candidate.abs_path.clone(),
                size_bytes: candidate.size_bytes,
                is_hidden: candidate.is_hidden,
                slices: members.iter().map(|m| m.name.clone()).collect(),
                primary_slice,
                primary_priority,
                exclusion: candidate.exclusion.clone(),
            };

            debug!(
                "Selected {} slices={:?} primary={} excluded={}",
                file.rel_path,
                file.slices,
                file.primary_slice,
                file.exclusion.is_some()
            );
            if file.exclusion.is_some() {
                selection.dropped.push(file);
            } else {
                selection.included.push(file);
            }
        }

        selection.included.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        selection.dropped.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        info!(
            "Selection: {} included, {} dropped",
            selection.included.len(),
            selection.dropped.len()
        );
        selection
    }
}

/// Highest priority wins; equal priorities go to the name that sorts first.
fn primary(members: &[&SliceMatcher]) -> Option<(String, i32)> {
    members
        .iter()
        .min_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)))
        .map(|m| (m.name.clone(), m.priority))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Exclusion, ExclusionReason};
    use std::path::PathBuf;

    fn slice(name: &str, include: &[&str], exclude: &[&str], priority: i32) -> Slice {
        Slice {
            name: name.to_string(),
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            priority,
        }
    }

    fn candidate(rel: &str) -> PathCandidate {
        PathCandidate {
            rel_path: rel.to_string(),
            abs_path: PathBuf::from("/repo").join(rel),
            size_bytes: 1,
            is_hidden: crate::core::patterns::is_hidden_rel(rel),
            exclusion: None,
        }
    }

    fn known(slices: &[Slice]) -> BTreeMap<String, Slice> {
        slices.iter().map(|s| (s.name.clone(), s.clone())).collect()
    }

    #[test]
    fn test_parse_modifiers() {
        let mods = parse_modifiers(&["+tests", "-docs", ""]).unwrap();
        assert_eq!(
            mods,
            vec![
                Modifier {
                    name: "tests".to_string(),
                    enable: true
                },
                Modifier {
                    name: "docs".to_string(),
                    enable: false
                },
            ]
        );

        assert!(matches!(
            parse_modifiers(&["tests"]),
            Err(ConfigError::InvalidModifier(_))
        ));
        assert!(matches!(
            parse_modifiers(&["+a/b"]),
            Err(ConfigError::InvalidSliceName(_))
        ));
        assert!(matches!(
            parse_modifiers(&["+"]),
            Err(ConfigError::InvalidSliceName(_))
        ));
    }

    #[test]
    fn test_resolve_enabled_applies_modifiers() {
        let known = known(&[
            slice("api", &["**/*.go"], &[], 100),
            slice("tests", &["**/*_test.go"], &[], 10),
            slice("docs", &["docs/**"], &[], 1),
        ]);
        let profile = vec!["api".to_string(), "docs".to_string()];
        let mods = parse_modifiers(&["+tests", "-docs"]).unwrap();

        let enabled = resolve_enabled(&profile, &known, &mods).unwrap();
        assert_eq!(enabled, vec!["api", "tests"]);

        let unknown = parse_modifiers(&["+nope"]).unwrap();
        assert!(matches!(
            resolve_enabled(&profile, &known, &unknown),
            Err(ConfigError::UnknownSlice(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_order_by_priority() {
        let known = known(&[
            slice("b", &[], &[], 5),
            slice("a", &[], &[], 5),
            slice("z", &[], &[], 50),
        ]);
        let ordered = order_by_priority(&["a".into(), "b".into(), "z".into()], &known);
        assert_eq!(ordered, vec!["z", "a", "b"]);
    }

    #[test]
    fn test_exclude_beats_include() {
        let matcher = SliceMatcher::new(&slice("api", &["src/**"], &["src/gen/**"], 1));

        assert!(matcher.match_path("src/lib.rs", false, false).member);
        let m = matcher.match_path("src/gen/out.rs", false, false);
        assert!(!m.member);
        assert_eq!(m.include_pattern.as_deref(), Some("src/**"));
        assert_eq!(m.exclude_pattern.as_deref(), Some("src/gen/**"));
    }

    #[test]
    fn test_hidden_needs_explicit_pattern() {
        let all = SliceMatcher::new(&slice("all", &["**/*"], &[], 1));
        let ci = SliceMatcher::new(&slice("ci", &[".github/**"], &[], 1));
        let path = ".github/workflows/ci.yml";

        let m = all.match_path(path, true, false);
        assert!(!m.member);
        assert!(m.hidden_blocked);

        let m = ci.match_path(path, true, false);
        assert!(m.member);
        assert!(m.include_explicit_hidden);

        assert!(all.match_path(path, true, true).member);
    }

    #[test]
    fn test_resolve_primary_and_hidden_rules() {
        let slices = [
            slice("all", &["**/*"], &[], 1),
            slice("dot", &[".github/**"], &[], 10),
        ];
        let refs: Vec<&Slice> = slices.iter().collect();
        let resolver = MembershipResolver::new(&refs, false).unwrap();

        let selection = resolver.resolve(&[candidate(".github/workflows/ci.yml"), candidate("README.md")]);

        assert_eq!(selection.included.len(), 2);
        let hidden = &selection.included[0];
        assert_eq!(hidden.rel_path, ".github/workflows/ci.yml");
        assert_eq!(hidden.slices, vec!["dot"]);
        assert_eq!(hidden.primary_slice, "dot");
        assert_eq!(hidden.primary_priority, 10);

        let readme = &selection.included[1];
        assert_eq!(readme.slices, vec!["all"]);
        assert_eq!(readme.primary_slice, "all");
    }

    #[test]
    fn test_hidden_file_outside_every_slice_is_not_selected() {
        let slices = [slice("all", &["**/*"], &[], 1)];
        let refs: Vec<&Slice> = slices.iter().collect();
        let resolver = MembershipResolver::new(&refs, false).unwrap();

        let selection = resolver.resolve(&[candidate(".github/workflows/ci.yml")]);
        assert!(selection.included.is_empty());
        assert!(selection.dropped.is_empty());
    }

    #[test]
    fn test_equal_priority_primary_is_name_ascending() {
        let slices = [
            slice("zeta", &["**/*.rs"], &[], 7),
            slice("alpha", &["src/**"], &[], 7),
        ];
        let refs: Vec<&Slice> = slices.iter().collect();
        let resolver = MembershipResolver::new(&refs, false).unwrap();

        let selection = resolver.resolve(&[candidate("src/lib.rs")]);
        let file = &selection.included[0];
        assert_eq!(file.slices, vec!["alpha", "zeta"]);
        assert_eq!(file.primary_slice, "alpha");
    }

    #[test]
    fn test_excluded_member_becomes_dropped() {
        let slices = [slice("all", &["**/*"], &[], 1)];
        let refs: Vec<&Slice> = slices.iter().collect();
        let resolver = MembershipResolver::new(&refs, false).unwrap();

        let mut secret = candidate("config/secrets.yaml");
        secret.exclusion = Some(Exclusion::new(
            ExclusionReason::SensitiveRule,
            "sensitive.exclude_globs",
        ));
        let selection = resolver.resolve(&[secret, candidate("main.go")]);

        assert_eq!(selection.included.len(), 1);
        assert_eq!(selection.dropped.len(), 1);
        assert_eq!(selection.dropped[0].rel_path, "config/secrets.yaml");
        assert_eq!(
            selection.dropped[0].exclusion.as_ref().unwrap().reason,
            ExclusionReason::SensitiveRule
        );
    }

    #[test]
    fn test_no_enabled_slices_is_an_error() {
        assert!(matches!(
            MembershipResolver::new(&[], false),
            Err(ConfigError::NoEnabledSlices)
        ));
    }
}
