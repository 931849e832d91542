use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use log::debug;

/// An ordered list of `**`-aware globs matched against `/`-separated relative paths.
///
/// `*` and `?` never cross a `/`; `**` spans zero or more segments. Patterns that
/// fail to compile are skipped, so they simply never match.
#[derive(Debug, Clone)]
pub struct GlobList {
    patterns: Vec<String>,
    set: GlobSet,
}

impl GlobList {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut kept = Vec::new();
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns.iter().map(AsRef::as_ref) {
            if pattern.is_empty() {
                continue;
            }
            match GlobBuilder::new(pattern).literal_separator(true).build() {
                Ok(glob) => {
                    builder.add(glob);
                    kept.push(pattern.to_string());
                }
                Err(e) => debug!("Skipping invalid glob {:?}: {}", pattern, e),
            }
        }

        let set = builder.build().unwrap_or_else(|e| {
            debug!("Glob set failed to build, matching nothing: {}", e);
            GlobSet::empty()
        });

        Self {
            patterns: kept,
            set,
        }
    }

    pub fn is_match(&self, rel_path: &str) -> bool {
        self.set.is_match(rel_path)
    }

    /// The first pattern, in declaration order, that matches.
    pub fn first_match(&self, rel_path: &str) -> Option<&str> {
        self.set
            .matches(rel_path)
            .into_iter()
            .min()
            .map(|idx| self.patterns[idx].as_str())
    }

    /// Whether any matching pattern names a hidden segment explicitly.
    pub fn matches_explicit_hidden(&self, rel_path: &str) -> bool {
        self.set
            .matches(rel_path)
            .into_iter()
            .any(|idx| names_hidden_segment(&self.patterns[idx]))
    }
}

/// True when some segment of the pattern starts with `.` (other than `.` and `..`),
/// e.g. `.github/**`, `**/.env*`.
pub fn names_hidden_segment(pattern: &str) -> bool {
    pattern
        .split(['/', '\\'])
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .any(|seg| seg.starts_with('.'))
}

/// True when any segment of a relative path starts with `.`.
pub fn is_hidden_rel(rel_path: &str) -> bool {
    rel_path
        .trim_start_matches("./")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .any(|seg| seg.starts_with('.'))
}
