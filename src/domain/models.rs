use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Why the classifier refused a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExclusionReason {
    OutsideRoot,
    IgnoreRule,
    SensitiveRule,
    VcsIgnoreRule,
    Binary,
    Unreadable,
}

impl ExclusionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExclusionReason::OutsideRoot => "excluded_outside_root",
            ExclusionReason::IgnoreRule => "excluded_ignore_always",
            ExclusionReason::SensitiveRule => "excluded_sensitive",
            ExclusionReason::VcsIgnoreRule => "excluded_gitignore",
            ExclusionReason::Binary => "excluded_binary",
            ExclusionReason::Unreadable => "unreadable",
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    pub reason: ExclusionReason,
    pub detail: String,
}

impl Exclusion {
    pub fn new(reason: ExclusionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// One regular file discovered under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCandidate {
    /// Root-relative, `/`-separated.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size_bytes: u64,
    pub is_hidden: bool,
    pub exclusion: Option<Exclusion>,
}

impl PathCandidate {
    pub fn is_excluded(&self) -> bool {
        self.exclusion.is_some()
    }
}

/// A named, priority-ranked group of files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub name: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub priority: i32,
}

/// A candidate resolved against the enabled slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size_bytes: u64,
    pub is_hidden: bool,
    /// Member slice names, ascending.
    pub slices: Vec<String>,
    pub primary_slice: String,
    pub primary_priority: i32,
    pub exclusion: Option<Exclusion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub included: Vec<SelectedFile>,
    pub dropped: Vec<SelectedFile>,
}

/// An included file after per-file truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub slices: Vec<String>,
    pub primary_slice: String,
    pub priority: i32,
    pub original_lines: usize,
    pub original_bytes: u64,
    pub kept_lines: usize,
    pub kept_bytes: usize,
    pub truncated: bool,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DropReason {
    Excluded(ExclusionReason),
    InvalidEncoding,
    BudgetExceeded,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Excluded(reason) => reason.as_str(),
            DropReason::InvalidEncoding => "invalid_utf8",
            DropReason::BudgetExceeded => "budget_exceeded",
        }
    }
}

impl From<ExclusionReason> for DropReason {
    fn from(reason: ExclusionReason) -> Self {
        DropReason::Excluded(reason)
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEntry {
    pub rel_path: String,
    pub slices: Vec<String>,
    pub primary_slice: String,
    pub reason: DropReason,
    pub detail: String,
}

/// Which files made it into the bundle, which did not, and why.
///
/// `included` and `dropped` partition the selection universe: every file
/// that belongs to at least one enabled slice is in exactly one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub profile: String,
    pub enabled_slices: Vec<String>,
    pub included: Vec<FileEntry>,
    pub dropped: Vec<DroppedEntry>,
    pub dropped_slices: Vec<String>,
    pub partial: bool,
    pub hard_cut: bool,
}

impl Plan {
    pub fn new(profile: impl Into<String>, enabled_slices: Vec<String>) -> Self {
        Self {
            profile: profile.into(),
            enabled_slices,
            ..Self::default()
        }
    }

    /// Included by priority desc then path; dropped by path. Also recomputes `partial`.
    pub fn normalize(&mut self) {
        self.included.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.rel_path.cmp(&b.rel_path))
        });
        self.dropped.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        self.partial = !self.dropped.is_empty() || self.hard_cut;
    }

    /// Enabled slices that have not been dropped for budget reasons.
    pub fn kept_slices(&self) -> Vec<&str> {
        self.enabled_slices
            .iter()
            .filter(|s| !self.dropped_slices.contains(s))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_chars: usize,
    pub per_file_max_lines: usize,
    pub per_file_max_bytes: usize,
}

/// Cooperative cancellation, polled between files and between budget steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
