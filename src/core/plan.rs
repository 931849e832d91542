use crate::core::truncation::truncate_file;
use crate::domain::errors::{Cancelled, TruncateError};
use crate::domain::models::{
    CancelFlag, DropReason, DroppedEntry, ExclusionReason, FileEntry, Plan, SelectedFile, Selection,
};
use log::{debug, info};
use std::path::Path;

/// Per-file limits applied while reading included files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLimits {
    pub max_lines: usize,
    pub max_bytes: usize,
}

/// Identity of a file being (re)read, shared by first reads and ladder re-reads.
struct Source<'a> {
    rel_path: &'a str,
    abs_path: &'a Path,
    slices: &'a [String],
    primary_slice: &'a str,
    priority: i32,
}

impl<'a> From<&'a SelectedFile> for Source<'a> {
    fn from(file: &'a SelectedFile) -> Self {
        Self {
            rel_path: &file.rel_path,
            abs_path: &file.abs_path,
            slices: &file.slices,
            primary_slice: &file.primary_slice,
            priority: file.primary_priority,
        }
    }
}

impl<'a> From<&'a FileEntry> for Source<'a> {
    fn from(entry: &'a FileEntry) -> Self {
        Self {
            rel_path: &entry.rel_path,
            abs_path: &entry.abs_path,
            slices: &entry.slices,
            primary_slice: &entry.primary_slice,
            priority: entry.priority,
        }
    }
}

impl Source<'_> {
    fn read(&self, limits: FileLimits) -> Result<FileEntry, DroppedEntry> {
        match truncate_file(self.abs_path, limits.max_lines, limits.max_bytes) {
            Ok((original_bytes, out)) => Ok(FileEntry {
                rel_path: self.rel_path.to_string(),
                abs_path: self.abs_path.to_path_buf(),
                slices: self.slices.to_vec(),
                primary_slice: self.primary_slice.to_string(),
                priority: self.priority,
                original_lines: out.original_lines,
                original_bytes,
                kept_lines: out.kept_lines,
                kept_bytes: out.kept_bytes,
                truncated: out.truncated,
                content: out.content,
            }),
            Err(e) => {
                debug!("Dropping {}: {}", self.rel_path, e);
                let reason = match e {
                    TruncateError::InvalidEncoding => DropReason::InvalidEncoding,
                    TruncateError::Unreadable(_) => ExclusionReason::Unreadable.into(),
                };
                Err(self.dropped(reason, e.to_string()))
            }
        }
    }

    fn dropped(&self, reason: DropReason, detail: impl Into<String>) -> DroppedEntry {
        DroppedEntry {
            rel_path: self.rel_path.to_string(),
            slices: self.slices.to_vec(),
            primary_slice: self.primary_slice.to_string(),
            reason,
            detail: detail.into(),
        }
    }
}

/// Turns a resolved selection into a plan: classifier exclusions become drops,
/// every other file is read and truncated.
pub fn build_plan(
    profile: &str,
    enabled_ordered: &[String],
    selection: &Selection,
    limits: FileLimits,
    cancel: &CancelFlag,
) -> Result<Plan, Cancelled> {
    info!(
        "Building plan for profile {} from {} files",
        profile,
        selection.included.len()
    );
    let mut plan = Plan::new(profile, enabled_ordered.to_vec());

    for file in &selection.dropped {
        let source = Source::from(file);
        let (reason, detail) = match &file.exclusion {
            Some(exclusion) => (exclusion.reason.into(), exclusion.detail.clone()),
            None => (ExclusionReason::Unreadable.into(), String::new()),
        };
        plan.dropped.push(source.dropped(reason, detail));
    }

    for file in &selection.included {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        match Source::from(file).read(limits) {
            Ok(entry) => plan.included.push(entry),
            Err(dropped) => plan.dropped.push(dropped),
        }
    }

    plan.normalize();
    info!(
        "Plan: {} included, {} dropped",
        plan.included.len(),
        plan.dropped.len()
    );
    Ok(plan)
}

/// Re-reads every included file with new limits. Files that fail on re-read move to dropped.
pub fn retruncate(plan: &Plan, limits: FileLimits, cancel: &CancelFlag) -> Result<Plan, Cancelled> {
    let mut next = plan.clone();
    next.included = Vec::with_capacity(plan.included.len());

    for entry in &plan.included {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        match Source::from(entry).read(limits) {
            Ok(entry) => next.included.push(entry),
            Err(dropped) => next.dropped.push(dropped),
        }
    }

    next.normalize();
    Ok(next)
}

/// Moves every included file whose primary slice is `slice` to dropped.
pub fn drop_slice(plan: &Plan, slice: &str) -> Plan {
    let mut next = plan.clone();
    next.dropped_slices.push(slice.to_string());

    let (removed, kept): (Vec<FileEntry>, Vec<FileEntry>) = plan
        .included
        .iter()
        .cloned()
        .partition(|f| f.primary_slice == slice);
    next.included = kept;
    next.dropped.extend(
        removed
            .iter()
            .map(|f| Source::from(f).dropped(DropReason::BudgetExceeded, "slice dropped")),
    );

    next.normalize();
    next
}
