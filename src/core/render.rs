use crate::domain::errors::RenderError;
use crate::domain::models::{DropReason, DroppedEntry, ExclusionReason, FileEntry, Plan};
use crate::infra::config::RenderConfig;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use log::debug;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Metadata printed in the bundle header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    pub repo: String,
    pub root: String,
    pub profile: String,
    pub enabled: Vec<String>,
    pub git_sha: String,
    pub timestamp: DateTime<FixedOffset>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestOptions {
    pub group_by_slice: bool,
    pub include_line_counts: bool,
    pub include_byte_counts: bool,
    pub include_truncation_notes: bool,
    pub include_unreadable_notes: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileBlockOptions {
    pub header: String,
    pub footer: String,
}

impl FileBlockOptions {
    fn is_custom(&self) -> bool {
        !self.header.is_empty() || !self.footer.is_empty()
    }
}

/// Renders a plan as a markdown bundle. Never mutates the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownRenderer {
    pub newline: String,
    pub code_fences: bool,
    pub include_tree: bool,
    pub tree_depth: usize,
    pub include_manifest: bool,
    pub manifest: ManifestOptions,
    pub file_block: FileBlockOptions,
}

impl From<&RenderConfig> for MarkdownRenderer {
    fn from(cfg: &RenderConfig) -> Self {
        Self {
            newline: cfg.newline.clone(),
            code_fences: cfg.code_fences,
            include_tree: cfg.include_tree,
            tree_depth: cfg.tree_depth,
            include_manifest: cfg.include_manifest,
            manifest: ManifestOptions {
                group_by_slice: cfg.manifest.group_by_slice,
                include_line_counts: cfg.manifest.include_line_counts,
                include_byte_counts: cfg.manifest.include_byte_counts,
                include_truncation_notes: cfg.manifest.include_truncation_notes,
                include_unreadable_notes: cfg.manifest.include_unreadable_notes,
            },
            file_block: FileBlockOptions {
                header: cfg.file_block.header.clone(),
                footer: cfg.file_block.footer.clone(),
            },
        }
    }
}

impl MarkdownRenderer {
    pub fn render(&self, info: &BundleInfo, plan: &Plan) -> Result<String, RenderError> {
        let files = order_included(&plan.included, self.manifest.group_by_slice);
        debug!("Rendering {} files", files.len());
        let mut out = String::new();

        writeln!(out, "# snip bundle")?;
        writeln!(out)?;
        writeln!(out, "repo: {}", info.repo)?;
        writeln!(out, "root: {}", info.root)?;
        writeln!(out, "profile: {}", info.profile)?;
        writeln!(out, "enabled_slices: [{}]", info.enabled.join(", "))?;
        writeln!(out, "git_sha: {}", info.git_sha)?;
        writeln!(
            out,
            "timestamp: {}",
            info.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        writeln!(out, "snip_version: {}", info.version)?;

        if self.include_tree {
            writeln!(out)?;
            writeln!(out, "## Tree")?;
            writeln!(out)?;
            writeln!(out, "```")?;
            for line in build_tree(&files, self.tree_depth) {
                writeln!(out, "{}", line)?;
            }
            writeln!(out, "```")?;
        }

        if self.include_manifest {
            writeln!(out)?;
            writeln!(out, "## Manifest (included)")?;
            writeln!(out)?;
            self.write_manifest_included(&mut out, &files)?;
            writeln!(out)?;
            writeln!(out, "## Manifest (dropped)")?;
            writeln!(out)?;
            self.write_manifest_dropped(&mut out, &plan.dropped, &plan.dropped_slices)?;
        }

        for (i, file) in files.iter().enumerate() {
            self.write_file_block(&mut out, i + 1, file)?;
        }

        if self.newline.is_empty() || self.newline == "\n" {
            Ok(out)
        } else {
            Ok(out.replace('\n', &self.newline))
        }
    }

    fn write_file_block(&self, out: &mut String, idx: usize, file: &FileEntry) -> Result<(), RenderError> {
        let custom = self.file_block.is_custom();
        writeln!(out)?;
        if custom {
            let header = with_path(&self.file_block.header, &file.rel_path);
            if !header.is_empty() {
                writeln!(out, "{}", header)?;
            }
        } else {
            writeln!(out, "---")?;
            writeln!(out)?;
            writeln!(out, "## {}) {}", idx, file.rel_path)?;
        }
        writeln!(out, "lines: {}", file.original_lines)?;
        writeln!(out, "bytes: {}", file.original_bytes)?;
        writeln!(out, "slices: [{}]", file.slices.join(", "))?;
        writeln!(out, "truncated: {}", file.truncated)?;
        writeln!(out)?;

        if self.code_fences {
            writeln!(out, "```{}", language_for(&file.rel_path))?;
        }
        out.push_str(&file.content);
        if !file.content.ends_with('\n') {
            out.push('\n');
        }
        if self.code_fences {
            writeln!(out, "```")?;
        }

        if custom {
            let footer = with_path(&self.file_block.footer, &file.rel_path);
            if !footer.is_empty() {
                writeln!(out, "{}", footer)?;
            }
        }
        Ok(())
    }

    fn write_manifest_included(&self, out: &mut String, files: &[&FileEntry]) -> Result<(), RenderError> {
        if !self.file_block.header.is_empty() {
            writeln!(out, "delimiter_header: {:?}", self.file_block.header)?;
        }
        if !self.file_block.footer.is_empty() {
            writeln!(out, "delimiter_footer: {:?}", self.file_block.footer)?;
        }
        if self.file_block.is_custom() {
            writeln!(out)?;
        }

        if files.is_empty() {
            writeln!(out)?;
            return Ok(());
        }

        let mut block: Vec<[String; 3]> = Vec::new();
        let mut current_slice: Option<&str> = None;
        for (i, file) in files.iter().enumerate() {
            if self.manifest.group_by_slice && current_slice != Some(file.primary_slice.as_str()) {
                write_aligned(out, &block)?;
                block.clear();
                current_slice = Some(&file.primary_slice);
                writeln!(out)?;
                writeln!(out, "[{}]", file.primary_slice)?;
            }
            block.push([
                format!("{:>3}", i + 1),
                file.rel_path.clone(),
                self.manifest_notes(file),
            ]);
        }
        write_aligned(out, &block)
    }

    fn manifest_notes(&self, file: &FileEntry) -> String {
        let mut parts = Vec::with_capacity(4);
        if self.manifest.include_line_counts {
            parts.push(format!("lines={}", file.original_lines));
        }
        if self.manifest.include_byte_counts {
            parts.push(format!("bytes={}", file.original_bytes));
        }
        parts.push(format!("slices=[{}]", file.slices.join(",")));
        if self.manifest.include_truncation_notes {
            parts.push(format!("truncated={}", file.truncated));
        }
        parts.join(" ")
    }

    fn write_manifest_dropped(
        &self,
        out: &mut String,
        dropped: &[DroppedEntry],
        dropped_slices: &[String],
    ) -> Result<(), RenderError> {
        let mut wrote_any = false;

        let mut slices: Vec<&String> = dropped_slices.iter().collect();
        slices.sort();
        for slice in slices {
            writeln!(out, "- slice={} reason={}", slice, DropReason::BudgetExceeded)?;
            wrote_any = true;
        }

        for entry in dropped {
            if !self.manifest.include_unreadable_notes && is_read_failure(entry.reason) {
                continue;
            }
            write!(out, "- {} reason={}", entry.rel_path, entry.reason)?;
            if !entry.detail.is_empty() {
                write!(out, " detail={}", sanitize_detail(&entry.detail))?;
            }
            if !entry.primary_slice.is_empty() {
                write!(out, " slice={}", entry.primary_slice)?;
            }
            writeln!(out)?;
            wrote_any = true;
        }

        if !wrote_any {
            writeln!(out)?;
        }
        Ok(())
    }
}

fn is_read_failure(reason: DropReason) -> bool {
    matches!(
        reason,
        DropReason::InvalidEncoding | DropReason::Excluded(ExclusionReason::Unreadable)
    )
}

/// Pads every column but the last to its widest cell plus two spaces.
fn write_aligned(out: &mut String, rows: &[[String; 3]]) -> Result<(), RenderError> {
    if rows.is_empty() {
        return Ok(());
    }
    let width = |col: usize| {
        rows.iter()
            .map(|r| r[col].chars().count())
            .max()
            .unwrap_or(0)
            + 2
    };
    let (w0, w1) = (width(0), width(1));
    for [idx, path, notes] in rows {
        let pad0 = w0 - idx.chars().count();
        let pad1 = w1 - path.chars().count();
        writeln!(out, "{}{:pad0$}{}{:pad1$}{}", idx, "", path, "", notes)?;
    }
    Ok(())
}

fn sanitize_detail(detail: &str) -> String {
    detail.replace(['\t', '\n', '\r'], " ")
}

fn with_path(template: &str, path: &str) -> String {
    template.replace("{path}", path)
}

/// Grouped by primary slice (highest priority group first, then group name), then
/// by path. Path order alone when grouping is off.
pub fn order_included(files: &[FileEntry], group_by_slice: bool) -> Vec<&FileEntry> {
    let mut out: Vec<&FileEntry> = files.iter().collect();
    if !group_by_slice {
        out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        return out;
    }

    let mut group_priority: BTreeMap<&str, i32> = BTreeMap::new();
    for f in files {
        let p = group_priority.entry(&f.primary_slice).or_insert(f.priority);
        *p = (*p).max(f.priority);
    }
    out.sort_by(|a, b| {
        let pa = group_priority[a.primary_slice.as_str()];
        let pb = group_priority[b.primary_slice.as_str()];
        pb.cmp(&pa)
            .then_with(|| a.primary_slice.cmp(&b.primary_slice))
            .then_with(|| a.rel_path.cmp(&b.rel_path))
    });
    out
}

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    is_file: bool,
}

impl TreeNode {
    fn add(&mut self, rel_path: &str) {
        let parts: Vec<&str> = rel_path.split('/').collect();
        let mut cur = self;
        for (i, part) in parts.iter().enumerate() {
            cur = cur.children.entry(part.to_string()).or_default();
            if i == parts.len() - 1 {
                cur.is_file = true;
            }
        }
    }

    fn render(&self, out: &mut Vec<String>, prefix: &str, max_depth: usize, depth: usize) {
        if depth >= max_depth {
            return;
        }
        // Directories before files, names ascending within each.
        let mut names: Vec<(&String, &TreeNode)> = self.children.iter().collect();
        names.sort_by(|(an, a), (bn, b)| a.is_file.cmp(&b.is_file).then_with(|| an.cmp(bn)));

        let count = names.len();
        for (i, (name, child)) in names.into_iter().enumerate() {
            let last = i + 1 == count;
            let (branch, next) = if last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };
            out.push(format!("{}{}{}", prefix, branch, name));
            child.render(out, &format!("{}{}", prefix, next), max_depth, depth + 1);
        }
    }
}

pub fn build_tree(files: &[&FileEntry], depth: usize) -> Vec<String> {
    let mut root = TreeNode::default();
    for f in files {
        root.add(&f.rel_path);
    }
    let mut out = vec![".".to_string()];
    root.render(&mut out, "", depth.max(1), 0);
    out
}

/// Code-fence language tag for a path, empty when unknown.
pub fn language_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty() && !stem.ends_with('/'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "go" => "go",
        "js" => "javascript",
        "ts" => "typescript",
        "py" => "python",
        "rb" => "ruby",
        "java" => "java",
        "kt" => "kotlin",
        "rs" => "rust",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "sh" => "bash",
        "sql" => "sql",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "toml" => "toml",
        "md" => "md",
        _ => "",
    }
}
