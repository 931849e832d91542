use crate::core::budget::{Budgeted, enforce_global_budget};
use crate::core::patterns::is_hidden_rel;
use crate::core::plan::{FileLimits, build_plan};
use crate::core::render::{BundleInfo, MarkdownRenderer};
use crate::core::selector::{MembershipResolver, SliceMatcher, parse_modifiers};
use crate::domain::errors::{BudgetError, ConfigError};
use crate::domain::models::{CancelFlag, DropReason, PathCandidate, Selection, Slice};
use crate::infra::config::{Config, find_config_path};
use crate::infra::file_system::Classifier;
use crate::infra::git::{short_sha, short_sha_or_unknown};
use crate::infra::logger::warn_partial;
use crate::infra::output::{
    Clock, CounterProvider, NameParts, OutputTarget, create_writer, resolve_explicit_output,
    write_default_output,
};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const EXIT_USAGE: u8 = 2;
pub const EXIT_IO: u8 = 3;
pub const EXIT_PARTIAL: u8 = 4;

/// A failure carrying the process exit code it maps to.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Usage(anyhow::Error),

    #[error("{0:#}")]
    Io(anyhow::Error),
}

impl AppError {
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Usage(_) => EXIT_USAGE,
            AppError::Io(_) => EXIT_IO,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Usage(e.into())
    }
}

impl From<std::fmt::Error> for AppError {
    fn from(e: std::fmt::Error) -> Self {
        AppError::Io(e.into())
    }
}

impl From<BudgetError> for AppError {
    fn from(e: BudgetError) -> Self {
        AppError::Io(e.into())
    }
}

/// Global options shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub root: Option<PathBuf>,
}

/// Per-invocation overrides on top of the profile's settings.
#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    pub max_chars: Option<usize>,
    pub include_hidden: bool,
    pub no_tree: bool,
    pub no_manifest: bool,
    pub tree_depth: Option<usize>,
}

/// Loaded config, resolved root, and the enabled slice set for one profile.
pub struct Session {
    pub config_path: PathBuf,
    pub cfg: Config,
    pub root: PathBuf,
    pub root_label: String,
    pub profile: String,
    pub enabled: Vec<String>,
    pub enabled_ordered: Vec<String>,
}

impl Session {
    /// All configuration errors surface here, before any file under the root is read.
    pub fn open(
        global: &GlobalOptions,
        profile: Option<&str>,
        modifiers: &[String],
    ) -> Result<Self, AppError> {
        let config_path = find_config_path(global.config.as_deref());
        let cfg = Config::load(&config_path)?;
        let root = cfg.effective_root(global.root.as_deref())?;

        let profile = match profile {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => cfg.default_profile.clone(),
        };
        let cfg = cfg.with_profile(&profile)?;
        let mods = parse_modifiers(modifiers)?;
        let enabled = cfg.enabled_slices(&profile, &mods)?;
        let enabled_ordered = cfg.enabled_slice_list(&enabled);

        let root_label = match &global.root {
            Some(r) if !r.as_os_str().is_empty() => r.display().to_string(),
            _ => cfg.root.clone(),
        };

        info!(
            "Profile {} with slices [{}] under {}",
            profile,
            enabled_ordered.join(", "),
            root.display()
        );
        Ok(Self {
            config_path,
            cfg,
            root,
            root_label,
            profile,
            enabled,
            enabled_ordered,
        })
    }

    pub fn repo_name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string())
    }

    fn enabled_defs(&self) -> Vec<Slice> {
        let defs = self.cfg.slice_defs();
        self.enabled
            .iter()
            .filter_map(|name| defs.get(name).cloned())
            .collect()
    }

    fn classifier(&self) -> Result<Classifier, AppError> {
        Classifier::new(&self.root, &self.cfg.classifier_rules()).map_err(|e| AppError::Io(e.into()))
    }

    pub fn classify(&self) -> Result<Vec<PathCandidate>, AppError> {
        self.classifier()?
            .classify()
            .map_err(|e| AppError::Io(e.into()))
    }

    pub fn select(&self, candidates: &[PathCandidate], include_hidden: bool) -> Result<Selection, AppError> {
        let defs = self.enabled_defs();
        let refs: Vec<&Slice> = defs.iter().collect();
        let resolver = MembershipResolver::new(&refs, include_hidden)?;
        Ok(resolver.resolve(candidates))
    }

    /// Classify, select, read, and fit the bundle into the character budget.
    pub fn build(
        &self,
        opts: &BundleOptions,
        clock: &dyn Clock,
        cancel: &CancelFlag,
    ) -> Result<(Budgeted, BundleInfo), AppError> {
        let mut limits = self.cfg.limits();
        if let Some(max_chars) = opts.max_chars.filter(|&n| n > 0) {
            limits.max_chars = max_chars;
        }

        let mut render_cfg = self.cfg.render.clone();
        if opts.no_tree {
            render_cfg.include_tree = false;
        }
        if opts.no_manifest {
            render_cfg.include_manifest = false;
        }
        if let Some(depth) = opts.tree_depth.filter(|&n| n > 0) {
            render_cfg.tree_depth = depth;
        }
        let renderer = MarkdownRenderer::from(&render_cfg);

        let candidates = self.classify()?;
        let selection = self.select(&candidates, opts.include_hidden)?;
        let file_limits = FileLimits {
            max_lines: limits.per_file_max_lines,
            max_bytes: limits.per_file_max_bytes,
        };
        let plan = build_plan(
            &self.profile,
            &self.enabled_ordered,
            &selection,
            file_limits,
            cancel,
        )
        .map_err(|e| AppError::Io(e.into()))?;

        let info = BundleInfo {
            repo: self.repo_name(),
            root: self.root_label.clone(),
            profile: self.profile.clone(),
            enabled: self.enabled_ordered.clone(),
            git_sha: short_sha_or_unknown(&self.root),
            timestamp: clock.now(),
            version: VERSION.to_string(),
        };

        let priorities: BTreeMap<String, i32> = self
            .cfg
            .priorities()
            .into_iter()
            .filter(|(name, _)| self.enabled.contains(name))
            .collect();
        let budgeted = enforce_global_budget(plan, &limits, &priorities, cancel, |p| {
            renderer.render(&info, p)
        })?;
        debug!(
            "Final plan: {} included, {} dropped, partial={} hard_cut={}",
            budgeted.plan.included.len(),
            budgeted.plan.dropped.len(),
            budgeted.plan.partial,
            budgeted.plan.hard_cut
        );
        Ok((budgeted, info))
    }
}

/// Where `run` should send the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// `<root>/<output.dir>/<pattern>`.
    Default,
    Explicit(OutputTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Written path, or `-` for stdout and `clipboard` for the clipboard.
    pub output: String,
    pub partial: bool,
    pub hard_cut: bool,
}

pub fn run_bundle(
    session: &Session,
    opts: &BundleOptions,
    destination: &Destination,
    clock: &dyn Clock,
    counter: &mut dyn CounterProvider,
    cancel: &CancelFlag,
) -> Result<RunResult, AppError> {
    let (budgeted, info) = session.build(opts, clock, cancel)?;
    let plan = &budgeted.plan;
    warn_partial(plan);

    let output = match destination {
        Destination::Default => {
            let parts = NameParts {
                profile: &session.profile,
                git_sha: &info.git_sha,
                repo: &info.repo,
                timestamp: info.timestamp,
            };
            let path = write_default_output(
                &session.root,
                &session.cfg.output,
                &parts,
                counter,
                &budgeted.text,
            )
            .map_err(AppError::Io)?;
            path.display().to_string()
        }
        Destination::Explicit(OutputTarget::File(path)) => {
            let path = resolve_explicit_output(path).map_err(AppError::Io)?;
            create_writer(&OutputTarget::File(path.clone()))
                .write(&budgeted.text)
                .map_err(AppError::Io)?;
            path.display().to_string()
        }
        Destination::Explicit(target) => {
            create_writer(target)
                .write(&budgeted.text)
                .map_err(AppError::Io)?;
            match target {
                OutputTarget::Clipboard => "clipboard".to_string(),
                _ => "-".to_string(),
            }
        }
    };

    Ok(RunResult {
        output,
        partial: plan.partial,
        hard_cut: plan.hard_cut,
    })
}

/// Dry-run listing after budget enforcement. Returns the text and the partial flag.
pub fn list(
    session: &Session,
    opts: &BundleOptions,
    verbose: bool,
    clock: &dyn Clock,
    cancel: &CancelFlag,
) -> Result<(String, bool), AppError> {
    let (budgeted, _) = session.build(opts, clock, cancel)?;
    let plan = &budgeted.plan;
    let mut out = String::new();

    writeln!(out, "Enabled slices: [{}]", plan.enabled_slices.join(", "))?;
    writeln!(out, "Included files:")?;
    for (i, f) in plan.included.iter().enumerate() {
        writeln!(
            out,
            "  {:>3}  {}  slices=[{}] primary={} truncated={}",
            i + 1,
            f.rel_path,
            f.slices.join(","),
            f.primary_slice,
            f.truncated
        )?;
    }
    for s in &plan.dropped_slices {
        writeln!(out, "Dropped slice due to budget: {}", s)?;
    }

    if verbose {
        writeln!(out, "Dropped:")?;
        for d in &plan.dropped {
            write!(out, "  - {} reason={}", d.rel_path, d.reason)?;
            if !d.detail.is_empty() {
                write!(out, " detail={}", d.detail)?;
            }
            if !d.primary_slice.is_empty() {
                write!(out, " slice={}", d.primary_slice)?;
            }
            writeln!(out)?;
        }
    } else {
        let budget_drops = plan
            .dropped
            .iter()
            .filter(|d| d.reason == DropReason::BudgetExceeded)
            .count();
        if budget_drops > 0 {
            writeln!(
                out,
                "Dropped files due to budget: {} (use --verbose for details)",
                budget_drops
            )?;
        }
        let other = plan.dropped.len() - budget_drops;
        if other > 0 {
            writeln!(out, "Excluded files: {} (use --verbose for details)", other)?;
        }
    }

    Ok((out, plan.partial))
}

/// Root-relative, `/`-separated form of a user-supplied path.
pub fn normalize_rel(root: &Path, path: &str) -> String {
    let p = Path::new(path);
    let rel = if p.is_absolute() {
        p.strip_prefix(root).unwrap_or(p)
    } else {
        p
    };
    let parts: Vec<String> = rel
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

/// Classifier verdict and per-slice match details for one path.
pub fn explain(session: &Session, path: &str, include_hidden: bool) -> Result<String, AppError> {
    let rel = normalize_rel(&session.root, path);
    let abs = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        session.root.join(&rel)
    };

    let mut out = String::new();
    writeln!(out, "snip explain")?;
    writeln!(out)?;
    writeln!(out, "path: {}", rel)?;
    writeln!(out, "root: {}", session.root.display())?;
    writeln!(out, "profile: {}", session.profile)?;
    writeln!(out, "enabled_slices: [{}]", session.enabled_ordered.join(", "))?;
    writeln!(out, "include_hidden: {}", include_hidden)?;

    let is_regular = std::fs::symlink_metadata(&abs)
        .map(|m| m.file_type().is_file())
        .unwrap_or(false);
    if !is_regular {
        writeln!(out)?;
        writeln!(out, "discovery: not_found_under_root=true")?;
        return Ok(out);
    }

    let candidate = session.classifier()?.classify_file(&abs);
    writeln!(out)?;
    writeln!(out, "discovery:")?;
    writeln!(out, "  excluded: {}", candidate.is_excluded())?;
    match &candidate.exclusion {
        Some(exclusion) => {
            writeln!(out, "  reason: {}", exclusion.reason)?;
            writeln!(out, "  detail: {}", exclusion.detail)?;
        }
        None => {
            writeln!(out, "  reason: (none)")?;
        }
    }
    writeln!(out, "  hidden: {}", candidate.is_hidden)?;

    let mut matchers: Vec<SliceMatcher> = session
        .cfg
        .slice_defs()
        .values()
        .map(SliceMatcher::new)
        .collect();
    matchers.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));

    let is_hidden = candidate.is_hidden || is_hidden_rel(&rel);
    let mut effective = Vec::new();
    writeln!(out)?;
    writeln!(out, "slice_matches:")?;
    for m in &matchers {
        let result = m.match_path(&rel, is_hidden, include_hidden);
        let enabled = session.enabled.contains(&m.name);
        if enabled && result.member {
            effective.push(m.name.clone());
        }
        if result.include_pattern.is_none() && result.exclude_pattern.is_none() {
            continue;
        }
        let tag = if enabled { "x" } else { " " };
        writeln!(out, "  [{}] {} (priority={})", tag, m.name, m.priority)?;
        if let Some(pattern) = &result.include_pattern {
            writeln!(out, "      include: matched pattern={:?}", pattern)?;
        }
        if let Some(pattern) = &result.exclude_pattern {
            writeln!(out, "      exclude: matched pattern={:?}", pattern)?;
        }
        if result.hidden_blocked {
            writeln!(out, "      hidden: blocked (pattern does not name a hidden segment)")?;
        }
    }
    effective.sort();

    writeln!(out)?;
    writeln!(out, "effective_selection:")?;
    writeln!(out, "  in_enabled_slices: {}", !effective.is_empty())?;
    writeln!(out, "  matched_enabled_slices: [{}]", effective.join(", "))?;
    writeln!(
        out,
        "  included: {}",
        !candidate.is_excluded() && !effective.is_empty()
    )?;
    Ok(out)
}

/// Effective configuration and environment diagnostics.
pub fn doctor(session: &Session, include_hidden: bool) -> Result<String, AppError> {
    let limits = session.cfg.limits();
    let sha = short_sha(&session.root);

    let candidates = session.classify()?;
    let selection = session.select(&candidates, include_hidden)?;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for file in &selection.dropped {
        if let Some(exclusion) = &file.exclusion {
            *counts.entry(exclusion.reason.to_string()).or_default() += 1;
        }
    }
    let mut rows: Vec<(String, usize)> = counts.into_iter().collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows.truncate(8);

    let mut out = String::new();
    writeln!(out, "snip doctor")?;
    writeln!(out)?;
    writeln!(out, "config_path: {}", session.config_path.display())?;
    writeln!(out, "root: {}", session.root.display())?;
    writeln!(out, "profile: {}", session.profile)?;
    writeln!(out, "enabled_slices: [{}]", session.enabled_ordered.join(", "))?;
    writeln!(
        out,
        "budgets: max_chars={} per_file_max_lines={} per_file_max_bytes={}",
        limits.max_chars, limits.per_file_max_lines, limits.per_file_max_bytes
    )?;
    writeln!(
        out,
        "git: available={} sha={}",
        sha.is_some(),
        sha.as_deref().unwrap_or("(unavailable)")
    )?;
    writeln!(
        out,
        "discovery: use_gitignore={} include_hidden={} files={}",
        session.cfg.ignore.use_gitignore,
        include_hidden,
        candidates.len()
    )?;
    writeln!(out)?;
    writeln!(out, "top_exclusion_reasons:")?;
    if rows.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for (reason, count) in rows {
        writeln!(out, "  - {}: {}", reason, count)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::output::FixedClock;
    use chrono::{FixedOffset, TimeZone};
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
slices:
  api:
    include: ["src/**"]
    priority: 100
  docs:
    include: ["docs/**", "*.md"]
    priority: 1
  ci:
    include: [".github/**"]
    priority: 5
profiles:
  api:
    enable: [api, docs]
output:
  pattern: "snip_{profile}_{counter}.md"
"#;

    struct StepCounter(u32);

    impl CounterProvider for StepCounter {
        fn next(&mut self) -> anyhow::Result<u32> {
            self.0 += 1;
            Ok(self.0)
        }
    }

    fn clock() -> FixedClock {
        FixedClock(
            FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
                .unwrap(),
        )
    }

    fn fixture() -> (TempDir, GlobalOptions) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::create_dir_all(root.join(".github/workflows")).unwrap();
        fs::write(root.join(".snip.yaml"), CONFIG).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(root.join("docs/guide.md"), "# Guide\n").unwrap();
        fs::write(root.join("README.md"), "# Readme\n").unwrap();
        fs::write(root.join(".github/workflows/ci.yml"), "on: push\n").unwrap();

        let global = GlobalOptions {
            config: Some(root.join(".snip.yaml")),
            root: Some(root.to_path_buf()),
        };
        (temp_dir, global)
    }

    #[test]
    fn test_session_resolves_profile_and_modifiers() {
        let (_dir, global) = fixture();
        let session = Session::open(&global, None, &["+ci".to_string()]).unwrap();
        assert_eq!(session.profile, "api");
        assert_eq!(session.enabled_ordered, vec!["api", "ci", "docs"]);

        let err = Session::open(&global, None, &["+nope".to_string()]).err().unwrap();
        assert_eq!(err.exit_code(), EXIT_USAGE);
    }

    #[test]
    fn test_run_writes_default_output() {
        let (dir, global) = fixture();
        let session = Session::open(&global, None, &[]).unwrap();
        let mut counter = StepCounter(0);

        let result = run_bundle(
            &session,
            &BundleOptions::default(),
            &Destination::Default,
            &clock(),
            &mut counter,
            &CancelFlag::new(),
        )
        .unwrap();

        assert!(!result.partial);
        assert!(result.output.ends_with("snip_api_001.md"));
        let text = fs::read_to_string(dir.path().join(".snip").join("snip_api_001.md")).unwrap();
        assert!(text.contains("## 1) src/main.rs"));
        assert!(text.contains("README.md"));
        assert!(!text.contains("ci.yml"));
        assert!(text.contains("timestamp: 2024-01-02T03:04:05Z"));
    }

    #[test]
    fn test_run_is_deterministic() {
        let (_dir, global) = fixture();
        let session = Session::open(&global, None, &[]).unwrap();
        let out_dir = TempDir::new().unwrap();
        let out = out_dir.path().join("out.md");
        let run = || {
            run_bundle(
                &session,
                &BundleOptions::default(),
                &Destination::Explicit(OutputTarget::File(out.clone())),
                &clock(),
                &mut StepCounter(0),
                &CancelFlag::new(),
            )
            .unwrap();
            fs::read_to_string(&out).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_list_reports_budget_drops() {
        let (_dir, global) = fixture();
        let session = Session::open(&global, None, &[]).unwrap();
        let opts = BundleOptions {
            max_chars: Some(330),
            no_tree: true,
            no_manifest: true,
            ..BundleOptions::default()
        };

        let (text, partial) = list(&session, &opts, false, &clock(), &CancelFlag::new()).unwrap();
        assert!(partial);
        assert!(text.contains("src/main.rs"));
        assert!(text.contains("Dropped slice due to budget: docs"));
        assert!(text.contains("Dropped files due to budget: 2"));
    }

    #[test]
    fn test_explain_hidden_policy() {
        let (_dir, global) = fixture();
        let session = Session::open(&global, None, &["+ci".to_string()]).unwrap();

        let text = explain(&session, ".github/workflows/ci.yml", false).unwrap();
        assert!(text.contains("[x] ci (priority=5)"));
        assert!(text.contains("matched_enabled_slices: [ci]"));
        assert!(text.contains("included: true"));

        let text = explain(&session, "missing.rs", false).unwrap();
        assert!(text.contains("not_found_under_root=true"));
    }

    #[test]
    fn test_doctor_counts_exclusions() {
        let (dir, global) = fixture();
        fs::write(dir.path().join("src/secret.txt"), "x\n").unwrap();
        let session = Session::open(&global, None, &[]).unwrap();

        let text = doctor(&session, false).unwrap();
        assert!(text.contains("profile: api"));
        assert!(text.contains("  - excluded_sensitive: 1"));
    }

    #[test]
    fn test_format_failure_maps_to_io_exit() {
        let err = AppError::from(std::fmt::Error);
        assert_eq!(err.exit_code(), EXIT_IO);
    }

    #[test]
    fn test_normalize_rel() {
        let root = Path::new("/repo");
        assert_eq!(normalize_rel(root, "./src/main.rs"), "src/main.rs");
        assert_eq!(normalize_rel(root, "/repo/src/lib.rs"), "src/lib.rs");
    }
}
