use crate::core::patterns::{GlobList, is_hidden_rel};
use crate::domain::errors::ClassifyError;
use crate::domain::models::{Exclusion, ExclusionReason, PathCandidate};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use walkdir::{DirEntry, WalkDir};

const SNIFF_LEN: u64 = 8 * 1024;

/// Rule sets applied by the classifier, in evaluation order.
#[derive(Debug, Clone, Default)]
pub struct ClassifierRules {
    pub ignore_always: Vec<String>,
    pub sensitive: Vec<String>,
    pub use_vcs_ignore: bool,
    pub binary_extensions: Vec<String>,
}

/// Walks a root and labels every regular file as a candidate or an exclusion.
pub struct Classifier {
    root: PathBuf,
    ignore_always: GlobList,
    sensitive: GlobList,
    vcs_ignore: Option<VcsIgnore>,
    binary_extensions: HashSet<String>,
}

impl Classifier {
    pub fn new(root: &Path, rules: &ClassifierRules) -> Result<Self, ClassifyError> {
        let root = std::path::absolute(root).map_err(|e| ClassifyError::Root {
            root: root.to_path_buf(),
            source: e,
        })?;

        let binary_extensions = rules
            .binary_extensions
            .iter()
            .filter(|e| !e.is_empty())
            .map(|e| {
                let e = e.to_lowercase();
                if e.starts_with('.') { e } else { format!(".{}", e) }
            })
            .collect();

        let vcs_ignore = if rules.use_vcs_ignore {
            Some(VcsIgnore::new(&root))
        } else {
            None
        };

        Ok(Self {
            ignore_always: GlobList::new(&rules.ignore_always),
            sensitive: GlobList::new(&rules.sensitive),
            vcs_ignore,
            binary_extensions,
            root,
        })
    }

    /// Every regular file under the root, sorted by relative path.
    ///
    /// Symlinks are neither followed nor reported. Directories matching an
    /// ignore rule are pruned with their whole subtree.
    pub fn classify(&self) -> Result<Vec<PathCandidate>, ClassifyError> {
        info!("Classifying files in: {}", self.root.display());
        let mut result = Vec::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !self.is_pruned_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(ClassifyError::Walk {
                        root: self.root.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    match e.path().and_then(|p| Some((p, self.rel_path(p)?))) {
                        Some((path, rel)) => {
                            warn!("Unreadable entry {}: {}", rel, e);
                            result.push(PathCandidate {
                                is_hidden: is_hidden_rel(&rel),
                                rel_path: rel,
                                abs_path: path.to_path_buf(),
                                size_bytes: 0,
                                exclusion: Some(Exclusion::new(ExclusionReason::Unreadable, e.to_string())),
                            });
                        }
                        None => warn!("Skipping unreadable entry: {}", e),
                    }
                    continue;
                }
            };

            let file_type = entry.file_type();
            if entry.depth() == 0 || file_type.is_symlink() || !file_type.is_file() {
                continue;
            }

            let candidate = self.classify_file(entry.path());
            match &candidate.exclusion {
                Some(exclusion) => debug!(
                    "Excluded {} ({}: {})",
                    candidate.rel_path, exclusion.reason, exclusion.detail
                ),
                None => debug!("Candidate {}", candidate.rel_path),
            }
            result.push(candidate);
        }

        result.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        info!("Classified {} files", result.len());
        Ok(result)
    }

    fn is_pruned_dir(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let Some(rel) = self.rel_path(entry.path()) else {
            return false;
        };
        if self.ignore_always.is_match(&format!("{}/", rel)) {
            debug!("Pruning ignored directory {}", rel);
            return true;
        }
        if let Some(vcs) = &self.vcs_ignore {
            if vcs.is_ignored(&rel, true) {
                debug!("Pruning gitignored directory {}", rel);
                return true;
            }
        }
        false
    }

    fn rel_path(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Labels a single file. Paths that do not live under the root are reported
    /// as outside-root.
    pub fn classify_file(&self, path: &Path) -> PathCandidate {
        let Some(rel) = self.rel_path(path) else {
            let shown = path.to_string_lossy().replace('\\', "/");
            return PathCandidate {
                is_hidden: is_hidden_rel(&shown),
                rel_path: shown,
                abs_path: path.to_path_buf(),
                size_bytes: 0,
                exclusion: Some(Exclusion::new(ExclusionReason::OutsideRoot, "outside root")),
            };
        };

        let mut candidate = PathCandidate {
            is_hidden: is_hidden_rel(&rel),
            rel_path: rel,
            abs_path: path.to_path_buf(),
            size_bytes: 0,
            exclusion: None,
        };

        match fs::metadata(path) {
            Ok(meta) => candidate.size_bytes = meta.len(),
            Err(e) => {
                candidate.exclusion = Some(Exclusion::new(ExclusionReason::Unreadable, e.to_string()));
                return candidate;
            }
        }

        candidate.exclusion = self.exclusion_for(&candidate.rel_path, path);
        candidate
    }

    fn exclusion_for(&self, rel: &str, path: &Path) -> Option<Exclusion> {
        if self.ignore_always.is_match(rel) {
            return Some(Exclusion::new(ExclusionReason::IgnoreRule, "ignore.always"));
        }
        if self.sensitive.is_match(rel) {
            return Some(Exclusion::new(
                ExclusionReason::SensitiveRule,
                "sensitive.exclude_globs",
            ));
        }
        if let Some(vcs) = &self.vcs_ignore {
            if vcs.is_ignored(rel, false) {
                return Some(Exclusion::new(ExclusionReason::VcsIgnoreRule, ".gitignore"));
            }
        }
        if let Some(ext) = extension_of(rel) {
            if self.binary_extensions.contains(&ext) {
                return Some(Exclusion::new(ExclusionReason::Binary, "binary extension"));
            }
        }
        match sniff_file(path) {
            Ok(true) => Some(Exclusion::new(ExclusionReason::Binary, "binary sniff")),
            Ok(false) => None,
            Err(e) => Some(Exclusion::new(ExclusionReason::Unreadable, e.to_string())),
        }
    }
}

/// `.gitignore` matchers, one per directory, loaded on first use.
///
/// The root matcher also carries `.git/info/exclude`. The deepest matcher with a
/// verdict decides, so a nested `!pattern` can re-include what a parent ignores.
struct VcsIgnore {
    root: PathBuf,
    matchers: RefCell<HashMap<PathBuf, Option<Rc<Gitignore>>>>,
}

impl VcsIgnore {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            matchers: RefCell::new(HashMap::new()),
        }
    }

    fn is_ignored(&self, rel: &str, is_dir: bool) -> bool {
        let path = self.root.join(rel);
        let mut dirs = vec![self.root.clone()];
        let segments: Vec<&str> = rel.split('/').collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            let next = dirs[dirs.len() - 1].join(segment);
            dirs.push(next);
        }

        for dir in dirs.iter().rev() {
            let Some(matcher) = self.matcher_for(dir) else {
                continue;
            };
            let verdict = matcher.matched_path_or_any_parents(&path, is_dir);
            if verdict.is_ignore() {
                return true;
            }
            if verdict.is_whitelist() {
                return false;
            }
        }
        false
    }

    fn matcher_for(&self, dir: &Path) -> Option<Rc<Gitignore>> {
        if let Some(cached) = self.matchers.borrow().get(dir) {
            return cached.clone();
        }
        let loaded = load_dir_ignore(&self.root, dir).map(Rc::new);
        self.matchers
            .borrow_mut()
            .insert(dir.to_path_buf(), loaded.clone());
        loaded
    }
}

fn load_dir_ignore(root: &Path, dir: &Path) -> Option<Gitignore> {
    let mut files = Vec::new();
    if dir == root {
        files.push(root.join(".git").join("info").join("exclude"));
    }
    files.push(dir.join(".gitignore"));

    let mut builder = GitignoreBuilder::new(dir);
    let mut found = false;
    for file in files.iter().filter(|f| f.is_file()) {
        debug!("Loading ignore rules from {}", file.display());
        if let Some(e) = builder.add(file) {
            warn!("Problem reading {}: {}", file.display(), e);
        }
        found = true;
    }
    if !found {
        return None;
    }

    match builder.build() {
        Ok(gitignore) => {
            debug!(
                "Loaded {} gitignore rules for {}",
                gitignore.num_ignores(),
                dir.display()
            );
            Some(gitignore)
        }
        Err(e) => {
            warn!("Ignoring rules in {}: {}", dir.display(), e);
            None
        }
    }
}

/// Lowercased extension including the dot, if any.
fn extension_of(rel: &str) -> Option<String> {
    Path::new(rel)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
}

fn sniff_file(path: &Path) -> io::Result<bool> {
    let mut sample = Vec::with_capacity(SNIFF_LEN as usize);
    fs::File::open(path)?.take(SNIFF_LEN).read_to_end(&mut sample)?;
    Ok(sniff_binary(&sample))
}

/// A sample is binary if it has a NUL byte or more than 30% bytes that are
/// neither printable ASCII nor common whitespace.
pub fn sniff_binary(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let non_text = sample
        .iter()
        .filter(|&&b| !matches!(b, b'\n' | b'\r' | b'\t' | 0x20..=0x7e))
        .count();
    non_text as f64 / sample.len() as f64 > 0.30
}
