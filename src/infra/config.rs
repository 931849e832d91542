use crate::core::selector::{self, Modifier, is_valid_slice_name};
use crate::domain::errors::ConfigError;
use crate::domain::models::{Limits, Slice};
use crate::infra::file_system::ClassifierRules;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = ".snip.yaml";
pub const SUPPORTED_VERSION: u32 = 1;
pub const DROP_LOW_PRIORITY: &str = "drop_low_priority";

/// Root of `.snip.yaml`. Every key is optional; missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    pub root: String,
    pub name: String,
    pub default_profile: String,
    pub output: OutputConfig,
    pub render: RenderConfig,
    pub budgets: BudgetConfig,
    pub ignore: IgnoreConfig,
    pub sensitive: SensitiveConfig,
    pub slices: BTreeMap<String, SliceConfig>,
    pub profiles: BTreeMap<String, ProfileConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
    pub pattern: String,
    pub latest: String,
    pub stdout_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub format: String,
    pub newline: String,
    pub code_fences: bool,
    pub include_tree: bool,
    pub tree_depth: usize,
    pub include_manifest: bool,
    pub manifest: ManifestConfig,
    pub file_block: FileBlockConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub group_by_slice: bool,
    pub include_line_counts: bool,
    pub include_byte_counts: bool,
    pub include_truncation_notes: bool,
    pub include_unreadable_notes: bool,
}

/// Optional single-line delimiters around each file; `{path}` is substituted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileBlockConfig {
    pub header: String,
    pub footer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_chars: usize,
    pub per_file_max_lines: usize,
    pub per_file_max_bytes: usize,
    pub drop_policy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    pub use_gitignore: bool,
    pub always: Vec<String>,
    pub binary_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitiveConfig {
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub priority: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub enable: Vec<String>,
    pub budgets: BudgetOverride,
    pub render: RenderOverride,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetOverride {
    pub max_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOverride {
    pub tree_depth: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            root: ".".to_string(),
            name: String::new(),
            default_profile: String::new(),
            output: OutputConfig::default(),
            render: RenderConfig::default(),
            budgets: BudgetConfig::default(),
            ignore: IgnoreConfig::default(),
            sensitive: SensitiveConfig::default(),
            slices: BTreeMap::new(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: ".snip".to_string(),
            pattern: "snip_{profile}_{ts}_{gitsha}.md".to_string(),
            latest: "last.md".to_string(),
            stdout_default: false,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            format: "md".to_string(),
            newline: "\n".to_string(),
            code_fences: true,
            include_tree: true,
            tree_depth: 4,
            include_manifest: true,
            manifest: ManifestConfig::default(),
            file_block: FileBlockConfig::default(),
        }
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            group_by_slice: true,
            include_line_counts: true,
            include_byte_counts: true,
            include_truncation_notes: true,
            include_unreadable_notes: true,
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_chars: 120_000,
            per_file_max_lines: 600,
            per_file_max_bytes: 262_144,
            drop_policy: DROP_LOW_PRIORITY.to_string(),
        }
    }
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            use_gitignore: true,
            always: to_strings(&[
                ".git/**",
                "node_modules/**",
                "dist/**",
                "build/**",
                ".venv/**",
                ".pytest_cache/**",
                "coverage/**",
                "target/**",
                ".snip/**",
            ]),
            binary_extensions: to_strings(&[
                ".png", ".jpg", ".jpeg", ".gif", ".pdf", ".zip", ".tar", ".gz", ".7z", ".exe",
                ".dll", ".so", ".dylib",
            ]),
        }
    }
}

impl Default for SensitiveConfig {
    fn default() -> Self {
        Self {
            exclude_globs: to_strings(&[
                ".env*",
                "**/*secret*",
                "**/*secrets*",
                "**/*.pem",
                "**/*.key",
                "**/id_rsa*",
                "**/*serviceAccount*.json",
            ]),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// `--config` (or `SNIP_CONFIG`, which clap folds into the same flag), else `.snip.yaml`.
pub fn find_config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) if !path.as_os_str().is_empty() => path.to_path_buf(),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading config from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut cfg: Config = serde_yaml::from_str(content)?;
        cfg.fill_derived_defaults();
        cfg.validate()?;
        debug!(
            "Config: {} slices, {} profiles, default profile {:?}",
            cfg.slices.len(),
            cfg.profiles.len(),
            cfg.default_profile
        );
        Ok(cfg)
    }

    fn fill_derived_defaults(&mut self) {
        if self.root.is_empty() {
            self.root = ".".to_string();
        }
        if self.render.newline.is_empty() {
            self.render.newline = "\n".to_string();
        }
        if self.default_profile.is_empty() {
            self.default_profile = if self.profiles.contains_key("api") {
                "api".to_string()
            } else {
                self.profiles.keys().next().cloned().unwrap_or_default()
            };
        }
    }

    /// Schema checks that must pass before any file is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.version != SUPPORTED_VERSION {
            return invalid(format!("unsupported config version {}", self.version));
        }
        if self.budgets.max_chars == 0 {
            return invalid("budgets.max_chars must be > 0".to_string());
        }
        if self.budgets.per_file_max_lines == 0 {
            return invalid("budgets.per_file_max_lines must be > 0".to_string());
        }
        if self.budgets.per_file_max_bytes == 0 {
            return invalid("budgets.per_file_max_bytes must be > 0".to_string());
        }
        if self.budgets.drop_policy != DROP_LOW_PRIORITY {
            return invalid(format!("budgets.drop_policy must be '{DROP_LOW_PRIORITY}'"));
        }
        if self.render.format != "md" {
            return invalid("render.format must be 'md'".to_string());
        }
        if self.output.pattern.is_empty() {
            return invalid("output.pattern is required".to_string());
        }
        for (key, value) in [
            ("header", &self.render.file_block.header),
            ("footer", &self.render.file_block.footer),
        ] {
            if value.contains(['\r', '\n']) {
                return invalid(format!("render.file_block.{key} must not contain newlines"));
            }
        }

        if self.slices.is_empty() {
            return invalid("at least one slice is required".to_string());
        }
        if self.profiles.is_empty() {
            return invalid("at least one profile is required".to_string());
        }
        if let Some(name) = self.slices.keys().find(|n| !is_valid_slice_name(n)) {
            return Err(ConfigError::InvalidSliceName(name.clone()));
        }

        for (name, profile) in &self.profiles {
            if name.is_empty() {
                return invalid("profile name cannot be empty".to_string());
            }
            if profile.enable.is_empty() {
                return invalid(format!("profile {name:?} must enable at least one slice"));
            }
            if let Some(unknown) = profile.enable.iter().find(|s| !self.slices.contains_key(*s)) {
                return invalid(format!("profile {name:?} enables unknown slice {unknown:?}"));
            }
        }

        if !self.profiles.contains_key(&self.default_profile) {
            return invalid(format!(
                "default_profile {:?} does not exist",
                self.default_profile
            ));
        }
        Ok(())
    }

    /// `--root`, else the configured root, resolved to an existing directory.
    pub fn effective_root(&self, root_override: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let root = match root_override {
            Some(path) if !path.as_os_str().is_empty() => path.to_path_buf(),
            _ => PathBuf::from(if self.root.is_empty() { "." } else { &self.root }),
        };
        let abs = std::path::absolute(&root).map_err(|e| ConfigError::Root {
            path: root.clone(),
            reason: e.to_string(),
        })?;
        let meta = fs::metadata(&abs).map_err(|e| ConfigError::Root {
            path: abs.clone(),
            reason: e.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(ConfigError::Root {
                path: abs,
                reason: "not a directory".to_string(),
            });
        }
        Ok(abs)
    }

    /// A copy with the profile's budget and tree-depth overrides applied.
    pub fn with_profile(&self, profile: &str) -> Result<Config, ConfigError> {
        let p = self
            .profiles
            .get(profile)
            .ok_or_else(|| ConfigError::UnknownProfile(profile.to_string()))?;

        let mut out = self.clone();
        if let Some(max_chars) = p.budgets.max_chars.filter(|&n| n > 0) {
            out.budgets.max_chars = max_chars;
        }
        if let Some(depth) = p.render.tree_depth.filter(|&n| n > 0) {
            out.render.tree_depth = depth;
        }
        Ok(out)
    }

    pub fn slice_defs(&self) -> BTreeMap<String, Slice> {
        self.slices
            .iter()
            .map(|(name, sc)| {
                let slice = Slice {
                    name: name.clone(),
                    include: sc.include.clone(),
                    exclude: sc.exclude.clone(),
                    priority: sc.priority,
                };
                (name.clone(), slice)
            })
            .collect()
    }

    pub fn priorities(&self) -> BTreeMap<String, i32> {
        self.slices
            .iter()
            .map(|(name, sc)| (name.clone(), sc.priority))
            .collect()
    }

    /// The profile's slices with modifiers applied, name-ascending.
    pub fn enabled_slices(&self, profile: &str, mods: &[Modifier]) -> Result<Vec<String>, ConfigError> {
        let p = self
            .profiles
            .get(profile)
            .ok_or_else(|| ConfigError::UnknownProfile(profile.to_string()))?;
        let enabled = selector::resolve_enabled(&p.enable, &self.slice_defs(), mods)?;
        if enabled.is_empty() {
            return Err(ConfigError::NoEnabledSlices);
        }
        Ok(enabled)
    }

    /// Enabled slices in display order: priority descending, then name.
    pub fn enabled_slice_list(&self, enabled: &[String]) -> Vec<String> {
        selector::order_by_priority(enabled, &self.slice_defs())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_chars: self.budgets.max_chars,
            per_file_max_lines: self.budgets.per_file_max_lines,
            per_file_max_bytes: self.budgets.per_file_max_bytes,
        }
    }

    pub fn classifier_rules(&self) -> ClassifierRules {
        ClassifierRules {
            ignore_always: self.ignore.always.clone(),
            sensitive: self.sensitive.exclude_globs.clone(),
            use_vcs_ignore: self.ignore.use_gitignore,
            binary_extensions: self.ignore.binary_extensions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::selector::parse_modifiers;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
slices:
  api:
    include: ["**/*.go"]
    priority: 100
  docs:
    include: ["docs/**", "*.md"]
    priority: 1
  tests:
    include: ["**/*_test.go"]
    priority: 10
profiles:
  api:
    enable: [api, docs]
    budgets:
      max_chars: 5000
  full:
    enable: [api, docs, tests]
    render:
      tree_depth: 8
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let cfg = Config::from_yaml(MINIMAL).unwrap();

        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.root, ".");
        assert_eq!(cfg.default_profile, "api");
        assert_eq!(cfg.budgets.max_chars, 120_000);
        assert_eq!(cfg.budgets.per_file_max_lines, 600);
        assert_eq!(cfg.output.pattern, "snip_{profile}_{ts}_{gitsha}.md");
        assert!(cfg.render.code_fences);
        assert!(cfg.render.manifest.group_by_slice);
        assert!(cfg.ignore.use_gitignore);
        assert!(cfg.ignore.always.contains(&".git/**".to_string()));
        assert!(cfg.sensitive.exclude_globs.contains(&".env*".to_string()));
    }

    #[test]
    fn test_explicit_empty_list_is_kept() {
        let yaml = format!("{MINIMAL}\nsensitive:\n  exclude_globs: []\n");
        let cfg = Config::from_yaml(&yaml).unwrap();
        assert!(cfg.sensitive.exclude_globs.is_empty());
    }

    #[test]
    fn test_default_profile_falls_back_to_first_name() {
        let yaml = r#"
slices:
  core: {include: ["src/**"]}
profiles:
  zeta: {enable: [core]}
  beta: {enable: [core]}
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.default_profile, "beta");
    }

    #[test]
    fn test_validation_failures() {
        let cases = [
            ("version: 2\nslices: {a: {}}\nprofiles: {p: {enable: [a]}}", "unsupported config version"),
            ("slices: {a: {}}\nprofiles: {p: {enable: [b]}}", "unknown slice"),
            ("slices: {a: {}}\nprofiles: {p: {enable: []}}", "at least one slice"),
            ("slices: {}\nprofiles: {p: {enable: [a]}}", "at least one slice is required"),
            ("slices: {a: {}}\nprofiles: {}", "at least one profile"),
            (
                "slices: {a: {}}\nprofiles: {p: {enable: [a]}}\nbudgets: {drop_policy: random}",
                "drop_policy",
            ),
            (
                "slices: {a: {}}\nprofiles: {p: {enable: [a]}}\nrender: {format: html}",
                "render.format",
            ),
            (
                "slices: {a: {}}\nprofiles: {p: {enable: [a]}}\nrender: {file_block: {header: \"a\\nb\"}}",
                "newlines",
            ),
            (
                "slices: {a: {}}\nprofiles: {p: {enable: [a]}}\ndefault_profile: q",
                "default_profile",
            ),
        ];
        for (yaml, needle) in cases {
            let err = Config::from_yaml(yaml).unwrap_err().to_string();
            assert!(err.contains(needle), "{yaml:?}: {err}");
        }
    }

    #[test]
    fn test_invalid_slice_name() {
        let err = Config::from_yaml("slices: {\"bad name\": {}}\nprofiles: {p: {enable: [\"bad name\"]}}")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSliceName(_)));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            Config::from_yaml("slices: [unclosed"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_profile_overrides() {
        let cfg = Config::from_yaml(MINIMAL).unwrap();

        let api = cfg.with_profile("api").unwrap();
        assert_eq!(api.budgets.max_chars, 5000);
        assert_eq!(api.render.tree_depth, 4);

        let full = cfg.with_profile("full").unwrap();
        assert_eq!(full.budgets.max_chars, 120_000);
        assert_eq!(full.render.tree_depth, 8);

        assert!(matches!(
            cfg.with_profile("nope"),
            Err(ConfigError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_enabled_slices_with_modifiers() {
        let cfg = Config::from_yaml(MINIMAL).unwrap();
        let mods = parse_modifiers(&["+tests", "-docs"]).unwrap();

        let enabled = cfg.enabled_slices("api", &mods).unwrap();
        assert_eq!(enabled, vec!["api", "tests"]);
        assert_eq!(cfg.enabled_slice_list(&enabled), vec!["api", "tests"]);

        let enabled = cfg.enabled_slices("full", &[]).unwrap();
        assert_eq!(cfg.enabled_slice_list(&enabled), vec!["api", "tests", "docs"]);

        let all_off = parse_modifiers(&["-api", "-docs"]).unwrap();
        assert!(matches!(
            cfg.enabled_slices("api", &all_off),
            Err(ConfigError::NoEnabledSlices)
        ));
    }

    #[test]
    fn test_load_and_effective_root() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".snip.yaml");
        fs::write(&path, MINIMAL).unwrap();

        let cfg = Config::load(&path).unwrap();
        let root = cfg.effective_root(Some(temp_dir.path())).unwrap();
        assert!(root.is_absolute());

        let file = temp_dir.path().join(".snip.yaml");
        assert!(matches!(
            cfg.effective_root(Some(&file)),
            Err(ConfigError::Root { .. })
        ));
        assert!(matches!(
            Config::load(&temp_dir.path().join("missing.yaml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_find_config_path() {
        assert_eq!(find_config_path(None), PathBuf::from(".snip.yaml"));
        assert_eq!(
            find_config_path(Some(Path::new("custom.yaml"))),
            PathBuf::from("custom.yaml")
        );
    }
}
