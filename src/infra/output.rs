use crate::infra::config::OutputConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[cfg(feature = "clipboard-support")]
use clipboard::{ClipboardContext, ClipboardProvider};

pub trait OutputWriter {
    fn write(&self, content: &str) -> Result<()>;
}

/// Writes through a temporary file in the target directory, then renames over the target.
pub struct FileWriter {
    path: PathBuf,
}

impl FileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OutputWriter for FileWriter {
    fn write(&self, content: &str) -> Result<()> {
        debug!("Writing output to file: {}", self.path.display());
        write_file_atomic(&self.path, content)?;
        info!("Output written to file: {}", self.path.display());
        Ok(())
    }
}

pub fn write_file_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut temp_file = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in: {}", dir.display()))?;
    temp_file
        .write_all(content.as_bytes())
        .context("Failed to write temporary file")?;
    temp_file
        .as_file()
        .sync_all()
        .context("Failed to fsync temporary file")?;
    temp_file
        .persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub struct ConsoleWriter;

impl OutputWriter for ConsoleWriter {
    fn write(&self, content: &str) -> Result<()> {
        debug!("Writing output to console");
        let mut stdout = io::stdout().lock();
        stdout.write_all(content.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

pub struct ClipboardWriter;

#[cfg(feature = "clipboard-support")]
impl OutputWriter for ClipboardWriter {
    fn write(&self, content: &str) -> Result<()> {
        debug!("Writing output to clipboard");

        let mut ctx: ClipboardContext = match ClipboardProvider::new() {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("Failed to access clipboard: {}", e);
                return Err(anyhow::anyhow!("Failed to access clipboard: {}", e));
            }
        };

        match ctx.set_contents(content.to_owned()) {
            Ok(_) => {
                info!("Output copied to clipboard (size: {} bytes)", content.len());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to copy to clipboard: {}", e);
                Err(anyhow::anyhow!("Failed to copy to clipboard: {}", e))
            }
        }
    }
}

#[cfg(not(feature = "clipboard-support"))]
impl OutputWriter for ClipboardWriter {
    fn write(&self, _content: &str) -> Result<()> {
        warn!("Clipboard support is not compiled in");
        anyhow::bail!("clipboard support is disabled in this build")
    }
}

/// Where a bundle goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    Clipboard,
    File(PathBuf),
}

pub fn create_writer(target: &OutputTarget) -> Box<dyn OutputWriter> {
    match target {
        OutputTarget::Stdout => Box::new(ConsoleWriter),
        OutputTarget::Clipboard => Box::new(ClipboardWriter),
        OutputTarget::File(path) => Box::new(FileWriter::new(path.clone())),
    }
}

/// Supplies `{counter}` values for output names.
pub trait CounterProvider {
    fn next(&mut self) -> Result<u32>;
}

/// Persists a run counter as a decimal integer in `<dir>/counter`.
pub struct FileCounter {
    dir: PathBuf,
}

impl FileCounter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CounterProvider for FileCounter {
    fn next(&mut self) -> Result<u32> {
        let path = self.dir.join("counter");
        let current = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => 0,
            Ok(text) => text
                .trim()
                .parse::<u32>()
                .with_context(|| format!("Failed to parse counter in {}", path.display()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        let next = current + 1;
        write_file_atomic(&path, &format!("{next}\n"))?;
        Ok(next)
    }
}

/// Source of the bundle timestamp.
pub trait Clock {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Local time, or `SOURCE_DATE_EPOCH` (as UTC) when set to a valid integer.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        if let Ok(raw) = std::env::var("SOURCE_DATE_EPOCH") {
            match raw.trim().parse::<i64>().ok().and_then(|s| Utc.timestamp_opt(s, 0).single()) {
                Some(ts) => return ts.fixed_offset(),
                None => warn!("Ignoring invalid SOURCE_DATE_EPOCH {:?}", raw),
            }
        }
        Local::now().fixed_offset()
    }
}

pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

/// Replaces `{token}` occurrences with known values; unknown tokens stay as written.
pub fn apply_pattern_tokens(pattern: &str, values: &BTreeMap<&str, String>) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let token_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());

        if token_len > 0 && after[token_len..].starts_with('}') {
            let key = &after[..token_len];
            match values.get(key) {
                Some(value) => out.push_str(value),
                None => {
                    out.push('{');
                    out.push_str(key);
                    out.push('}');
                }
            }
            rest = &after[token_len + 1..];
        } else {
            out.push('{');
            rest = after;
        }
    }
    out.push_str(rest);
    collapse_separators(&out)
}

/// Collapses runs of `_`, `-` and `.` left behind by empty tokens, and trims them from both ends.
pub fn collapse_separators(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if matches!(c, '_' | '-' | '.') && prev == Some(c) {
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out.trim_matches(|c| matches!(c, '_' | '-' | '.')).to_string()
}

/// Values for the default output name.
#[derive(Debug, Clone)]
pub struct NameParts<'a> {
    pub profile: &'a str,
    pub git_sha: &'a str,
    pub repo: &'a str,
    pub timestamp: DateTime<FixedOffset>,
}

/// `<root>/<output.dir>`, or `output.dir` itself when absolute.
pub fn output_dir(root: &Path, output: &OutputConfig) -> PathBuf {
    let dir = if output.dir.is_empty() { ".snip" } else { &output.dir };
    let dir = Path::new(dir);
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        root.join(dir)
    }
}

pub fn default_file_name(
    pattern: &str,
    parts: &NameParts<'_>,
    counter: &mut dyn CounterProvider,
) -> Result<String> {
    let mut values: BTreeMap<&str, String> = BTreeMap::new();
    values.insert("ts", parts.timestamp.format("%Y%m%d-%H%M%S").to_string());
    values.insert("profile", parts.profile.to_string());
    values.insert("gitsha", parts.git_sha.to_string());
    values.insert("repo", parts.repo.to_string());
    values.insert("name", parts.repo.to_string());
    if pattern.contains("{counter}") {
        values.insert("counter", format!("{:03}", counter.next()?));
    }

    let mut name = apply_pattern_tokens(pattern, &values).replace(['/', '\\'], "_");
    if name.is_empty() {
        name = "snip".to_string();
    }
    if !name.to_ascii_lowercase().ends_with(".md") {
        name.push_str(".md");
    }
    Ok(name)
}

/// Writes the bundle under the output directory, plus the `latest` copy when configured.
pub fn write_default_output(
    root: &Path,
    output: &OutputConfig,
    parts: &NameParts<'_>,
    counter: &mut dyn CounterProvider,
    content: &str,
) -> Result<PathBuf> {
    let dir = output_dir(root, output);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let name = default_file_name(&output.pattern, parts, counter)?;
    let path = dir.join(name);
    FileWriter::new(&path).write(content)?;

    if let Some(latest) = Path::new(&output.latest).file_name() {
        let latest_path = dir.join(latest);
        debug!("Updating latest copy at {}", latest_path.display());
        write_file_atomic(&latest_path, content)?;
    }
    Ok(path)
}

/// An explicit `--out` path, resolved against the working directory when relative.
pub fn resolve_explicit_output(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Failed to resolve {}", path.display()))
}
