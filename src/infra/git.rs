use log::debug;
use std::path::Path;
use std::process::{Command, Stdio};

/// Stand-in revision used in bundle names and headers when git is unavailable.
pub const UNKNOWN_SHA: &str = "000000";

/// `git rev-parse --short HEAD` run in `root`, or `None` on any failure.
pub fn short_sha(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .current_dir(root)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let sha = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if sha.is_empty() { None } else { Some(sha) }
        }
        Ok(out) => {
            debug!("git rev-parse exited with {}", out.status);
            None
        }
        Err(e) => {
            debug!("git not available: {}", e);
            None
        }
    }
}

pub fn short_sha_or_unknown(root: &Path) -> String {
    short_sha(root).unwrap_or_else(|| UNKNOWN_SHA.to_string())
}
