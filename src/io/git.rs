//! Minimal git plumbing for checkpoints and rollback.
//!
//! Checkpoints record the HEAD SHA before an apply; rollback resets the
//! working tree to a recorded SHA. Everything else stays out of git's way.

use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

/// True when `root` is the top of a version-controlled tree.
pub fn is_git_repo(root: &Path) -> bool {
    root.join(".git").exists()
}

/// The current HEAD commit SHA.
pub fn head_sha(root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(root)
        .output()
        .context("spawn git rev-parse")?;
    if !output.status.success() {
        return Err(anyhow!(
            "git rev-parse failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Hard-reset the working tree to a commit.
pub fn reset_hard(root: &Path, sha: &str) -> Result<()> {
    debug!(sha, "resetting working tree");
    let output = Command::new("git")
        .args(["reset", "--hard", sha])
        .current_dir(root)
        .output()
        .context("spawn git reset")?;
    if !output.status.success() {
        return Err(anyhow!(
            "git reset failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}
