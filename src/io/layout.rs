//! Canonical paths for the `.agentic/` state directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// All paths the orchestrator persists under a project root.
#[derive(Debug, Clone)]
pub struct AgenticPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub state_path: PathBuf,
    pub contracts_path: PathBuf,
    pub config_path: PathBuf,
    pub manifest_path: PathBuf,
}

impl AgenticPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".agentic");
        Self {
            state_path: state_dir.join("state.json"),
            contracts_path: state_dir.join("contracts.json"),
            config_path: state_dir.join("config.toml"),
            manifest_path: root.join("GRAPH.manifest"),
            root,
            state_dir,
        }
    }

    /// Ensure the state directory exists.
    pub fn ensure_state_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("create directory {}", self.state_dir.display()))
    }
}

/// Atomically write a file (temp file + rename), creating parent directories.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
