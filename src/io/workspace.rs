//! The workspace: a persisted state machine over file edits.
//!
//! Proposed changes are staged per node, policy-gated on apply, written with
//! a pre-image snapshot for `undo`, and optionally checkpointed against git
//! for `rollback`. State lives at `.agentic/state.json` and is written
//! atomically; the pre-image snapshot is persisted *before* the first on-disk
//! mutation so a crash mid-apply still leaves `undo` consistent.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::graph::Graph;
use crate::core::node::Node;
use crate::core::policy::{self, Severity, Violation};
use crate::core::reply::SyntaxChecker;
use crate::io::bundle::BundleBuilder;
use crate::io::config::AgenticConfig;
use crate::io::contracts::{hash_node_contracts, ContractHashStore};
use crate::io::git;
use crate::io::layout::{write_atomic, AgenticPaths};
use crate::io::process::run_command_with_timeout;

const MAX_CHECKPOINTS: usize = 10;

/// A file to be written (or a captured pre-image).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

/// Pending changes for one node. Staging replaces, never merges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagedChanges {
    pub node_id: String,
    pub files: Vec<FileChange>,
    #[serde(default)]
    pub message: String,
}

/// A git commit reference captured before an apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub id: String,
    pub commit_sha: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Pre-apply file contents, kept for exactly one `undo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastApplied {
    pub node_id: String,
    pub files: Vec<FileChange>,
    pub timestamp: DateTime<Utc>,
}

/// Persisted workspace state.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Workspace {
    pub current_node: Option<String>,
    pub staged: BTreeMap<String, StagedChanges>,
    pub dirty: BTreeMap<String, String>,
    pub checkpoints: Vec<Checkpoint>,
    pub last_applied: Option<LastApplied>,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip)]
    root: PathBuf,
}

/// What an apply did, including everything that warned without aborting.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Node ids whose staged changes were written, in apply order.
    pub applied: Vec<String>,
    pub files_written: Vec<String>,
    /// Warning-severity policy violations.
    pub warnings: Vec<Violation>,
    pub checkpoint_warning: Option<String>,
    /// Output of the failed project-level validation, if it failed.
    pub build_failure: Option<String>,
    /// Nodes whose contract hash changed relative to the stored hash.
    pub contract_drift: Vec<String>,
    /// Check commands that failed, as `node: error` strings.
    pub check_failures: Vec<String>,
}

impl Workspace {
    /// Load or create workspace state under `root`.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let paths = AgenticPaths::new(&root);
        paths.ensure_state_dir()?;

        let mut ws = if paths.state_path.exists() {
            let contents = fs::read_to_string(&paths.state_path)
                .with_context(|| format!("read {}", paths.state_path.display()))?;
            serde_json::from_str::<Workspace>(&contents)
                .with_context(|| format!("parse {}", paths.state_path.display()))?
        } else {
            Workspace::default()
        };
        ws.root = root;
        Ok(ws)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Atomically persist state, bumping `last_modified`.
    pub fn save(&mut self) -> Result<()> {
        self.last_modified = Some(Utc::now());
        let paths = AgenticPaths::new(&self.root);
        let mut buf = serde_json::to_string_pretty(self).context("serialize workspace state")?;
        buf.push('\n');
        write_atomic(&paths.state_path, &buf)
    }

    /// Replace the staged changes for a node.
    pub fn stage(&mut self, node_id: impl Into<String>, files: Vec<FileChange>, message: String) {
        let node_id = node_id.into();
        debug!(node = %node_id, files = files.len(), "staging files");
        self.staged.insert(
            node_id.clone(),
            StagedChanges {
                node_id,
                files,
                message,
            },
        );
    }

    pub fn mark_dirty(&mut self, node_id: impl Into<String>, reason: impl Into<String>) {
        self.dirty.insert(node_id.into(), reason.into());
    }

    pub fn clear_dirty(&mut self, node_id: &str) {
        self.dirty.remove(node_id);
    }

    /// Human-readable workspace status.
    pub fn status_report(&self) -> String {
        let mut out = String::new();
        out.push_str("Workspace Status\n================\n");

        match &self.current_node {
            Some(id) => out.push_str(&format!("Current node: {id}\n")),
            None => out.push_str("Current node: (root)\n"),
        }

        out.push_str(&format!("Staged changes: {} node(s)\n", self.staged.len()));
        for (node_id, changes) in &self.staged {
            out.push_str(&format!("  - {node_id}: {} file(s)\n", changes.files.len()));
        }

        out.push_str(&format!("Dirty nodes: {}\n", self.dirty.len()));
        for (node_id, reason) in &self.dirty {
            out.push_str(&format!("  - {node_id}: {reason}\n"));
        }

        out.push_str(&format!("Checkpoints: {}\n", self.checkpoints.len()));
        if let Some(latest) = self.checkpoints.last() {
            out.push_str(&format!("  Latest: {} ({})\n", latest.id, latest.message));
        }

        if let Some(last) = &self.last_applied {
            out.push_str(&format!(
                "Undo available: {} ({} file(s), applied {})\n",
                last.node_id,
                last.files.len(),
                last.timestamp.to_rfc3339()
            ));
        }

        if let Some(ts) = &self.last_modified {
            out.push_str(&format!("Last modified: {}\n", ts.to_rfc3339()));
        }

        out
    }

    /// Render staged changes, truncating each file to its first 20 lines.
    pub fn diff_report(&self) -> String {
        if self.staged.is_empty() {
            return "No staged changes.\n".to_string();
        }

        let mut out = String::new();
        out.push_str("Staged changes:\n===============\n");
        for (node_id, changes) in &self.staged {
            out.push_str(&format!("\n--- Node: {node_id} ---\n"));
            if !changes.message.is_empty() {
                out.push_str(&format!("Message: {}\n", changes.message));
            }
            for file in &changes.files {
                out.push_str(&format!("\nFile: {}\n", file.path));
                let lines: Vec<&str> = file.content.lines().collect();
                if lines.len() > 20 {
                    for line in &lines[..20] {
                        out.push_str(line);
                        out.push('\n');
                    }
                    out.push_str(&format!("... ({} more lines)\n", lines.len() - 20));
                } else {
                    out.push_str(&file.content);
                    out.push('\n');
                }
            }
        }
        out
    }

    /// Record a checkpoint at the current HEAD. A no-op outside a
    /// version-controlled tree.
    pub fn checkpoint(&mut self) -> Result<bool> {
        if !git::is_git_repo(&self.root) {
            return Ok(false);
        }
        let sha = git::head_sha(&self.root)?;
        let now = Utc::now();
        self.checkpoints.push(Checkpoint {
            id: format!("cp-{}", self.checkpoints.len() + 1),
            commit_sha: sha,
            message: format!("before applying changes at {}", now.to_rfc3339()),
            timestamp: now,
        });
        self.trim_checkpoints();
        Ok(true)
    }

    fn trim_checkpoints(&mut self) {
        if self.checkpoints.len() > MAX_CHECKPOINTS {
            let excess = self.checkpoints.len() - MAX_CHECKPOINTS;
            self.checkpoints.drain(..excess);
        }
    }

    /// Reset the working tree to the most recent checkpoint and pop it.
    pub fn rollback(&mut self) -> Result<Checkpoint> {
        let Some(latest) = self.checkpoints.last().cloned() else {
            bail!("no checkpoints available");
        };
        if !git::is_git_repo(&self.root) {
            bail!("not in a git repository");
        }
        git::reset_hard(&self.root, &latest.commit_sha)?;
        self.checkpoints.pop();
        self.save()?;
        Ok(latest)
    }

    /// Restore the pre-images captured by the last apply.
    ///
    /// A failed restore leaves `last_applied` intact so the undo can be
    /// retried.
    pub fn undo(&mut self) -> Result<Vec<String>> {
        let Some(last) = self.last_applied.clone() else {
            bail!("no changes to undo");
        };

        let mut restored = Vec::new();
        for file in &last.files {
            write_file(&self.root, &file.path, &file.content)
                .with_context(|| format!("restore {}", file.path))?;
            restored.push(file.path.clone());
        }

        self.last_applied = None;
        self.save()?;
        Ok(restored)
    }

    /// Policy-gate and write all staged changes.
    ///
    /// Any error-severity violation across all staged nodes aborts before
    /// anything is written, leaving the staged set untouched. On success the
    /// staged set is cleared and a depth-one undo snapshot remains.
    #[instrument(skip_all, fields(nodes = self.staged.len()))]
    pub fn apply(
        &mut self,
        graph: &Graph,
        builder: &BundleBuilder,
        checker: &dyn SyntaxChecker,
        cfg: &AgenticConfig,
        skip_checks: bool,
    ) -> Result<ApplyOutcome> {
        if self.staged.is_empty() {
            bail!("no staged changes to apply");
        }

        let mut errors: Vec<Violation> = Vec::new();
        let mut outcome = ApplyOutcome::default();

        for (node_id, changes) in &self.staged {
            let node = graph.require(node_id)?;
            let bundle = builder.build(graph, node)?;
            let diff = policy::diff_from_paths(changes.files.iter().map(|f| f.path.as_str()));
            let result = policy::evaluate(node, &bundle, &diff);
            for violation in result.violations {
                match violation.severity {
                    Severity::Error => errors.push(violation),
                    Severity::Warning => outcome.warnings.push(violation),
                }
            }
        }

        if !errors.is_empty() {
            let mut msg = String::from("policy violations:\n");
            for v in &errors {
                msg.push_str(&format!("  [{}] {}: {}\n", v.severity, v.policy, v.message));
            }
            bail!(msg.trim_end().to_string());
        }

        if let Err(err) = self.checkpoint() {
            warn!(error = %err, "could not create checkpoint");
            outcome.checkpoint_warning = Some(format!("could not create checkpoint: {err:#}"));
        }

        // Snapshot pre-images and persist them before the first write.
        let mut pre_images = Vec::new();
        let mut last_node_id = String::new();
        for (node_id, changes) in &self.staged {
            last_node_id = node_id.clone();
            for file in &changes.files {
                let on_disk = self.root.join(&file.path);
                let content = match fs::read_to_string(&on_disk) {
                    Ok(content) => content,
                    Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
                    Err(err) => {
                        return Err(err)
                            .with_context(|| format!("read {} for undo snapshot", file.path))
                    }
                };
                pre_images.push(FileChange {
                    path: file.path.clone(),
                    content,
                });
            }
        }
        self.last_applied = Some(LastApplied {
            node_id: last_node_id,
            files: pre_images,
            timestamp: Utc::now(),
        });
        self.save()?;

        let staged: Vec<StagedChanges> = self.staged.values().cloned().collect();
        for changes in &staged {
            for file in &changes.files {
                checker
                    .check(&file.path, &file.content)
                    .map_err(|detail| anyhow!("validation failed for {}: {detail}", file.path))?;
                write_file(&self.root, &file.path, &file.content)?;
                outcome.files_written.push(file.path.clone());
            }
            outcome.applied.push(changes.node_id.clone());
        }

        if !cfg.build_validation.is_empty() {
            match run_build_validation(&self.root, cfg) {
                Ok(None) => {}
                Ok(Some(output)) => outcome.build_failure = Some(output),
                Err(err) => outcome.build_failure = Some(format!("{err:#}")),
            }
        }

        self.refresh_contract_hashes(graph, &outcome.applied, &mut outcome.contract_drift)?;

        if !skip_checks {
            for node_id in &outcome.applied {
                let node = graph.require(node_id)?;
                if let Err(err) = run_node_checks(&self.root, node, cfg) {
                    outcome.check_failures.push(format!("{node_id}: {err:#}"));
                }
            }
        }

        self.staged.clear();
        self.save()?;
        Ok(outcome)
    }

    /// Recompute and persist contract hashes for the applied nodes,
    /// recording which drifted. Runs only from this serial phase.
    fn refresh_contract_hashes(
        &self,
        graph: &Graph,
        applied: &[String],
        drift: &mut Vec<String>,
    ) -> Result<()> {
        let paths = AgenticPaths::new(&self.root);
        let mut store = ContractHashStore::load(&paths.contracts_path)?;
        for node_id in applied {
            let node = graph.require(node_id)?;
            let hash = hash_node_contracts(&self.root.join(&node.path))?;
            if store.has_changed(node_id, &hash) {
                drift.push(node_id.clone());
            }
            store.set(node_id.clone(), hash);
        }
        store.save(&paths.contracts_path)
    }
}

/// Run a node's configured check commands with CWD = the node directory.
///
/// Stops at the first failing command, surfacing its captured output.
pub fn run_node_checks(root: &Path, node: &Node, cfg: &AgenticConfig) -> Result<()> {
    let Some(meta) = &node.meta else {
        return Ok(());
    };
    for check in &meta.policies.checks {
        debug!(node = %node.id, check, "running check");
        let mut cmd = Command::new("sh");
        cmd.args(["-c", check]).current_dir(root.join(&node.path));
        let output = run_command_with_timeout(
            cmd,
            None,
            Duration::from_secs(cfg.check_timeout_secs),
            cfg.check_output_limit_bytes,
        )
        .with_context(|| format!("run check: {check}"))?;
        if output.timed_out {
            bail!("check timed out: {check}");
        }
        if !output.status.success() {
            bail!("check failed: {check}\n{}", output.combined().trim_end());
        }
    }
    Ok(())
}

fn run_build_validation(root: &Path, cfg: &AgenticConfig) -> Result<Option<String>> {
    let mut cmd = Command::new(&cfg.build_validation[0]);
    cmd.args(&cfg.build_validation[1..]).current_dir(root);
    let output = run_command_with_timeout(
        cmd,
        None,
        Duration::from_secs(cfg.check_timeout_secs),
        cfg.check_output_limit_bytes,
    )?;
    if output.timed_out {
        return Ok(Some(format!(
            "{} timed out",
            cfg.build_validation.join(" ")
        )));
    }
    if !output.status.success() {
        return Ok(Some(output.combined().trim_end().to_string()));
    }
    Ok(None)
}

/// Write content to a path under `root`, creating directories as needed.
pub fn write_file(root: &Path, rel: &str, content: &str) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(&path, content).with_context(|| format!("write {}", path.display()))
}
