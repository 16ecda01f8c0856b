//! Orchestration of one user request across target nodes.
//!
//! Each node runs an independent pipeline: bundle, token-cap gate, prompt,
//! agent call, reply parse, stage. In parallel mode targets are grouped into
//! dependency levels; levels execute sequentially with a barrier between
//! them, nodes within a level concurrently. Staging is the only workspace
//! mutation inside the concurrent section and goes through a mutex.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::core::graph::Graph;
use crate::core::level::dependency_levels;
use crate::core::node::Node;
use crate::core::reply::{parse_reply, SyntaxChecker};
use crate::core::token;
use crate::io::agent::Agent;
use crate::io::bundle::BundleBuilder;
use crate::io::prompt::build_prompt;
use crate::io::workspace::{FileChange, Workspace};

/// Per-node outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub node_id: String,
    /// Number of files staged; zero when the agent proposed no changes.
    pub staged_files: usize,
    /// The agent's free-form message when nothing was staged.
    pub message: String,
}

/// Run one user request against a named node or every leaf.
///
/// Serial mode stops at the first failing node. Parallel mode finishes each
/// dependency level, aggregates every failure in it, and stops at the end of
/// the first failing level; successfully processed nodes remain staged either
/// way.
#[instrument(skip_all, fields(parallel, target = target.unwrap_or("<leaves>")))]
pub fn run_task(
    root: &Path,
    graph: &Graph,
    agent: &dyn Agent,
    checker: &(dyn SyntaxChecker + Sync),
    request: &str,
    target: Option<&str>,
    parallel: bool,
) -> Result<Vec<RunReport>> {
    let targets: Vec<&Node> = match target {
        Some(id) => vec![graph.require(id)?],
        None => graph.leaves(),
    };
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let builder = BundleBuilder::new(root);
    let workspace = Mutex::new(Workspace::load(root)?);

    if parallel && targets.len() > 1 {
        run_levels(graph, &targets, agent, checker, request, &builder, &workspace)
    } else {
        let mut reports = Vec::new();
        for node in targets {
            let report =
                run_single(graph, node, agent, checker, request, &builder, &workspace)
                    .with_context(|| format!("node {}", node.id))?;
            reports.push(report);
        }
        Ok(reports)
    }
}

fn run_levels(
    graph: &Graph,
    targets: &[&Node],
    agent: &dyn Agent,
    checker: &(dyn SyntaxChecker + Sync),
    request: &str,
    builder: &BundleBuilder,
    workspace: &Mutex<Workspace>,
) -> Result<Vec<RunReport>> {
    let target_ids: Vec<String> = targets.iter().map(|n| n.id.clone()).collect();
    let levels = dependency_levels(graph, &target_ids);

    let mut reports = Vec::new();
    for (level_num, level) in levels.iter().enumerate() {
        info!(level = level_num, nodes = level.len(), "processing level");

        let results: Vec<(String, Result<RunReport>)> = level
            .par_iter()
            .map(|node_id| {
                let result = graph
                    .require(node_id)
                    .map_err(anyhow::Error::from)
                    .and_then(|node| {
                        run_single(graph, node, agent, checker, request, builder, workspace)
                    });
                (node_id.clone(), result)
            })
            .collect();

        let mut failures = Vec::new();
        for (node_id, result) in results {
            match result {
                Ok(report) => reports.push(report),
                Err(err) => failures.push(format!("{node_id}: {err:#}")),
            }
        }
        if !failures.is_empty() {
            bail!("parallel execution failed:\n{}", failures.join("\n"));
        }
    }

    Ok(reports)
}

/// One node's pipeline: bundle, budget gate, prompt, agent, parse, stage.
fn run_single(
    graph: &Graph,
    node: &Node,
    agent: &dyn Agent,
    checker: &(dyn SyntaxChecker + Sync),
    request: &str,
    builder: &BundleBuilder,
    workspace: &Mutex<Workspace>,
) -> Result<RunReport> {
    let bundle = builder.build(graph, node)?;

    if let Some(cap) = node.token_cap() {
        let tokens = bundle.estimate_tokens();
        if tokens > cap {
            return Err(anyhow!("exceeds token budget: {tokens} > {cap}"));
        }
    }

    let prompt = build_prompt(request, &bundle);
    debug!(
        node = %node.id,
        prompt_bytes = prompt.len(),
        prompt_tokens = token::estimate_prompt(request, bundle.estimate_tokens()),
        "calling agent"
    );
    let raw = agent.call(&prompt).context("agent call failed")?;

    let reply = parse_reply(&raw, &bundle.files, checker)?;
    if reply.files.is_empty() {
        debug!(node = %node.id, "no file changes");
        return Ok(RunReport {
            node_id: node.id.clone(),
            staged_files: 0,
            message: reply.message,
        });
    }

    let files: Vec<FileChange> = reply
        .files
        .into_iter()
        .map(|f| FileChange {
            path: f.path,
            content: f.content,
        })
        .collect();
    let staged_files = files.len();

    let mut ws = workspace.lock();
    ws.stage(node.id.clone(), files, reply.message);
    // A freshly re-considered node is no longer dirty.
    ws.clear_dirty(&node.id);
    ws.save()?;

    Ok(RunReport {
        node_id: node.id.clone(),
        staged_files,
        message: String::new(),
    })
}
