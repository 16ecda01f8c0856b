//! Command bodies shared by the clap dispatch and the REPL.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::graph::Graph;
use crate::core::node::NodeKind;
use crate::core::policy;
use crate::core::token;
use crate::io::agent;
use crate::io::bundle::BundleBuilder;
use crate::io::config::load_config;
use crate::io::discover::{discover_packages, render_manifest, GoImportScanner, ImportScanner};
use crate::io::layout::AgenticPaths;
use crate::io::loader::load_graph;
use crate::io::syntax::GofmtChecker;
use crate::io::workspace::Workspace;
use crate::orchestrator::run_task;

fn load_project_graph(root: &Path) -> Result<Graph> {
    let paths = AgenticPaths::new(root);
    load_graph(&paths.manifest_path)
}

/// `init [--discover]`: create `.agentic/` and validate (or generate) the
/// manifest.
pub fn cmd_init(root: &Path, discover: bool) -> Result<()> {
    println!("Initializing agentic...");
    let paths = AgenticPaths::new(root);
    paths.ensure_state_dir()?;

    if discover {
        println!("Discovering packages...");
        let scanner = GoImportScanner::from_root(root);
        let scanner_ref = scanner.as_ref().map(|s| s as &dyn ImportScanner);
        let packages = discover_packages(root, scanner_ref).context("discovery failed")?;
        fs::write(&paths.manifest_path, render_manifest(&packages))
            .with_context(|| format!("write {}", paths.manifest_path.display()))?;
        println!("Generated GRAPH.manifest ({} packages)", packages.len());
    }

    if paths.manifest_path.exists() {
        println!("Found existing GRAPH.manifest, validating...");
        let graph = load_graph(&paths.manifest_path).context("invalid GRAPH.manifest")?;
        println!("Graph loaded: {} nodes", graph.len());
    } else if !discover {
        println!("No GRAPH.manifest found. Create one to define your project structure.");
    }

    println!("Initialization complete.");
    Ok(())
}

/// `graph`: print the dependency tree.
pub fn cmd_graph(root: &Path) -> Result<()> {
    let graph = load_project_graph(root)?;
    println!("Dependency Graph:");
    println!("=================");
    print!("{}", graph.render_tree());
    Ok(())
}

/// `status`: print workspace status.
pub fn cmd_status(root: &Path) -> Result<()> {
    let ws = Workspace::load(root)?;
    print!("{}", ws.status_report());
    Ok(())
}

/// `run <request> [-n node] [-P]`: execute the orchestrator pipeline.
pub fn cmd_run(root: &Path, request: &str, node: Option<&str>, parallel: bool) -> Result<()> {
    println!("Running task: {request}");
    if let Some(node) = node {
        println!("Target node: {node}");
    }

    let graph = load_project_graph(root)?;
    let paths = AgenticPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let agent = agent::from_env(root, &cfg)?;

    let reports = run_task(
        root,
        &graph,
        agent.as_ref(),
        &GofmtChecker,
        request,
        node,
        parallel,
    )?;

    let (cached, cached_bytes) = crate::io::bundle::cache_stats();
    tracing::debug!(cached, cached_bytes, "bundle cache after run");

    for report in &reports {
        if report.staged_files > 0 {
            println!(
                "Changes staged for node: {} ({} files)",
                report.node_id, report.staged_files
            );
        } else {
            println!("No file changes for node: {}", report.node_id);
            if !report.message.is_empty() {
                println!("Message: {}", report.message);
            }
        }
    }

    println!("\nUse 'agentic diff' to review changes, 'agentic apply' to apply them.");
    Ok(())
}

/// `plan <request>`: print the topological order of affected nodes.
pub fn cmd_plan(root: &Path, request: &str) -> Result<()> {
    println!("Planning: {request}");
    let graph = load_project_graph(root)?;

    println!("\nExecution plan:");
    for (i, node) in graph.topological_sort()?.iter().enumerate() {
        let kind = match node.kind {
            NodeKind::Leaf => "leaf",
            NodeKind::Composite => "composite",
        };
        println!("  {}. [{}] {}", i + 1, kind, node.id);
    }
    Ok(())
}

/// `diff`: print staged changes.
pub fn cmd_diff(root: &Path) -> Result<()> {
    let ws = Workspace::load(root)?;
    print!("{}", ws.diff_report());
    Ok(())
}

/// `apply [-y] [--skip-checks]`: policy-gate and write staged changes.
pub fn cmd_apply(root: &Path, yes: bool, skip_checks: bool) -> Result<()> {
    let mut ws = Workspace::load(root)?;
    if ws.staged.is_empty() {
        println!("No staged changes to apply.");
        return Ok(());
    }

    let total_files: usize = ws.staged.values().map(|c| c.files.len()).sum();
    if !yes {
        print!(
            "Apply {total_files} file(s) across {} node(s)? [y/N] ",
            ws.staged.len()
        );
        io::stdout().flush().ok();
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer).ok();
        let answer = answer.trim();
        if answer != "y" && answer != "Y" {
            println!("Aborted.");
            return Ok(());
        }
    }

    let graph = load_project_graph(root)?;
    let paths = AgenticPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let builder = BundleBuilder::new(root);

    let outcome = ws.apply(&graph, &builder, &GofmtChecker, &cfg, skip_checks)?;

    for warning in &outcome.warnings {
        println!("Warning [{}]: {}", warning.policy, warning.message);
    }
    if let Some(warning) = &outcome.checkpoint_warning {
        println!("Warning: {warning}");
    }
    for path in &outcome.files_written {
        println!("  Wrote: {path}");
    }
    println!("Changes applied successfully.");

    if let Some(output) = &outcome.build_failure {
        println!("Build validation failed:\n{output}");
        println!("Changes have been written. Use 'undo' or 'rollback' to revert if needed.");
    }

    // Contract drift fans out to dependents: mark them dirty so later runs
    // know they may need re-consideration.
    if !outcome.contract_drift.is_empty() {
        for node_id in &outcome.contract_drift {
            println!("Contract changed for node: {node_id}");
            for dependent in graph.reverse_deps(node_id) {
                ws.mark_dirty(
                    dependent.id.clone(),
                    format!("dependency {node_id} contract changed"),
                );
            }
        }
        ws.save()?;
    }

    if !outcome.check_failures.is_empty() {
        for failure in &outcome.check_failures {
            println!("Warning [checks]: {failure}");
        }
    } else if !skip_checks {
        println!("All checks passed!");
    }

    Ok(())
}

/// `rollback`: reset the working tree to the most recent checkpoint.
pub fn cmd_rollback(root: &Path) -> Result<()> {
    let mut ws = Workspace::load(root)?;
    let checkpoint = ws.rollback()?;
    println!("Rolled back to checkpoint: {}", checkpoint.id);
    println!("Rollback complete.");
    Ok(())
}

/// `undo`: restore pre-images from the last apply.
pub fn cmd_undo(root: &Path) -> Result<()> {
    let mut ws = Workspace::load(root)?;
    let restored = ws.undo()?;
    for path in &restored {
        println!("  Restored: {path}");
    }
    println!("Undo complete.");
    Ok(())
}

/// `enter <node>`: set the current node context.
pub fn cmd_enter(root: &Path, node_id: &str) -> Result<()> {
    let graph = load_project_graph(root)?;
    let node = graph.require(node_id)?;

    let mut ws = Workspace::load(root)?;
    ws.current_node = Some(node_id.to_string());
    ws.save()?;

    println!("Entered node: {node_id}");
    if node.kind == NodeKind::Composite {
        println!("This is a composite node with a nested subgraph at: {}", node.path);
    }
    Ok(())
}

/// `split <node>`: report whether a node exceeds its budget and which files
/// dominate it.
pub fn cmd_split(root: &Path, node_id: &str) -> Result<()> {
    println!("Split protocol for node: {node_id}");

    let graph = load_project_graph(root)?;
    let node = graph.require(node_id)?;
    let builder = BundleBuilder::new(root);
    let bundle = builder.build(&graph, node)?;

    let total_tokens = bundle.estimate_tokens();
    println!("\nBundle tokens: {total_tokens}");
    if let Some(cap) = node.token_cap() {
        println!("Token budget:  {cap}");
    }

    if policy::should_split(node, &bundle) {
        if let Some(cap) = node.token_cap() {
            println!("\nNode exceeds token budget by {} tokens.", total_tokens - cap);
        }
        println!("\nFiles by token count:");

        let mut files: Vec<(usize, &str)> = bundle
            .files
            .iter()
            .map(|(path, content)| (token::estimate_str(content), path.as_str()))
            .collect();
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        for (tokens, path) in files {
            println!("  {tokens:6}  {path}");
        }

        println!("\nConsider splitting this node into smaller sub-nodes.");
    } else {
        println!("\nNode is within token budget. No split required.");
    }

    Ok(())
}
