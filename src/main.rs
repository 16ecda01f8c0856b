//! CLI entry point for the agentic orchestrator.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use agentic::{commands, logging, repl};

#[derive(Parser)]
#[command(
    name = "agentic",
    version,
    about = "Orchestrate a graph of focused nodes with pluggable agent backends"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize `.agentic/` and validate the manifest.
    Init {
        /// Scan conventional source roots and generate GRAPH.manifest.
        #[arg(long)]
        discover: bool,
    },
    /// Print the dependency tree.
    Graph,
    /// Print workspace status.
    Status,
    /// Run a task through the agent pipeline.
    Run {
        request: String,
        /// Target a single node instead of all leaves.
        #[arg(short, long)]
        node: Option<String>,
        /// Process independent nodes in parallel, level by level.
        #[arg(short = 'P', long)]
        parallel: bool,
    },
    /// Print the topological order of nodes a request would touch.
    Plan { request: String },
    /// Print staged file contents.
    Diff,
    /// Apply staged changes.
    Apply {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
        /// Skip running configured checks after apply.
        #[arg(long)]
        skip_checks: bool,
    },
    /// Reset the working tree to the last checkpoint.
    Rollback,
    /// Restore pre-images from the last apply.
    Undo,
    /// Set the current node context.
    Enter { node: String },
    /// Report whether a node exceeds its token budget.
    Split { node: String },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = std::env::current_dir()?;
    dispatch(cli, &root)
}

fn dispatch(cli: Cli, root: &PathBuf) -> Result<()> {
    match cli.command {
        Some(Command::Init { discover }) => commands::cmd_init(root, discover),
        Some(Command::Graph) => commands::cmd_graph(root),
        Some(Command::Status) => commands::cmd_status(root),
        Some(Command::Run {
            request,
            node,
            parallel,
        }) => commands::cmd_run(root, &request, node.as_deref(), parallel),
        Some(Command::Plan { request }) => commands::cmd_plan(root, &request),
        Some(Command::Diff) => commands::cmd_diff(root),
        Some(Command::Apply { yes, skip_checks }) => commands::cmd_apply(root, yes, skip_checks),
        Some(Command::Rollback) => commands::cmd_rollback(root),
        Some(Command::Undo) => commands::cmd_undo(root),
        Some(Command::Enter { node }) => commands::cmd_enter(root, &node),
        Some(Command::Split { node }) => commands::cmd_split(root, &node),
        None => {
            repl::start(root);
            Ok(())
        }
    }
}
