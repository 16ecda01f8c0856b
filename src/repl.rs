//! Interactive mode: a thin line-reader over the public commands.

use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::commands;

const HELP: &str = "\
Commands:
  graph              show the dependency graph
  status             show workspace status
  enter <node>       set the current node context
  leave              return to the root context
  request <text>     run a task against the current node (alias: req, run)
  plan <text>        show the execution plan
  diff               show staged changes
  apply              apply staged changes
  rollback           reset to the last checkpoint
  undo               restore pre-images from the last apply
  help               show this help (alias: ?)
  quit               exit (alias: exit, q)";

/// Run the interactive prompt loop until EOF or `quit`.
pub fn start(root: &Path) {
    println!("Agentic Interactive Mode");
    println!("========================");
    println!("Commands: graph, enter <node>, request <text>, plan, run, diff, apply, rollback, undo, status, quit");
    println!();

    let stdin = io::stdin();
    let mut current_node: Option<String> = None;

    loop {
        match &current_node {
            Some(node) => print!("agentic:{node}> "),
            None => print!("agentic> "),
        }
        io::stdout().flush().ok();

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let result = match cmd {
            "quit" | "exit" | "q" => {
                println!("Goodbye!");
                return;
            }
            "help" | "?" => {
                println!("{HELP}");
                Ok(())
            }
            "graph" => commands::cmd_graph(root),
            "status" => commands::cmd_status(root),
            "enter" => match args.first() {
                Some(node) => {
                    let result = commands::cmd_enter(root, node);
                    if result.is_ok() {
                        current_node = Some(node.to_string());
                    }
                    result
                }
                None => {
                    println!("Usage: enter <node>");
                    Ok(())
                }
            },
            "leave" => {
                current_node = None;
                println!("Returned to root");
                Ok(())
            }
            "request" | "req" | "run" => {
                if args.is_empty() {
                    println!("Usage: {cmd} <text>");
                    Ok(())
                } else {
                    let request = args.join(" ");
                    commands::cmd_run(root, &request, current_node.as_deref(), false)
                }
            }
            "plan" => {
                if args.is_empty() {
                    println!("Usage: plan <text>");
                    Ok(())
                } else {
                    let request = args.join(" ");
                    commands::cmd_plan(root, &request)
                }
            }
            "diff" => commands::cmd_diff(root),
            "apply" => commands::cmd_apply(root, false, false),
            "rollback" => commands::cmd_rollback(root),
            "undo" => commands::cmd_undo(root),
            other => {
                println!("Unknown command: {other}. Type 'help' for a list.");
                Ok(())
            }
        };

        if let Err(err) = result {
            println!("Error: {err:#}");
        }
    }
}
