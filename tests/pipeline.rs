//! End-to-end pipeline tests driving the library with scripted agents:
//! run -> stage -> apply -> undo, serially and level-parallel.

use std::fs;
use std::path::Path;

use agentic::core::graph::Graph;
use agentic::core::manifest::parse_manifest;
use agentic::core::reply::NullChecker;
use agentic::io::bundle::BundleBuilder;
use agentic::io::config::AgenticConfig;
use agentic::io::loader::load_graph;
use agentic::io::workspace::Workspace;
use agentic::orchestrator::run_task;
use agentic::test_support::ScriptedAgent;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
    fs::write(path, content).expect("write");
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).expect("read")
}

fn quiet_config() -> AgenticConfig {
    AgenticConfig {
        build_validation: Vec::new(),
        ..AgenticConfig::default()
    }
}

fn reply_writing(path: &str, content: &str) -> String {
    format!("=== FILE: {path} ===\n{content}\n=== END FILE ===\n")
}

#[test]
fn run_stage_apply_undo_round_trip() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    write(root, "GRAPH.manifest", "L:api path=src/api deps=[] toks=1000 ver=1\n");
    write(root, "src/api/foo.go", "A");

    let graph = load_graph(&root.join("GRAPH.manifest")).expect("load graph");
    let agent = ScriptedAgent::new([reply_writing("src/api/foo.go", "B")]);

    // Run: the reply is staged, the tree is untouched.
    let reports = run_task(root, &graph, &agent, &NullChecker, "change A to B", None, false)
        .expect("run");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].staged_files, 1);
    assert_eq!(read(root, "src/api/foo.go"), "A");

    // The prompt carried the strict envelope, the request, and the file.
    let prompts = agent.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("=== FILE: path/to/file.go ==="));
    assert!(prompts[0].contains("change A to B"));
    assert!(prompts[0].contains("--- src/api/foo.go ---"));

    // Apply: the staged bytes land on disk and the staged set clears.
    let mut ws = Workspace::load(root).expect("load workspace");
    let builder = BundleBuilder::new(root);
    let outcome = ws
        .apply(&graph, &builder, &NullChecker, &quiet_config(), true)
        .expect("apply");
    assert_eq!(outcome.applied, vec!["api"]);
    assert_eq!(read(root, "src/api/foo.go"), "B");
    assert!(ws.staged.is_empty());

    // Undo: pre-images restore byte-for-byte, and a second undo fails.
    ws.undo().expect("undo");
    assert_eq!(read(root, "src/api/foo.go"), "A");
    let err = ws.undo().unwrap_err();
    assert!(err.to_string().contains("no changes to undo"));
}

#[test]
fn parallel_levels_respect_dependency_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    write(
        root,
        "GRAPH.manifest",
        "\
L:utils path=src/utils deps=[] toks=1000 ver=1
L:api path=src/api deps=[utils] toks=1000 ver=1
",
    );
    write(root, "src/utils/u.go", "package utils\n");
    write(root, "src/api/a.go", "package api\n");

    let graph = load_graph(&root.join("GRAPH.manifest")).expect("load graph");
    // utils sits in level 0, api in level 1, so the scripted order is fixed.
    let agent = ScriptedAgent::new([
        reply_writing("src/utils/u.go", "package utils // v2"),
        reply_writing("src/api/a.go", "package api // v2"),
    ]);

    let reports = run_task(root, &graph, &agent, &NullChecker, "req", None, true).expect("run");
    assert_eq!(reports.len(), 2);

    let ws = Workspace::load(root).expect("load workspace");
    assert_eq!(ws.staged["utils"].files[0].content, "package utils // v2");
    assert_eq!(ws.staged["api"].files[0].content, "package api // v2");

    let prompts = agent.prompts();
    assert!(prompts[0].contains("src/utils/u.go"));
    assert!(prompts[1].contains("src/api/a.go"));
}

#[test]
fn dependency_contracts_reach_dependent_bundles() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    write(
        root,
        "GRAPH.manifest",
        "\
L:utils path=src/utils deps=[] toks=1000 ver=1
C:api path=src/api deps=[utils] toks=1000 ver=1
",
    );
    write(root, "src/utils/u.go", "package utils\n");
    write(root, "src/utils/CONTRACTS/utils.md", "Exported: Clamp(int) int\n");
    write(root, "src/api/a.go", "package api\n");

    let graph = load_graph(&root.join("GRAPH.manifest")).expect("load graph");
    let builder = BundleBuilder::new(root);
    let bundle = builder
        .build(&graph, graph.get("api").expect("api"))
        .expect("bundle");

    assert_eq!(
        bundle.contracts.get("utils/utils.md").map(String::as_str),
        Some("Exported: Clamp(int) int\n")
    );
}

#[test]
fn apply_is_gated_by_node_policies_end_to_end() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    write(root, "GRAPH.manifest", "L:api path=src/api deps=[] toks=1000 ver=1\n");
    write(root, "src/api/a.go", "package api\n");
    write(
        root,
        "src/api/NODE.meta.yaml",
        "policies:\n  allowed_paths:\n    - src/api/**\n",
    );

    let graph = load_graph(&root.join("GRAPH.manifest")).expect("load graph");
    let agent = ScriptedAgent::new([reply_writing("src/rogue/z.go", "package rogue")]);
    run_task(root, &graph, &agent, &NullChecker, "req", None, false).expect("run stages");

    let mut ws = Workspace::load(root).expect("load workspace");
    let builder = BundleBuilder::new(root);
    let err = ws
        .apply(&graph, &builder, &NullChecker, &quiet_config(), true)
        .unwrap_err();
    assert!(err.to_string().contains("src/rogue/z.go"));
    assert!(!root.join("src/rogue/z.go").exists());
    assert_eq!(ws.staged.len(), 1, "staged set survives the aborted apply");
}

#[test]
fn checkpoint_and_rollback_restore_committed_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    write(root, "GRAPH.manifest", "L:api path=src/api deps=[] toks=1000 ver=1\n");
    write(root, "src/api/foo.go", "A");
    init_git_repo(root);

    let graph = load_graph(&root.join("GRAPH.manifest")).expect("load graph");
    let builder = BundleBuilder::new(root);

    let mut ws = Workspace::load(root).expect("load workspace");
    ws.stage(
        "api",
        vec![agentic::io::workspace::FileChange {
            path: "src/api/foo.go".to_string(),
            content: "B".to_string(),
        }],
        String::new(),
    );
    ws.apply(&graph, &builder, &NullChecker, &quiet_config(), true)
        .expect("apply");
    assert_eq!(ws.checkpoints.len(), 1, "apply records a checkpoint");
    assert_eq!(read(root, "src/api/foo.go"), "B");

    let checkpoint = ws.rollback().expect("rollback");
    assert_eq!(checkpoint.id, "cp-1");
    assert_eq!(read(root, "src/api/foo.go"), "A");
    assert!(ws.checkpoints.is_empty());
}

fn init_git_repo(root: &Path) {
    use std::process::Command;

    let run = |args: &[&str]| {
        let status = Command::new("git")
            .args(args)
            .current_dir(root)
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed");
    };
    run(&["init"]);
    run(&["config", "user.email", "test@example.com"]);
    run(&["config", "user.name", "test"]);
    run(&["add", "-A"]);
    run(&["commit", "-m", "initial state"]);
}

#[test]
fn manifest_graph_load_matches_direct_parse() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    let text = "L:a path=src/a deps=[] toks=5 ver=1\nC:b path=src/b deps=[a] toks=9 ver=2\n";
    write(root, "GRAPH.manifest", text);
    fs::create_dir_all(root.join("src/a")).expect("mkdir");
    fs::create_dir_all(root.join("src/b")).expect("mkdir");

    let loaded = load_graph(&root.join("GRAPH.manifest")).expect("load");
    let parsed = Graph::from_nodes(parse_manifest(text).expect("parse"), "x").expect("graph");

    assert_eq!(loaded.order(), parsed.order());
    assert_eq!(
        loaded.get("b").map(|n| n.deps.clone()),
        parsed.get("b").map(|n| n.deps.clone())
    );
}
