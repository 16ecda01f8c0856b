//! Policy evaluation against proposed changes.
//!
//! Rules are evaluated independently and aggregated: token budget and diff
//! scope produce error-severity violations that block an apply, while
//! public-contract changes are surfaced as warnings so the operator knows
//! dependents may need attention.

use std::collections::HashSet;
use std::fmt;

use globset::Glob;

use crate::core::node::Node;
use crate::core::token;
use crate::io::bundle::Bundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A single policy violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub policy: &'static str,
    pub severity: Severity,
    pub message: String,
}

/// Aggregated result of evaluating all policies for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyResult {
    pub passed: bool,
    pub violations: Vec<Violation>,
}

/// Evaluate token-budget, diff-scope, and contract-change rules for a node
/// against a diff describing the proposed changes.
pub fn evaluate(node: &Node, bundle: &Bundle, diff: &str) -> PolicyResult {
    let mut result = PolicyResult {
        passed: true,
        violations: Vec::new(),
    };

    if let Some(cap) = node.token_cap() {
        let tokens = bundle.estimate_tokens();
        if tokens > cap {
            result.passed = false;
            result.violations.push(Violation {
                policy: "token_budget",
                severity: Severity::Error,
                message: format!("token count {tokens} exceeds budget {cap}"),
            });
        }
    }

    if let Some(meta) = &node.meta {
        if !meta.policies.allowed_paths.is_empty() {
            for violation in check_diff_scope(diff, &meta.policies.allowed_paths, &node.path) {
                result.passed = false;
                result.violations.push(violation);
            }
        }

        for violation in check_contract_changes(diff, &meta.public_contract, &node.path) {
            if violation.severity == Severity::Error {
                result.passed = false;
            }
            result.violations.push(violation);
        }
    }

    result
}

/// Verify every changed file falls inside the node's allowed paths.
fn check_diff_scope(diff: &str, allowed_paths: &[String], node_path: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    let node_prefix = format!("{node_path}/");

    for file in extract_file_paths(diff) {
        let rel = file.strip_prefix(&node_prefix).unwrap_or(&file);
        let allowed = allowed_paths.iter().any(|pattern| match_path(rel, pattern));
        if !allowed {
            violations.push(Violation {
                policy: "diff_scope",
                severity: Severity::Error,
                message: format!("file {file} is outside allowed paths: {allowed_paths:?}"),
            });
        }
    }

    violations
}

/// Extract changed file paths from the `+++` headers of a unified diff.
///
/// The `b/` prefix is stripped, `/dev/null` (a deletion target) is excluded,
/// and duplicates are dropped.
pub fn extract_file_paths(diff: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut seen = HashSet::new();

    for line in diff.lines() {
        let Some(rest) = line.strip_prefix("+++ ") else {
            continue;
        };
        let path = rest.strip_prefix("b/").unwrap_or(rest);
        if path == "/dev/null" {
            continue;
        }
        if seen.insert(path.to_string()) {
            paths.push(path.to_string());
        }
    }

    paths
}

/// Check a file path against an allowed-path pattern.
///
/// A trailing `/` means directory prefix; otherwise glob matching is tried
/// first and plain prefix matching is the fallback.
pub fn match_path(file: &str, pattern: &str) -> bool {
    if let Some(dir) = pattern.strip_suffix('/') {
        return file.starts_with(pattern) || file.starts_with(dir);
    }

    if let Ok(glob) = Glob::new(pattern) {
        if glob.compile_matcher().is_match(file) {
            return true;
        }
    }

    file.starts_with(pattern)
}

/// Warn when a changed path touches a declared public contract. Patterns are
/// node-relative, like allowed paths.
fn check_contract_changes(diff: &str, public_contract: &[String], node_path: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    if public_contract.is_empty() {
        return violations;
    }

    let node_prefix = format!("{node_path}/");
    for file in extract_file_paths(diff) {
        let rel = file.strip_prefix(&node_prefix).unwrap_or(&file);
        for pattern in public_contract {
            if match_path(rel, pattern) {
                violations.push(Violation {
                    policy: "contract_change",
                    severity: Severity::Warning,
                    message: format!(
                        "public contract file modified: {file}. This may require updating dependents."
                    ),
                });
            }
        }
    }

    violations
}

/// Whether a node's bundle exceeds its effective budget and should be split.
///
/// The effective budget is the node's own cap when set, otherwise the default
/// model class budget.
pub fn should_split(node: &Node, bundle: &Bundle) -> bool {
    let available = node
        .token_cap()
        .unwrap_or_else(|| token::budget_for("default").available);
    bundle.estimate_tokens() > available
}

/// Synthesize a minimal unified-diff header block from staged file paths so
/// the scope and contract rules can evaluate staged changes.
pub fn diff_from_paths<'a, I: IntoIterator<Item = &'a str>>(paths: I) -> String {
    let mut out = String::new();
    for path in paths {
        out.push_str(&format!("--- a/{path}\n+++ b/{path}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::{Node, NodeKind, NodeMeta};
    use crate::io::bundle::Bundle;

    fn node_with_meta(path: &str, meta: NodeMeta) -> Node {
        let mut node = Node::declared("api", NodeKind::Leaf, path);
        node.meta = Some(meta);
        node
    }

    fn bundle_with_content(content: &str) -> Bundle {
        let mut bundle = Bundle::empty("api", "src/api");
        bundle
            .files
            .insert("src/api/a.go".to_string(), content.to_string());
        bundle
    }

    #[test]
    fn extracts_paths_and_skips_dev_null() {
        let diff = "\
--- a/src/api/a.go
+++ b/src/api/a.go
--- a/src/api/gone.go
+++ /dev/null
+++ b/src/api/a.go
+++ other/raw.go
";
        assert_eq!(extract_file_paths(diff), vec!["src/api/a.go", "other/raw.go"]);
    }

    #[test]
    fn match_path_handles_dir_glob_and_prefix() {
        assert!(match_path("SRC/handlers.go", "SRC/"));
        assert!(match_path("SRC", "SRC/"));
        assert!(match_path("a/b/c.go", "a/**"));
        assert!(match_path("main.go", "*.go"));
        assert!(match_path("main.go.bak", "main.go"));
        assert!(!match_path("other/file.go", "SRC/"));
    }

    #[test]
    fn out_of_scope_file_is_an_error_violation() {
        let mut meta = NodeMeta::default();
        meta.policies.allowed_paths = vec!["src/api/**".to_string()];
        let node = node_with_meta("src/api", meta);
        let bundle = bundle_with_content("package api");

        let diff = diff_from_paths(["src/other/z.go"]);
        let result = evaluate(&node, &bundle, &diff);
        assert!(!result.passed);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].policy, "diff_scope");
        assert_eq!(result.violations[0].severity, Severity::Error);
        assert!(result.violations[0].message.contains("src/other/z.go"));
    }

    #[test]
    fn in_scope_file_passes() {
        let mut meta = NodeMeta::default();
        meta.policies.allowed_paths = vec!["SRC/".to_string()];
        let node = node_with_meta("src/api", meta);
        let bundle = bundle_with_content("package api");

        let diff = diff_from_paths(["src/api/SRC/handlers.go"]);
        let result = evaluate(&node, &bundle, &diff);
        assert!(result.passed, "violations: {:?}", result.violations);
    }

    #[test]
    fn token_budget_violation_is_error() {
        let mut meta = NodeMeta::default();
        meta.budgets.token_cap = 1;
        let node = node_with_meta("src/api", meta);
        let bundle = bundle_with_content("a lot of content that exceeds one token for sure");

        let result = evaluate(&node, &bundle, "");
        assert!(!result.passed);
        assert_eq!(result.violations[0].policy, "token_budget");
    }

    #[test]
    fn zero_or_absent_cap_skips_budget_check() {
        let node = node_with_meta("src/api", NodeMeta::default());
        let bundle = bundle_with_content("plenty of content here");
        assert!(evaluate(&node, &bundle, "").passed);

        let mut bare = Node::declared("api", NodeKind::Leaf, "src/api");
        bare.meta = None;
        assert!(evaluate(&bare, &bundle, "").passed);
    }

    #[test]
    fn contract_change_warns_but_passes() {
        let mut meta = NodeMeta::default();
        meta.public_contract = vec!["CONTRACTS/*.md".to_string()];
        let node = node_with_meta("src/api", meta);
        let bundle = bundle_with_content("package api");

        let diff = diff_from_paths(["src/api/CONTRACTS/api.md"]);
        let result = evaluate(&node, &bundle, &diff);
        assert!(result.passed);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].policy, "contract_change");
        assert_eq!(result.violations[0].severity, Severity::Warning);
    }

    #[test]
    fn should_split_uses_default_budget_without_cap() {
        let node = Node::declared("api", NodeKind::Leaf, "src/api");
        let small = bundle_with_content("tiny");
        assert!(!should_split(&node, &small));

        let mut meta = NodeMeta::default();
        meta.budgets.token_cap = 2;
        let capped = node_with_meta("src/api", meta);
        let big = bundle_with_content("content well beyond two tokens");
        assert!(should_split(&capped, &big));
    }
}
