//! Parsing and serialization for the compact `GRAPH.manifest` format.
//!
//! One declaration per non-empty, non-`#` line:
//!
//! ```text
//! L:utils path=src/utils deps=[] toks=2000 ver=1
//! C:api   path=src/api   deps=[utils,models] toks=50000 ver=1
//! ```
//!
//! Keys may appear in any order after the leading `KIND:id`; unknown keys are
//! ignored so older binaries can read newer manifests.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::core::node::{Node, NodeKind};

static HEAD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([LC]):(\S+)").unwrap());
static KV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)=(\[[^\]]*\]|\S+)").unwrap());

/// A manifest line that could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}: {reason}")]
pub struct ManifestMalformed {
    /// 1-based line number within the manifest.
    pub line: usize,
    pub reason: String,
}

/// Parse manifest text into declared nodes.
///
/// Nodes are returned in declaration order. A duplicate id keeps its first
/// occurrence; later declarations of the same id are dropped.
pub fn parse_manifest(text: &str) -> Result<Vec<Node>, ManifestMalformed> {
    let mut nodes: Vec<Node> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let node = parse_line(line).map_err(|reason| ManifestMalformed {
            line: idx + 1,
            reason,
        })?;
        if nodes.iter().any(|n| n.id == node.id) {
            continue;
        }
        nodes.push(node);
    }

    Ok(nodes)
}

fn parse_line(line: &str) -> Result<Node, String> {
    let head = HEAD_RE
        .captures(line)
        .ok_or_else(|| "invalid format: expected L:id or C:id".to_string())?;
    let kind = match &head[1] {
        "L" => NodeKind::Leaf,
        _ => NodeKind::Composite,
    };
    let id = head[2].to_string();

    let mut node = Node::declared(id, kind, "");
    for caps in KV_RE.captures_iter(line) {
        let key = &caps[1];
        let value = &caps[2];
        match key {
            "path" => node.path = value.to_string(),
            "deps" => node.deps = parse_list(value),
            "toks" => {
                if let Ok(n) = value.parse() {
                    node.tokens = n;
                }
            }
            "ver" => {
                if let Ok(n) = value.parse() {
                    node.version = n;
                }
            }
            "contract" => node.contract_hash = Some(value.to_string()),
            "bundle" => node.bundle_hash = Some(value.to_string()),
            "manifest" => node.manifest_hash = Some(value.to_string()),
            _ => {}
        }
    }

    if node.path.is_empty() {
        return Err(format!("missing path for node {}", node.id));
    }

    Ok(node)
}

/// Parse a bracket-enclosed list: `[a,b,c]` or `[]`. Whitespace around commas
/// is tolerated.
fn parse_list(s: &str) -> Vec<String> {
    let inner = s.trim_start_matches('[').trim_end_matches(']');
    inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Serialize a node back into its manifest line.
pub fn format_node(node: &Node) -> String {
    let mut parts = vec![format!("{}:{}", node.kind.as_str(), node.id)];

    parts.push(format!("path={}", node.path));

    let deps = if node.deps.is_empty() {
        "[]".to_string()
    } else {
        format!("[{}]", node.deps.join(","))
    };
    parts.push(format!("deps={deps}"));

    parts.push(format!("toks={}", node.tokens));

    match node.kind {
        NodeKind::Leaf => {
            if let Some(hash) = &node.contract_hash {
                parts.push(format!("contract={hash}"));
            }
            if let Some(hash) = &node.bundle_hash {
                parts.push(format!("bundle={hash}"));
            }
        }
        NodeKind::Composite => {
            if let Some(hash) = &node.manifest_hash {
                parts.push(format!("manifest={hash}"));
            }
        }
    }

    parts.push(format!("ver={}", node.version));
    parts.join(" ")
}

/// Serialize nodes into manifest text, one line per node.
pub fn format_manifest(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        out.push_str(&format_node(node));
        out.push('\n');
    }
    out
}
