//! Graph loading: manifest parsing, nested-manifest flattening, and
//! per-node metadata.
//!
//! Composite nodes may carry their own `GRAPH.manifest`; nested declarations
//! are flattened into the parent table with dot-qualified ids
//! (`parent.child`) and paths joined onto the parent's directory, so the
//! whole layered graph resolves and sorts as one flat table.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::graph::Graph;
use crate::core::manifest::parse_manifest;
use crate::core::node::{Node, NodeKind, NodeMeta};

const MANIFEST_NAME: &str = "GRAPH.manifest";
const META_NAME: &str = "NODE.meta.yaml";

/// Load and validate the graph rooted at a manifest file.
pub fn load_graph(manifest_path: &Path) -> Result<Graph> {
    let root_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let mut nodes = collect_nodes(manifest_path, root_dir, None, "")?;
    for node in &mut nodes {
        node.meta = load_meta(root_dir, &node.path)?;
    }

    let graph = Graph::from_nodes(nodes, root_dir.display().to_string())
        .with_context(|| format!("validate {}", manifest_path.display()))?;
    debug!(nodes = graph.len(), root = %graph.root_path, "graph loaded");
    Ok(graph)
}

/// Parse one manifest, qualifying nested declarations with the parent id and
/// path, and recursing into composite nodes that carry their own manifest.
fn collect_nodes(
    manifest_path: &Path,
    root_dir: &Path,
    prefix: Option<&str>,
    base_path: &str,
) -> Result<Vec<Node>> {
    let text = fs::read_to_string(manifest_path)
        .with_context(|| format!("read manifest {}", manifest_path.display()))?;
    let declared =
        parse_manifest(&text).with_context(|| format!("parse {}", manifest_path.display()))?;
    let local_ids: HashSet<String> = declared.iter().map(|n| n.id.clone()).collect();

    let mut out = Vec::new();
    for mut node in declared {
        let qualified_id = match prefix {
            Some(p) => format!("{p}.{}", node.id),
            None => node.id.clone(),
        };
        let qualified_path = if base_path.is_empty() {
            node.path.clone()
        } else {
            format!("{base_path}/{}", node.path)
        };

        // Sibling references inside a nested manifest are rewritten with the
        // same prefix; anything else is left for the flat table to resolve.
        if let Some(p) = prefix {
            node.deps = node
                .deps
                .into_iter()
                .map(|dep| {
                    if local_ids.contains(&dep) {
                        format!("{p}.{dep}")
                    } else {
                        dep
                    }
                })
                .collect();
        }

        node.id = qualified_id;
        node.path = qualified_path;

        let nested_manifest = root_dir.join(&node.path).join(MANIFEST_NAME);
        let is_composite = node.kind == NodeKind::Composite;
        let nested_id = node.id.clone();
        let nested_path = node.path.clone();
        out.push(node);

        if is_composite && nested_manifest.is_file() {
            debug!(node = %nested_id, "loading nested manifest");
            out.extend(collect_nodes(
                &nested_manifest,
                root_dir,
                Some(&nested_id),
                &nested_path,
            )?);
        }
    }

    Ok(out)
}

/// Load `NODE.meta.yaml` from a node directory; metadata is optional.
fn load_meta(root_dir: &Path, node_path: &str) -> Result<Option<NodeMeta>> {
    let meta_path = root_dir.join(node_path).join(META_NAME);
    if !meta_path.is_file() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(&meta_path).with_context(|| format!("read {}", meta_path.display()))?;
    let meta: NodeMeta = serde_yaml::from_str(&contents)
        .with_context(|| format!("parse {}", meta_path.display()))?;
    Ok(Some(meta))
}
