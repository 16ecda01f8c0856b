//! Bundle assembly: the concrete input for a single agent call.
//!
//! A bundle collects a node's source files, its dependencies' published
//! contracts, and the node metadata, plus a content hash and token estimate.
//! Bundles are pure functions of disk state, so a process-wide cache keyed by
//! node path and invalidated on the latest file mtime avoids redundant reads.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::SystemTime;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::core::graph::Graph;
use crate::core::node::{Node, NodeMeta};
use crate::core::token;

/// Directory names excluded from bundle collection.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "__pycache__",
    ".agentic",
    "build",
    "dist",
    "target",
];

/// Extensions of binary or generated files excluded from bundles.
const BINARY_EXTS: &[&str] = &[
    "exe", "dll", "so", "dylib", "o", "a", "lib", "png", "jpg", "jpeg", "gif", "ico", "pdf",
    "zip", "tar", "gz", "wasm", "pyc", "class",
];

struct CacheEntry {
    bundle: Arc<Bundle>,
    mtime: Option<SystemTime>,
}

static CACHE: LazyLock<RwLock<HashMap<String, CacheEntry>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// The assembled context for one agent call.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub node_id: String,
    /// Node directory relative to the repository root.
    pub node_path: String,
    /// Path (relative to repository root) -> content.
    pub files: BTreeMap<String, String>,
    /// `"depId/relpath"` -> contract file content.
    pub contracts: BTreeMap<String, String>,
    pub meta: Option<NodeMeta>,
    /// Total bytes across collected files.
    pub total_size: usize,
    /// First 16 hex chars of SHA-256 over the sorted `(path, content)` pairs.
    pub hash: String,
}

impl Bundle {
    /// An empty bundle shell, mainly useful for constructing test inputs.
    pub fn empty(node_id: impl Into<String>, node_path: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_path: node_path.into(),
            files: BTreeMap::new(),
            contracts: BTreeMap::new(),
            meta: None,
            total_size: 0,
            hash: String::new(),
        }
    }

    /// Estimate the token footprint of this bundle, including a 10% overhead
    /// for prompt formatting.
    pub fn estimate_tokens(&self) -> usize {
        let mut total = token::estimate_map(&self.files);
        total += token::estimate_map(&self.contracts);
        if let Some(meta) = &self.meta {
            total += token::estimate_str(&meta.purpose);
            total += token::estimate_all(meta.invariants.iter().map(String::as_str));
        }
        (total as f64 * 1.1) as usize
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, content) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update(content.as_bytes());
        }
        let digest = hasher.finalize();
        format!("{digest:x}")[..16].to_string()
    }
}

/// Builds bundles rooted at an explicit repository root.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    root: PathBuf,
}

impl BundleBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build (or fetch from cache) the bundle for a node.
    ///
    /// Two concurrent builders for the same key may race; either result is
    /// acceptable because a bundle is a pure function of disk state. Cache
    /// entries are immutable once inserted and replaced atomically.
    pub fn build(&self, graph: &Graph, node: &Node) -> Result<Arc<Bundle>> {
        let node_dir = self.root.join(&node.path);
        let cache_key = node_dir.display().to_string();

        let mtime = latest_mtime(&node_dir);
        {
            let cache = CACHE.read();
            if let Some(entry) = cache.get(&cache_key) {
                if mtime.is_some() && entry.mtime == mtime {
                    debug!(node = %node.id, "bundle cache hit");
                    return Ok(Arc::clone(&entry.bundle));
                }
            }
        }

        let bundle = Arc::new(self.assemble(graph, node, &node_dir)?);

        let mut cache = CACHE.write();
        cache.insert(
            cache_key,
            CacheEntry {
                bundle: Arc::clone(&bundle),
                mtime,
            },
        );
        Ok(bundle)
    }

    fn assemble(&self, graph: &Graph, node: &Node, node_dir: &Path) -> Result<Bundle> {
        let mut bundle = Bundle::empty(node.id.clone(), node.path.clone());
        bundle.meta = node.meta.clone();

        let walker = WalkDir::new(node_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && SKIP_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
            });
        for entry in walker {
            let entry =
                entry.with_context(|| format!("collect files under {}", node_dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if is_binary_ext(entry.path()) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let content = fs::read_to_string(entry.path())
                .with_context(|| format!("read {}", entry.path().display()))?;
            bundle.total_size += content.len();
            bundle.files.insert(rel, content);
        }

        for dep_id in &node.children {
            let dep = graph
                .get(dep_id)
                .with_context(|| format!("unresolved dependency {dep_id}"))?;
            let contracts_dir = self.root.join(&dep.path).join("CONTRACTS");
            if !contracts_dir.is_dir() {
                continue;
            }
            collect_contracts(&contracts_dir, dep_id, &mut bundle.contracts)
                .with_context(|| format!("collect contracts from {dep_id}"))?;
        }

        bundle.hash = bundle.compute_hash();
        debug!(
            node = %node.id,
            files = bundle.files.len(),
            contracts = bundle.contracts.len(),
            hash = %bundle.hash,
            "bundle assembled"
        );
        Ok(bundle)
    }
}

/// Drop the cache entry for a node directory.
pub fn invalidate_cache(node_dir: &Path) {
    CACHE.write().remove(&node_dir.display().to_string());
}

/// Number of cached bundles and their combined file bytes.
pub fn cache_stats() -> (usize, usize) {
    let cache = CACHE.read();
    let size = cache.values().map(|e| e.bundle.total_size).sum();
    (cache.len(), size)
}

/// The most recent modification time of any regular file under `dir`.
fn latest_mtime(dir: &Path) -> Option<SystemTime> {
    let mut latest = None;
    for entry in WalkDir::new(dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = meta.modified() else {
            continue;
        };
        if latest.map_or(true, |current| modified > current) {
            latest = Some(modified);
        }
    }
    latest
}

fn is_binary_ext(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            BINARY_EXTS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn collect_contracts(
    contracts_dir: &Path,
    dep_id: &str,
    out: &mut BTreeMap<String, String>,
) -> Result<()> {
    for entry in WalkDir::new(contracts_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", contracts_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(contracts_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let content = fs::read_to_string(entry.path())
            .with_context(|| format!("read {}", entry.path().display()))?;
        out.insert(format!("{dep_id}/{rel}"), content);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::parse_manifest;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    fn graph_from(text: &str, root: &Path) -> Graph {
        Graph::from_nodes(parse_manifest(text).expect("parse"), root.display().to_string())
            .expect("graph")
    }

    #[test]
    fn collects_files_keyed_relative_to_repo_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "src/api/a.go", "package api\n");
        write(root, "src/api/sub/b.go", "package sub\n");

        let graph = graph_from("L:api path=src/api deps=[] toks=1 ver=1", root);
        let builder = BundleBuilder::new(root);
        let bundle = builder.build(&graph, graph.get("api").unwrap()).expect("build");

        assert!(bundle.files.contains_key("src/api/a.go"));
        assert!(bundle.files.contains_key("src/api/sub/b.go"));
        assert_eq!(bundle.total_size, "package api\n".len() + "package sub\n".len());
        assert_eq!(bundle.hash.len(), 16);
    }

    #[test]
    fn skips_excluded_dirs_and_binary_extensions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "src/api/a.go", "package api\n");
        write(root, "src/api/.git/config", "noise");
        write(root, "src/api/node_modules/pkg/index.js", "noise");
        write(root, "src/api/logo.png", "noise");

        let graph = graph_from("L:api path=src/api deps=[] toks=1 ver=1", root);
        let builder = BundleBuilder::new(root);
        let bundle = builder.build(&graph, graph.get("api").unwrap()).expect("build");

        assert_eq!(bundle.files.len(), 1);
        assert!(bundle.files.contains_key("src/api/a.go"));
    }

    #[test]
    fn collects_dependency_contracts_with_dep_prefix() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "src/api/a.go", "package api\n");
        write(root, "src/utils/u.go", "package utils\n");
        write(root, "src/utils/CONTRACTS/utils.md", "# utils api\n");

        let graph = graph_from(
            "\
L:utils path=src/utils deps=[] toks=1 ver=1
C:api path=src/api deps=[utils] toks=1 ver=1
",
            root,
        );
        let builder = BundleBuilder::new(root);
        let bundle = builder.build(&graph, graph.get("api").unwrap()).expect("build");

        assert_eq!(
            bundle.contracts.get("utils/utils.md").map(String::as_str),
            Some("# utils api\n")
        );
        // The dependency's own sources are not part of this node's files.
        assert!(!bundle.files.contains_key("src/utils/u.go"));
    }

    #[test]
    fn hash_and_estimate_are_deterministic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "src/api/a.go", "package api\n");
        write(root, "src/api/b.go", "package api\n\nfunc B() {}\n");

        let graph = graph_from("L:api path=src/api deps=[] toks=1 ver=1", root);
        let builder = BundleBuilder::new(root);
        let node = graph.get("api").unwrap();

        invalidate_cache(&root.join("src/api"));
        let first = builder.build(&graph, node).expect("build");
        invalidate_cache(&root.join("src/api"));
        let second = builder.build(&graph, node).expect("build");

        assert_eq!(first.hash, second.hash);
        assert_eq!(first.estimate_tokens(), second.estimate_tokens());
    }

    #[test]
    fn unchanged_tree_hits_the_cache() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "src/api/a.go", "package api\n");

        let graph = graph_from("L:api path=src/api deps=[] toks=1 ver=1", root);
        let builder = BundleBuilder::new(root);
        let node = graph.get("api").unwrap();

        let first = builder.build(&graph, node).expect("build");
        let second = builder.build(&graph, node).expect("build");
        assert!(Arc::ptr_eq(&first, &second));

        invalidate_cache(&root.join("src/api"));
        let third = builder.build(&graph, node).expect("build");
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(first.hash, third.hash);
    }

    #[test]
    fn estimate_includes_meta_and_overhead() {
        let mut bundle = Bundle::empty("api", "src/api");
        bundle.files.insert("a".to_string(), "x".repeat(400));
        assert_eq!(bundle.estimate_tokens(), 110);

        let mut meta = NodeMeta::default();
        meta.purpose = "y".repeat(40);
        bundle.meta = Some(meta);
        assert_eq!(bundle.estimate_tokens(), 121);
    }
}
