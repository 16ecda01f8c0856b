//! Package discovery for `init --discover`.
//!
//! Scans the conventional source roots (`internal/`, `nodes/`) for packages,
//! estimates their token budgets from file sizes, and discovers dependencies
//! through the [`ImportScanner`] seam. The generated manifest declares every
//! package as a leaf, dependencies first.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tracing::debug;

use crate::core::manifest::format_node;
use crate::core::node::{Node, NodeKind};

const SCAN_ROOTS: &[&str] = &["internal", "nodes"];

/// Language-specific import discovery. Given a package's source files, return
/// the ids of sibling packages it imports.
pub trait ImportScanner {
    fn scan(&self, files: &[PathBuf]) -> Result<Vec<String>>;
}

/// Import scanner for Go modules: matches `<module>/internal/<pkg>` and
/// `<module>/nodes/<pkg>` import paths.
pub struct GoImportScanner {
    internal_re: Regex,
    nodes_re: Regex,
}

impl GoImportScanner {
    pub fn new(module: &str) -> Self {
        let escaped = regex::escape(module);
        Self {
            internal_re: Regex::new(&format!(r#""{escaped}/internal/([^"/]+)"#)).unwrap(),
            nodes_re: Regex::new(&format!(r#""{escaped}/nodes/([^"/]+)"#)).unwrap(),
        }
    }

    /// Build a scanner from the module path declared in `<root>/go.mod`.
    pub fn from_root(root: &Path) -> Option<Self> {
        let contents = fs::read_to_string(root.join("go.mod")).ok()?;
        let module = contents
            .lines()
            .find_map(|line| line.trim().strip_prefix("module "))?
            .trim()
            .to_string();
        Some(Self::new(&module))
    }
}

impl ImportScanner for GoImportScanner {
    fn scan(&self, files: &[PathBuf]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut deps = Vec::new();
        for file in files {
            let content = fs::read_to_string(file)
                .with_context(|| format!("read {}", file.display()))?;
            for re in [&self.internal_re, &self.nodes_re] {
                for caps in re.captures_iter(&content) {
                    let pkg = caps[1].to_string();
                    if seen.insert(pkg.clone()) {
                        deps.push(pkg);
                    }
                }
            }
        }
        Ok(deps)
    }
}

/// A package found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPackage {
    pub id: String,
    /// Directory relative to the repository root.
    pub path: String,
    pub deps: Vec<String>,
    pub tokens: usize,
}

/// Scan the conventional source roots under `root` for packages.
///
/// A directory containing a `SRC/` subdirectory is treated as a node (its
/// sources live in `SRC/`); otherwise the package's own `.go` files count.
/// Dependencies are filtered to discovered ids.
pub fn discover_packages(
    root: &Path,
    scanner: Option<&dyn ImportScanner>,
) -> Result<Vec<DiscoveredPackage>> {
    let mut packages = Vec::new();

    for scan_root in SCAN_ROOTS {
        let dir = root.join(scan_root);
        if !dir.is_dir() {
            continue;
        }
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("read {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        entries.sort();

        for pkg_dir in entries {
            let id = pkg_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let src_dir = pkg_dir.join("SRC");
            let source_dir = if src_dir.is_dir() { &src_dir } else { &pkg_dir };
            let files = go_files_in(source_dir)?;
            if files.is_empty() {
                continue;
            }

            let tokens = estimate_token_budget(&files);
            let deps = match scanner {
                Some(scanner) => scanner.scan(&files)?,
                None => Vec::new(),
            };

            debug!(id = %id, files = files.len(), tokens, "discovered package");
            packages.push(DiscoveredPackage {
                id,
                path: pkg_dir
                    .strip_prefix(root)
                    .unwrap_or(&pkg_dir)
                    .to_string_lossy()
                    .replace('\\', "/"),
                deps,
                tokens,
            });
        }
    }

    if packages.is_empty() {
        return Err(anyhow!("no packages found in internal/ or nodes/"));
    }

    // Keep only dependencies that resolve to discovered packages.
    let known: HashSet<String> = packages.iter().map(|p| p.id.clone()).collect();
    for pkg in &mut packages {
        pkg.deps.retain(|dep| known.contains(dep));
    }

    sort_dependencies_first(&mut packages)?;
    Ok(packages)
}

/// Render discovered packages into manifest text.
pub fn render_manifest(packages: &[DiscoveredPackage]) -> String {
    let mut out = String::new();
    out.push_str("# Agentic Graph Manifest - auto-generated by discover\n");
    out.push_str("# Format: KIND:ID path=PATH deps=[DEPS] toks=TOKEN_CAP ver=VERSION\n\n");

    for pkg in packages {
        let mut node = Node::declared(&pkg.id, NodeKind::Leaf, &pkg.path);
        node.deps = pkg.deps.clone();
        node.tokens = pkg.tokens;
        node.version = 1;
        out.push_str(&format_node(&node));
        out.push('\n');
    }
    out
}

/// Non-recursive listing of `.go` files in a directory, sorted by name.
fn go_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file() && path.extension().map(|e| e == "go").unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Token budget from file sizes: ~4 bytes per token, rounded up.
fn estimate_token_budget(files: &[PathBuf]) -> usize {
    let total: u64 = files
        .iter()
        .filter_map(|file| fs::metadata(file).ok())
        .map(|meta| meta.len())
        .sum();
    ((total + 3) / 4) as usize
}

/// Order packages dependencies-first, alphabetically within ties.
fn sort_dependencies_first(packages: &mut Vec<DiscoveredPackage>) -> Result<()> {
    let by_id: HashMap<String, DiscoveredPackage> =
        packages.iter().cloned().map(|p| (p.id.clone(), p)).collect();
    let mut ids: Vec<String> = packages.iter().map(|p| p.id.clone()).collect();
    ids.sort();

    let mut sorted = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut in_progress: HashSet<String> = HashSet::new();

    fn visit(
        id: &str,
        by_id: &HashMap<String, DiscoveredPackage>,
        visited: &mut HashSet<String>,
        in_progress: &mut HashSet<String>,
        sorted: &mut Vec<DiscoveredPackage>,
    ) -> Result<()> {
        if in_progress.contains(id) {
            return Err(anyhow!("cycle detected at node: {id}"));
        }
        if visited.contains(id) {
            return Ok(());
        }
        let Some(pkg) = by_id.get(id) else {
            return Ok(());
        };
        in_progress.insert(id.to_string());
        for dep in &pkg.deps {
            visit(dep, by_id, visited, in_progress, sorted)?;
        }
        in_progress.remove(id);
        visited.insert(id.to_string());
        sorted.push(pkg.clone());
        Ok(())
    }

    for id in &ids {
        visit(id, &by_id, &mut visited, &mut in_progress, &mut sorted)?;
    }

    *packages = sorted;
    Ok(())
}
