//! Node records shared by the manifest parser and the graph.

use serde::{Deserialize, Serialize};

/// Whether a node is a leaf or carries its own nested manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Composite,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Leaf => "L",
            NodeKind::Composite => "C",
        }
    }
}

/// A single node in the dependency graph.
///
/// `deps` holds declared dependency ids in manifest order. `children` and
/// `dependents` are filled during graph resolution and reference other nodes
/// by id; the graph owns all nodes in a flat table, so there are no interior
/// pointers to manage.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    /// Directory relative to the repository root (after nested-manifest
    /// flattening).
    pub path: String,
    pub deps: Vec<String>,
    pub tokens: usize,
    pub version: u32,
    pub contract_hash: Option<String>,
    pub bundle_hash: Option<String>,
    pub manifest_hash: Option<String>,

    pub meta: Option<NodeMeta>,
    /// Resolved dependency ids.
    pub children: Vec<String>,
    /// Reverse dependency ids.
    pub dependents: Vec<String>,
}

impl Node {
    /// A bare node as produced by the manifest parser, before resolution.
    pub fn declared(id: impl Into<String>, kind: NodeKind, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            path: path.into(),
            deps: Vec::new(),
            tokens: 0,
            version: 0,
            contract_hash: None,
            bundle_hash: None,
            manifest_hash: None,
            meta: None,
            children: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// The node's effective token cap, if its metadata declares one.
    pub fn token_cap(&self) -> Option<usize> {
        let cap = self.meta.as_ref()?.budgets.token_cap;
        if cap > 0 {
            Some(cap)
        } else {
            None
        }
    }
}

/// Optional per-node metadata loaded from `NODE.meta.yaml`.
///
/// Unknown keys are ignored for forward compatibility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMeta {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub purpose: String,
    pub invariants: Vec<String>,
    pub non_goals: Vec<String>,
    pub budgets: BudgetMeta,
    pub policies: PolicyMeta,
    pub public_contract: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetMeta {
    pub token_cap: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyMeta {
    /// Glob or prefix patterns, relative to the node directory.
    pub allowed_paths: Vec<String>,
    /// Shell commands executed from the node directory after apply.
    pub checks: Vec<String>,
}
