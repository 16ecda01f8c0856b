//! The resolved dependency graph: a flat node table with declaration order.
//!
//! Nested manifests are flattened by the loader before resolution, so every
//! id here is fully qualified (`parent.child` for nodes declared in a nested
//! manifest). Children and dependents are stored as id vectors and looked up
//! through the table, which keeps the graph free of interior pointers.

use std::collections::HashMap;
use std::fmt::Write as _;

use thiserror::Error;

use crate::core::node::{Node, NodeKind};

/// Structural failures detected while resolving or traversing a graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {node}: unknown dependency {dep}")]
    UnknownDependency { node: String, dep: String },
    #[error("cycle detected involving node: {0}")]
    Cycle(String),
    #[error("node not found: {0}")]
    MissingNode(String),
}

/// The full dependency graph. Never mutated after validation.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashMap<String, Node>,
    /// Ids in manifest declaration order, for deterministic traversal.
    order: Vec<String>,
    pub root_path: String,
}

impl Graph {
    /// Resolve declared nodes into a validated graph.
    ///
    /// Fails on the first unknown dependency or dependency cycle.
    pub fn from_nodes(declared: Vec<Node>, root_path: impl Into<String>) -> Result<Self, GraphError> {
        let mut graph = Graph {
            nodes: HashMap::new(),
            order: Vec::new(),
            root_path: root_path.into(),
        };
        for node in declared {
            graph.order.push(node.id.clone());
            graph.nodes.insert(node.id.clone(), node);
        }
        graph.resolve()?;
        graph.check_cycles()?;
        Ok(graph)
    }

    fn resolve(&mut self) -> Result<(), GraphError> {
        let mut edges: Vec<(String, String)> = Vec::new();
        for id in &self.order {
            let node = &self.nodes[id];
            for dep in &node.deps {
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        node: id.clone(),
                        dep: dep.clone(),
                    });
                }
                edges.push((id.clone(), dep.clone()));
            }
        }
        for (from, to) in edges {
            self.nodes.get_mut(&from).unwrap().children.push(to.clone());
            self.nodes.get_mut(&to).unwrap().dependents.push(from);
        }
        Ok(())
    }

    /// Depth-first cycle check with a three-color marker.
    fn check_cycles(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit(
            graph: &Graph,
            id: &str,
            colors: &mut HashMap<String, Color>,
        ) -> Result<(), GraphError> {
            colors.insert(id.to_string(), Color::Gray);
            for child in &graph.nodes[id].children {
                match colors.get(child).copied().unwrap_or(Color::White) {
                    Color::Gray => return Err(GraphError::Cycle(child.clone())),
                    Color::White => visit(graph, child, colors)?,
                    Color::Black => {}
                }
            }
            colors.insert(id.to_string(), Color::Black);
            Ok(())
        }

        let mut colors = HashMap::new();
        for id in &self.order {
            if colors.get(id).copied().unwrap_or(Color::White) == Color::White {
                visit(self, id, &mut colors)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Look up a node, failing with [`GraphError::MissingNode`].
    pub fn require(&self, id: &str) -> Result<&Node, GraphError> {
        self.get(id)
            .ok_or_else(|| GraphError::MissingNode(id.to_string()))
    }

    /// Ids in manifest declaration order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Nodes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().map(|id| &self.nodes[id])
    }

    /// All leaf nodes in declaration order.
    pub fn leaves(&self) -> Vec<&Node> {
        self.iter().filter(|n| n.kind == NodeKind::Leaf).collect()
    }

    /// Nodes in dependency order (dependencies first).
    ///
    /// Visits nodes in declaration order, DFS postorder, so the result is
    /// deterministic across runs.
    pub fn topological_sort(&self) -> Result<Vec<&Node>, GraphError> {
        let mut sorted = Vec::new();
        let mut visited: HashMap<&str, bool> = HashMap::new();
        let mut in_progress: HashMap<&str, bool> = HashMap::new();

        fn visit<'a>(
            graph: &'a Graph,
            id: &'a str,
            visited: &mut HashMap<&'a str, bool>,
            in_progress: &mut HashMap<&'a str, bool>,
            sorted: &mut Vec<&'a Node>,
        ) -> Result<(), GraphError> {
            if in_progress.get(id).copied().unwrap_or(false) {
                return Err(GraphError::Cycle(id.to_string()));
            }
            if visited.get(id).copied().unwrap_or(false) {
                return Ok(());
            }
            in_progress.insert(id, true);
            let node = &graph.nodes[id];
            for child in &node.children {
                visit(graph, child, visited, in_progress, sorted)?;
            }
            in_progress.insert(id, false);
            visited.insert(id, true);
            sorted.push(node);
            Ok(())
        }

        for id in &self.order {
            visit(self, id, &mut visited, &mut in_progress, &mut sorted)?;
        }
        Ok(sorted)
    }

    /// All nodes that transitively depend on `id`, in discovery order.
    pub fn reverse_deps(&self, id: &str) -> Vec<&Node> {
        let Some(node) = self.get(id) else {
            return Vec::new();
        };

        let mut seen: HashMap<&str, bool> = HashMap::new();
        let mut result = Vec::new();
        let mut stack: Vec<&str> = node.dependents.iter().map(String::as_str).collect();
        stack.reverse();
        while let Some(dep_id) = stack.pop() {
            if seen.insert(dep_id, true).is_some() {
                continue;
            }
            let dep = &self.nodes[dep_id];
            result.push(dep);
            for next in dep.dependents.iter().rev() {
                stack.push(next);
            }
        }
        result
    }

    /// Render the dependency tree for display, roots (nodes nothing depends
    /// on) first, leaves indented below their dependents.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let roots: Vec<&Node> = self.iter().filter(|n| n.dependents.is_empty()).collect();

        if roots.is_empty() {
            for node in self.iter() {
                self.render_node(node, "", true, &mut out);
            }
            return out;
        }

        for (i, root) in roots.iter().enumerate() {
            self.render_node(root, "", i == roots.len() - 1, &mut out);
        }
        out
    }

    fn render_node(&self, node: &Node, prefix: &str, is_last: bool, out: &mut String) {
        let connector = if is_last { "└── " } else { "├── " };
        let _ = writeln!(
            out,
            "{prefix}{connector}[{}] {} ({} toks)",
            node.kind.as_str(),
            node.id,
            node.tokens
        );

        let child_prefix = if is_last {
            format!("{prefix}    ")
        } else {
            format!("{prefix}│   ")
        };
        for (i, child) in node.children.iter().enumerate() {
            let child_node = &self.nodes[child];
            self.render_node(child_node, &child_prefix, i == node.children.len() - 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::parse_manifest;

    fn graph_from(text: &str) -> Result<Graph, GraphError> {
        Graph::from_nodes(parse_manifest(text).expect("parse"), ".")
    }

    #[test]
    fn resolves_children_and_dependents() {
        let graph = graph_from(
            "L:utils path=u deps=[] toks=1 ver=1\nC:api path=a deps=[utils] toks=1 ver=1",
        )
        .expect("graph");
        assert_eq!(graph.get("api").unwrap().children, vec!["utils"]);
        assert_eq!(graph.get("utils").unwrap().dependents, vec!["api"]);
    }

    #[test]
    fn builder_nodes_resolve_like_parsed_ones() {
        use crate::test_support::{composite, leaf};
        let nodes = vec![
            leaf("utils", "src/utils"),
            composite("api", "src/api", &["utils"]),
        ];
        let graph = Graph::from_nodes(nodes, ".").expect("graph");
        assert_eq!(graph.get("api").unwrap().children, vec!["utils"]);
        assert_eq!(graph.get("utils").unwrap().dependents, vec!["api"]);
    }

    #[test]
    fn unknown_dependency_fails_load() {
        let err = graph_from("L:a path=a deps=[ghost] toks=1 ver=1").unwrap_err();
        assert!(err.to_string().contains("unknown dependency ghost"));
    }

    #[test]
    fn two_node_cycle_fails_load() {
        let err = graph_from(
            "L:a path=a deps=[b] toks=1 ver=1\nL:b path=b deps=[a] toks=1 ver=1",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn self_cycle_fails_load() {
        let err = graph_from("L:a path=a deps=[a] toks=1 ver=1").unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn toposort_places_dependencies_first() {
        let graph = graph_from(
            "\
C:cli path=cli deps=[api] toks=1 ver=1
C:api path=api deps=[utils,models] toks=1 ver=1
L:utils path=u deps=[] toks=1 ver=1
L:models path=m deps=[] toks=1 ver=1
",
        )
        .expect("graph");
        let sorted = graph.topological_sort().expect("sort");
        let ids: Vec<&str> = sorted.iter().map(|n| n.id.as_str()).collect();
        for node in graph.iter() {
            let pos = ids.iter().position(|id| *id == node.id).unwrap();
            for dep in &node.deps {
                let dep_pos = ids.iter().position(|id| id == dep).unwrap();
                assert!(dep_pos < pos, "{dep} must sort before {}", node.id);
            }
        }
        // Declaration-order DFS postorder is fully deterministic.
        assert_eq!(ids, vec!["utils", "models", "api", "cli"]);
    }

    #[test]
    fn empty_graph_sorts_to_empty() {
        let graph = graph_from("").expect("graph");
        assert!(graph.is_empty());
        assert!(graph.topological_sort().expect("sort").is_empty());
    }

    #[test]
    fn reverse_deps_are_transitive() {
        let graph = graph_from(
            "\
L:base path=b deps=[] toks=1 ver=1
L:mid path=m deps=[base] toks=1 ver=1
L:top path=t deps=[mid] toks=1 ver=1
L:other path=o deps=[] toks=1 ver=1
",
        )
        .expect("graph");
        let ids: Vec<&str> = graph
            .reverse_deps("base")
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, vec!["mid", "top"]);
        assert!(graph.reverse_deps("other").is_empty());
        assert!(graph.reverse_deps("ghost").is_empty());
    }

    #[test]
    fn leaves_preserve_declaration_order() {
        let graph = graph_from(
            "\
L:b path=b deps=[] toks=1 ver=1
L:a path=a deps=[] toks=1 ver=1
C:c path=c deps=[a,b] toks=1 ver=1
",
        )
        .expect("graph");
        let ids: Vec<&str> = graph.leaves().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn render_tree_indents_dependencies_under_roots() {
        let graph = graph_from(
            "L:utils path=u deps=[] toks=5 ver=1\nC:api path=a deps=[utils] toks=9 ver=1",
        )
        .expect("graph");
        let tree = graph.render_tree();
        assert!(tree.contains("[C] api (9 toks)"));
        assert!(tree.contains("[L] utils (5 toks)"));
        let api_line = tree.lines().position(|l| l.contains("api")).unwrap();
        let utils_line = tree.lines().position(|l| l.contains("utils")).unwrap();
        assert!(api_line < utils_line);
    }
}
