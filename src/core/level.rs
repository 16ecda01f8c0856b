//! Dependency-level grouping for level-parallel execution.

use std::collections::HashSet;

use crate::core::graph::Graph;

/// Group target node ids into dependency levels.
///
/// Level 0 holds targets whose dependencies (intersected with the target set)
/// are empty; level `k+1` holds targets whose remaining dependencies all lie
/// in earlier levels. Dependencies outside the target set are ignored.
///
/// If a level comes up empty while unprocessed targets remain, grouping stops
/// and the remaining targets are dropped. That only happens when a cycle
/// slipped past graph validation, and stopping is preferable to looping.
pub fn dependency_levels(graph: &Graph, targets: &[String]) -> Vec<Vec<String>> {
    let target_set: HashSet<&str> = targets.iter().map(String::as_str).collect();
    let mut processed: HashSet<String> = HashSet::new();
    let mut levels: Vec<Vec<String>> = Vec::new();

    while processed.len() < targets.len() {
        let mut level: Vec<String> = Vec::new();
        for id in targets {
            if processed.contains(id) {
                continue;
            }
            let Some(node) = graph.get(id) else {
                continue;
            };
            let ready = node
                .deps
                .iter()
                .all(|dep| !target_set.contains(dep.as_str()) || processed.contains(dep));
            if ready {
                level.push(id.clone());
            }
        }
        if level.is_empty() {
            break;
        }
        processed.extend(level.iter().cloned());
        levels.push(level);
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Graph;
    use crate::core::manifest::parse_manifest;

    fn graph_from(text: &str) -> Graph {
        Graph::from_nodes(parse_manifest(text).expect("parse"), ".").expect("graph")
    }

    fn ids(targets: &[&str]) -> Vec<String> {
        targets.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn chain_produces_one_level_per_node() {
        let graph = graph_from(
            "\
L:a path=a deps=[] toks=1 ver=1
L:b path=b deps=[a] toks=1 ver=1
L:c path=c deps=[b] toks=1 ver=1
",
        );
        let levels = dependency_levels(&graph, &ids(&["a", "b", "c"]));
        assert_eq!(
            levels,
            vec![
                vec!["a".to_string()],
                vec!["b".to_string()],
                vec!["c".to_string()]
            ]
        );
    }

    #[test]
    fn independent_nodes_share_level_zero() {
        let graph = graph_from(
            "\
L:a path=a deps=[] toks=1 ver=1
L:b path=b deps=[] toks=1 ver=1
C:c path=c deps=[a,b] toks=1 ver=1
",
        );
        let levels = dependency_levels(&graph, &ids(&["a", "b", "c"]));
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0], vec!["a".to_string(), "b".to_string()]);
        assert_eq!(levels[1], vec!["c".to_string()]);
    }

    #[test]
    fn deps_outside_target_set_are_ignored() {
        let graph = graph_from(
            "\
L:base path=base deps=[] toks=1 ver=1
L:top path=top deps=[base] toks=1 ver=1
",
        );
        let levels = dependency_levels(&graph, &ids(&["top"]));
        assert_eq!(levels, vec![vec!["top".to_string()]]);
    }

    #[test]
    fn unknown_target_ids_are_skipped() {
        let graph = graph_from("L:a path=a deps=[] toks=1 ver=1");
        let levels = dependency_levels(&graph, &ids(&["a", "ghost"]));
        assert_eq!(levels, vec![vec!["a".to_string()]]);
    }
}
