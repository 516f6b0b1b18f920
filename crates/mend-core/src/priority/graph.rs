//! Dependency graph built from a relationship map.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRelations {
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub dependents: Vec<String>,
}

/// `source` depends on `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

/// Relationship data in either of the shapes the analyst produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipMap {
    Graph {
        #[serde(default)]
        nodes: serde_json::Value,
        edges: Vec<Edge>,
    },
    PerFile(BTreeMap<String, FileRelations>),
}

impl RelationshipMap {
    pub fn to_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::default();
        match self {
            RelationshipMap::Graph { nodes, edges } => {
                match nodes {
                    serde_json::Value::Object(map) => {
                        for id in map.keys() {
                            graph.add_node(id);
                        }
                    }
                    serde_json::Value::Array(items) => {
                        for id in items.iter().filter_map(node_id) {
                            graph.add_node(id);
                        }
                    }
                    _ => {}
                }
                for edge in edges {
                    graph.add_edge(&edge.source, &edge.target);
                }
            }
            RelationshipMap::PerFile(files) => {
                for (file, relations) in files {
                    graph.add_node(file);
                    for dep in &relations.dependencies {
                        graph.add_edge(file, dep);
                    }
                    for dependent in &relations.dependents {
                        graph.add_edge(dependent, file);
                    }
                }
            }
        }
        graph
    }
}

fn node_id(value: &serde_json::Value) -> Option<&str> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Object(map) => map.get("id").and_then(|v| v.as_str()),
        _ => None,
    }
}

/// Directed "depends on" graph with ordered adjacency for reproducible walks.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn add_node(&mut self, id: &str) {
        self.dependencies.entry(id.to_string()).or_default();
        self.dependents.entry(id.to_string()).or_default();
    }

    pub fn add_edge(&mut self, source: &str, target: &str) {
        if source == target {
            return;
        }
        self.add_node(source);
        self.add_node(target);
        if let Some(deps) = self.dependencies.get_mut(source) {
            deps.insert(target.to_string());
        }
        if let Some(users) = self.dependents.get_mut(target) {
            users.insert(source.to_string());
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &String> {
        self.dependencies.keys()
    }

    pub fn dependency_count(&self, id: &str) -> usize {
        self.dependencies.get(id).map_or(0, BTreeSet::len)
    }

    pub fn dependent_count(&self, id: &str) -> usize {
        self.dependents.get(id).map_or(0, BTreeSet::len)
    }

    /// Length of the longest dependency chain starting at `id`.
    ///
    /// A dependency already on the walk stack contributes depth 0, so cycles
    /// terminate instead of recursing forever.
    pub fn depth(&self, id: &str) -> usize {
        let mut stack = BTreeSet::new();
        let mut memo = HashMap::new();
        self.depth_inner(id, &mut stack, &mut memo).0
    }

    /// Returns the depth and whether the walk below `id` ran into the stack.
    fn depth_inner<'a>(
        &'a self,
        id: &'a str,
        stack: &mut BTreeSet<&'a str>,
        memo: &mut HashMap<&'a str, usize>,
    ) -> (usize, bool) {
        if stack.contains(id) {
            return (0, true);
        }
        if let Some(&known) = memo.get(id) {
            return (known, false);
        }
        let Some(deps) = self.dependencies.get(id) else {
            return (0, false);
        };

        stack.insert(id);
        let mut touched_stack = false;
        let mut best = 0;
        for dep in deps {
            let (depth, touched) = self.depth_inner(dep, stack, memo);
            touched_stack |= touched;
            best = best.max(1 + depth);
        }
        stack.remove(id);

        // Depths seen through a cycle depend on the entry point
        if !touched_stack {
            memo.insert(id, best);
        }
        (best, touched_stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_file_shape_mirrors_edges() {
        let map: RelationshipMap = serde_json::from_str(
            r#"{"a.py": {"dependencies": ["b.py"]}, "c.py": {"dependents": ["a.py"]}}"#,
        )
        .unwrap();
        let graph = map.to_graph();
        assert_eq!(graph.dependency_count("a.py"), 2);
        assert_eq!(graph.dependent_count("b.py"), 1);
        assert_eq!(graph.dependent_count("c.py"), 1);
    }

    #[test]
    fn test_graph_shape() {
        let map: RelationshipMap = serde_json::from_str(
            r#"{"nodes": {"a": {}, "b": {}, "lonely": {}}, "edges": [{"source": "a", "target": "b"}]}"#,
        )
        .unwrap();
        assert!(matches!(map, RelationshipMap::Graph { .. }));
        let graph = map.to_graph();
        assert_eq!(graph.dependency_count("a"), 1);
        assert_eq!(graph.dependent_count("b"), 1);
        assert_eq!(graph.nodes().count(), 3);
    }

    #[test]
    fn test_depth_follows_longest_chain() {
        let mut graph = DependencyGraph::default();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("c", "d");
        graph.add_edge("a", "d");
        assert_eq!(graph.depth("a"), 3);
        assert_eq!(graph.depth("d"), 0);
        assert_eq!(graph.depth("missing"), 0);
    }

    #[test]
    fn test_depth_terminates_on_cycles() {
        let mut graph = DependencyGraph::default();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("c", "a");
        assert_eq!(graph.depth("a"), 3);
        assert_eq!(graph.depth("b"), 3);
    }

    #[test]
    fn test_depth_does_not_reuse_results_cut_by_an_indirect_cycle() {
        let mut graph = DependencyGraph::default();
        graph.add_edge("c", "b");
        graph.add_edge("c", "d");
        graph.add_edge("b", "d");
        graph.add_edge("d", "b");
        // b was first reached with d on the stack; d must not reuse that depth
        assert_eq!(graph.depth("c"), 3);
        assert_eq!(graph.depth("b"), 2);
        assert_eq!(graph.depth("d"), 2);
    }
}
