//! Module dependency graph.
//!
//! Built from each module's `+calls` targets and subscribed topics. Cycle
//! detection runs Tarjan's strongly-connected-components pass and reports one
//! concrete cycle per component.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::schema::Schema;

/// Directed graph of module names; an edge `a -> b` means `a` depends on `b`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index_map: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Builds the graph for every module in `schema`.
    ///
    /// Dependencies on modules absent from the schema are ignored.
    #[must_use]
    pub fn from_schema(schema: &Schema) -> Self {
        let mut graph = Self::default();
        for module in &schema.modules {
            graph.add_node(&module.name);
        }
        for module in &schema.modules {
            for dep in module.dependencies() {
                if schema.module(&dep).is_some() {
                    graph.add_edge(&module.name, &dep);
                }
            }
        }
        graph
    }

    /// Adds a node; a no-op if it already exists.
    pub fn add_node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index_map.insert(name.to_string(), idx);
        idx
    }

    /// Adds `from -> to`, creating nodes as needed.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    /// Returns one cycle per strongly-connected component of size > 1.
    ///
    /// Each cycle starts and ends at the component's lexicographically
    /// smallest module, so `one <-> two` reports `[one, two, one]`.
    /// Components are ordered by that starting module.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut out: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .filter_map(|component| self.cycle_within(&component))
            .collect();
        out.sort();
        out
    }

    fn name(&self, idx: NodeIndex) -> String {
        self.graph.node_weight(idx).cloned().unwrap_or_default()
    }

    /// Depth-first search from the smallest member back to itself, restricted
    /// to the component and visiting neighbours in name order.
    fn cycle_within(&self, component: &[NodeIndex]) -> Option<Vec<String>> {
        let start = *component.iter().min_by_key(|idx| self.name(**idx))?;
        let mut path = vec![start];
        let mut visited = vec![start];
        if self.search(start, start, component, &mut path, &mut visited) {
            let mut names: Vec<String> = path.into_iter().map(|idx| self.name(idx)).collect();
            names.push(self.name(start));
            Some(names)
        } else {
            None
        }
    }

    fn search(
        &self,
        current: NodeIndex,
        start: NodeIndex,
        component: &[NodeIndex],
        path: &mut Vec<NodeIndex>,
        visited: &mut Vec<NodeIndex>,
    ) -> bool {
        let mut neighbours: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(current, Direction::Outgoing)
            .filter(|n| component.contains(n))
            .collect();
        neighbours.sort_by_key(|n| self.name(*n));
        if neighbours.contains(&start) {
            return true;
        }
        for next in neighbours {
            if visited.contains(&next) {
                continue;
            }
            visited.push(next);
            path.push(next);
            if self.search(next, start, component, path, visited) {
                return true;
            }
            path.pop();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_module_cycle_starts_at_smallest_name() {
        let mut graph = DependencyGraph::default();
        graph.add_edge("two", "one");
        graph.add_edge("one", "two");
        assert_eq!(graph.cycles(), vec![vec!["one", "two", "one"]]);
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let mut graph = DependencyGraph::default();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("a", "c");
        assert!(graph.cycles().is_empty());
    }

    #[test]
    fn three_module_cycle_is_reported_once() {
        let mut graph = DependencyGraph::default();
        graph.add_edge("b", "c");
        graph.add_edge("c", "a");
        graph.add_edge("a", "b");
        graph.add_edge("d", "a");
        assert_eq!(graph.cycles(), vec![vec!["a", "b", "c", "a"]]);
    }
}
