//! Track dependency graph, independent of storage.
//!
//! Edges point from a track to the tracks it depends on. The repository loads
//! the edges of one roadmap, asks whether a candidate edge keeps the graph
//! acyclic, and only then writes it.

use std::collections::{HashMap, HashSet};

use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Builds a graph from known tracks and `(track, depends_on)` edges.
    /// Tracks that only appear in edges are added as nodes.
    pub fn from_edges<N, E>(nodes: N, edges: E) -> Self
    where
        N: IntoIterator<Item = String>,
        E: IntoIterator<Item = (String, String)>,
    {
        let mut graph = Self::default();
        for id in nodes {
            graph.add_node(id);
        }
        for (from, to) in edges {
            let from = graph.add_node(from);
            let to = graph.add_node(to);
            graph.graph.update_edge(from, to, ());
        }
        graph
    }

    fn add_node(&mut self, id: String) -> NodeIndex {
        if let Some(&node) = self.node_map.get(&id) {
            return node;
        }
        let node = self.graph.add_node(id.clone());
        self.node_map.insert(id, node);
        node
    }

    /// Checks that `from depends on to` can be added.
    ///
    /// Self edges fail before any lookup. Otherwise the edge is refused if
    /// `from` is already reachable from `to`.
    pub fn check_new_edge(&self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Err(Error::invalid(format!("track {} cannot depend on itself", from)));
        }
        let from_node = self.node(from)?;
        let to_node = self.node(to)?;

        if !algo::has_path_connecting(&self.graph, to_node, from_node, None) {
            return Ok(());
        }
        let mut cycle = vec![from_node];
        cycle.extend(self.path(to_node, from_node));
        Err(self.cycle_error(&cycle))
    }

    /// Fails if any cycle is reachable from `start`.
    pub fn validate_no_cycles(&self, start: &str) -> Result<()> {
        let start = self.node(start)?;

        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            reachable.insert(node);
        }

        for component in algo::tarjan_scc(&self.graph) {
            if component.len() < 2 || !component.iter().any(|n| reachable.contains(n)) {
                continue;
            }
            // Close the walk through any neighbour inside the component.
            let head = component[0];
            let members: HashSet<NodeIndex> = component.iter().copied().collect();
            if let Some(next) = self.graph.neighbors(head).find(|n| members.contains(n)) {
                let mut cycle = vec![head];
                cycle.extend(self.path(next, head));
                return Err(self.cycle_error(&cycle));
            }
        }
        Ok(())
    }

    fn node(&self, id: &str) -> Result<NodeIndex> {
        self.node_map
            .get(id)
            .copied()
            .ok_or_else(|| Error::not_found(format!("track {}", id)))
    }

    /// Shortest path `source ..= target`; empty when there is none.
    fn path(&self, source: NodeIndex, target: NodeIndex) -> Vec<NodeIndex> {
        algo::astar(&self.graph, source, |n| n == target, |_| 1u32, |_| 0)
            .map(|(_, path)| path)
            .unwrap_or_default()
    }

    fn cycle_error(&self, cycle: &[NodeIndex]) -> Error {
        let names: Vec<&str> = cycle.iter().map(|&n| self.graph[n].as_str()).collect();
        Error::invalid(format!("dependency cycle detected: {}", names.join(" -> ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> DependencyGraph {
        DependencyGraph::from_edges(
            Vec::new(),
            edges.iter().map(|(a, b)| (a.to_string(), b.to_string())),
        )
    }

    fn is_cycle(result: Result<()>) -> bool {
        matches!(result, Err(Error::InvalidArgument(_)))
    }

    #[test]
    fn self_edge_is_rejected_even_for_unknown_tracks() {
        let g = DependencyGraph::default();
        assert!(is_cycle(g.check_new_edge("a", "a")));
    }

    #[test]
    fn unknown_endpoint_is_not_found() {
        let g = graph(&[("a", "b")]);
        assert!(matches!(g.check_new_edge("a", "z"), Err(Error::NotFound(_))));
        assert!(matches!(g.validate_no_cycles("z"), Err(Error::NotFound(_))));
    }

    #[test]
    fn direct_back_edge_is_a_cycle() {
        let g = graph(&[("a", "b")]);
        assert!(is_cycle(g.check_new_edge("b", "a")));
    }

    #[test]
    fn transitive_back_edge_names_the_path() {
        let g = graph(&[("a", "b"), ("b", "c")]);
        let err = g.check_new_edge("c", "a").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid argument: dependency cycle detected: c -> a -> b -> c"
        );
    }

    #[test]
    fn diamond_is_acyclic() {
        let g = graph(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);
        assert!(g.validate_no_cycles("a").is_ok());
        assert!(g.check_new_edge("b", "c").is_ok());
        assert!(is_cycle(g.check_new_edge("d", "a")));
    }

    #[test]
    fn validate_finds_existing_cycles_reachable_from_start() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "b")]);
        let err = g.validate_no_cycles("a").unwrap_err();
        assert!(err.to_string().contains("dependency cycle detected"));
        assert!(g.validate_no_cycles("b").is_err());

        let clean = graph(&[("x", "y")]);
        assert!(clean.validate_no_cycles("x").is_ok());
    }

    #[test]
    fn cycles_elsewhere_are_ignored() {
        let g = graph(&[("a", "b"), ("c", "d"), ("d", "c")]);
        assert!(g.validate_no_cycles("a").is_ok());
        assert!(g.validate_no_cycles("c").is_err());
    }

    #[test]
    fn duplicate_edges_collapse() {
        let g = graph(&[("a", "b"), ("a", "b")]);
        assert_eq!(g.graph.edge_count(), 1);
        assert_eq!(g.graph.node_count(), 2);
    }
}
