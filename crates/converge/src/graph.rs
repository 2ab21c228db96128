//! Dependency graph primitives
//!
//! A graph maps each node to the set of nodes it points to. The algorithms
//! here are generic over opaque, ordered node identities; the engine uses
//! them with root components.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Directed graph: `node -> set(nodes it points to)`.
pub type Graph<N> = BTreeMap<N, BTreeSet<N>>;

/// Raised by [`topological_sort`] when edges remain after the worklist is
/// exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("graph contains a cycle involving {} node(s)", .graph.len())]
pub struct CycleError<N: Ord + std::fmt::Debug> {
    /// Remaining subgraph, pruned of nodes without outgoing edges
    pub graph: Graph<N>,
}

/// Reverse all edges.
///
/// Every node referenced anywhere in `graph` is a key of the result, even
/// when it has no incoming edges.
pub fn reverse<N: Ord + Clone>(graph: &Graph<N>) -> Graph<N> {
    let mut reversed: Graph<N> = BTreeMap::new();
    for (node, targets) in graph {
        reversed.entry(node.clone()).or_default();
        for target in targets {
            reversed
                .entry(target.clone())
                .or_default()
                .insert(node.clone());
        }
    }
    reversed
}

/// Sort nodes so that every node comes after all nodes pointing to it.
///
/// Ready nodes are seeded in key order and popped LIFO. On failure the error
/// carries the cyclic remainder of the graph.
pub fn topological_sort<N>(graph: &Graph<N>) -> Result<Vec<N>, CycleError<N>>
where
    N: Ord + Clone + std::fmt::Debug,
{
    let mut outgoing = graph.clone();
    let mut incoming = reverse(graph);
    for node in incoming.keys() {
        outgoing.entry(node.clone()).or_default();
    }

    let mut ready: Vec<N> = incoming
        .iter()
        .filter(|(_, sources)| sources.is_empty())
        .map(|(node, _)| node.clone())
        .collect();
    let mut sorted = Vec::with_capacity(outgoing.len());

    while let Some(node) = ready.pop() {
        let targets = outgoing
            .get_mut(&node)
            .map(std::mem::take)
            .unwrap_or_default();
        for target in targets {
            if let Some(sources) = incoming.get_mut(&target) {
                sources.remove(&node);
                if sources.is_empty() {
                    ready.push(target);
                }
            }
        }
        sorted.push(node);
    }

    if outgoing.values().any(|targets| !targets.is_empty()) {
        return Err(CycleError {
            graph: remove_nodes_without_outgoing_edges(outgoing),
        });
    }
    Ok(sorted)
}

/// Repeatedly drop nodes that have no outgoing edges, and every edge pointing
/// at them, until only nodes on (or leading into) cycles remain.
pub fn remove_nodes_without_outgoing_edges<N: Ord + Clone>(mut graph: Graph<N>) -> Graph<N> {
    loop {
        let sinks: BTreeSet<N> = graph
            .iter()
            .filter(|(_, targets)| targets.is_empty())
            .map(|(node, _)| node.clone())
            .collect();
        let dangling = graph
            .values()
            .flatten()
            .any(|target| !graph.contains_key(target));
        if sinks.is_empty() && !dangling {
            return graph;
        }
        graph.retain(|node, _| !sinks.contains(node));
        let keys: BTreeSet<N> = graph.keys().cloned().collect();
        for targets in graph.values_mut() {
            targets.retain(|target| keys.contains(target));
        }
    }
}
