//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::graph::FlowGraph;
use crate::id::NodeId;
use crate::ratio::Ratio;

// ===========================================================================
// Quantities
// ===========================================================================

/// Parse a list of quantity strings. Panics on malformed input.
pub fn ratios(values: &[&str]) -> Vec<Ratio> {
    values
        .iter()
        .map(|v| v.parse().unwrap_or_else(|e| panic!("bad quantity {v:?}: {e}")))
        .collect()
}

pub fn sorted(mut values: Vec<Ratio>) -> Vec<Ratio> {
    values.sort();
    values
}

// ===========================================================================
// Graph builders
// ===========================================================================

/// A root holding `holding` linked to an empty spacer, the shape every
/// split starts from. Returns `(root, spacer)`.
pub fn rooted(graph: &mut FlowGraph, holding: u64) -> (NodeId, NodeId) {
    let root = graph.add_node(Ratio::from(holding));
    let spacer = graph.add_node(Ratio::ZERO);
    graph.link_splittable(root, spacer);
    (root, spacer)
}

// ===========================================================================
// Inspection
// ===========================================================================

/// Largest out-degree among nodes reachable from `roots`.
pub fn max_fan_out(graph: &FlowGraph, roots: &[NodeId]) -> usize {
    graph
        .collect_reachable(roots)
        .nodes
        .iter()
        .map(|&n| graph.outs(n).len())
        .max()
        .unwrap_or(0)
}

/// Largest in-degree among nodes reachable from `roots`.
pub fn max_fan_in(graph: &FlowGraph, roots: &[NodeId]) -> usize {
    graph
        .collect_reachable(roots)
        .nodes
        .iter()
        .map(|&n| graph.ins(n).len())
        .max()
        .unwrap_or(0)
}

/// `(in-degree, out-degree, holding)` of each reachable node in traversal
/// order. Equal signatures mean equal structure up to id remapping.
pub fn node_signature(graph: &FlowGraph, roots: &[NodeId]) -> Vec<(usize, usize, Ratio)> {
    graph
        .collect_reachable(roots)
        .nodes
        .iter()
        .map(|&n| (graph.ins(n).len(), graph.outs(n).len(), graph.holding(n)))
        .collect()
}

/// Holding of every reachable node without outputs.
pub fn leaf_holdings(graph: &FlowGraph, roots: &[NodeId]) -> Vec<Ratio> {
    let leaves = graph
        .collect_reachable(roots)
        .nodes
        .into_iter()
        .filter(|&n| graph.outs(n).is_empty())
        .map(|n| graph.holding(n))
        .collect();
    sorted(leaves)
}
