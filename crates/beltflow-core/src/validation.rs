//! Conservation checks over a built flow graph.
//!
//! Every node reachable from the roots must be exactly one of:
//! - **standard**: `sum_ins == sum_outs` and nothing left resident,
//! - **source**: no inputs and all supply routed onward (residual holding
//!   zero), or a starved feeder whose holding is exactly `-sum_outs`,
//! - **destination**: no outputs and holding equal to what flows in.

use crate::graph::FlowGraph;
use crate::id::NodeId;
use crate::ratio::Ratio;

// ---------------------------------------------------------------------------
// Violation types
// ---------------------------------------------------------------------------

/// A node that fits none of the legal conservation classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConservationViolation {
    pub node: NodeId,
    pub holding: Ratio,
    pub sum_ins: Ratio,
    pub sum_outs: Ratio,
}

impl std::fmt::Display for ConservationViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}: holding {} with ins {} and outs {}",
            self.node, self.holding, self.sum_ins, self.sum_outs
        )
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Classify one node. Returns `true` if it is standard, a source or a
/// destination.
pub fn is_node_legal(graph: &FlowGraph, node: NodeId) -> bool {
    let holding = graph.holding(node);
    let sum_ins = graph.sum_ins(node);
    let sum_outs = graph.sum_outs(node);

    let standard = sum_ins == sum_outs && holding.is_zero();
    let source = graph.ins(node).is_empty() && (holding.is_zero() || holding == -sum_outs);
    let destination = graph.outs(node).is_empty() && holding == sum_ins;

    standard || source || destination
}

/// Every reachable node that breaks conservation, in traversal order.
pub fn conservation_violations(graph: &FlowGraph, roots: &[NodeId]) -> Vec<ConservationViolation> {
    graph
        .collect_reachable(roots)
        .nodes
        .into_iter()
        .filter(|&node| !is_node_legal(graph, node))
        .map(|node| ConservationViolation {
            node,
            holding: graph.holding(node),
            sum_ins: graph.sum_ins(node),
            sum_outs: graph.sum_outs(node),
        })
        .collect()
}

pub fn is_conservation_legal(graph: &FlowGraph, roots: &[NodeId]) -> bool {
    conservation_violations(graph, roots).is_empty()
}
