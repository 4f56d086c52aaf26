//! Canonical form for a finished graph.
//!
//! Passes over everything reachable from the start nodes, rewriting nodes by
//! their [`NodeType`], until a full pass changes nothing. Each rewrite can
//! change the classification of nodes further down, so every pass starts
//! over from the start nodes.
//!
//! | Type               | Rewrite                                           |
//! |--------------------|---------------------------------------------------|
//! | source-splitter    | new source in front, demoting the old one         |
//! | pass-through       | spliced out                                       |
//! | merger-destination | new destination behind                            |
//! | merge-splitter     | new node between the merge and its outputs        |
//!
//! Sources and destinations are recorded as the graph's key nodes; splitters,
//! mergers and islands are left alone.

use crate::graph::{FlowGraph, NodeType};
use crate::id::NodeId;
use crate::ratio::Ratio;
use std::collections::HashSet;
use tracing::debug;

/// Start and end nodes of a canonical graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyNodes {
    pub starts: Vec<NodeId>,
    pub ends: Vec<NodeId>,
}

/// Rewrite the graph reachable from `roots` into canonical form.
///
/// # Panics
///
/// If a pass-through forwards a different quantity than it receives, or a
/// merge-splitter's outputs differ from what it takes in. Both mean an
/// earlier step broke conservation.
pub fn canonicalize(graph: &mut FlowGraph, roots: &[NodeId]) -> KeyNodes {
    let mut keys = KeyNodes {
        starts: roots.to_vec(),
        ends: Vec::new(),
    };

    let mut passes = 1usize;
    while run_pass(graph, &mut keys) {
        passes += 1;
    }

    keys.ends
        .retain(|&n| graph.contains_node(n) && graph.outs(n).is_empty());
    debug!(
        passes,
        starts = keys.starts.len(),
        ends = keys.ends.len(),
        "canonical form reached"
    );
    keys
}

/// One depth-first pass from the current starts. Returns whether anything
/// was rewritten.
fn run_pass(graph: &mut FlowGraph, keys: &mut KeyNodes) -> bool {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut changed = false;
    let mut stack: Vec<NodeId> = keys.starts.iter().rev().copied().collect();

    while let Some(node) = stack.pop() {
        if !graph.contains_node(node) || !seen.insert(node) {
            continue;
        }
        // A spliced-out pass-through is gone; its downstream node is still
        // reached through the new link from upstream.
        changed |= rewrite(graph, node, keys);
        if graph.contains_node(node) {
            stack.extend(graph.children(node).into_iter().rev());
        }
    }
    changed
}

fn push_unique(list: &mut Vec<NodeId>, node: NodeId) {
    if !list.contains(&node) {
        list.push(node);
    }
}

fn rewrite(graph: &mut FlowGraph, node: NodeId, keys: &mut KeyNodes) -> bool {
    match graph.node_type(node) {
        NodeType::Island | NodeType::Splitter | NodeType::Merger => false,

        NodeType::Source => {
            push_unique(&mut keys.starts, node);
            false
        }

        NodeType::SourceSplitter => {
            let output = graph.sum_outs(node);
            let source = graph.add_node(Ratio::ZERO);
            graph.transfer_holding(node, source, output);
            graph.link(source, node, output);
            match keys.starts.iter().position(|&s| s == node) {
                Some(i) => keys.starts[i] = source,
                None => keys.starts.push(source),
            }
            true
        }

        NodeType::Destination => {
            push_unique(&mut keys.ends, node);
            false
        }

        NodeType::PassThrough => {
            let input = graph.ins(node)[0];
            let output = graph.outs(node)[0];
            let received = graph.carrying(input);
            let forwarded = graph.carrying(output);
            assert_eq!(
                received, forwarded,
                "pass-through {node:?} receives {received} but forwards {forwarded}"
            );
            let upstream = graph.src(input);
            let downstream = graph.dst(output);
            graph.remove_node(node);
            graph.link(upstream, downstream, received);
            true
        }

        NodeType::MergerDestination => {
            let end = graph.add_node(Ratio::ZERO);
            graph.link_splittable(node, end);
            keys.ends.retain(|&e| e != node);
            push_unique(&mut keys.ends, end);
            true
        }

        NodeType::MergeSplitter => {
            let carrying = graph.sum_outs(node);
            let fan = graph.add_node(Ratio::ZERO);
            for link in graph.unlink_all_outs(node) {
                graph.link(fan, link.dst, link.carrying);
            }
            let holding = graph.holding(node);
            assert_eq!(
                carrying, holding,
                "merge-splitter {node:?} forwards {carrying} but holds {holding}"
            );
            graph.link(node, fan, carrying);
            true
        }
    }
}
