//! Merging leaf flows into target flows.
//!
//! [`smart_merge`] slices the leaves into consecutive groups, one per target,
//! and merges each group with [`merge_group`]. Before merging, a group is
//! pruned: whenever every leaf below some splitter belongs to the group, the
//! whole subtree is taken down and the splitter itself joins the group in
//! place of its leaves. Pruning repeats from the start after every change,
//! since collapsing one subtree can complete another above it.

use crate::graph::FlowGraph;
use crate::id::{LinkId, NodeId};
use crate::ratio::Ratio;
use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// Merge consecutive groups of `leaves` into one node per target.
///
/// `targets[i]` is the number of leaves in group `i`; the groups are taken
/// in order. Returns the terminal node of each group.
///
/// # Panics
///
/// If the targets do not account for every leaf, or `max_merge < 2`.
pub fn smart_merge(
    graph: &mut FlowGraph,
    leaves: &[NodeId],
    targets: &[u64],
    max_merge: usize,
) -> Vec<NodeId> {
    let wanted: u64 = targets.iter().sum();
    assert_eq!(
        wanted,
        leaves.len() as u64,
        "targets take {wanted} leaves but {} were given",
        leaves.len()
    );

    let mut ends = Vec::with_capacity(targets.len());
    let mut start = 0usize;
    for &count in targets {
        let end = start + count as usize;
        ends.push(merge_group(graph, leaves[start..end].to_vec(), max_merge));
        start = end;
    }
    ends
}

/// Merge `members` into a single node, pruning fully-consumed subtrees first.
///
/// A lone member (after pruning) is returned as is.
pub fn merge_group(graph: &mut FlowGraph, mut members: Vec<NodeId>, max_merge: usize) -> NodeId {
    assert!(max_merge >= 2, "max_merge must be at least 2, got {max_merge}");
    assert!(!members.is_empty(), "cannot merge an empty group");

    prune_excess(graph, &mut members);
    if let [single] = members[..] {
        return single;
    }
    bounded_merge(graph, members.into(), max_merge)
}

// ---------------------------------------------------------------------------
// Pruning
// ---------------------------------------------------------------------------

/// A subtree below `root` whose every leaf is a group member.
#[derive(Debug, Default)]
struct ExcessRegion {
    members: Vec<NodeId>,
    inner: Vec<NodeId>,
    links: Vec<LinkId>,
}

fn prune_excess(graph: &mut FlowGraph, members: &mut Vec<NodeId>) {
    loop {
        let keep: HashSet<NodeId> = members.iter().copied().collect();
        let found = members.iter().find_map(|&member| {
            let &up = graph.ins(member).first()?;
            let parent = graph.src(up);
            excess_region(graph, parent, &keep).map(|region| (parent, region))
        });
        let Some((parent, region)) = found else {
            break;
        };

        trace!(
            ?parent,
            replaced = region.members.len(),
            inner = region.inner.len(),
            "pruning excess subtree"
        );
        for &link in &region.links {
            graph.unlink(link);
        }
        for &node in region.inner.iter().chain(&region.members) {
            graph.remove_node(node);
        }
        let replaced: HashSet<NodeId> = region.members.into_iter().collect();
        members.retain(|m| !replaced.contains(m));
        members.push(parent);
    }
}

/// The region hanging below `root`, if it ends only in `keep` nodes and is
/// fed only through `root`.
fn excess_region(graph: &FlowGraph, root: NodeId, keep: &HashSet<NodeId>) -> Option<ExcessRegion> {
    if keep.contains(&root) || graph.ins(root).is_empty() {
        return None;
    }

    let mut visited: HashSet<NodeId> = HashSet::from([root]);
    let mut region = ExcessRegion::default();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        for &link in graph.outs(node) {
            region.links.push(link);
            let dst = graph.dst(link);
            if !visited.insert(dst) {
                continue;
            }
            let outs = graph.outs(dst);
            if keep.contains(&dst) {
                if !outs.is_empty() {
                    return None;
                }
                region.members.push(dst);
            } else if outs.is_empty() || graph.ins(dst).is_empty() {
                // Reaches a leaf outside the group.
                return None;
            } else {
                region.inner.push(dst);
                stack.push(dst);
            }
        }
    }

    if region.members.is_empty() {
        return None;
    }
    let closed = region
        .inner
        .iter()
        .chain(&region.members)
        .all(|&n| graph.ins(n).iter().all(|&l| visited.contains(&graph.src(l))));
    closed.then_some(region)
}

// ---------------------------------------------------------------------------
// Bounded merge
// ---------------------------------------------------------------------------

/// Merge the pool into one node, no node taking more than `max_merge` inputs.
///
/// Each round reuses the first pooled node that still has a free input
/// (avoiding an extra hop) or else creates a new one, feeds it as many pooled
/// nodes as it has room for, and returns it to the back of the pool.
fn bounded_merge(graph: &mut FlowGraph, mut pool: VecDeque<NodeId>, max_merge: usize) -> NodeId {
    loop {
        let target = pool
            .iter()
            .position(|&n| graph.ins(n).len() < max_merge)
            .and_then(|i| pool.remove(i))
            .unwrap_or_else(|| graph.add_node(Ratio::ZERO));

        let free = max_merge.saturating_sub(graph.ins(target).len());
        for _ in 0..free {
            let Some(source) = pool.pop_front() else {
                break;
            };
            graph.link_splittable(source, target);
        }

        if pool.is_empty() {
            return target;
        }
        pool.push_back(target);
    }
}
