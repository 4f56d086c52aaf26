//! Loopback bottleneck detection and repair.
//!
//! A loopback merges the main input with a unit routed back from below, so
//! the link leaving the merger carries more than the root ever produced.
//! [`replace_loopback_bottleneck`] moves the merge below the splitter: the
//! main input feeds the splitter directly and each splitter output is merged
//! with an equal share of the loop.
//!
//! ```text
//!   main ─┐                      main ── splitter ─┬─ m1 ── child1
//!         merger ── splitter          loop ────────┼─ m1
//!   loop ─┘          ├─ child1                     ├─ m2 ── child2
//!                    └─ child2                     └─ m2
//! ```

use crate::graph::FlowGraph;
use crate::id::{LinkId, NodeId};
use crate::ratio::Ratio;
use std::collections::HashSet;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a flagged link could not be rewritten.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BottleneckError {
    #[error("link {0:?} no longer exists")]
    LinkGone(LinkId),
    #[error("{0:?} is not a two-input merger with a single output")]
    NotLoopbackMerger(NodeId),
    #[error("{0:?} does not split evenly into two or more outputs")]
    NotEvenSplitter(NodeId),
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Every link reachable from `roots` carrying more than the threshold.
///
/// With no explicit threshold each root uses its own total output. Nodes are
/// visited once across all roots, so a region shared by two roots is checked
/// against whichever root reaches it first.
pub fn find_loopback_bottlenecks(
    graph: &FlowGraph,
    roots: &[NodeId],
    threshold: Option<Ratio>,
) -> Vec<LinkId> {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut found = Vec::new();

    for &root in roots {
        let limit = threshold.unwrap_or_else(|| graph.sum_outs(root));
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if !graph.contains_node(node) || !seen.insert(node) {
                continue;
            }
            let outs = graph.outs(node);
            found.extend(outs.iter().copied().filter(|&l| graph.carrying(l) > limit));
            stack.extend(outs.iter().rev().map(|&l| graph.dst(l)));
        }
    }
    found
}

// ---------------------------------------------------------------------------
// Repair
// ---------------------------------------------------------------------------

/// Rewrite one merger → splitter loopback so no link carries the merged total.
///
/// The merger's first input is taken as the main path (loop inputs are
/// always attached after it).
pub fn replace_loopback_bottleneck(graph: &mut FlowGraph, link: LinkId) -> Result<(), BottleneckError> {
    let (merger, splitter) = graph
        .get_link(link)
        .map(|l| (l.src, l.dst))
        .ok_or(BottleneckError::LinkGone(link))?;

    if graph.ins(merger).len() != 2 || graph.outs(merger).len() != 1 {
        return Err(BottleneckError::NotLoopbackMerger(merger));
    }
    if graph.outs(splitter).len() < 2 || !graph.splits_evenly(splitter) {
        return Err(BottleneckError::NotEvenSplitter(splitter));
    }

    // Main path bypasses the merger.
    let main_in = graph.ins(merger)[0];
    let main = graph.unlink(main_in).ok_or(BottleneckError::LinkGone(main_in))?;
    graph.unlink(link);
    graph.link(main.src, splitter, main.carrying);

    let children: Vec<NodeId> = graph
        .unlink_all_outs(splitter)
        .into_iter()
        .map(|l| l.dst)
        .collect();
    let count = children.len() as u64;
    let each_main = graph.split_into(splitter, count);
    let each_loop = graph.split_into(merger, count);

    for child in children {
        let joint = graph.add_node(Ratio::ZERO);
        graph.link(splitter, joint, each_main);
        graph.link(merger, joint, each_loop);
        graph.link_splittable(joint, child);
    }
    Ok(())
}

/// Find and rewrite bottlenecks until none remain or none can be rewritten.
///
/// Flagged links are handled deepest first; nested loopbacks on the same
/// path surface again on the next round once the inner one is rewritten.
/// Returns the number of rewrites applied.
pub fn resolve_bottlenecks(graph: &mut FlowGraph, roots: &[NodeId], threshold: Option<Ratio>) -> usize {
    let mut applied = 0;
    let max_rounds = graph.link_count().max(1);

    for _ in 0..max_rounds {
        let found = find_loopback_bottlenecks(graph, roots, threshold);
        if found.is_empty() {
            break;
        }

        let mut progressed = false;
        for &link in found.iter().rev() {
            match replace_loopback_bottleneck(graph, link) {
                Ok(()) => {
                    applied += 1;
                    progressed = true;
                }
                Err(BottleneckError::LinkGone(_)) => {}
                Err(err) => debug!(%err, "bottleneck not rewritten this round"),
            }
        }
        if !progressed {
            warn!(
                remaining = found.len(),
                "bottlenecks left in place: no loopback pattern to rewrite"
            );
            break;
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::even_split;
    use crate::test_utils::*;
    use crate::validation::is_conservation_legal;

    // -----------------------------------------------------------------------
    // Test 1: A root-level loopback is flagged
    // -----------------------------------------------------------------------
    #[test]
    fn root_loopback_is_flagged() {
        let mut g = FlowGraph::new();
        let (root, spacer) = rooted(&mut g, 5);
        even_split(&mut g, spacer, 5, 3);

        let found = find_loopback_bottlenecks(&g, &[root], None);
        assert_eq!(found.len(), 1);
        assert_eq!(g.src(found[0]), spacer);
        assert_eq!(g.carrying(found[0]), Ratio::from(6));
    }

    // -----------------------------------------------------------------------
    // Test 2: Explicit threshold
    // -----------------------------------------------------------------------
    #[test]
    fn explicit_threshold() {
        let mut g = FlowGraph::new();
        let (root, spacer) = rooted(&mut g, 4);
        even_split(&mut g, spacer, 4, 2);
        assert!(find_loopback_bottlenecks(&g, &[root], None).is_empty());
        // Root → spacer carries 4; everything else carries at most 2.
        assert_eq!(find_loopback_bottlenecks(&g, &[root], Some(Ratio::from(3))).len(), 1);
        assert_eq!(find_loopback_bottlenecks(&g, &[root], Some(Ratio::ONE)).len(), 3);
    }

    // -----------------------------------------------------------------------
    // Test 3: Rewriting removes every bottleneck and keeps conservation
    // -----------------------------------------------------------------------
    #[test]
    fn rewrite_is_idempotent() {
        for (n, max_split) in [(5u64, 3u64), (7, 3), (11, 3), (13, 3), (5, 2), (7, 2), (9, 2)] {
            let mut g = FlowGraph::new();
            let (root, spacer) = rooted(&mut g, n);
            let leaves = even_split(&mut g, spacer, n, max_split);

            let flagged = find_loopback_bottlenecks(&g, &[root], None);
            assert!(!flagged.is_empty(), "n={n} max_split={max_split}");
            let applied = resolve_bottlenecks(&mut g, &[root], None);
            assert!(applied >= 1);

            assert!(
                find_loopback_bottlenecks(&g, &[root], None).is_empty(),
                "n={n} max_split={max_split}"
            );
            assert!(is_conservation_legal(&g, &[root]));
            assert!(leaves.iter().all(|&l| g.holding(l) == Ratio::ONE));
        }
    }

    // -----------------------------------------------------------------------
    // Test 4: Single rewrite shape
    // -----------------------------------------------------------------------
    #[test]
    fn rewrite_shape() {
        let mut g = FlowGraph::new();
        let (root, spacer) = rooted(&mut g, 5);
        even_split(&mut g, spacer, 5, 3);
        let link = find_loopback_bottlenecks(&g, &[root], None)[0];
        let splitter = g.dst(link);

        replace_loopback_bottleneck(&mut g, link).unwrap();
        // Root now feeds the splitter directly at its own rate.
        let direct = g.outs(root)[0];
        assert_eq!(g.dst(direct), splitter);
        assert_eq!(g.carrying(direct), Ratio::from(5));
        // Splitter and old merger each feed one joint per child.
        assert_eq!(g.outs(splitter).len(), 2);
        assert_eq!(g.outs(spacer).len(), 2);
        assert_eq!(g.ins(spacer).len(), 1);
        assert!(is_conservation_legal(&g, &[root]));
    }

    // -----------------------------------------------------------------------
    // Test 5: Precondition failures are reported
    // -----------------------------------------------------------------------
    #[test]
    fn rejects_non_loopback_links() {
        let mut g = FlowGraph::new();
        let (root, spacer) = rooted(&mut g, 4);
        even_split(&mut g, spacer, 4, 2);
        let top = g.outs(root)[0];
        assert_eq!(
            replace_loopback_bottleneck(&mut g, top),
            Err(BottleneckError::NotLoopbackMerger(root))
        );

        g.unlink(top);
        assert_eq!(
            replace_loopback_bottleneck(&mut g, top),
            Err(BottleneckError::LinkGone(top))
        );
    }
}
