//! Splitting a flow into equal unit flows.
//!
//! Two strategies are provided:
//!
//! - [`even_split`]: factor the output count by the smallest splitter size
//!   that divides it; when none does, add one unit through a loopback and
//!   retry. Loopback nodes are threaded downward as a pool of pending
//!   outputs that a deeper splitter feeds instead of making a new leaf.
//! - [`factorized_split`]: round the output count up to the next number
//!   whose prime factors all fit a splitter, split by those factors, and
//!   leave the surplus as "starved" feeders that
//!   [`finish_starved_mergers`] later satisfies from spare leaves.
//!
//! Both leave every returned leaf holding exactly `holding(root) / outputs`.

use crate::arith::{FactorCache, FactorOrder};
use crate::graph::FlowGraph;
use crate::id::NodeId;
use crate::merge::merge_group;
use crate::ratio::Ratio;
use std::collections::HashSet;
use tracing::trace;

/// Leaves produced by a split, plus any feeders still waiting for input.
#[derive(Debug, Clone, Default)]
pub struct SplitOutcome {
    pub leaves: Vec<NodeId>,
    /// Feeder nodes with negative holding: each is linked into a merger
    /// that still needs that much flow routed back from the leaves.
    pub starved: Vec<NodeId>,
}

// ---------------------------------------------------------------------------
// Even split
// ---------------------------------------------------------------------------

/// Split `root`'s holding across exactly `outputs` new leaves, no splitter
/// having more than `max_split` outputs.
///
/// # Panics
///
/// If `outputs < 2` or `max_split < 2`.
pub fn even_split(graph: &mut FlowGraph, root: NodeId, outputs: u64, max_split: u64) -> Vec<NodeId> {
    assert!(max_split >= 2, "max_split must be at least 2, got {max_split}");
    let unit = graph.holding(root) / Ratio::from(outputs);
    let mut splitter = EvenSplitter {
        graph,
        unit,
        max_split,
        leaves: Vec::with_capacity(outputs as usize),
    };
    splitter.split(root, outputs, Vec::new());
    trace!(outputs, leaves = splitter.leaves.len(), "even split done");
    splitter.leaves
}

struct EvenSplitter<'g> {
    graph: &'g mut FlowGraph,
    /// Quantity each final leaf receives.
    unit: Ratio,
    max_split: u64,
    leaves: Vec<NodeId>,
}

impl EvenSplitter<'_> {
    /// Split `node` into `into` outputs, `pending` of which are loopback
    /// nodes further up that must be fed instead of new leaves.
    fn split(&mut self, node: NodeId, into: u64, mut pending: Vec<NodeId>) {
        assert!(into >= 2, "cannot split {node:?} into {into} outputs");

        if into <= self.max_split {
            let fresh = into.saturating_sub(pending.len() as u64);
            for _ in 0..fresh {
                let leaf = self.graph.add_node(Ratio::ZERO);
                let share = self.graph.split_into(node, into);
                self.graph.link(node, leaf, share);
                self.leaves.push(leaf);
            }
            for back in pending {
                let share = self.graph.split_into(node, into);
                self.graph.link(node, back, share);
            }
            return;
        }

        if let Some(factor) = FactorCache::smallest_factor_within(into, self.max_split) {
            let per_child = into / factor;
            for _ in 0..factor {
                let child = self.graph.add_node(Ratio::ZERO);
                let share = self.graph.split_into(node, factor);
                self.graph.link(node, child, share);
                let take = (per_child as usize).min(pending.len());
                let share_of_pending: Vec<NodeId> = pending.drain(..take).collect();
                self.split(child, per_child, share_of_pending);
            }
            return;
        }

        // No splitter size divides `into`: loop one extra unit back into
        // `node` and split the enlarged flow instead.
        pending.push(node);
        let child = self.graph.add_node(Ratio::ZERO);
        let enlarged = self.graph.holding(node) + self.unit;
        self.graph.link(node, child, enlarged);
        self.split(child, into + 1, pending);
    }
}

// ---------------------------------------------------------------------------
// Fixed factors
// ---------------------------------------------------------------------------

/// Split `root` by each factor in turn, producing `product(factors)` leaves.
/// An empty factor list returns `[root]`.
///
/// # Panics
///
/// If any factor is below 2.
pub fn split_by_factors(graph: &mut FlowGraph, root: NodeId, factors: &[u64]) -> Vec<NodeId> {
    let Some((&factor, rest)) = factors.split_first() else {
        return vec![root];
    };
    assert!(factor >= 2, "split factor must be at least 2, got {factor}");

    let share = graph.split_into(root, factor);
    let children: Vec<NodeId> = (0..factor)
        .map(|_| {
            let child = graph.add_node(Ratio::ZERO);
            graph.link(root, child, share);
            child
        })
        .collect();

    let mut leaves = Vec::new();
    for child in children {
        leaves.extend(split_by_factors(graph, child, rest));
    }
    leaves
}

// ---------------------------------------------------------------------------
// Factorized split
// ---------------------------------------------------------------------------

/// Split `root` into `outputs` leaves via the next `max_split`-smooth count.
///
/// The surplus `smooth - outputs` is carried as loop units. At each level
/// the surplus is divided along with the flow while the next factor divides
/// it; where it stops dividing (or once `merge_level` is reached), a starved
/// feeder is attached that must later be satisfied by
/// [`finish_starved_mergers`].
pub fn factorized_split(
    graph: &mut FlowGraph,
    cache: &mut FactorCache,
    root: NodeId,
    outputs: u64,
    max_split: u64,
    order: FactorOrder,
    merge_level: Option<usize>,
) -> SplitOutcome {
    assert!(outputs >= 1, "cannot split {root:?} into zero outputs");
    if outputs == 1 {
        return SplitOutcome {
            leaves: vec![root],
            starved: Vec::new(),
        };
    }
    if outputs <= max_split {
        return SplitOutcome {
            leaves: split_by_factors(graph, root, &[outputs]),
            starved: Vec::new(),
        };
    }

    let smooth = cache.next_smooth(outputs, max_split);
    let factors = cache.prime_factors(smooth, order);
    let loops = smooth - outputs;
    trace!(outputs, smooth, loops, ?factors, "factorized split");

    if loops == 0 {
        return SplitOutcome {
            leaves: split_by_factors(graph, root, &factors),
            starved: Vec::new(),
        };
    }

    let unit = graph.holding(root) / Ratio::from(outputs);
    let mut splitter = FactorizedSplitter {
        graph,
        unit,
        merge_level,
        starved: Vec::new(),
    };
    let leaves = splitter.split(root, loops, &factors, 0);
    SplitOutcome {
        leaves,
        starved: splitter.starved,
    }
}

struct FactorizedSplitter<'g> {
    graph: &'g mut FlowGraph,
    unit: Ratio,
    merge_level: Option<usize>,
    starved: Vec<NodeId>,
}

impl FactorizedSplitter<'_> {
    fn split(&mut self, node: NodeId, loops: u64, splits: &[u64], level: usize) -> Vec<NodeId> {
        let Some(&factor) = splits.first() else {
            return vec![node];
        };
        if loops == 0 {
            return split_by_factors(self.graph, node, splits);
        }

        let at_merge_level = self.merge_level.is_some_and(|depth| depth <= level);
        if at_merge_level || loops % factor != 0 {
            // The surplus stops dividing here: feed it in as a starved
            // merger input and split the enlarged flow below a spacer.
            let feeder = self.graph.add_node(Ratio::ZERO);
            self.graph
                .link(feeder, node, self.unit * Ratio::from(loops));
            self.starved.push(feeder);
            let spacer = self.graph.add_node(Ratio::ZERO);
            self.graph.link_splittable(node, spacer);
            return split_by_factors(self.graph, spacer, splits);
        }

        let children = split_by_factors(self.graph, node, &[factor]);
        let mut leaves = Vec::new();
        for child in children {
            leaves.extend(self.split(child, loops / factor, &splits[1..], level + 1));
        }
        leaves
    }
}

/// Satisfy each starved feeder from `leaves` and return the leaves left over.
///
/// For each feeder, leaves below its merger are collected depth-first until
/// their total equals the feeder's deficit; they are merged into one node
/// which replaces the feeder as the merger's loop input.
///
/// # Panics
///
/// If the leaves below a merger cannot cover its deficit exactly.
pub fn finish_starved_mergers(
    graph: &mut FlowGraph,
    starved: &[NodeId],
    leaves: Vec<NodeId>,
    max_merge: usize,
) -> Vec<NodeId> {
    let mut remaining = leaves;

    for &feeder in starved {
        let Some(&feed) = graph.outs(feeder).first() else {
            continue;
        };
        let merger = graph.dst(feed);
        let need = -graph.holding(feeder);
        let Some(&below) = graph.outs(merger).first() else {
            continue;
        };

        let available: HashSet<NodeId> = remaining.iter().copied().collect();
        let mut visited = HashSet::new();
        let mut collected = Vec::new();
        let got = collect_leaves(
            graph,
            graph.dst(below),
            need,
            &available,
            &mut visited,
            &mut collected,
        );
        assert_eq!(
            got, need,
            "starved merger {merger:?} needs {need} but only {got} is reachable"
        );

        let taken: HashSet<NodeId> = collected.iter().copied().collect();
        remaining.retain(|leaf| !taken.contains(leaf));

        let merged = merge_group(graph, collected, max_merge);
        graph.unlink(feed);
        graph.remove_node(feeder);
        graph.link_splittable(merged, merger);
        trace!(?merger, %need, "starved merger satisfied");
    }
    remaining
}

/// Depth-first collection of available leaves below `node`, up to `need`.
/// Returns the quantity collected.
fn collect_leaves(
    graph: &FlowGraph,
    node: NodeId,
    need: Ratio,
    available: &HashSet<NodeId>,
    visited: &mut HashSet<NodeId>,
    out: &mut Vec<NodeId>,
) -> Ratio {
    if !need.is_positive() || !visited.insert(node) {
        return Ratio::ZERO;
    }
    if graph.outs(node).is_empty() {
        let holding = graph.holding(node);
        if available.contains(&node) && holding <= need {
            out.push(node);
            return holding;
        }
        return Ratio::ZERO;
    }

    let mut got = Ratio::ZERO;
    for child in graph.children(node) {
        if got >= need {
            break;
        }
        got += collect_leaves(graph, child, need - got, available, visited, out);
    }
    got
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crate::validation::is_conservation_legal;

    // -----------------------------------------------------------------------
    // Test 1: Even split yields n unit leaves
    // -----------------------------------------------------------------------
    #[test]
    fn even_split_unit_leaves() {
        for n in [2u64, 3, 4, 5, 6, 7, 8, 9, 13, 15, 32, 60] {
            for max_split in [2u64, 3] {
                let mut g = FlowGraph::new();
                let (root, spacer) = rooted(&mut g, n);
                let leaves = even_split(&mut g, spacer, n, max_split);

                assert_eq!(leaves.len() as u64, n, "n={n} max_split={max_split}");
                assert!(leaves.iter().all(|&l| g.holding(l) == Ratio::ONE));
                assert!(leaves.iter().all(|&l| g.outs(l).is_empty()));
                assert!(is_conservation_legal(&g, &[root]));
                assert!(max_fan_out(&g, &[root]) <= max_split as usize);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Test 2: Fractional units
    // -----------------------------------------------------------------------
    #[test]
    fn even_split_fractional_unit() {
        let mut g = FlowGraph::new();
        let (root, spacer) = rooted(&mut g, 60);
        let leaves = even_split(&mut g, spacer, 7, 3);
        assert_eq!(leaves.len(), 7);
        let unit = Ratio::new(60, 7);
        assert!(leaves.iter().all(|&l| g.holding(l) == unit));
        assert!(is_conservation_legal(&g, &[root]));
    }

    // -----------------------------------------------------------------------
    // Test 3: Prime counts above the fan-out need a loopback
    // -----------------------------------------------------------------------
    #[test]
    fn even_split_prime_uses_loopback() {
        let mut g = FlowGraph::new();
        let (root, spacer) = rooted(&mut g, 5);
        even_split(&mut g, spacer, 5, 3);
        // The spacer merges the main input with the looped unit.
        assert_eq!(g.ins(spacer).len(), 2);
        assert_eq!(g.sum_ins(spacer), Ratio::from(6));
        assert!(is_conservation_legal(&g, &[root]));
    }

    #[test]
    #[should_panic(expected = "cannot split")]
    fn even_split_into_one_panics() {
        let mut g = FlowGraph::new();
        let root = g.add_node(Ratio::ONE);
        even_split(&mut g, root, 1, 3);
    }

    // -----------------------------------------------------------------------
    // Test 4: Fixed factors
    // -----------------------------------------------------------------------
    #[test]
    fn split_by_factors_multiplies_out() {
        let mut g = FlowGraph::new();
        let root = g.add_node(Ratio::from(12));
        let leaves = split_by_factors(&mut g, root, &[2, 3]);
        assert_eq!(leaves.len(), 6);
        assert!(leaves.iter().all(|&l| g.holding(l) == Ratio::from(2)));
        assert_eq!(g.outs(root).len(), 2);

        let single = g.add_node(Ratio::ONE);
        assert_eq!(split_by_factors(&mut g, single, &[]), vec![single]);
    }

    #[test]
    #[should_panic(expected = "at least 2")]
    fn split_by_factor_one_panics() {
        let mut g = FlowGraph::new();
        let root = g.add_node(Ratio::ONE);
        split_by_factors(&mut g, root, &[1]);
    }

    // -----------------------------------------------------------------------
    // Test 5: Factorized split plus finisher
    // -----------------------------------------------------------------------
    #[test]
    fn factorized_split_finishes_starved_mergers() {
        for (outputs, max_split) in [(5u64, 3u64), (7, 2), (10, 3), (11, 3), (13, 3), (9, 3)] {
            let mut g = FlowGraph::new();
            let mut cache = FactorCache::new();
            let (root, spacer) = rooted(&mut g, outputs);
            let outcome = factorized_split(
                &mut g,
                &mut cache,
                spacer,
                outputs,
                max_split,
                FactorOrder::Ascending,
                None,
            );
            let leaves = finish_starved_mergers(&mut g, &outcome.starved, outcome.leaves, 3);

            assert_eq!(leaves.len() as u64, outputs, "outputs={outputs}");
            assert!(leaves.iter().all(|&l| g.holding(l) == Ratio::ONE));
            assert!(
                is_conservation_legal(&g, &[root]),
                "outputs={outputs} max_split={max_split}"
            );
            for feeder in outcome.starved {
                assert!(!g.contains_node(feeder));
            }
        }
    }

    #[test]
    fn factorized_split_smooth_counts_need_no_feeders() {
        let mut g = FlowGraph::new();
        let mut cache = FactorCache::new();
        let (_, spacer) = rooted(&mut g, 12);
        let outcome = factorized_split(
            &mut g,
            &mut cache,
            spacer,
            12,
            3,
            FactorOrder::Descending,
            None,
        );
        assert_eq!(outcome.leaves.len(), 12);
        assert!(outcome.starved.is_empty());
        // Descending order splits by 3 first.
        assert_eq!(g.outs(spacer).len(), 3);
    }

    #[test]
    fn factorized_split_merge_level_forces_feeder_at_top() {
        let mut g = FlowGraph::new();
        let mut cache = FactorCache::new();
        let (root, spacer) = rooted(&mut g, 10);
        let outcome = factorized_split(
            &mut g,
            &mut cache,
            spacer,
            10,
            3,
            FactorOrder::Ascending,
            Some(0),
        );
        assert_eq!(outcome.starved.len(), 1);
        assert_eq!(g.holding(outcome.starved[0]), Ratio::from(-2));
        let leaves = finish_starved_mergers(&mut g, &outcome.starved, outcome.leaves, 3);
        assert_eq!(leaves.len(), 10);
        assert!(is_conservation_legal(&g, &[root]));
    }
}
