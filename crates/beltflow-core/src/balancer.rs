//! Plan orchestration.
//!
//! A [`Balancer`] runs the whole pipeline for one set of inputs:
//!
//! 1. **Validate** -- non-empty, positive, equal totals.
//! 2. **Normalize** -- targets and sources to their minimal integer ratio.
//! 3. **Split** -- one root per source, each split into its unit count.
//! 4. **Merge** -- starved mergers first, then the leaves into targets.
//! 5. **Bottlenecks** -- rewrite loopback links per the configured policy.
//! 6. **Canonicalize** -- key nodes and minimal structure.
//!
//! [`Balancer::find_best`] repeats this for every distinct ordering of the
//! targets and sources and keeps the smallest plan.

use crate::arith::{FactorCache, normalize_ratio};
use crate::bottleneck::resolve_bottlenecks;
use crate::cleanup::{KeyNodes, canonicalize};
use crate::config::{BalancerConfig, ConfigError, SplitStrategy};
use crate::graph::FlowGraph;
use crate::id::NodeId;
use crate::merge::smart_merge;
use crate::perm::{MultisetPermutations, count_multiset_permutations};
use crate::ratio::Ratio;
use crate::serialize::{SerializedGraph, serialize};
use crate::split::{SplitOutcome, even_split, factorized_split, finish_starved_mergers};
use crate::validation;
use std::fmt;
use std::ops::ControlFlow;
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Input errors a caller can report back to the user.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("no targets given")]
    EmptyTargets,
    #[error("no sources given")]
    EmptySources,
    #[error("{role} {index} must be positive, got {value}")]
    NonPositive {
        role: &'static str,
        index: usize,
        value: Ratio,
    },
    #[error("targets total {targets} but sources total {sources}")]
    TotalMismatch { targets: Ratio, sources: Ratio },
    #[error("split count {0} is not a whole number")]
    NonInteger(Ratio),
    #[error("plan needs {requested} outputs, above the limit of {limit}")]
    TooManyOutputs { requested: u64, limit: u64 },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("quantities too large to combine exactly")]
    Overflow,
    #[error("search cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A finished, canonical flow graph.
#[derive(Debug, Clone)]
pub struct Plan {
    graph: FlowGraph,
    keys: KeyNodes,
}

impl Plan {
    /// The canonical flow graph.
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// One source node per supply, in input order.
    pub fn starts(&self) -> &[NodeId] {
        &self.keys.starts
    }

    /// One destination node per target, in input order.
    pub fn ends(&self) -> &[NodeId] {
        &self.keys.ends
    }

    /// Reachable nodes plus links; the measure [`Balancer::find_best`]
    /// minimizes.
    pub fn size(&self) -> usize {
        self.graph.collect_reachable(&self.keys.starts).size()
    }

    /// Supply leaving each start node.
    pub fn supplies(&self) -> Vec<Ratio> {
        self.keys
            .starts
            .iter()
            .map(|&n| self.graph.sum_outs(n))
            .collect()
    }

    /// Quantity arriving at each end node.
    pub fn outputs(&self) -> Vec<Ratio> {
        self.keys
            .ends
            .iter()
            .map(|&n| self.graph.holding(n))
            .collect()
    }

    /// Flatten the reachable part of the plan for storage.
    pub fn serialize(&self) -> SerializedGraph {
        serialize(&self.graph, &self.keys.starts)
    }

    /// Whether every reachable node conserves flow.
    pub fn is_conservation_legal(&self) -> bool {
        validation::is_conservation_legal(&self.graph, &self.keys.starts)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Position in a permutation search. Displays as `(current/total)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: u128,
    pub total: u128,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}/{})", self.current, self.total)
    }
}

// ---------------------------------------------------------------------------
// Balancer
// ---------------------------------------------------------------------------

/// Runs the planning pipeline. Holds the factor cache for its lifetime, so
/// repeated plans (as in a permutation search) share memoized primes.
#[derive(Debug, Clone)]
pub struct Balancer {
    config: BalancerConfig,
    cache: FactorCache,
}

impl Balancer {
    /// Create a balancer, rejecting an invalid configuration.
    pub fn new(config: BalancerConfig) -> Result<Self, PlanError> {
        config.validate()?;
        Ok(Self {
            config,
            cache: FactorCache::new(),
        })
    }

    /// The validated configuration this balancer plans with.
    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Plan how to turn `sources` into `targets`. Sources default to a single
    /// source carrying the targets' total.
    pub fn solve(&mut self, targets: &[Ratio], sources: Option<&[Ratio]>) -> Result<Plan, PlanError> {
        let sources = validate_inputs(targets, sources)?;
        debug!(?targets, ?sources, "planning");

        let mut quantities = targets.to_vec();
        quantities.extend_from_slice(&sources);
        let normalized = normalize_ratio(&quantities).ok_or(PlanError::Overflow)?;
        let (target_counts, source_counts) = normalized.split_at(targets.len());
        self.check_output_limit(source_counts)?;

        let mut graph = FlowGraph::new();
        let roots: Vec<NodeId> = sources.iter().map(|&s| graph.add_node(s)).collect();

        let split = self.split_roots(&mut graph, &roots, source_counts);
        let leaves = finish_starved_mergers(
            &mut graph,
            &split.starved,
            split.leaves,
            self.config.max_merge,
        );
        debug!(leaves = leaves.len(), "merging");
        smart_merge(&mut graph, &leaves, target_counts, self.config.max_merge);

        Ok(self.finish(graph, &roots))
    }

    /// Split each target into that many equal unit flows, one root per
    /// target.
    pub fn solve_split(&mut self, targets: &[Ratio]) -> Result<Plan, PlanError> {
        validate_inputs(targets, None)?;
        let counts = targets
            .iter()
            .map(|t| {
                t.to_integer()
                    .and_then(|n| u64::try_from(n).ok())
                    .ok_or(PlanError::NonInteger(*t))
            })
            .collect::<Result<Vec<u64>, _>>()?;
        self.check_output_limit(&counts)?;
        debug!(?counts, "planning split");

        let mut graph = FlowGraph::new();
        let roots: Vec<NodeId> = targets.iter().map(|&t| graph.add_node(t)).collect();
        let split = self.split_roots(&mut graph, &roots, &counts);
        finish_starved_mergers(
            &mut graph,
            &split.starved,
            split.leaves,
            self.config.max_merge,
        );

        Ok(self.finish(graph, &roots))
    }

    /// Solve every distinct ordering of targets and sources and keep the
    /// plan with the fewest nodes plus links (the first found on ties).
    ///
    /// `progress` is called before each attempt; returning
    /// [`ControlFlow::Break`] abandons the search with
    /// [`PlanError::Cancelled`].
    pub fn find_best<F>(
        &mut self,
        targets: &[Ratio],
        sources: Option<&[Ratio]>,
        mut progress: F,
    ) -> Result<Plan, PlanError>
    where
        F: FnMut(Progress) -> ControlFlow<()>,
    {
        let sources = validate_inputs(targets, sources)?;
        let total = count_multiset_permutations(targets)
            .saturating_mul(count_multiset_permutations(&sources));
        debug!(total, "searching orderings");

        let mut best: Option<(usize, Plan)> = None;
        let mut current: u128 = 0;
        for target_order in MultisetPermutations::new(targets) {
            for source_order in MultisetPermutations::new(&sources) {
                current += 1;
                if progress(Progress { current, total }).is_break() {
                    debug!(current, total, "search cancelled");
                    return Err(PlanError::Cancelled);
                }

                let plan = self.solve(&target_order, Some(&source_order))?;
                let size = plan.size();
                trace!(current, total, size, "ordering solved");
                if best.as_ref().is_none_or(|(smallest, _)| size < *smallest) {
                    debug!(size, ?target_order, ?source_order, "new best plan");
                    best = Some((size, plan));
                }
            }
        }

        best.map(|(_, plan)| plan).ok_or(PlanError::EmptyTargets)
    }

    // -----------------------------------------------------------------------
    // Pipeline steps
    // -----------------------------------------------------------------------

    fn check_output_limit(&self, counts: &[u64]) -> Result<(), PlanError> {
        let requested = counts
            .iter()
            .try_fold(0u64, |acc, &c| acc.checked_add(c))
            .unwrap_or(u64::MAX);
        if requested > self.config.max_outputs {
            return Err(PlanError::TooManyOutputs {
                requested,
                limit: self.config.max_outputs,
            });
        }
        Ok(())
    }

    /// Give each root a spacer and split the spacer into its count.
    fn split_roots(&mut self, graph: &mut FlowGraph, roots: &[NodeId], counts: &[u64]) -> SplitOutcome {
        let mut outcome = SplitOutcome::default();
        let max_split = self.config.max_split as u64;

        for (&root, &count) in roots.iter().zip(counts) {
            let spacer = graph.add_node(Ratio::ZERO);
            graph.link_splittable(root, spacer);
            if count == 1 {
                outcome.leaves.push(spacer);
                continue;
            }
            match self.config.strategy {
                SplitStrategy::Even => {
                    outcome
                        .leaves
                        .extend(even_split(graph, spacer, count, max_split));
                }
                SplitStrategy::Factorized => {
                    let part = factorized_split(
                        graph,
                        &mut self.cache,
                        spacer,
                        count,
                        max_split,
                        self.config.factor_order(),
                        self.config.merge_level,
                    );
                    outcome.leaves.extend(part.leaves);
                    outcome.starved.extend(part.starved);
                }
            }
        }
        outcome
    }

    fn finish(&self, mut graph: FlowGraph, roots: &[NodeId]) -> Plan {
        if let Some(threshold) = self.config.bottleneck.threshold() {
            let rewrites = resolve_bottlenecks(&mut graph, roots, threshold);
            debug!(rewrites, "bottlenecks resolved");
        }
        let keys = canonicalize(&mut graph, roots);
        let islands = graph.remove_islands(&keys.starts);
        debug!(
            nodes = graph.node_count(),
            links = graph.link_count(),
            islands,
            "plan ready"
        );
        Plan { graph, keys }
    }
}

/// Check the inputs and return the sources to use.
fn validate_inputs(targets: &[Ratio], sources: Option<&[Ratio]>) -> Result<Vec<Ratio>, PlanError> {
    if targets.is_empty() {
        return Err(PlanError::EmptyTargets);
    }
    check_positive("target", targets)?;
    let target_total = Ratio::checked_sum(targets).ok_or(PlanError::Overflow)?;

    let Some(sources) = sources else {
        return Ok(vec![target_total]);
    };
    if sources.is_empty() {
        return Err(PlanError::EmptySources);
    }
    check_positive("source", sources)?;
    let source_total = Ratio::checked_sum(sources).ok_or(PlanError::Overflow)?;
    if source_total != target_total {
        return Err(PlanError::TotalMismatch {
            targets: target_total,
            sources: source_total,
        });
    }
    Ok(sources.to_vec())
}

fn check_positive(role: &'static str, values: &[Ratio]) -> Result<(), PlanError> {
    match values.iter().position(|v| !v.is_positive()) {
        Some(index) => Err(PlanError::NonPositive {
            role,
            index,
            value: values[index],
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BottleneckPolicy;
    use crate::test_utils::*;

    fn balancer() -> Balancer {
        Balancer::new(BalancerConfig::default()).unwrap()
    }

    // -----------------------------------------------------------------------
    // Test 1: Validation errors
    // -----------------------------------------------------------------------
    #[test]
    fn rejects_invalid_inputs() {
        let mut b = balancer();
        assert!(matches!(b.solve(&[], None), Err(PlanError::EmptyTargets)));
        assert!(matches!(
            b.solve(&ratios(&["1"]), Some(&[])),
            Err(PlanError::EmptySources)
        ));
        assert!(matches!(
            b.solve(&ratios(&["1", "0"]), None),
            Err(PlanError::NonPositive { role: "target", index: 1, .. })
        ));
        assert!(matches!(
            b.solve(&ratios(&["2"]), Some(&ratios(&["3", "-1"]))),
            Err(PlanError::NonPositive { role: "source", index: 1, .. })
        ));
        assert!(matches!(
            b.solve(&ratios(&["2"]), Some(&ratios(&["3"]))),
            Err(PlanError::TotalMismatch { .. })
        ));
        assert!(matches!(
            b.solve_split(&ratios(&["2.5"])),
            Err(PlanError::NonInteger(_))
        ));
    }

    #[test]
    fn rejects_quantities_too_large_to_sum() {
        let mut b = balancer();
        let huge = ratios(&["1/99999999999999999999", "1/99999999999999999997"]);
        assert!(matches!(b.solve(&huge, None), Err(PlanError::Overflow)));
        assert!(matches!(
            b.solve(&ratios(&["1"]), Some(&huge)),
            Err(PlanError::Overflow)
        ));
        assert!(matches!(
            b.find_best(&huge, None, |_| ControlFlow::Continue(())),
            Err(PlanError::Overflow)
        ));
        // Large shared denominators still plan exactly.
        let fine = ratios(&["1/99999999999999999999", "2/99999999999999999999"]);
        let plan = b.solve(&fine, None).unwrap();
        assert_eq!(sorted(plan.outputs()), fine);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = BalancerConfig {
            max_merge: 1,
            ..BalancerConfig::default()
        };
        assert!(matches!(Balancer::new(config), Err(PlanError::Config(_))));
    }

    #[test]
    fn output_limit() {
        let config = BalancerConfig {
            max_outputs: 10,
            ..BalancerConfig::default()
        };
        let mut b = Balancer::new(config).unwrap();
        assert!(b.solve(&ratios(&["1", "9"]), None).is_ok());
        assert!(matches!(
            b.solve(&ratios(&["1", "10"]), None),
            Err(PlanError::TooManyOutputs { requested: 11, limit: 10 })
        ));
    }

    // -----------------------------------------------------------------------
    // Test 2: End-to-end plan
    // -----------------------------------------------------------------------
    #[test]
    fn thirty_fifteen_fifteen_from_sixty() {
        let mut b = balancer();
        let plan = b
            .solve(&ratios(&["30", "15", "15"]), Some(&ratios(&["60"])))
            .unwrap();

        assert_eq!(plan.supplies().into_iter().sum::<Ratio>(), Ratio::from(60));
        assert_eq!(sorted(plan.outputs()), ratios(&["15", "15", "30"]));
        assert!(plan.is_conservation_legal());
    }

    #[test]
    fn default_source_is_target_total() {
        let mut b = balancer();
        let plan = b.solve(&ratios(&["0.75", "0.25"]), None).unwrap();
        assert_eq!(plan.supplies(), ratios(&["1"]));
        assert_eq!(sorted(plan.outputs()), ratios(&["0.25", "0.75"]));
        assert!(plan.is_conservation_legal());
    }

    #[test]
    fn several_sources() {
        let mut b = balancer();
        let plan = b
            .solve(&ratios(&["0.75", "0.25"]), Some(&ratios(&["0.5", "0.5"])))
            .unwrap();
        assert_eq!(sorted(plan.supplies()), ratios(&["0.5", "0.5"]));
        assert_eq!(sorted(plan.outputs()), ratios(&["0.25", "0.75"]));
        assert!(plan.is_conservation_legal());
    }

    #[test]
    fn factorized_strategy_plans() {
        for strategy in [SplitStrategy::Even, SplitStrategy::Factorized] {
            let config = BalancerConfig {
                strategy,
                ..BalancerConfig::default()
            };
            let mut b = Balancer::new(config).unwrap();
            let plan = b.solve(&ratios(&["2", "3"]), None).unwrap();
            assert_eq!(sorted(plan.outputs()), ratios(&["2", "3"]), "{strategy:?}");
            assert!(plan.is_conservation_legal(), "{strategy:?}");
        }
    }

    #[test]
    fn bottleneck_policies() {
        for bottleneck in [
            BottleneckPolicy::Skip,
            BottleneckPolicy::Auto,
            BottleneckPolicy::Threshold(Ratio::from(5)),
        ] {
            let config = BalancerConfig {
                bottleneck,
                ..BalancerConfig::default()
            };
            let mut b = Balancer::new(config).unwrap();
            let plan = b.solve(&ratios(&["1", "1", "1", "1", "1"]), None).unwrap();
            assert_eq!(plan.outputs().len(), 5);
            assert!(plan.is_conservation_legal());
            let over = plan
                .graph()
                .links()
                .any(|(_, l)| l.carrying > Ratio::from(5));
            assert_eq!(over, bottleneck == BottleneckPolicy::Skip, "{bottleneck:?}");
        }
    }

    // -----------------------------------------------------------------------
    // Test 3: Split-only plans
    // -----------------------------------------------------------------------
    #[test]
    fn split_only() {
        let mut b = balancer();
        let plan = b.solve_split(&ratios(&["3", "1", "5"])).unwrap();
        assert_eq!(plan.starts().len(), 3);
        assert_eq!(plan.outputs().len(), 9);
        assert!(plan.outputs().iter().all(|&o| o == Ratio::ONE));
        assert!(plan.is_conservation_legal());
    }

    // -----------------------------------------------------------------------
    // Test 4: Permutation search
    // -----------------------------------------------------------------------
    #[test]
    fn find_best_reports_progress_and_keeps_smallest() {
        let mut b = balancer();
        let targets = ratios(&["1", "2", "2"]);
        let mut seen = Vec::new();
        let best = b
            .find_best(&targets, None, |p| {
                seen.push(p.to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(seen, vec!["(1/3)", "(2/3)", "(3/3)"]);

        for order in [["1", "2", "2"], ["2", "1", "2"], ["2", "2", "1"]] {
            let plan = b.solve(&ratios(&order), None).unwrap();
            assert!(best.size() <= plan.size());
        }
        assert_eq!(sorted(best.outputs()), ratios(&["1", "2", "2"]));
    }

    #[test]
    fn find_best_can_be_cancelled() {
        let mut b = balancer();
        let mut calls = 0;
        let result = b.find_best(&ratios(&["1", "2", "3"]), None, |p| {
            calls += 1;
            if p.current == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert!(matches!(result, Err(PlanError::Cancelled)));
        assert_eq!(calls, 2);
    }
}
