//! Criterion benchmarks for the Beltflow planning engine.
//!
//! Three benchmark groups:
//! - `split`: even and factorized splitting of a single large count
//! - `solve`: full single-ordering plans under both strategies
//! - `find_best`: permutation search over a handful of targets

use beltflow_core::arith::{FactorCache, FactorOrder};
use beltflow_core::balancer::Balancer;
use beltflow_core::config::{BalancerConfig, SplitStrategy};
use beltflow_core::graph::FlowGraph;
use beltflow_core::split::{even_split, factorized_split};
use beltflow_core::test_utils::*;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::ops::ControlFlow;

fn balancer(strategy: SplitStrategy) -> Balancer {
    Balancer::new(BalancerConfig {
        strategy,
        ..BalancerConfig::default()
    })
    .unwrap()
}

// ===========================================================================
// Splitting
// ===========================================================================

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");

    for n in [97u64, 1000] {
        group.bench_function(format!("even_{n}"), |b| {
            b.iter(|| {
                let mut g = FlowGraph::new();
                let (_, spacer) = rooted(&mut g, n);
                black_box(even_split(&mut g, spacer, n, 3));
            });
        });

        group.bench_function(format!("factorized_{n}"), |b| {
            let mut cache = FactorCache::new();
            b.iter(|| {
                let mut g = FlowGraph::new();
                let (_, spacer) = rooted(&mut g, n);
                black_box(factorized_split(
                    &mut g,
                    &mut cache,
                    spacer,
                    n,
                    3,
                    FactorOrder::Ascending,
                    None,
                ));
            });
        });
    }

    group.finish();
}

// ===========================================================================
// Single plans
// ===========================================================================

fn bench_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve");
    let targets = ratios(&["7", "5", "3", "2", "1"]);
    let sources = ratios(&["9", "9"]);

    for strategy in [SplitStrategy::Even, SplitStrategy::Factorized] {
        let mut b = balancer(strategy);
        group.bench_function(format!("{strategy:?}").to_lowercase(), |bench| {
            bench.iter(|| black_box(b.solve(&targets, Some(&sources)).unwrap()));
        });
    }

    group.finish();
}

// ===========================================================================
// Permutation search
// ===========================================================================

fn bench_find_best(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_best");
    group.sample_size(10);

    // 4!/2! = 12 target orderings times 2 source orderings.
    let targets = ratios(&["4", "3", "1", "1"]);
    let sources = ratios(&["5", "4"]);
    let mut b = balancer(SplitStrategy::Even);

    group.bench_function("24_orderings", |bench| {
        bench.iter(|| {
            black_box(
                b.find_best(&targets, Some(&sources), |_| ControlFlow::Continue(()))
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_split, bench_solve, bench_find_best);
criterion_main!(benches);
