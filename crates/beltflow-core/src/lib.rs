//! Beltflow Core -- synthesis of splitter/merger flow networks.
//!
//! Given source quantities and target quantities with the same total, the
//! engine builds a small directed graph of junctions that redistributes the
//! sources into exactly the targets. Splitters divide one input into at most
//! `max_split` equal outputs; mergers combine at most `max_merge` inputs.
//! All quantities are exact rationals.
//!
//! # Pipeline
//!
//! [`balancer::Balancer::solve`] runs, in order:
//!
//! 1. **Normalize** -- [`arith::normalize_ratio`] reduces all quantities to
//!    their minimal integer ratio.
//! 2. **Split** -- [`split::even_split`] or [`split::factorized_split`]
//!    turns each source into unit flows.
//! 3. **Merge** -- [`split::finish_starved_mergers`] then
//!    [`merge::smart_merge`] gather unit flows into the targets.
//! 4. **Bottlenecks** -- [`bottleneck::resolve_bottlenecks`] rewrites
//!    loopback links that carry more than their root produces.
//! 5. **Canonicalize** -- [`cleanup::canonicalize`] splices out trivial
//!    nodes and identifies sources and destinations.
//!
//! ```rust
//! use beltflow_core::balancer::Balancer;
//! use beltflow_core::config::BalancerConfig;
//! use beltflow_core::ratio::Ratio;
//!
//! let mut balancer = Balancer::new(BalancerConfig::default()).unwrap();
//! let targets: Vec<Ratio> = ["30", "15", "15"].iter().map(|t| t.parse().unwrap()).collect();
//! let plan = balancer.solve(&targets, Some(&[Ratio::from(60)])).unwrap();
//! assert!(plan.is_conservation_legal());
//! assert_eq!(plan.outputs().len(), 3);
//! ```
//!
//! # Key Types
//!
//! - [`ratio::Ratio`] -- Exact rational quantity.
//! - [`graph::FlowGraph`] -- Arena of nodes and links with conservation
//!   bookkeeping.
//! - [`balancer::Plan`] -- A finished canonical graph with its key nodes.
//! - [`serialize::SerializedGraph`] -- Transport form (JSON or bitcode).

pub mod arith;
pub mod balancer;
pub mod bottleneck;
pub mod cleanup;
pub mod config;
pub mod graph;
pub mod id;
pub mod merge;
pub mod perm;
pub mod ratio;
pub mod serialize;
pub mod split;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
