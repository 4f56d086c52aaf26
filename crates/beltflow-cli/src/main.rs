//! `beltflow`: plan splitter and merger networks from the command line.
//!
//! ```text
//! beltflow plan 30 15 15 --from 60
//! beltflow plan 1 1 3 --from 2 3 --best --format json
//! beltflow split 5 7 --max-split 2
//! beltflow file problem.toml
//! ```

use std::fmt::Write as _;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use beltflow_core::balancer::{Balancer, Plan, PlanError};
use beltflow_core::config::{self, BalancerConfig, BottleneckPolicy, ConfigError, SplitStrategy};
use beltflow_core::graph::NodeType;
use beltflow_core::ratio::Ratio;
use beltflow_core::serialize::SerializeError;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

// ===========================================================================
// Arguments
// ===========================================================================

#[derive(Parser, Debug)]
#[command(name = "beltflow", about = "Plan splitter and merger networks for exact flow ratios")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Log more (-v for debug, -vv for trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Turn sources into the given target quantities.
    Plan(PlanArgs),
    /// Split each quantity into that many unit flows.
    Split(SplitArgs),
    /// Solve a problem file (TOML, JSON or RON).
    File(FileArgs),
}

#[derive(ClapArgs, Debug)]
struct PlanArgs {
    /// Target quantities, e.g. `30 15 15` or `1/3 2/3`.
    #[arg(required = true)]
    targets: Vec<Ratio>,
    /// Source quantities. Defaults to one source carrying the targets' total.
    #[arg(long = "from", num_args = 1..)]
    sources: Option<Vec<Ratio>>,
    /// Try every ordering of targets and sources and keep the smallest plan.
    #[arg(long)]
    best: bool,
    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(ClapArgs, Debug)]
struct SplitArgs {
    /// Whole-number quantities to split.
    #[arg(required = true)]
    targets: Vec<Ratio>,
    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(ClapArgs, Debug)]
struct FileArgs {
    path: PathBuf,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Summary)]
    format: OutputFormat,
}

/// Overrides applied on top of the default or `--config` settings.
#[derive(ClapArgs, Debug)]
struct TuningArgs {
    /// Balancer settings file (TOML, JSON or RON).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    max_split: Option<usize>,
    #[arg(long)]
    max_merge: Option<usize>,
    /// Largest quantity a loop-back link may carry.
    #[arg(long, conflicts_with = "no_bottleneck")]
    threshold: Option<Ratio>,
    /// Leave loop-back bottlenecks in place.
    #[arg(long)]
    no_bottleneck: bool,
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Summary)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Even,
    Factorized,
}

impl From<StrategyArg> for SplitStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Even => SplitStrategy::Even,
            StrategyArg::Factorized => SplitStrategy::Factorized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Summary,
    Json,
}

impl TuningArgs {
    fn build_config(&self) -> Result<BalancerConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => BalancerConfig::load(path)?,
            None => BalancerConfig::default(),
        };
        if let Some(max_split) = self.max_split {
            config.max_split = max_split;
        }
        if let Some(max_merge) = self.max_merge {
            config.max_merge = max_merge;
        }
        if let Some(limit) = self.threshold {
            config.bottleneck = BottleneckPolicy::Threshold(limit);
        }
        if self.no_bottleneck {
            config.bottleneck = BottleneckPolicy::Skip;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy.into();
        }
        Ok(config)
    }
}

// ===========================================================================
// Problem files
// ===========================================================================

/// A saved problem: what to produce, from what, and how.
///
/// ```toml
/// targets = ["30", "15", "15"]
/// sources = ["60"]
/// best = true
///
/// [config]
/// max_split = 2
/// ```
#[derive(Debug, Deserialize)]
struct Problem {
    targets: Vec<Ratio>,
    #[serde(default)]
    sources: Option<Vec<Ratio>>,
    #[serde(default)]
    best: bool,
    #[serde(default)]
    config: BalancerConfig,
}

fn load_problem(path: &Path) -> Result<Problem, CliError> {
    let problem: Problem = config::deserialize_file(path)?;
    problem.config.validate()?;
    Ok(problem)
}

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
}

// ===========================================================================
// Entry point
// ===========================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("beltflow: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Command) -> Result<String, CliError> {
    match command {
        Command::Plan(args) => {
            let mut balancer = Balancer::new(args.tuning.build_config()?)?;
            let plan = solve(
                &mut balancer,
                &args.targets,
                args.sources.as_deref(),
                args.best,
            )?;
            render(&plan, args.tuning.format)
        }
        Command::Split(args) => {
            let mut balancer = Balancer::new(args.tuning.build_config()?)?;
            let plan = balancer.solve_split(&args.targets)?;
            render(&plan, args.tuning.format)
        }
        Command::File(args) => {
            let problem = load_problem(&args.path)?;
            info!(path = %args.path.display(), targets = problem.targets.len(), "loaded problem");
            let mut balancer = Balancer::new(problem.config)?;
            let plan = solve(
                &mut balancer,
                &problem.targets,
                problem.sources.as_deref(),
                problem.best,
            )?;
            render(&plan, args.format)
        }
    }
}

fn solve(
    balancer: &mut Balancer,
    targets: &[Ratio],
    sources: Option<&[Ratio]>,
    best: bool,
) -> Result<Plan, PlanError> {
    if !best {
        return balancer.solve(targets, sources);
    }
    balancer.find_best(targets, sources, |progress| {
        debug!(%progress, "trying ordering");
        ControlFlow::Continue(())
    })
}

// ===========================================================================
// Output
// ===========================================================================

fn render(plan: &Plan, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => Ok(plan.serialize().to_json()?),
        OutputFormat::Summary => Ok(summary(plan)),
    }
}

fn join(values: &[Ratio]) -> String {
    values
        .iter()
        .map(Ratio::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn summary(plan: &Plan) -> String {
    let graph = plan.graph();
    let reachable = graph.collect_reachable(plan.starts());
    let count = |wanted: NodeType| {
        reachable
            .nodes
            .iter()
            .filter(|&&n| graph.node_type(n) == wanted)
            .count()
    };
    let uneven = reachable
        .nodes
        .iter()
        .filter(|&&n| graph.node_type(n) == NodeType::Splitter && !graph.splits_evenly(n))
        .count();

    let mut out = String::new();
    let _ = writeln!(out, "sources:   {}", join(&plan.supplies()));
    let _ = writeln!(out, "outputs:   {}", join(&plan.outputs()));
    let _ = writeln!(out, "splitters: {}", count(NodeType::Splitter));
    if uneven > 0 {
        let _ = writeln!(out, "  uneven:  {uneven}");
    }
    let _ = writeln!(out, "mergers:   {}", count(NodeType::Merger));
    let _ = write!(
        out,
        "size:      {} ({} nodes, {} links)",
        reachable.size(),
        reachable.nodes.len(),
        reachable.links.len()
    );
    out
}
