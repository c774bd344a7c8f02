//! OxBench CLI Library
//!
//! The front-end for benchmark binaries. Call [`run`] from your binary's
//! `main()` with the stubs you compiled:
//!
//! ```ignore
//! fn main() -> anyhow::Result<()> {
//!     let stubs = build_stubs()?; // descriptors + bindings -> CompiledStub
//!     oxbench_cli::run(&stubs)
//! }
//! ```
//!
//! The process exits nonzero when an iteration fails under
//! `--fail-on-error`, so CI can gate on benchmark health.

mod config;
mod format;
mod planner;

pub use config::{HarnessConfig, RunnerConfig};
pub use format::{format_metric, HumanFormat};
pub use planner::{build_plan, Plan};

use anyhow::Context;
use clap::{Parser, Subcommand};
use oxbench_core::{BenchmarkConfig, BenchmarkMode, ExecutorKind, OutputFormat, ProfilerHook};
use oxbench_gen::{dense_display_names, CompiledStub};
use regex::Regex;

/// OxBench CLI arguments.
#[derive(Parser, Debug, Default)]
#[command(name = "oxbench")]
#[command(author, version, about = "OxBench - microbenchmark harness for Rust")]
pub struct Cli {
    /// Optional subcommand (List, Run); defaults to Run.
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Filter benchmarks by regex pattern.
    #[arg(default_value = ".*")]
    pub filter: String,

    /// Measurement iterations.
    #[arg(long, short = 'i')]
    pub iterations: Option<usize>,

    /// Warmup iterations.
    #[arg(long, short = 'w')]
    pub warmup_iterations: Option<usize>,

    /// Worker thread count.
    #[arg(long, short = 't')]
    pub threads: Option<usize>,

    /// Thread-group sizes, comma separated (e.g. "2,2").
    #[arg(long)]
    pub thread_groups: Option<String>,

    /// Time budget per iteration (e.g. "1s", "500ms").
    #[arg(long)]
    pub iteration_time: Option<String>,

    /// Invocations per worker for single-shot runs.
    #[arg(long)]
    pub batch_size: Option<u64>,

    /// Pool strategy: fixed, cached, forkjoin, shared-forkjoin.
    #[arg(long)]
    pub executor: Option<String>,

    /// Restrict runs to one mode: throughput, average-time, sample-time,
    /// single-shot-time, all.
    #[arg(long)]
    pub mode: Option<String>,

    /// Stop at the first failed iteration and exit nonzero.
    #[arg(long, short = 'f')]
    pub fail_on_error: bool,

    /// Verbose output.
    #[arg(short, long)]
    pub verbose: bool,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the selected benchmarks without running them.
    List,
    /// Run benchmarks (default).
    Run,
}

/// Parse arguments from the environment and run.
pub fn run(stubs: &[CompiledStub]) -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("oxbench=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("oxbench=info")
            .init();
    }

    run_with_cli(&cli, stubs)
}

/// Run with pre-parsed arguments; logging setup is the caller's business.
pub fn run_with_cli(cli: &Cli, stubs: &[CompiledStub]) -> anyhow::Result<()> {
    let file = HarnessConfig::discover().unwrap_or_default();
    let config = resolve_config(cli, &file)?;

    match cli.command {
        Some(Commands::List) => list_benchmarks(cli, stubs),
        Some(Commands::Run) | None => run_benchmarks(cli, stubs, &config),
    }
}

/// Merge file defaults and CLI overrides into the runtime configuration.
pub fn resolve_config(cli: &Cli, file: &HarnessConfig) -> anyhow::Result<BenchmarkConfig> {
    let runner = &file.runner;

    let thread_groups = match &cli.thread_groups {
        Some(groups) => parse_thread_groups(groups)?,
        None => runner.thread_groups.clone(),
    };
    let executor = match &cli.executor {
        Some(name) => name
            .parse::<ExecutorKind>()
            .map_err(|e| anyhow::anyhow!(e))?,
        None => runner.executor,
    };
    let benchmark_types = match &cli.mode {
        Some(name) => vec![name
            .parse::<BenchmarkMode>()
            .map_err(|e| anyhow::anyhow!(e))?],
        None => Vec::new(),
    };
    let iteration_time = HarnessConfig::parse_duration(
        cli.iteration_time.as_deref().unwrap_or(&runner.iteration_time),
    )?;
    let shutdown_timeout = HarnessConfig::parse_duration(&runner.shutdown_timeout)?;

    let config = BenchmarkConfig {
        max_threads: cli.threads.unwrap_or(runner.threads),
        thread_groups,
        warmup_iterations: cli.warmup_iterations.unwrap_or(runner.warmup_iterations),
        measurement_iterations: cli.iterations.unwrap_or(runner.measurement_iterations),
        iteration_time,
        batch_size: cli.batch_size.unwrap_or(runner.batch_size),
        fail_on_error: cli.fail_on_error || runner.fail_on_error,
        executor,
        benchmark_types,
        shutdown_timeout,
    };
    config.validate().context("invalid benchmark configuration")?;
    Ok(config)
}

fn parse_thread_groups(groups: &str) -> anyhow::Result<Vec<usize>> {
    groups
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .with_context(|| format!("invalid thread group size: {part:?}"))
        })
        .collect()
}

fn selected<'a>(cli: &Cli, stubs: &'a [CompiledStub]) -> anyhow::Result<Plan<'a>> {
    let re = Regex::new(&cli.filter).with_context(|| format!("invalid filter: {}", cli.filter))?;
    Ok(build_plan(stubs.iter(), Some(&re)))
}

fn list_benchmarks(cli: &Cli, stubs: &[CompiledStub]) -> anyhow::Result<()> {
    let plan = selected(cli, stubs)?;
    let ids: Vec<&str> = plan.stubs.iter().map(|s| s.id()).collect();
    let dense = dense_display_names(&ids);
    for id in &ids {
        match dense.get(*id) {
            Some(short) => println!("{short}"),
            None => println!("{id}"),
        }
    }
    Ok(())
}

fn run_benchmarks(
    cli: &Cli,
    stubs: &[CompiledStub],
    config: &BenchmarkConfig,
) -> anyhow::Result<()> {
    let plan = selected(cli, stubs)?;
    tracing::debug!(selected = plan.stubs.len(), "running benchmarks");
    let mut sink = HumanFormat::new(std::io::stdout(), cli.verbose);
    let mut profilers: Vec<Box<dyn ProfilerHook>> = Vec::new();

    for stub in &plan.stubs {
        sink.begin_benchmark(stub.id());
        match stub.run(config, &mut sink, &mut profilers) {
            Ok(runs) => {
                for run in &runs {
                    let score = run
                        .score()
                        .map(|m| format_metric(&m))
                        .unwrap_or_else(|| "n/a".to_string());
                    println!("{} ({}): {score}", stub.id(), run.mode.label());
                }
            }
            Err(e) => {
                sink.exception(&e);
                if config.fail_on_error {
                    return Err(anyhow::anyhow!("benchmark {} failed: {e}", stub.id()));
                }
            }
        }
    }
    Ok(())
}
