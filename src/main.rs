//! Command-line interface for index-bench
//!
//! # Usage Examples
//!
//! ```bash
//! # Full pipeline: generate TPC-H data at scale factor 10, load every
//! # replica, create the candidate indexes, and run the workload
//! index-bench h all \
//!   --scale-factor 10 \
//!   --replicas replicas.csv \
//!   --index-config config.csv \
//!   --routing-table routes.csv
//!
//! # Benchmark only, using pregenerated test-set queries and a fixed
//! # shuffle seed for a reproducible run order
//! index-bench h run \
//!   --copy-test-set --copy-source /proj/qdina-PG0/dina-set/h/test \
//!   --rng-seed 42
//!
//! # TPC-DS with plan capture, dropping the indexes afterwards
//! index-bench ds run --capture-plans --drop-indexes
//! ```

use anyhow::Context;
use clap::{Parser, ValueEnum};
use index_bench::benchmark::{Benchmark, BenchmarkOptions, RunResult};
use index_bench::config::{
    load_index_plan, load_partial_templates, load_replicas, load_routes, BenchmarkKind,
};
use index_bench::generator::{Generator, TpcdsGenerator, TpchGenerator};
use index_bench::loader::load_test_set;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "index-bench")]
#[command(
    about = "Empirical benchmark for candidate index configurations on partitioned PostgreSQL clusters"
)]
#[command(version)]
struct Cli {
    /// Which TPC benchmark should be run? TPC-[H] or TPC-[DS]?
    #[arg(value_enum)]
    benchmark: BenchmarkKind,

    /// Which phases of the benchmark should be run? If all is present, run all.
    #[arg(value_enum, required = true, num_args = 1..)]
    phase: Vec<Phase>,

    /// The TPC-H/DS scale factor
    #[arg(short, long, default_value_t = 10)]
    scale_factor: u32,

    /// The path to the TPC tools directory (dbgen or dsdgen)
    #[arg(short = 'g', long)]
    dbgen_dir: Option<PathBuf>,

    /// The path where the generated data should be stored
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// The CSV file with replica connection details
    #[arg(short, long, default_value = "replicas.csv")]
    replicas: PathBuf,

    /// The path to the index configuration
    #[arg(short, long, default_value = "config.csv")]
    index_config: PathBuf,

    /// The path to the routing table
    #[arg(short = 't', long, default_value = "routes.csv")]
    routing_table: PathBuf,

    /// The templates used in the training partition (can be empty/nonexistent)
    #[arg(short, long, default_value = "partial.csv")]
    partial_templates: PathBuf,

    /// Use pregenerated queries from an existing test set instead of
    /// generated queries
    #[arg(short, long)]
    copy_test_set: bool,

    /// Where the test set is stored
    #[arg(long, default_value = "/proj/qdina-PG0/dina-set/h/test")]
    copy_source: PathBuf,

    /// Seed for the data generator and the workload shuffle; omitting it
    /// gives a fresh order every run
    #[arg(short = 'e', long)]
    rng_seed: Option<u64>,

    /// Replacement query templates to install before generation (TPC-H only)
    #[arg(long)]
    query_templates: Option<PathBuf>,

    /// Capture an EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON) plan per query
    #[arg(long)]
    capture_plans: bool,

    /// Benchmark the cluster as-is without creating the candidate indexes
    #[arg(long)]
    skip_indexes: bool,

    /// Drop the candidate indexes after the run completes
    #[arg(long)]
    drop_indexes: bool,

    /// Enable verbose log output
    #[arg(short, long)]
    verbose: bool,
}

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Phase {
    Generate,
    Load,
    Run,
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let phases: Vec<Phase> = if cli.phase.contains(&Phase::All) {
        vec![Phase::Generate, Phase::Load, Phase::Run]
    } else {
        cli.phase.clone()
    };

    let replicas = load_replicas(&cli.replicas).context("Failed to load replica descriptors")?;
    anyhow::ensure!(!replicas.is_empty(), "No replicas configured");

    let routes = load_routes(&cli.routing_table).context("Failed to load routing table")?;
    let plan = load_index_plan(&cli.index_config, cli.benchmark, replicas.len())
        .context("Failed to load index configuration")?;
    let partial = load_partial_templates(&cli.partial_templates)
        .context("Failed to load partial template list")?;

    let tools_dir = cli.dbgen_dir.clone().unwrap_or_else(|| match cli.benchmark {
        BenchmarkKind::H => PathBuf::from("./tpc-h/dbgen"),
        BenchmarkKind::Ds => PathBuf::from("./tpc-ds/tools"),
    });

    let generator: Box<dyn Generator> = match cli.benchmark {
        BenchmarkKind::H => {
            let mut generator = TpchGenerator::new(
                replicas.clone(),
                tools_dir,
                cli.data_dir.clone(),
                cli.scale_factor,
            );
            if let Some(templates) = cli.query_templates.clone() {
                generator = generator.with_query_templates(templates);
            }
            Box::new(generator)
        }
        BenchmarkKind::Ds => Box::new(TpcdsGenerator::new(
            replicas.clone(),
            tools_dir,
            cli.data_dir.clone(),
            cli.scale_factor,
        )),
    };

    if phases.contains(&Phase::Generate) {
        info!(
            "Generating {} data, scale factor {}",
            cli.benchmark, cli.scale_factor
        );
        generator.generate(cli.rng_seed).await?;
    } else {
        info!("Skipping {} data generation", cli.benchmark);
    }

    if phases.contains(&Phase::Load) {
        info!("Loading {} data", cli.benchmark);
        generator.load_database().await?;
    } else {
        info!(
            "Skipping {} database load. It must already be present in the database!",
            cli.benchmark
        );
    }

    if phases.contains(&Phase::Run) {
        let (queries, templates) = if cli.copy_test_set {
            load_test_set(&cli.copy_source)?
        } else {
            generator.read_data().await?
        };

        let options = BenchmarkOptions {
            create_indexes: !cli.skip_indexes,
            capture_plans: cli.capture_plans,
            shuffle_seed: cli.rng_seed,
        };

        let mut benchmark =
            Benchmark::new(queries, templates, replicas, routes, plan, options).await?;
        let result = benchmark.run().await?;

        report(cli.benchmark, cli.scale_factor, &result, &partial);

        if cli.drop_indexes {
            if cli.skip_indexes {
                anyhow::bail!("--drop-indexes requires the indexes to have been created");
            }
            benchmark.destroy_indexes().await?;
        }
    }

    Ok(())
}

/// Log the human-readable results summary: total runtime, the optional
/// training-partition runtime, and per-template runtimes (1-based).
fn report(benchmark: BenchmarkKind, scale_factor: u32, result: &RunResult, partial: &[usize]) {
    let total = result.total_elapsed.as_secs_f64();
    let partial_total: f64 = partial
        .iter()
        .filter_map(|&t| result.per_template_times.get(t))
        .sum();

    info!("{}", "=".repeat(30));
    info!("{benchmark} Performance Benchmark Results");
    info!("");
    info!("Total Runtime                = {total:.3}");
    if !partial.is_empty() {
        info!("Training Partition Runtime   = {partial_total:.3}");
    }
    info!("");
    for (template, time) in result.per_template_times.iter().enumerate() {
        info!("Q{}                     = {time:.3}", template + 1);
    }
    info!("");
    info!("Scale factor: {scale_factor}");
    info!("{}", "=".repeat(30));
}
