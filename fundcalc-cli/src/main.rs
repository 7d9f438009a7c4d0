//! FundCalc CLI — run calculation jobs and list model presets.
//!
//! Commands:
//! - `run` — calculate a provider population against a built-in model
//!   preset, reading providers and datasets from CSV or generating a
//!   synthetic population
//! - `presets` — list the built-in model presets

mod inputs;
mod presets;
mod synthetic;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

use fundcalc_runner::{
    CalculationRun, Collaborators, JsonDirectoryResultSink, JsonFileAggregationCache,
    Orchestrator, ResultCache, RunConfig, RunError, RunMode, RunSummary,
};

use crate::inputs::{load_inputs, RunInputs};
use crate::presets::ModelPreset;

#[derive(Parser)]
#[command(
    name = "fundcalc",
    about = "FundCalc CLI — batch funding calculation runner"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calculate a provider population against a model preset.
    Run {
        /// Path to a TOML run config. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Model preset (see `fundcalc presets`).
        #[arg(long)]
        preset: String,

        /// Specification id the results are recorded under.
        #[arg(long)]
        specification: String,

        /// Job id. Generated from the current time when omitted.
        #[arg(long)]
        job_id: Option<String>,

        /// Providers CSV (requires --datasets).
        #[arg(long, conflicts_with = "synthetic")]
        providers: Option<PathBuf>,

        /// Directory holding one `<RelationshipName>.csv` per relationship.
        #[arg(long, conflicts_with = "synthetic")]
        datasets: Option<PathBuf>,

        /// Generate this many synthetic providers instead of reading CSV.
        #[arg(long)]
        synthetic: Option<usize>,

        /// Seed for --synthetic.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Output directory; persisted results go to `<output-dir>/<job-id>/`.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Back the aggregation and provider result caches with JSON files here.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// List the built-in model presets.
    Presets,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            preset,
            specification,
            job_id,
            providers,
            datasets,
            synthetic,
            seed,
            output_dir,
            cache_dir,
        } => run_cmd(RunArgs {
            config,
            preset,
            specification,
            job_id,
            providers,
            datasets,
            synthetic,
            seed,
            output_dir,
            cache_dir,
        }),
        Commands::Presets => {
            list_presets();
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct RunArgs {
    config: Option<PathBuf>,
    preset: String,
    specification: String,
    job_id: Option<String>,
    providers: Option<PathBuf>,
    datasets: Option<PathBuf>,
    synthetic: Option<usize>,
    seed: u64,
    output_dir: PathBuf,
    cache_dir: Option<PathBuf>,
}

fn run_cmd(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => {
            let config = RunConfig::default();
            config.validate()?;
            config
        }
    };

    let report = execute_run(&args, &config)?;
    print_summary(&report.summary, config.mode);
    if let Some(dir) = &report.results_dir {
        println!("Results saved to: {}", dir.display());
    }
    Ok(())
}

/// A finished `run`, with the directory persisted results were written to.
struct RunReport {
    summary: RunSummary,
    results_dir: Option<PathBuf>,
}

fn execute_run(args: &RunArgs, config: &RunConfig) -> Result<RunReport> {
    let preset = ModelPreset::from_name(&args.preset)?;
    let model = preset.build(&args.specification)?;
    let inputs = load_run_inputs(args, preset)?;
    info!(
        preset = preset.name(),
        providers = inputs.providers.len(),
        "inputs loaded"
    );
    let (providers, sources) = inputs.into_sources(model);

    let job_id = args
        .job_id
        .clone()
        .unwrap_or_else(|| format!("job-{}", chrono::Utc::now().format("%Y%m%d%H%M%S")));
    let sink = Arc::new(JsonDirectoryResultSink::new(args.output_dir.join(&job_id)));
    let mut collaborators = Collaborators::new(Arc::new(sources), sink.clone());
    if let Some(dir) = &args.cache_dir {
        collaborators = collaborators
            .with_aggregation_cache(Arc::new(JsonFileAggregationCache::new(
                dir.join("aggregations"),
            )?))
            .with_result_cache(ResultCache::new(dir.join("results"))?);
    }

    let run = CalculationRun {
        job_id,
        specification_id: args.specification.clone(),
        providers,
    };

    let orchestrator = Orchestrator::new(collaborators);
    match orchestrator.run(config, &run) {
        Ok(summary) => Ok(RunReport {
            summary,
            results_dir: persisted_dir(config, &sink),
        }),
        Err(RunError::CalculationExceptions(summary)) => {
            print_summary(&summary, config.mode);
            if let Some(dir) = persisted_dir(config, &sink) {
                println!("Results saved to: {}", dir.display());
            }
            bail!("{}", summary.outcome)
        }
        Err(err) => {
            let retriable = err.is_retriable();
            Err(err).with_context(|| {
                format!("calculation run '{}' failed (retriable: {retriable})", run.job_id)
            })
        }
    }
}

fn persisted_dir(config: &RunConfig, sink: &JsonDirectoryResultSink) -> Option<PathBuf> {
    (config.mode == RunMode::Persist && sink.dir().exists()).then(|| sink.dir().to_path_buf())
}

fn load_run_inputs(args: &RunArgs, preset: ModelPreset) -> Result<RunInputs> {
    let schema = preset.schema();
    match (args.synthetic, &args.providers, &args.datasets) {
        (Some(count), _, _) => {
            if count == 0 {
                bail!("--synthetic must be positive");
            }
            Ok(synthetic::generate(&schema, count, args.seed))
        }
        (None, Some(providers), Some(datasets)) => load_inputs(providers, datasets, &schema),
        (None, Some(_), None) => bail!("--providers requires --datasets"),
        (None, None, _) => bail!("one of --providers or --synthetic is required"),
    }
}

fn print_summary(summary: &RunSummary, mode: RunMode) {
    println!();
    println!("=== Calculation Run ===");
    println!("Job:            {}", summary.job_id);
    println!("Specification:  {}", summary.specification_id);
    println!("Mode:           {mode:?}");
    println!("Batches:        {}", summary.batches);
    println!("Processed:      {}", summary.items_processed);
    println!("Succeeded:      {}", summary.items_succeeded);
    println!("Failed:         {}", summary.items_failed);
    println!("Results:        {}", summary.provider_results);
    println!();
    println!("{}", summary.outcome);
}

fn list_presets() {
    for preset in ModelPreset::all() {
        println!("{:<16} {}", preset.name(), preset.description());
    }
}
