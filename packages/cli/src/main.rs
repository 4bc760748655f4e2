#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the crime risk model.
//!
//! `crime_risk run --source chicago` loads every layer of the study area,
//! builds the feature table, cross-validates the four model variants, and
//! writes the result tables. Without a subcommand the user picks a source
//! interactively and the run uses default settings.
//!
//! Uses `indicatif-log-bridge` (via [`crime_risk_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use crime_risk_cli_utils::{IndicatifProgress, MultiProgress, select_source, source_label};
use crime_risk_ingest::{IngestOptions, load_study_data, registry};
use crime_risk_ingest_models::StudySource;
use crime_risk_pipeline::{
    ModelConfig, PipelineError, RunReport, RunSummary, assemble, run_models, write_outputs,
};
use dialoguer::Confirm;

#[derive(Parser)]
#[command(name = "crime_risk", about = "Geospatial crime risk model")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a study area, fit the models, and write the result tables
    Run(RunArgs),
    /// List the configured study areas
    Sources,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Source identifier (e.g., "chicago")
    #[arg(long)]
    source: String,
    /// Model configuration TOML. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory the result tables are written to
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,
    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value = "120")]
    timeout_secs: u64,
    /// Maximum rows fetched per Socrata layer (for testing)
    #[arg(long)]
    limit: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = crime_risk_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run(args)) => {
            let source = registry::source(&args.source)?;
            run(&multi, &source, args).await?;
        }
        Some(Commands::Sources) => list_sources(),
        None => interactive(&multi).await?,
    }

    Ok(())
}

fn list_sources() {
    let sources = registry::all_sources();
    println!("{} study areas:", sources.len());
    for source in &sources {
        println!(
            "  {:<12} {} ({} risk factor layers{})",
            source.id(),
            source.name(),
            source.risk_factors.len(),
            if source.holdout_incidents.is_some() {
                ", holdout year"
            } else {
                ""
            }
        );
    }
}

async fn interactive(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    println!("Crime Risk Model");
    println!();

    let sources = registry::all_sources();
    let Some(source) = select_source(&sources)? else {
        return Ok(());
    };

    let args = RunArgs {
        source: source.id().to_string(),
        config: None,
        output_dir: PathBuf::from("output").join(source.id()),
        timeout_secs: 120,
        limit: None,
    };

    let proceed = Confirm::new()
        .with_prompt(format!(
            "Run {} with default settings, writing to {}?",
            source_label(source),
            args.output_dir.display()
        ))
        .default(true)
        .interact()?;
    if !proceed {
        return Ok(());
    }

    run(multi, source, args).await
}

async fn run(
    multi: &MultiProgress,
    source: &StudySource,
    args: RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let config = match &args.config {
        Some(path) => ModelConfig::load(path)?,
        None => ModelConfig::default(),
    };

    let options = IngestOptions {
        timeout: Duration::from_secs(args.timeout_secs),
        limit: args.limit,
    };

    let steps = IndicatifProgress::steps_bar(multi, "crime_risk", 3);
    steps.set_message(format!("Loading {}", source.name()));
    let study = load_study_data(source, &options).await?;
    steps.inc(1);

    let folds = IndicatifProgress::folds_bar(multi, "Cross-validation");
    let output_dir = args.output_dir.clone();
    let stage_steps = steps.clone();

    let (report, summary) = tokio::task::spawn_blocking(
        move || -> Result<(RunReport, RunSummary), PipelineError> {
            stage_steps.set_message("Assembling features".to_string());
            let assembly = assemble(&study, &config)?;
            if !assembly.dropped.is_empty() {
                log::warn!(
                    "Dropped {} cells with incomplete features",
                    assembly.dropped.len()
                );
            }
            stage_steps.inc(1);

            stage_steps.set_message("Fitting models".to_string());
            let report = run_models(&study, &assembly, &config, folds.as_ref())?;
            stage_steps.inc(1);

            let summary =
                write_outputs(&output_dir, &study.source_id, &assembly, &report, &config)?;
            Ok((report, summary))
        },
    )
    .await??;

    steps.finish(format!("Finished in {:.1}s", start.elapsed().as_secs_f64()));
    print_report(&report, &summary, &args.output_dir);

    Ok(())
}

fn print_report(report: &RunReport, summary: &RunSummary, output_dir: &Path) {
    println!();
    println!(
        "{}: {} of {} cells modelled, {} hot spots, results in {}",
        summary.source_id,
        summary.modelled_cells,
        summary.grid_cells,
        summary.hotspots,
        output_dir.display()
    );
    println!();
    println!("{:<40} {:>10} {:>12} {:>10}", "Model", "MAE", "Fold MAE", "Fold SD");
    for row in &report.summaries {
        println!(
            "{:<40} {:>10.4} {:>12.4} {:>10.4}",
            row.model, row.mae, row.mean_fold_mae, row.sd_fold_mae
        );
    }

    println!();
    println!("{:<14} {:>16} {:>12}", "Risk category", "Kernel density", "Risk model");
    for row in &report.allocation {
        println!(
            "{:<14} {:>15.1}% {:>11.1}%",
            row.category.to_string(),
            row.kernel_density_rate * 100.0,
            row.risk_model_rate * 100.0
        );
    }
}
