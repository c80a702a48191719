//! Structure fire emissions CLI
//!
//! Usage:
//!   estimate_emissions estimate <inventory.csv|parquet> [--config <file.json>] [--crs EPSG:4326]
//!   estimate_emissions predict <points.csv|parquet> --ratio-destroyed 0.3 [--seed 42]
//!   estimate_emissions validate <file.json>
//!
//! Logging follows RUST_LOG; defaults to info for this crate.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use structure_emissions_rust::filter::StdioPrompter;
use structure_emissions_rust::{
    Crs, EmissionsPipeline, EmissionsReport, EstimatorConfig, PipelineOutcome, RunKind,
    StructureTable, SyntheticInventory,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "estimate_emissions")]
#[command(about = "Estimate air-pollutant emissions from fire-damaged structures")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate emissions for an observed damage inventory
    Estimate {
        /// Inventory file (.csv or .parquet)
        inventory: PathBuf,

        /// JSON run configuration (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// CRS of the inventory point columns
        #[arg(long)]
        crs: Option<Crs>,
    },

    /// Estimate emissions for structures inside areas of interest
    Predict {
        /// Structure points file (.csv or .parquet)
        points: PathBuf,

        /// Share of structures assumed destroyed when no damage is recorded
        #[arg(short, long)]
        ratio_destroyed: f64,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        crs: Option<Crs>,

        /// Seed for reproducible synthetic damage
        #[arg(long)]
        seed: Option<u64>,

        /// Incident name for the synthetic records
        #[arg(long)]
        run_name: Option<String>,
    },

    /// Check a configuration file without reading any data
    Validate {
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                // info for our crate, warn for others
                .unwrap_or_else(|_| "structure_emissions_rust=info,estimate_emissions=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Estimate {
            inventory,
            config,
            crs,
        } => cmd_estimate(&inventory, config.as_deref(), crs),
        Commands::Predict {
            points,
            ratio_destroyed,
            config,
            crs,
            seed,
            run_name,
        } => cmd_predict(&points, ratio_destroyed, config.as_deref(), crs, seed, run_name),
        Commands::Validate { config } => cmd_validate(&config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EstimatorConfig> {
    match path {
        Some(path) => EstimatorConfig::load(path),
        None => Ok(EstimatorConfig::default()),
    }
}

fn cmd_estimate(inventory: &Path, config: Option<&Path>, crs: Option<Crs>) -> Result<ExitCode> {
    let plan = load_config(config)?.plan(RunKind::Estimator)?;
    let pipeline = EmissionsPipeline::from_plan(plan)?;
    let inventory = StructureTable::load(inventory, crs)?;

    let outcome = pipeline.run(&inventory, &mut StdioPrompter)?;
    Ok(report(outcome))
}

fn cmd_predict(
    points: &Path,
    ratio_destroyed: f64,
    config: Option<&Path>,
    crs: Option<Crs>,
    seed: Option<u64>,
    run_name: Option<String>,
) -> Result<ExitCode> {
    let plan = load_config(config)?.plan(RunKind::Predictor)?;
    let pipeline = EmissionsPipeline::from_plan(plan)?;
    let points = StructureTable::load(points, crs)?;

    let mut synthetic = SyntheticInventory::new(ratio_destroyed);
    if let Some(name) = run_name {
        synthetic.run_name = name;
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let outcome = pipeline.run_predictor(&points, &synthetic, &mut rng)?;
    Ok(report(outcome))
}

fn cmd_validate(config: &Path) -> Result<ExitCode> {
    let config = EstimatorConfig::load(config)?;
    config.validate()?;
    for kind in [RunKind::Estimator, RunKind::Predictor] {
        let plan = config.plan(kind)?;
        println!(
            "{:?}: consumption {}, filter {}, aggregation {:?}",
            kind,
            plan.consumption.name(),
            plan.filter.mode().name(),
            plan.aggregation.columns()
        );
    }
    println!("Configuration is valid");
    Ok(ExitCode::SUCCESS)
}

fn report(outcome: PipelineOutcome) -> ExitCode {
    match outcome {
        PipelineOutcome::Completed(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        PipelineOutcome::NoMatchingRecords => {
            println!("No records match the selected filters.");
            ExitCode::SUCCESS
        }
        PipelineOutcome::Cancelled => {
            println!("Cancelled.");
            ExitCode::SUCCESS
        }
    }
}

fn print_report(report: &EmissionsReport) {
    println!("\n{}", "=".repeat(70));
    println!("Structure emissions ({} records)", report.emissions.height());
    println!("{}", "=".repeat(70));
    for pollutant in report.emissions.pollutants() {
        if let Ok(total) = report.emissions.total_tons(pollutant) {
            println!("  {:<8} {:>12.3} tons", pollutant, total);
        }
    }

    println!("\nSummary:\n{}", report.summary);

    match report.vehicles.to_frame() {
        Ok(frame) => println!(
            "\nVehicle emissions ({} vehicles):\n{}",
            report.vehicles.vehicles, frame
        ),
        Err(e) => tracing::warn!("Could not build vehicle table: {:#}", e),
    }
}
