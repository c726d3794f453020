#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the airport taxi trip pipeline.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use taxi_etl_cli_utils::IndicatifProgress;
use taxi_etl_pipeline::{PipelineConfig, StageProgress};

#[derive(Parser)]
#[command(
    name = "taxi_etl",
    about = "Load taxi trips that start at Chicago airports into the analytical store"
)]
struct Cli {
    /// Keep existing rows instead of dropping and recreating the trips table
    #[arg(long)]
    no_reset: bool,
    /// Do not read or write the persistent reverse-geocode cache
    #[arg(long)]
    no_geocode_cache: bool,
    /// Maximum reverse-geocode requests in flight
    #[arg(long, default_value_t = 1)]
    concurrency: usize,
    /// Retries after a failed reverse-geocode request
    #[arg(long, default_value_t = 3)]
    retries: u32,
    /// Per-request reverse-geocode timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    /// TOML file with a `display_names` array replacing the built-in airports
    #[arg(long)]
    airports: Option<PathBuf>,
    /// Process only the first N extracted trips (for testing)
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let multi = taxi_etl_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env()?
        .with_retries(cli.retries)
        .with_timeout(Duration::from_secs(cli.timeout_secs));
    config.concurrency = cli.concurrency.max(1);
    config.reset = !cli.no_reset;
    config.geocode_cache = !cli.no_geocode_cache;
    config.airports = cli.airports;
    config.limit = cli.limit;

    let progress = StageProgress {
        pickups: IndicatifProgress::trips_bar(&multi, "Classifying pickups"),
        dropoffs: IndicatifProgress::trips_bar(&multi, "Resolving dropoff postal codes"),
        load: IndicatifProgress::trips_bar(&multi, "Loading trips"),
    };

    let start = Instant::now();
    let summary = taxi_etl_pipeline::run(&config, &progress).await?;

    log::info!(
        "Loaded {} airport trips in {:.1}s",
        summary.load.inserted,
        start.elapsed().as_secs_f64()
    );

    Ok(())
}
