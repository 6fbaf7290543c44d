//! aemet_etl CLI: daily AEMET observation and forecast ingestion.
//!
//! Commands:
//! - `run` ingest every entity in the catalog
//! - `entity` ingest a single entity, optionally one source only
//! - `fetch-raw` dump the raw upstream payloads of one entity to JSON files
//! - `debug` print the normalised records of one entity without storing them
//! - `add-entity` register an entity in the catalog

use aemet_etl::{Config, Entity, RunSummary, SqliteStore, WeatherEtl};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "aemet_etl", version, about = "AEMET weather ETL")]
struct Cli {
    /// Path to a TOML config file. Defaults to <config dir>/aemet_etl/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalise and store both sources for every entity in the catalog.
    Run {
        /// Extra passes over partial and failed entities. Overrides run.retry_rounds.
        #[arg(long)]
        retry_rounds: Option<u32>,
    },
    /// Process a single entity.
    Entity {
        #[arg(long)]
        id: i64,

        /// Only fetch the observation for this date (YYYY-MM-DD).
        #[arg(long, conflicts_with = "forecast_only")]
        observation_date: Option<NaiveDate>,

        /// Only fetch tomorrow's forecast.
        #[arg(long, default_value_t = false)]
        forecast_only: bool,
    },
    /// Write the raw observation and forecast payloads of one entity to JSON files.
    FetchRaw {
        #[arg(long)]
        id: i64,

        /// Observation offset in days. Defaults to run.observation_offset_days.
        #[arg(long)]
        days_ago: Option<u64>,

        /// Output directory.
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Print the normalised records one entity would produce, as JSON. Nothing is stored.
    Debug {
        #[arg(long)]
        id: i64,

        /// Observation offset in days. Defaults to run.observation_offset_days.
        #[arg(long)]
        days_ago: Option<u64>,
    },
    /// Register or update an entity in the catalog.
    AddEntity {
        #[arg(long)]
        id: i64,

        #[arg(long)]
        postal_code: String,

        #[arg(long)]
        station_code: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    // Registering an entity only touches the catalog, so it needs no API key.
    if let Commands::AddEntity {
        id,
        postal_code,
        station_code,
    } = cli.command
    {
        let store = SqliteStore::open(&config.database.path)?;
        store.add_entity(&Entity::new(id, postal_code, station_code))?;
        info!("Entity {} registered", id);
        return Ok(ExitCode::SUCCESS);
    }

    let mut etl = WeatherEtl::new(config)?;

    match cli.command {
        Commands::Run { retry_rounds } => {
            let summary = etl.run_all().maybe_retry_rounds(retry_rounds).call().await?;
            Ok(report(&summary))
        }
        Commands::Entity {
            id,
            observation_date,
            forecast_only,
        } => {
            let summary = etl
                .run_entity()
                .entity_id(id)
                .maybe_observation_date(observation_date)
                .forecast_only(forecast_only)
                .call()
                .await?;
            Ok(report(&summary))
        }
        Commands::FetchRaw { id, days_ago, out } => {
            let written = etl
                .fetch_raw()
                .entity_id(id)
                .maybe_days_ago(days_ago)
                .out_dir(out)
                .call()
                .await?;
            for path in &written {
                println!("{}", path.display());
            }
            Ok(if written.len() == 2 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Debug { id, days_ago } => {
            let diagnosis = etl
                .diagnose()
                .entity_id(id)
                .maybe_days_ago(days_ago)
                .call()
                .await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&diagnosis).context("Failed to format records")?
            );
            Ok(
                if diagnosis.observation.is_some() && diagnosis.forecast.is_some() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                },
            )
        }
        Commands::AddEntity { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn report(summary: &RunSummary) -> ExitCode {
    info!("{}", summary);
    println!("{}", summary);
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
