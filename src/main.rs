use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

mod config;
mod db;
mod error;
mod holt_winters;
mod ingest;
mod loss;
mod models;
mod pipeline;
mod report;
mod server;
mod store;
mod validation;

use config::Settings;
use db::PgStore;

#[derive(Parser)]
#[command(name = "cacao-forecast")]
#[command(about = "Cacao production forecasting with disease loss adjustment", long_about = None)]
struct Cli {
    /// Session whose severity is recorded by uploads and read by forecasts
    #[arg(long, global = true, env = "CACAO_SESSION", default_value = "default")]
    session: String,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Upload quarterly production records from a CSV file
    Upload {
        #[arg(long)]
        csv: PathBuf,
        /// Disease severity from 1 (low) to 10 (severe)
        #[arg(long)]
        severity: Option<i32>,
    },
    /// List stored production records
    Production,
    /// Production totals per calendar year
    Yearly,
    /// Forecast the next quarters with losses and cross-validated accuracy
    Forecast,
    /// Single-shot forecast with a flat loss applied to every quarter
    FlatForecast,
    /// Apply the current loss fraction to historical production
    Losses,
    /// Cross-validate the seasonal model
    Evaluate,
    /// Assemble the forecast report
    Report {
        /// Write a markdown rendition instead of printing JSON
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Record a classifier result for a scanned leaf or branch
    RecordScan {
        #[arg(long)]
        disease: String,
        #[arg(long)]
        confidence: f64,
    },
    /// Counts of recorded disease detections
    DiseaseCounts,
    /// Serve the HTTP API
    Serve {
        #[arg(long, env = "CACAO_BIND", default_value = "0.0.0.0:5000")]
        bind: SocketAddr,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool.clone());
    let settings = cli.settings;
    let session = cli.session.as_str();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            info!("schema ready");
        }
        Commands::Upload { csv, severity } => {
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let summary = pipeline::upload(&store, &settings, session, file, severity).await?;
            print_json(&summary)?;
        }
        Commands::Production => {
            print_json(&pipeline::production_listing(&store).await?)?;
        }
        Commands::Yearly => {
            print_json(&pipeline::yearly_production(&store).await?)?;
        }
        Commands::Forecast => {
            print_json(&pipeline::forecast_losses(&store, &settings, session).await?)?;
        }
        Commands::FlatForecast => {
            print_json(&pipeline::flat_forecast(&store, &settings, session).await?)?;
        }
        Commands::Losses => {
            print_json(&pipeline::production_losses(&store, &settings, session).await?)?;
        }
        Commands::Evaluate => {
            print_json(&pipeline::evaluate(&store, &settings, settings.folds).await?)?;
        }
        Commands::Report { out } => {
            let bundle = pipeline::report(&store, &settings, session).await?;
            match out {
                Some(path) => {
                    let metrics = pipeline::evaluate(&store, &settings, settings.folds).await?;
                    let markdown = report::render_markdown(
                        &bundle.data,
                        Some(&metrics),
                        Some(bundle.in_sample_mae),
                    );
                    std::fs::write(&path, markdown)?;
                    info!(path = %path.display(), "report written");
                }
                None => print_json(&bundle.data)?,
            }
        }
        Commands::RecordScan {
            disease,
            confidence,
        } => {
            let id = pipeline::record_scan(&store, &disease, confidence).await?;
            print_json(&serde_json::json!({ "id": id }))?;
        }
        Commands::DiseaseCounts => {
            print_json(&pipeline::disease_counts(&store).await?)?;
        }
        Commands::Serve { bind } => {
            let state = server::AppState {
                store: Arc::new(store),
                settings: Arc::new(settings),
            };
            server::serve(bind, state).await?;
        }
    }

    Ok(())
}
