//! Dispatch Prep Worker - builds routing problems for same-day field dispatch
//!
//! Reads a snapshot bundle, reconciles it with recorded visit phases,
//! completes the distance matrix and writes the problem for the optimizer.

mod cli;
mod config;
mod db;
mod defaults;
mod error;
mod services;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::services::distance_matrix::DistanceMatrixPlanner;
use crate::services::problem::{ProblemDeps, VrpProblem, VrpProblemBuilder};
use crate::services::routing::{create_map_service_with_fallback, create_secondary_map_services};
use crate::types::{PlanningSettings, SnapshotBundle};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env must be loaded before LOGS_DIR and RUST_LOG are read below
    dotenvy::dotenv().ok();

    let logs_dir = config::logs_dir();
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,dispatch_prep_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)) // console
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let result = match cli.command {
        Some(Command::Plan { input, settings, output }) => {
            plan(&input, settings.as_deref(), output.as_deref()).await
        }
        Some(Command::Migrate) => migrate().await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("Worker failed: {:#}", e);
    }
    result
}

async fn migrate() -> Result<()> {
    let config = config::Config::from_env()?;
    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await
}

async fn plan(input: &Path, settings_path: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read snapshot bundle {}", input.display()))?;
    let bundle: SnapshotBundle = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse snapshot bundle {}", input.display()))?;
    let settings = match settings_path {
        Some(path) => PlanningSettings::load(path)?,
        None => PlanningSettings::default(),
    };

    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");
    let store = Arc::new(db::PgStore::new(pool));

    let primary = create_map_service_with_fallback(config.valhalla_url.clone()).await;
    let secondaries = create_secondary_map_services(&config.secondary_map_services)?;
    let waits_for_secondaries = settings.secondary_fetch_enabled() && !secondaries.is_empty();
    let secondary_budget = Duration::from_millis(settings.fetch_other_map_service_distances_timeout_ms);
    let planner = Arc::new(
        DistanceMatrixPlanner::new(store.clone(), primary)
            .with_secondaries(secondaries)
            .with_breaker(config.circuit_breaker),
    );

    let builder = VrpProblemBuilder::new(
        bundle,
        settings,
        ProblemDeps {
            store: store.clone(),
            actuals: store,
            planner: planner.clone(),
        },
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling planning run");
            on_signal.cancel();
        }
    });

    let built = builder.build(&cancel).await;
    if built.is_ok() && waits_for_secondaries && !planner.wait_for_secondaries(secondary_budget).await {
        warn!("Secondary distance fetches still running after {:?}, cancelling", secondary_budget);
    }
    planner.shutdown();
    let problem = built?;

    let json = serde_json::to_string_pretty(&problem_json(&problem))?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write problem to {}", path.display()))?;
            info!(run_id = %problem.run_id, "Problem written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

fn problem_json(problem: &VrpProblem) -> serde_json::Value {
    serde_json::json!({
        "runId": problem.run_id,
        "description": problem.description,
        "entityMappings": problem.entity_mappings,
        "distanceWindow": problem.distance_window,
        "recoverableErrors": problem
            .recoverable_errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>(),
    })
}
