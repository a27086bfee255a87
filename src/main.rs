//! RootSphere recommendation engine server
//!
//! # Usage
//!
//! ```bash
//! # Serve the HTTP API (default subcommand)
//! rootsphere serve --addr 0.0.0.0:8080
//!
//! # Pull two years of daily history for a field, then train its model
//! rootsphere backfill --field plot-7 --days 730
//! rootsphere train --field plot-7
//!
//! # Score the active model against recorded history
//! rootsphere backtest --field plot-7
//! ```
//!
//! # Environment Variables
//!
//! - `ROOTSPHERE_CONFIG`: Path to the engine TOML config
//! - `ROOTSPHERE_CORS_ORIGINS`: Comma-separated allowed origins for the API
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use rootsphere::api::{create_app, ApiState};
use rootsphere::config::EngineConfig;
use rootsphere::forecaster::{Forecaster, RetrainScheduler};
use rootsphere::orchestrator::{EngineBuilder, RecommendationEngine};
use rootsphere::storage::{Persistence, SledStore};
use rootsphere::weather::OpenMeteoClient;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "rootsphere")]
#[command(about = "RootSphere irrigation and fertilizer recommendation engine")]
#[command(version)]
struct CliArgs {
    /// Engine config file. Falls back to $ROOTSPHERE_CONFIG, ./rootsphere.toml, then defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root directory for the database and model artifacts (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// Serve the HTTP API with the retrain scheduler
    Serve {
        /// Override the bind address (default from config: "0.0.0.0:8080")
        #[arg(short, long)]
        addr: Option<String>,
    },
    /// Train a field's rainfall model from stored history
    Train {
        #[arg(long)]
        field: String,
    },
    /// Fetch daily weather history for a field from the weather provider
    Backfill {
        #[arg(long)]
        field: String,
        #[arg(long, default_value_t = 730)]
        days: u32,
    },
    /// Evaluate a field's active model over its stored history
    Backtest {
        #[arg(long)]
        field: String,
    },
    /// Validate the config and print the effective values
    CheckConfig,
}

/// Long-running tasks supervised by `run_supervisor`.
#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    RetrainScheduler,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpServer => write!(f, "HttpServer"),
            Self::RetrainScheduler => write!(f, "RetrainScheduler"),
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}

fn load_config(args: &CliArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::load(),
    };
    if let Some(dir) = &args.data_dir {
        config.storage.data_dir = dir.join("db");
        config.forecaster.model_dir = dir.join("models");
    }
    Ok(config)
}

/// Storage, forecaster and a started engine.
struct EngineCore {
    store: Arc<SledStore>,
    forecaster: Arc<Forecaster>,
    engine: RecommendationEngine,
}

fn init_engine(config: &Arc<EngineConfig>) -> Result<EngineCore> {
    let store = Arc::new(
        SledStore::open(&config.storage.data_dir)
            .with_context(|| format!("opening database at {}", config.storage.data_dir.display()))?,
    );
    let forecaster = Arc::new(Forecaster::new(config.forecaster.clone()));

    let mut builder = EngineBuilder::new(
        Arc::clone(config),
        Arc::clone(&store) as Arc<dyn Persistence>,
        Arc::clone(&forecaster),
    );
    if config.weather.enabled {
        let client = OpenMeteoClient::new(&config.weather).context("building weather client")?;
        builder = builder.with_weather(Arc::new(client));
    } else {
        info!("External weather provider disabled");
    }
    let engine = builder.start().context("starting recommendation engine")?;

    Ok(EngineCore {
        store,
        forecaster,
        engine,
    })
}

// ============================================================================
// Task Spawners
// ============================================================================

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

fn spawn_retrain_scheduler(
    task_set: &mut JoinSet<Result<TaskName>>,
    scheduler: Arc<RetrainScheduler>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        scheduler.run(cancel_token).await;
        Ok(TaskName::RetrainScheduler)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(task_set: &mut JoinSet<Result<TaskName>>, cancel_token: CancellationToken) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let the server drain in-flight requests
    while let Some(result) = task_set.join_next().await {
        if let Ok(Err(e)) = result {
            warn!("Supervisor: task ended with error during shutdown: {}", e);
        }
    }
    Ok(())
}

// ============================================================================
// Subcommands
// ============================================================================

async fn run_serve(config: Arc<EngineConfig>, addr: Option<String>) -> Result<()> {
    let EngineCore {
        store,
        forecaster,
        engine,
    } = init_engine(&config)?;
    let engine = Arc::new(engine);

    let server_addr = addr.unwrap_or_else(|| config.server.bind_address.clone());
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("binding {server_addr}"))?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  RootSphere recommendation engine v{}", env!("CARGO_PKG_VERSION"));
    info!("  API:      http://{}/api/v2", server_addr);
    info!("  Database: {}", config.storage.data_dir.display());
    info!("  Models:   {}", config.forecaster.model_dir.display());
    info!(
        "  Forecast: window {}d, horizon {}d, retrain {}",
        config.forecaster.window_days,
        config.forecaster.horizon_days,
        if config.retrain.enabled { "on" } else { "off" }
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    let app = create_app(ApiState::new(Arc::clone(&engine)));
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());

    if config.retrain.enabled {
        let scheduler = Arc::new(RetrainScheduler::new(
            Arc::clone(&store) as Arc<dyn Persistence>,
            Arc::clone(&forecaster),
            &config.retrain,
        ));
        spawn_retrain_scheduler(&mut task_set, scheduler, cancel_token.clone());
    }

    let outcome = run_supervisor(&mut task_set, cancel_token).await;

    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.shutdown().await,
        Err(_) => warn!("Engine still referenced at shutdown; queued tickets abandoned"),
    }
    store.flush().context("flushing database")?;
    outcome
}

async fn run_train(config: Arc<EngineConfig>, field: &str) -> Result<()> {
    let core = init_engine(&config)?;
    let artifact = core.engine.train_field(field).await?;
    info!(
        field_id = %field,
        version = artifact.version,
        training_days = artifact.training_days,
        samples = artifact.report.samples,
        final_loss = artifact.report.final_loss,
        "Training complete"
    );
    core.engine.shutdown().await;
    core.store.flush()?;
    Ok(())
}

async fn run_backfill(config: Arc<EngineConfig>, field: &str, days: u32) -> Result<()> {
    let core = init_engine(&config)?;
    let stored = core.engine.backfill_history(field, days).await?;
    info!(field_id = %field, days, stored, "Backfill complete");
    core.engine.shutdown().await;
    core.store.flush()?;
    Ok(())
}

fn run_backtest(config: &EngineConfig, field: &str) -> Result<()> {
    let store = SledStore::open(&config.storage.data_dir)
        .with_context(|| format!("opening database at {}", config.storage.data_dir.display()))?;
    let forecaster = Forecaster::new(config.forecaster.clone());
    let history = store.weather_history(field)?;
    let report = forecaster.backtest(field, &history)?;
    info!(
        field_id = %field,
        version = report.model_version,
        windows = report.windows,
        overall_mae = report.overall_mae(),
        "Backtest complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_check_config(config: &EngineConfig) -> Result<()> {
    config.validate().context("config validation failed")?;
    print!("{}", config.to_toml()?);
    info!("Config OK");
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_format);

    let config = load_config(&args)?;

    match args.command {
        None => run_serve(Arc::new(config), None).await,
        Some(SubCommand::Serve { addr }) => run_serve(Arc::new(config), addr).await,
        Some(SubCommand::Train { field }) => run_train(Arc::new(config), &field).await,
        Some(SubCommand::Backfill { field, days }) => run_backfill(Arc::new(config), &field, days).await,
        Some(SubCommand::Backtest { field }) => run_backtest(&config, &field),
        Some(SubCommand::CheckConfig) => run_check_config(&config),
    }
}
