//! brandreg-consolidator - brand deduplication service
//!
//! Serves the consolidation API, or runs one engine operation from the
//! command line and prints the result as JSON.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use brandreg_common::config::{load_or_default, TomlConfig};
use brandreg_common::events::EventBus;
use brandreg_common::models::{ConsolidationType, Decision, ProposalFilter};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use brandreg_consolidator::config::EngineConfig;
use brandreg_consolidator::services::learning_loop;
use brandreg_consolidator::{build_router, AppState, ConsolidationEngine};

/// Command-line arguments for brandreg-consolidator
#[derive(Parser, Debug)]
#[command(name = "brandreg-consolidator")]
#[command(about = "Brand deduplication and consolidation engine")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "BRANDREG_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the configured path
    #[arg(long, env = "BRANDREG_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API and run the learning loop (default)
    Serve {
        /// Port to listen on, overriding the configured port
        #[arg(short, long, env = "BRANDREG_PORT")]
        port: Option<u16>,
    },
    /// Run one detection pass and print created or updated proposals
    Detect {
        /// Only compare brands changed at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// List PENDING proposals
    Pending {
        #[arg(long = "type")]
        consolidation_type: Option<ConsolidationType>,
        #[arg(long)]
        min_confidence: Option<f64>,
    },
    /// Approve or reject a PENDING proposal
    Resolve {
        proposal_id: String,
        #[arg(value_enum)]
        decision: DecisionArg,
        #[arg(long)]
        actor: String,
        /// Keep this member instead of the proposed survivor
        #[arg(long)]
        survivor: Option<Uuid>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Print consolidation audit records
    History {
        #[arg(long)]
        brand_id: Option<Uuid>,
    },
    /// Run one threshold learning cycle
    Learn,
    /// Print the live threshold table
    Thresholds,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DecisionArg {
    Approve,
    Reject,
}

impl From<DecisionArg> for Decision {
    fn from(arg: DecisionArg) -> Self {
        match arg {
            DecisionArg::Approve => Decision::Approve,
            DecisionArg::Reject => Decision::Reject,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    init_tracing(&config)?;

    info!("Starting brandreg-consolidator");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());

    let pool = brandreg_consolidator::db::init_database_pool(&config)
        .await
        .context("Failed to open database")?;
    let engine_config = EngineConfig::resolve(&pool, &config)
        .await
        .context("Failed to resolve runtime settings")?;
    let events = EventBus::new(100);
    let engine = Arc::new(
        ConsolidationEngine::new(pool, engine_config, events)
            .await
            .context("Failed to initialize consolidation engine")?,
    );

    match args.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => serve(engine, &config, port).await?,
        Command::Detect { since } => {
            let stream = engine.detect_since(since);
            futures::pin_mut!(stream);
            while let Some(change) = stream.next().await {
                print_json(change?.proposal())?;
            }
        }
        Command::Pending {
            consolidation_type,
            min_confidence,
        } => {
            let filter = ProposalFilter {
                consolidation_type,
                min_confidence,
            };
            print_json(&engine.list_pending(&filter).await?)?;
        }
        Command::Resolve {
            proposal_id,
            decision,
            actor,
            survivor,
            notes,
        } => {
            let outcome = engine
                .resolve(&proposal_id, decision.into(), survivor, &actor, notes.as_deref())
                .await?;
            print_json(&outcome)?;
        }
        Command::History { brand_id } => print_json(&engine.history(brand_id).await?)?,
        Command::Learn => print_json(&engine.run_learning_cycle().await?)?,
        Command::Thresholds => print_json(&engine.thresholds().await)?,
    }

    Ok(())
}

async fn serve(engine: Arc<ConsolidationEngine>, config: &TomlConfig, port: Option<u16>) -> Result<()> {
    let drained = engine.drain_auto_approved().await?;
    if !drained.is_empty() {
        info!("Applied {} queued auto-approved proposals", drained.len());
    }

    let shutdown = CancellationToken::new();
    let learning = learning_loop::spawn(
        Arc::clone(&engine),
        Duration::from_secs(engine.config().learning.interval_secs),
        shutdown.clone(),
    );

    let app = build_router(AppState::new(engine));

    let port = port.unwrap_or(config.server.port);
    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server host: {}", config.server.host))?;
    let addr = SocketAddr::new(host, port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = learning.await {
        error!("Learning loop task failed: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{},tower_http=info", config.logging.level).into());

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
