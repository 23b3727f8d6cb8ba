//! Application entrypoint and state wiring.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use record_ledger::routes::{self, AppState};
use record_ledger::{Ledger, LedgerConfig, RecoveryStatus};

#[derive(Parser, Debug)]
#[command(name = "record-ledger-node")]
#[command(about = "Serve an append-only medical record ledger over HTTP")]
struct Args {
    /// TOML configuration file layered over the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured mining difficulty
    #[arg(short, long)]
    difficulty: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    // 0) config
    let mut config =
        LedgerConfig::try_load(args.config.as_deref()).context("load configuration")?;
    if let Some(difficulty) = args.difficulty {
        config.difficulty = difficulty;
    }
    info!(
        snapshot = %config.snapshot_path.display(),
        difficulty = config.difficulty,
        "configuration loaded"
    );

    // 1) recover chain
    let (ledger, status) = Ledger::from_config(&config);
    match &status {
        RecoveryStatus::Restored => info!(blocks = ledger.chain().len(), "chain restored"),
        RecoveryStatus::Fresh => info!("started a new chain"),
        RecoveryStatus::Quarantined { backup, reason } => warn!(
            ?backup,
            %reason,
            "previous snapshot was rejected; started a new chain"
        ),
    }

    // 2) shared state
    let state = AppState {
        ledger: Arc::new(Mutex::new(ledger)),
    };
    let app = routes::router(state.clone());

    // 3) serve
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("bind {}", config.listen_addr))?;
    info!("running on http://{}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    // 4) final persist
    let ledger = state.ledger.lock().await;
    ledger.save().context("final snapshot")?;
    info!(blocks = ledger.chain().len(), "snapshot written, shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
