use anyhow::Context;
use audit_core::{Ledger, LedgerEvent, Sealer};
use audit_node::constants::DEFAULT_LOG_LEVEL;
use audit_node::{router, AppState, NodeConfig};
use audit_storage::{open_store, StorageBackend};
use clap::Parser;
use std::path::PathBuf;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "audit-node", version, about = "Serve the tamper-evident audit ledger over HTTP")]
struct Args {
    /// TOML config file; flags and AUDIT_* variables override it
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, env = "AUDIT_LISTEN")]
    listen: Option<String>,

    /// Directory holding the snapshot
    #[arg(long, env = "AUDIT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Snapshot backend: file or sled
    #[arg(long, env = "AUDIT_BACKEND")]
    backend: Option<StorageBackend>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = NodeConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    config.ledger = config.ledger.with_env_overrides()?;
    let addr = config.listen_addr()?;

    let store = open_store(config.backend, &config.data_dir)
        .with_context(|| format!("opening {} store in {}", config.backend, config.data_dir.display()))?;
    let ledger = Ledger::open(config.ledger.clone(), store).context("opening ledger")?;
    info!(
        blocks = ledger.chain_length(),
        pending = ledger.pending().len(),
        difficulty = config.ledger.difficulty,
        "ledger ready"
    );

    let _event_log = ledger.events().register(|event| match event {
        LedgerEvent::BlockSealed { block, durable } => {
            info!(index = block.index, hash = %block.hash, durable, "new block");
        }
        LedgerEvent::SealFailed { reason, requeued } => {
            warn!(%reason, requeued, "seal failed");
        }
        LedgerEvent::PersistenceFailed { length, reason } => {
            error!(length, %reason, "snapshot not written");
        }
        LedgerEvent::ChainReset {
            reason,
            preserved_at,
        } => {
            warn!(%reason, ?preserved_at, "corrupt snapshot overwritten by a fresh genesis block");
        }
        LedgerEvent::TransactionAccepted { .. } => {}
    });
    let sealer = Sealer::spawn(ledger.clone());

    let app = router(AppState {
        ledger: ledger.clone(),
    })
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("audit-node listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    sealer.shutdown().await;
    ledger.wait_idle().await;
    match ledger.persist() {
        Ok(meta) => info!(length = meta.length, pending = meta.pending, "final snapshot written"),
        Err(err) => error!(%err, "final snapshot failed"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for ctrl-c, serving until killed");
        std::future::pending::<()>().await;
    }
}
