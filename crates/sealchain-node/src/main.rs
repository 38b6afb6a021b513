use clap::Parser;
use sealchain_core::{
    chain::{ChainStore, Ledger},
    constants::DEFAULT_DIFFICULTY,
    LedgerConfig, LedgerError,
};
use sealchain_node::{router, AppState};
use sealchain_storage::SledStore;
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, env = "SEALCHAIN_LISTEN", default_value = "127.0.0.1:8080")]
    listen: String,

    /// Data directory for sled
    #[arg(long, env = "SEALCHAIN_DATA_DIR", default_value = "./data")]
    data_dir: String,

    /// Leading zero hex digits required of every block hash. Fixed when the
    /// chain is created; must match on later starts.
    #[arg(long, env = "SEALCHAIN_DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: u32,

    /// Mine on the calling thread instead of the rayon pool
    #[arg(long)]
    sequential_mining: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = LedgerConfig {
        difficulty: args.difficulty,
        parallel_mining: !args.sequential_mining,
    };
    let store = Arc::new(SledStore::open(&args.data_dir)?);
    let ledger = Ledger::new(store, config)?;

    let initialized = {
        let ledger = ledger.clone();
        tokio::task::spawn_blocking(move || ledger.initialize()).await?
    };
    match initialized {
        Ok(_) => {}
        // an existing chain with unreadable genesis bytes; the check below reports it
        Err(err @ LedgerError::StorageIo(_)) if ledger.store().block_count()? > 0 => {
            error!(%err, "genesis block could not be read");
        }
        Err(err) => return Err(err.into()),
    }

    // Integrity alarm only: a broken chain is left as-is for the operator to restore.
    let checked = {
        let ledger = ledger.clone();
        tokio::task::spawn_blocking(move || ledger.validate()).await?
    };
    match checked {
        Ok(report) if report.valid => {
            let tip = ledger.get_last_block()?;
            info!(height = tip.index, hash = %tip.hash, difficulty = config.difficulty, "chain verified");
        }
        Ok(report) => error!(
            invalid_at = ?report.invalid_at,
            reason = ?report.reason,
            "CHAIN INTEGRITY FAILURE: restore the data directory from a backup"
        ),
        Err(err) => error!(%err, "CHAIN INTEGRITY CHECK FAILED: chain could not be read"),
    }

    let app = router(AppState { ledger: ledger.clone() });

    let addr: SocketAddr = args.listen.parse()?;
    info!("sealchain-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ledger.store().flush()?;
    info!("sealchain-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for shutdown signal");
    }
}
