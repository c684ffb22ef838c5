use anyhow::{Context, Result};
use log::info;
use minichain_config::Config;
use minichain_core::error::LedgerError;
use minichain_core::store::JsonFileStore;
use minichain_node::{Node, NodeHandle, NodeSettings, run_server};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{Duration, sleep};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = Config::load()?;
    let addr: SocketAddr = cfg
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen_addr {}", cfg.listen_addr))?;

    let data_dir = cfg.data_dir_resolved();
    info!("Minichain node starting, data in {}", data_dir.display());

    let settings = NodeSettings {
        miner_address: cfg.miner_address.clone(),
        difficulty: cfg.difficulty,
        peers: cfg.peer_list(),
        header_timeout: Duration::from_millis(cfg.header_timeout_ms),
        chain_timeout: Duration::from_millis(cfg.chain_timeout_ms),
    };
    info!(
        "Miner address {}, difficulty {}, {} peer(s)",
        settings.miner_address,
        settings.difficulty,
        settings.peers.len()
    );

    let node: NodeHandle = Arc::new(
        Node::open(Box::new(JsonFileStore::new(&data_dir)), settings)
            .context("failed to open chain store")?,
    );

    // catch up with the network before serving
    if !node.settings().peers.is_empty() {
        let startup = node.clone();
        let outcome = tokio::task::spawn_blocking(move || startup.resolve_with_http()).await?;
        info!("Startup resolution: {}", outcome.to_json());
    }

    if cfg.resolve_interval_secs > 0 {
        tokio::spawn(resolve_loop(
            node.clone(),
            Duration::from_secs(cfg.resolve_interval_secs),
        ));
    }
    if cfg.mine_interval_secs > 0 {
        tokio::spawn(mining_loop(
            node.clone(),
            Duration::from_secs(cfg.mine_interval_secs),
        ));
    }

    tokio::select! {
        _ = run_server(node, addr) => {}
        _ = signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}

async fn resolve_loop(node: NodeHandle, every: Duration) {
    loop {
        sleep(every).await;
        let worker = node.clone();
        match tokio::task::spawn_blocking(move || worker.resolve_with_http()).await {
            Ok(outcome) if outcome.replaced() => {
                info!("Adopted peer chain, length now {}", outcome.length())
            }
            Ok(_) => {}
            Err(e) => log::error!("Resolve task failed: {}", e),
        }
    }
}

async fn mining_loop(node: NodeHandle, every: Duration) {
    loop {
        let worker = node.clone();
        match tokio::task::spawn_blocking(move || worker.mine()).await {
            Ok(Ok(block)) => info!(
                "Mined block index={} hash={} txs={}",
                block.header.index,
                block.header.hash,
                block.transactions.len()
            ),
            Ok(Err(LedgerError::MiningCancelled)) => info!("Mining round cancelled, retrying"),
            Ok(Err(LedgerError::MiningInProgress)) => {
                log::debug!("Another mining round is running, skipping")
            }
            Ok(Err(e)) => log::warn!("Mining round failed: {}", e),
            Err(e) => log::error!("Mining task failed: {}", e),
        }
        sleep(every).await;
    }
}
