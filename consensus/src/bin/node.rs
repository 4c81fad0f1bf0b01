//! Blockchain Node Binary
//!
//! Runs an in-process cluster of nodes on a memory network, each with its
//! own RocksDB store, plus a relay that periodically requests new blocks.

use anyhow::Context;
use chrono::Utc;
use consensus::{spawn_node, CommandRelay, Config, NodeHandle};
use ledger_core::{BlockData, Ledger, Metrics, RocksStore};
use message_bus::{MemoryNetwork, Transport};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting blockchain node cluster");

    // Load configuration
    let config = if let Ok(config_path) = std::env::var("NODE_CONFIG") {
        info!("Loading config from: {}", config_path);
        Config::from_file(&config_path)?
    } else {
        info!("Loading config from environment variables");
        Config::from_env()?
    };

    info!(
        "Cluster size: {}, difficulty: {}, data dir: {:?}",
        config.cluster.size, config.ledger.difficulty, config.ledger.data_dir
    );

    let network = MemoryNetwork::new();
    let mut nodes: Vec<(NodeHandle, tokio::task::JoinHandle<()>)> = Vec::new();

    for i in 0..config.cluster.size.max(1) {
        let id = format!("{}-{}", config.node_id, i);

        let mut node_config = config.clone();
        node_config.node_id = id.clone();
        node_config.ledger.data_dir = config.ledger.data_dir.join(&id);

        info!("Opening ledger for {} at {:?}", id, node_config.ledger.data_dir);
        let store = RocksStore::open(&node_config.ledger)
            .with_context(|| format!("failed to open store for {}", id))?;
        let ledger = Ledger::open(Box::new(store), node_config.ledger.difficulty)?
            .with_metrics(Metrics::new()?);

        let (transport, events) = network.join(id.as_str());
        let node = spawn_node(&node_config, ledger, Arc::new(transport), events).await?;
        nodes.push(node);
    }

    let (relay_transport, _relay_events) = network.join("relay");
    let relay_transport: Arc<dyn Transport> = Arc::new(relay_transport);
    let relay = CommandRelay::new(relay_transport, config.publisher());

    info!("Cluster running with {} nodes", nodes.len());

    let mut ticker = tokio::time::interval(Duration::from_millis(config.cluster.block_interval_ms.max(1)));
    ticker.tick().await;
    let mut request = 0u64;

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received shutdown signal"),
                    Err(err) => error!("Unable to listen for shutdown signal: {}", err),
                }
                break;
            }
            _ = ticker.tick() => {
                request += 1;
                let data = BlockData::new("relay", json!({ "request": request, "at": Utc::now() }));
                if !relay.create_block(data).await {
                    warn!("Block request {} was not delivered", request);
                }

                for (handle, _) in &nodes {
                    match handle.status().await {
                        Ok(status) => info!(
                            node = %status.peer_id,
                            master = ?status.election.current_master_id,
                            blocks = status.chain_length,
                            head = %status.head_hash,
                            "Node status"
                        ),
                        Err(e) => warn!(node = %handle.id(), "Status unavailable: {}", e),
                    }
                }
            }
        }
    }

    // Graceful shutdown
    info!("Shutting down cluster...");
    for (handle, task) in nodes {
        if let Err(e) = handle.shutdown().await {
            warn!(node = %handle.id(), "Shutdown failed: {}", e);
        }
        if let Err(e) = task.await {
            error!(node = %handle.id(), "Node task failed: {}", e);
        }
        network.leave(handle.id());
    }

    info!("Cluster stopped");
    Ok(())
}
