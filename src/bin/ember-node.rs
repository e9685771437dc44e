#![forbid(unsafe_code)]
//! Run an Emberchain node

use clap::Parser;
use emberchain::config::load_config;
use emberchain::node::Node;
use emberchain::server;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ember-node", about = "Run an Emberchain node", version)]
struct Args {
    /// Path to the configuration file (defaults to ./config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    let node = Node::new(config)?;

    info!("Starting Emberchain node on {}", node.own_address());

    let server_node = node.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::serve(server_node).await {
            error!("P2P server failed: {}", e);
        }
    });
    // give the listener a moment to bind before greeting peers
    tokio::time::sleep(Duration::from_millis(200)).await;

    node.announce_startup().await?;

    // health logging loop
    loop {
        let height = node.best_height().await;
        let known_best = node.transit.max_known_height().max(height);
        info!(
            "Node running: height {}/{}, {} known peers, {} unapproved transactions",
            height,
            known_best,
            node.peers.count(),
            node.mempool.read().await.len()
        );
        if server_task.is_finished() {
            return Err("P2P server stopped".into());
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
}
