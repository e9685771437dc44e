#![forbid(unsafe_code)]
//! Query and manage a running Emberchain node

use clap::{Parser, Subcommand};
use emberchain::client::NodeClient;
use emberchain::messages::HistoryDirection;
use emberchain::peers::PeerAddr;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ember-peer", about = "Query and manage a running Emberchain node", version)]
struct Args {
    /// Address of the node to talk to, host:port
    #[arg(short, long, default_value = "127.0.0.1:8333")]
    node: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the node's known peers
    Nodes,
    /// Add a peer to the node's known set (requires the node's auth token)
    AddNode {
        peer: String,
        #[arg(short, long)]
        auth: String,
    },
    /// Remove a peer from the node's known set (requires the node's auth token)
    RemoveNode {
        peer: String,
        #[arg(short, long)]
        auth: String,
    },
    /// Show the unspent outputs of a wallet address
    Unspent { address: String },
    /// Show the transaction history of a wallet address
    History { address: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let node: PeerAddr = args.node.parse()?;
    // the client's own address is only announced in gossip commands, which
    // this tool never sends
    let client = NodeClient::new(PeerAddr::new("127.0.0.1", 9999), Duration::from_secs(30));

    match args.command {
        Command::Nodes => {
            let nodes = client.send_get_nodes(&node).await?;
            println!("{} known nodes", nodes.len());
            for peer in nodes {
                println!("  {}", peer);
            }
        }
        Command::AddNode { peer, auth } => {
            let peer: PeerAddr = peer.parse()?;
            client.send_add_node(&node, auth, peer.clone()).await?;
            println!("Added {}", peer);
        }
        Command::RemoveNode { peer, auth } => {
            let peer: PeerAddr = peer.parse()?;
            client.send_remove_node(&node, auth, peer.clone()).await?;
            println!("Removed {}", peer);
        }
        Command::Unspent { address } => {
            let response = client.send_get_unspent(&node, address, Vec::new()).await?;
            let total: u64 = response.transactions.iter().map(|u| u.amount).sum();
            for utxo in &response.transactions {
                println!(
                    "{}:{}  {:>10}  from {}",
                    hex::encode(&utxo.txid),
                    utxo.vout,
                    utxo.amount,
                    utxo.from
                );
            }
            println!("balance: {}", total);
        }
        Command::History { address } => {
            let records = client.send_get_history(&node, address).await?;
            for record in records {
                match record.direction {
                    HistoryDirection::Incoming => {
                        println!("IN   {:>10}  from {}  ({})", record.amount, record.from, hex::encode(&record.txid))
                    }
                    HistoryDirection::Outgoing => {
                        println!("OUT  {:>10}  to   {}  ({})", record.amount, record.to, hex::encode(&record.txid))
                    }
                }
            }
        }
    }
    Ok(())
}
