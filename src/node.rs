//! The node service object
//!
//! Owns every piece of shared state and hands it, by reference, to the
//! connection tasks: the chain and mempool behind async RwLocks, the
//! known-peer directory and the transit queue as lock-guarded service
//! objects. Nothing here is a global.

use crate::chain::{AddBlockResult, Block, Blockchain};
use crate::client::NodeClient;
use crate::config::Config;
use crate::crypto;
use crate::error::{NodeError, Result};
use crate::mempool::{Admission, Mempool, TxVerifyError};
use crate::messages::InvKind;
use crate::peers::{PeerAddr, PeerDirectory};
use crate::transaction::{Transaction, TxId};
use crate::transit::TransitQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

pub struct Node {
    pub config: Config,
    pub chain: Arc<RwLock<Blockchain>>,
    pub mempool: Arc<RwLock<Mempool>>,
    pub peers: PeerDirectory,
    pub transit: TransitQueue,
    pub client: NodeClient,
}

impl Node {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let genesis_beneficiary = crypto::address_from_hex(&config.chain.genesis_beneficiary)?;
        let chain = Blockchain::new(genesis_beneficiary);

        let client = NodeClient::new(
            config.own_address(),
            Duration::from_secs(config.network.reply_timeout_secs),
        );

        Ok(Arc::new(Node {
            config,
            chain: Arc::new(RwLock::new(chain)),
            mempool: Arc::new(RwLock::new(Mempool::new())),
            peers: PeerDirectory::new(),
            transit: TransitQueue::new(),
            client,
        }))
    }

    pub fn own_address(&self) -> PeerAddr {
        self.config.own_address()
    }

    pub async fn best_height(&self) -> u64 {
        self.chain.read().await.get_state().1
    }

    /// Registers the bootstrap peers and greets them with our version so
    /// catch-up starts immediately.
    pub async fn announce_startup(&self) -> Result<()> {
        let bootstrap = self.config.bootstrap_peers()?;
        for peer in &bootstrap {
            self.peers.add_known(peer.clone());
        }
        self.send_version_to_nodes(&bootstrap).await;
        Ok(())
    }

    /// Sends our version to each peer. Unreachable peers are logged and
    /// kept: transient failures must not thrash the known set.
    pub async fn send_version_to_nodes(&self, peers: &[PeerAddr]) {
        let best_height = self.best_height().await;
        for peer in peers {
            if *peer == self.own_address() {
                continue;
            }
            if let Err(e) = self.client.send_version(peer, best_height).await {
                debug!("Could not send version to {}: {}", peer, e);
            }
        }
    }

    /// Liveness bookkeeping done by every per-peer handler: a peer we have
    /// not seen before is registered and greeted back.
    pub async fn check_address_known(&self, peer: &PeerAddr) {
        if *peer == self.own_address() {
            return;
        }
        if self.peers.add_known(peer.clone()) {
            debug!("Learned new peer {}", peer);
            self.send_version_to_nodes(std::slice::from_ref(peer)).await;
        }
    }

    /// Applies a full block pushed by a peer. Duplicates and orphans are
    /// tolerated here; the transit loop decides whether to backfill.
    pub async fn received_full_block(&self, data: &[u8]) -> Result<AddBlockResult> {
        let block = Block::deserialize(data)?;
        let hash = block.hash();
        let height = block.header.height;

        let outcome = self.chain.write().await.add_block(block);
        match outcome {
            AddBlockResult::Added => {
                info!("Chain extended to height {} ({})", height, hex::encode(hash));
            }
            AddBlockResult::AlreadyKnown => {
                trace!("Ignoring known block {}", hex::encode(hash));
            }
            AddBlockResult::ParentUnknown => {
                warn!("Received orphan block {} at height {}", hex::encode(hash), height);
            }
        }
        Ok(outcome)
    }

    /// Validates and stores a relayed transaction.
    pub async fn received_new_transaction(&self, tx: Transaction) -> Result<Admission> {
        let chain = self.chain.read().await;
        let mut mempool = self.mempool.write().await;
        let admission = mempool
            .received_new_transaction(tx, &chain)
            .map_err(NodeError::TxVerify)?;
        if admission == Admission::Accepted {
            debug!("Mempool now holds {} transactions", mempool.len());
        }
        Ok(admission)
    }

    /// Attempts to assemble a block from the mempool. The hint names the
    /// transaction that triggered the attempt; assembly is free to decline
    /// when the pool is below the configured minimum.
    pub async fn try_build_block(&self, hint: Option<TxId>) -> Result<bool> {
        if !self.config.builder.enabled {
            return Ok(false);
        }
        if let Some(hint) = hint {
            trace!("Block assembly triggered by {}", hex::encode(hint));
        }

        let new_hash = {
            let mut chain = self.chain.write().await;
            let mut mempool = self.mempool.write().await;

            if mempool.len() < self.config.builder.min_transactions {
                return Ok(false);
            }

            let beneficiary = crypto::address_from_hex(&self.config.builder.beneficiary_address)?;
            let picked = mempool.get_for_block(self.config.builder.max_transactions);
            let included: Vec<TxId> = picked.iter().map(|tx| tx.id).collect();

            let mut transactions =
                vec![Transaction::new_coinbase(beneficiary, crate::chain::BLOCK_REWARD)];
            transactions.extend(picked);

            let (tip, height) = chain.get_state();
            let block = Block::new(height + 1, tip, transactions);
            let hash = block.hash();

            if chain.add_block(block) != AddBlockResult::Added {
                return Err(NodeError::ChainError(
                    "assembled block did not extend the tip".to_string(),
                ));
            }
            mempool.remove_transactions(&included);
            info!(
                "Built block {} at height {} with {} transactions",
                hex::encode(hash),
                height + 1,
                included.len() + 1
            );
            hash
        };

        // locks are gone; now advertise the block to everyone we know
        self.broadcast_inv(InvKind::Block, vec![new_hash.to_vec()])
            .await;
        Ok(true)
    }

    /// Advertises items to all known peers, fire-and-forget.
    pub async fn broadcast_inv(&self, kind: InvKind, items: Vec<Vec<u8>>) {
        for peer in self.peers.list_known() {
            if peer == self.own_address() {
                continue;
            }
            if let Err(e) = self.client.send_inv(&peer, kind, items.clone()).await {
                debug!("Could not advertise to {}: {}", peer, e);
            }
        }
    }

    /// True when a transaction admission failure should be swallowed: a
    /// missing input means another participant holds the dependency and
    /// will complete it, so the node takes no remedial action.
    pub fn is_tolerable_admission_failure(err: &NodeError) -> bool {
        matches!(err, NodeError::TxVerify(TxVerifyError::NoSuchInput { .. }))
    }
}
