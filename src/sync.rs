//! Chain catch-up state machine
//!
//! Synchronization is pull-based: nodes only ever request ranges, never
//! push them unsolicited. Three signals drive it:
//!
//! - a `version` exchange tells a node it is behind, ahead, or level with
//!   a peer;
//! - an `inv` of block hashes becomes the peer's transit batch, consumed
//!   one block at a time;
//! - each arriving full `block` is applied and the transit batch drains
//!   further.
//!
//! Consuming a transit item yields one of three states, and the loop below
//! reproduces them exactly: stop and wait for the fetched block, skip a
//! known block and continue, or clear the batch and backfill from the
//! missing parent.

use crate::chain::BlockShort;
use crate::error::Result;
use crate::messages::{InvKind, InvMessage, VersionMessage};
use crate::node::Node;
use crate::peers::PeerAddr;
use tracing::{debug, trace};

/// What happened to one advertised block summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Unknown block with a known parent: its full body was requested.
    /// Stop consuming the batch until it arrives.
    RequestedFull,
    /// Already in the chain. Continue with the next item.
    AlreadyKnown,
    /// The parent is missing locally: the rest of the batch is useless,
    /// backfill from this block's parent instead.
    ParentMissing,
}

/// Limit on block summaries returned for one `getblocks`/`getblocksup`.
pub const MAX_BLOCKS_PER_RANGE: usize = 1000;

impl Node {
    /// Consumes one advertised block summary from `from`.
    pub async fn received_block_short(&self, from: &PeerAddr, data: &[u8]) -> Result<BlockState> {
        let short = BlockShort::deserialize(data)?;
        self.transit.note_known_height(short.height);

        let state = {
            let chain = self.chain.read().await;
            if chain.contains(&short.hash) {
                BlockState::AlreadyKnown
            } else if chain.contains(&short.prev_hash) {
                BlockState::RequestedFull
            } else {
                BlockState::ParentMissing
            }
        };

        if state == BlockState::RequestedFull {
            trace!("Requesting full block {} from {}", hex::encode(short.hash), from);
            self.client
                .send_get_data(from, InvKind::Block, short.hash.to_vec())
                .await?;
        }
        Ok(state)
    }

    /// Drains a peer's transit queue until a fetch is issued, a backfill
    /// is requested, or the queue empties.
    pub async fn drain_transit(&self, peer: &PeerAddr) -> Result<()> {
        while let Some(data) = self.transit.shift_next(peer) {
            match self.received_block_short(peer, &data).await? {
                BlockState::RequestedFull => break,
                BlockState::AlreadyKnown => continue,
                BlockState::ParentMissing => {
                    // no sense checking the rest of this batch
                    self.transit.clean(peer);
                    let short = BlockShort::deserialize(&data)?;
                    debug!(
                        "Parent of {} missing, requesting blocks below {}",
                        hex::encode(short.hash),
                        hex::encode(short.prev_hash)
                    );
                    self.client
                        .send_get_blocks(peer, short.prev_hash.to_vec())
                        .await?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Reacts to a peer's inventory advertisement.
    pub async fn process_inv(&self, msg: InvMessage) -> Result<()> {
        debug!("Received inventory with {} {} items", msg.items.len(), msg.kind);
        match msg.kind {
            InvKind::Block => {
                // a fresh advertisement supersedes whatever was pending
                self.transit.replace_blocks(&msg.from, msg.items);
                self.drain_transit(&msg.from).await
            }
            InvKind::Tx => {
                let Some(txid) = msg.items.first() else {
                    return Ok(());
                };
                let known = match txid.as_slice().try_into() {
                    Ok(id) => self.mempool.read().await.get_if_exists(&id).is_some(),
                    Err(_) => false,
                };
                if !known {
                    trace!("Transaction {} unknown, requesting it", hex::encode(txid));
                    self.client
                        .send_get_data(&msg.from, InvKind::Tx, txid.clone())
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Reacts to a peer's version announcement: request what we miss, or
    /// tell the peer what we have so it pulls from us.
    pub async fn process_version(&self, msg: VersionMessage) -> Result<()> {
        let (tip, my_height) = {
            let chain = self.chain.read().await;
            chain.get_state()
        };
        self.transit.note_known_height(msg.best_height);
        debug!(
            "Version from {}: their height {}, ours {}",
            msg.from, msg.best_height, my_height
        );

        if my_height < msg.best_height {
            self.client
                .send_get_blocks_upper(&msg.from, tip.to_vec())
                .await?;
        } else if my_height > msg.best_height {
            self.client.send_version(&msg.from, my_height).await?;
        } else {
            trace!("Already level with {}", msg.from);
        }
        Ok(())
    }

    /// Answers `getblocks` (walk down from the start hash) or `getblocksup`
    /// (blocks above the start hash): the range is advertised back as an
    /// `inv`, oldest first so parents precede children.
    pub async fn answer_get_blocks(
        &self,
        from: &PeerAddr,
        start: &[u8],
        upper: bool,
    ) -> Result<()> {
        let mut shorts = {
            let chain = self.chain.read().await;
            if upper {
                match chain.get_blocks_after(start) {
                    Some(blocks) if !blocks.is_empty() => blocks,
                    // nothing above the start hash: bootstrap the peer from
                    // the top of our chain instead
                    _ => chain.get_blocks_short_info(&[], MAX_BLOCKS_PER_RANGE),
                }
            } else {
                chain.get_blocks_short_info(start, MAX_BLOCKS_PER_RANGE)
            }
        };
        shorts.truncate(MAX_BLOCKS_PER_RANGE);
        debug!("Advertising {} block summaries to {}", shorts.len(), from);

        // the chain reports newest-first; the wire wants oldest-first
        let mut items = Vec::with_capacity(shorts.len());
        for short in shorts.iter().rev() {
            items.push(short.serialize()?);
        }
        self.client.send_inv(from, InvKind::Block, items).await
    }
}
