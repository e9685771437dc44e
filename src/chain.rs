//! In-memory blockchain store
//!
//! The sync protocol only needs a narrow interface from the chain: state,
//! lookup, append, and the range queries answering `getblocks*`/`getfblocks`.
//! Consensus (proof-of-work, fork choice) is out of scope; blocks link by
//! parent hash and a block extending anything but the tip is ignored.

use crate::crypto::Address;
use crate::error::Result;
use crate::transaction::{Transaction, TxId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub type BlockHash = [u8; 32];

/// Reward paid by the coinbase transaction of every assembled block.
pub const BLOCK_REWARD: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub timestamp: u64,
    pub prev_hash: BlockHash,
    pub merkle_root: BlockHash,
}

impl BlockHeader {
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.prev_hash);
        hasher.update(self.merkle_root);
        hasher.finalize().into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(height: u64, prev_hash: BlockHash, transactions: Vec<Transaction>) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;
        let merkle_root = Block::calculate_merkle_root(&transactions);

        Block {
            header: BlockHeader {
                height,
                timestamp,
                prev_hash,
                merkle_root,
            },
            transactions,
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    pub fn calculate_merkle_root(transactions: &[Transaction]) -> BlockHash {
        let mut hasher = Sha256::new();
        for tx in transactions {
            hasher.update(tx.id);
        }
        hasher.finalize().into()
    }

    /// The summary advertised in `inv` items and `getblocks*` answers.
    pub fn short(&self) -> BlockShort {
        BlockShort {
            hash: self.hash(),
            prev_hash: self.header.prev_hash,
            height: self.header.height,
            timestamp: self.header.timestamp,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Block summary: enough to decide whether to fetch the full body and to
/// walk parent links during catch-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockShort {
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub height: u64,
    pub timestamp: u64,
}

impl BlockShort {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Outcome of appending a full block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddBlockResult {
    Added,
    AlreadyKnown,
    ParentUnknown,
}

pub struct Blockchain {
    blocks: Vec<Block>,
    by_hash: HashMap<BlockHash, usize>,
}

impl Blockchain {
    /// Creates a chain with a genesis block paying the beneficiary.
    ///
    /// The genesis block is fully deterministic (zero timestamps): every
    /// node configured with the same beneficiary starts from the same
    /// block, which is what lets chains from independent nodes connect.
    pub fn new(genesis_beneficiary: Address) -> Self {
        let mut coinbase = Transaction::new_coinbase(genesis_beneficiary, BLOCK_REWARD);
        coinbase.timestamp = 0;
        coinbase.finalize();

        let genesis = Block {
            header: BlockHeader {
                height: 0,
                timestamp: 0,
                prev_hash: [0u8; 32],
                merkle_root: Block::calculate_merkle_root(std::slice::from_ref(&coinbase)),
            },
            transactions: vec![coinbase],
        };

        let mut chain = Blockchain {
            blocks: Vec::new(),
            by_hash: HashMap::new(),
        };
        chain.push(genesis);
        chain
    }

    fn push(&mut self, block: Block) {
        self.by_hash.insert(block.hash(), self.blocks.len());
        self.blocks.push(block);
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get_block(&self, hash: &BlockHash) -> Option<&Block> {
        self.by_hash.get(hash).map(|i| &self.blocks[*i])
    }

    fn tip(&self) -> &Block {
        self.blocks.last().expect("chain always has a genesis block")
    }

    /// Current tip hash and height.
    pub fn get_state(&self) -> (BlockHash, u64) {
        let tip = self.tip();
        (tip.hash(), tip.header.height)
    }

    /// Appends a block. Duplicates and side-branch blocks are no-ops; a
    /// block whose parent is absent is reported so the caller can backfill.
    pub fn add_block(&mut self, block: Block) -> AddBlockResult {
        let hash = block.hash();
        if self.contains(&hash) {
            return AddBlockResult::AlreadyKnown;
        }
        let (tip_hash, tip_height) = self.get_state();
        if block.header.prev_hash == tip_hash {
            if block.header.height != tip_height + 1 {
                return AddBlockResult::ParentUnknown;
            }
            self.push(block);
            return AddBlockResult::Added;
        }
        if self.contains(&block.header.prev_hash) {
            // side branch; fork choice is out of scope
            return AddBlockResult::AlreadyKnown;
        }
        AddBlockResult::ParentUnknown
    }

    /// The first `count` blocks, lowest first, plus the current height.
    /// Used by brand-new nodes bootstrapping a local chain.
    pub fn get_first_blocks(&self, count: usize) -> (Vec<&Block>, u64) {
        let blocks = self.blocks.iter().take(count).collect();
        (blocks, self.tip().header.height)
    }

    /// Block summaries walking DOWN from `start` (or from the tip when
    /// `start` is empty or unknown), newest-first, at most `limit`.
    pub fn get_blocks_short_info(&self, start: &[u8], limit: usize) -> Vec<BlockShort> {
        let from = start
            .try_into()
            .ok()
            .and_then(|hash: BlockHash| self.by_hash.get(&hash).copied())
            .unwrap_or(self.blocks.len() - 1);

        self.blocks[..=from]
            .iter()
            .rev()
            .take(limit)
            .map(Block::short)
            .collect()
    }

    /// Summaries of the blocks ABOVE `start`, newest-first. Returns None
    /// when `start` is not in the chain.
    pub fn get_blocks_after(&self, start: &[u8]) -> Option<Vec<BlockShort>> {
        let hash: BlockHash = start.try_into().ok()?;
        let index = *self.by_hash.get(&hash)?;
        Some(
            self.blocks[index + 1..]
                .iter()
                .rev()
                .map(Block::short)
                .collect(),
        )
    }

    /// Looks up a transaction anywhere in the chain.
    pub fn find_transaction(&self, txid: &TxId) -> Option<&Transaction> {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .find(|tx| tx.id == *txid)
    }

    /// True when some block already spends the given output.
    pub fn output_is_spent(&self, txid: &TxId, vout: u32) -> bool {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .flat_map(|tx| tx.inputs.iter())
            .any(|input| input.txid == txid.as_slice() && input.vout == vout)
    }
}
