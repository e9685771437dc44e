//! Per-peer block-transit queue
//!
//! During catch-up a peer advertises a batch of block summaries. The node
//! fetches and applies them one at a time; the remainder of the batch waits
//! here, keyed by the announcing peer. Queue order is the order blocks were
//! advertised; later blocks may reference earlier ones as parent, so the
//! consumer must apply them in that order.

use crate::peers::PeerAddr;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Shared transit state, constructed once at node startup.
///
/// Lookup+mutate sequences run under one lock so two `inv`/`block` messages
/// for the same peer cannot lose updates.
#[derive(Debug, Clone, Default)]
pub struct TransitQueue {
    inner: Arc<Mutex<TransitInner>>,
}

#[derive(Debug, Default)]
struct TransitInner {
    blocks: HashMap<String, VecDeque<Vec<u8>>>,
    max_known_height: u64,
}

impl TransitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends blocks to a peer's queue, creating it if absent.
    pub fn add_blocks(&self, peer: &PeerAddr, blocks: Vec<Vec<u8>>) {
        if blocks.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        inner
            .blocks
            .entry(peer.to_string())
            .or_default()
            .extend(blocks);
    }

    /// Replaces a peer's queue with a fresh batch. This is the `inv`
    /// semantics: a new advertisement supersedes whatever was pending.
    pub fn replace_blocks(&self, peer: &PeerAddr, blocks: Vec<Vec<u8>>) {
        let mut inner = self.inner.lock();
        if blocks.is_empty() {
            inner.blocks.remove(&peer.to_string());
        } else {
            inner.blocks.insert(peer.to_string(), blocks.into());
        }
    }

    /// Pops the head of a peer's queue. Once the queue empties the peer's
    /// entry is removed entirely, leaving no dangling empty entries.
    pub fn shift_next(&self, peer: &PeerAddr) -> Option<Vec<u8>> {
        let key = peer.to_string();
        let mut inner = self.inner.lock();
        let queue = inner.blocks.get_mut(&key)?;
        let head = queue.pop_front();
        if queue.is_empty() {
            inner.blocks.remove(&key);
        }
        head
    }

    /// Drops everything pending for a peer. Used when an ancestor block
    /// turns out missing and the rest of the batch is invalidated.
    pub fn clean(&self, peer: &PeerAddr) {
        self.inner.lock().blocks.remove(&peer.to_string());
    }

    pub fn blocks_count(&self, peer: &PeerAddr) -> usize {
        self.inner
            .lock()
            .blocks
            .get(&peer.to_string())
            .map_or(0, |q| q.len())
    }

    /// Remembers the highest chain height any peer has announced.
    pub fn note_known_height(&self, height: u64) {
        let mut inner = self.inner.lock();
        if height > inner.max_known_height {
            inner.max_known_height = height;
        }
    }

    pub fn max_known_height(&self) -> u64 {
        self.inner.lock().max_known_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerAddr {
        PeerAddr::new("127.0.0.1", 8333)
    }

    #[test]
    fn test_fifo_order_and_entry_removal() {
        let transit = TransitQueue::new();
        transit.add_blocks(&peer(), vec![vec![1], vec![2], vec![3]]);

        assert_eq!(transit.shift_next(&peer()), Some(vec![1]));
        assert_eq!(transit.shift_next(&peer()), Some(vec![2]));
        assert_eq!(transit.shift_next(&peer()), Some(vec![3]));

        // entry is gone once drained
        assert_eq!(transit.blocks_count(&peer()), 0);
        assert_eq!(transit.shift_next(&peer()), None);
    }

    #[test]
    fn test_add_appends_to_existing_queue() {
        let transit = TransitQueue::new();
        transit.add_blocks(&peer(), vec![vec![1]]);
        transit.add_blocks(&peer(), vec![vec![2]]);

        assert_eq!(transit.blocks_count(&peer()), 2);
        assert_eq!(transit.shift_next(&peer()), Some(vec![1]));
    }

    #[test]
    fn test_replace_discards_previous_batch() {
        let transit = TransitQueue::new();
        transit.add_blocks(&peer(), vec![vec![1], vec![2]]);
        transit.replace_blocks(&peer(), vec![vec![9]]);

        assert_eq!(transit.blocks_count(&peer()), 1);
        assert_eq!(transit.shift_next(&peer()), Some(vec![9]));
    }

    #[test]
    fn test_clean_drops_pending_items() {
        let transit = TransitQueue::new();
        transit.add_blocks(&peer(), vec![vec![1], vec![2]]);
        transit.clean(&peer());

        assert_eq!(transit.blocks_count(&peer()), 0);
        assert_eq!(transit.shift_next(&peer()), None);
    }

    #[test]
    fn test_queues_are_per_peer() {
        let transit = TransitQueue::new();
        let other = PeerAddr::new("127.0.0.2", 8334);

        transit.add_blocks(&peer(), vec![vec![1]]);
        transit.add_blocks(&other, vec![vec![2]]);
        transit.clean(&peer());

        assert_eq!(transit.blocks_count(&other), 1);
    }

    #[test]
    fn test_max_known_height_only_grows() {
        let transit = TransitQueue::new();
        transit.note_known_height(5);
        transit.note_known_height(3);
        assert_eq!(transit.max_known_height(), 5);
    }
}
