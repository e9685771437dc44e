//! Mempool of unapproved transactions
//!
//! Admission validates an incoming transaction against the chain and the
//! unapproved set, then stores it. Admitting a transaction that is already
//! present is a silent no-op, not an error: on a fully connected mesh every
//! peer relays everything, and the no-op is what stops the amplification.

use crate::chain::Blockchain;
use crate::crypto::{self, Address};
use crate::error::{NodeError, Result};
use crate::index;
use crate::transaction::{Transaction, TxId, TxInput, TxOutput};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Why a transaction was refused. Callers match on the kind: `NoSuchInput`
/// in particular is not fatal: the node assumes whoever holds the missing
/// dependency will get it into a block and takes no remedial action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxVerifyError {
    NoSuchInput { txid: Vec<u8>, vout: u32 },
    InvalidSignature(String),
    DoubleSpend(String),
    Malformed(String),
}

impl fmt::Display for TxVerifyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TxVerifyError::NoSuchInput { txid, vout } => {
                write!(f, "Input {}:{} cannot be found", hex::encode(txid), vout)
            }
            TxVerifyError::InvalidSignature(msg) => write!(f, "Invalid signature: {}", msg),
            TxVerifyError::DoubleSpend(msg) => write!(f, "Double spend: {}", msg),
            TxVerifyError::Malformed(msg) => write!(f, "Malformed transaction: {}", msg),
        }
    }
}

impl std::error::Error for TxVerifyError {}

/// Outcome of a successful admission call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    AlreadyKnown,
}

#[derive(Debug, Default)]
pub struct Mempool {
    unapproved: HashMap<TxId, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_if_exists(&self, txid: &TxId) -> Option<&Transaction> {
        self.unapproved.get(txid)
    }

    pub fn len(&self) -> usize {
        self.unapproved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unapproved.is_empty()
    }

    /// Validates and stores an incoming transaction.
    pub fn received_new_transaction(
        &mut self,
        tx: Transaction,
        chain: &Blockchain,
    ) -> std::result::Result<Admission, TxVerifyError> {
        if self.unapproved.contains_key(&tx.id) {
            return Ok(Admission::AlreadyKnown);
        }
        self.verify(&tx, chain)?;
        self.unapproved.insert(tx.id, tx);
        Ok(Admission::Accepted)
    }

    fn verify(&self, tx: &Transaction, chain: &Blockchain) -> std::result::Result<(), TxVerifyError> {
        if tx.is_coinbase() {
            return Err(TxVerifyError::Malformed(
                "coinbase transactions are not relayed".to_string(),
            ));
        }
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(TxVerifyError::Malformed(
                "transaction needs at least one input and one output".to_string(),
            ));
        }
        if tx.id != tx.hash() {
            return Err(TxVerifyError::Malformed(
                "transaction id does not match contents".to_string(),
            ));
        }

        // an input may reference a chain transaction or one still unapproved
        let mut prev_outputs = Vec::with_capacity(tx.inputs.len());
        let mut seen = HashSet::new();
        for input in &tx.inputs {
            let missing = || TxVerifyError::NoSuchInput {
                txid: input.txid.clone(),
                vout: input.vout,
            };

            let txid: TxId = input.txid.as_slice().try_into().map_err(|_| missing())?;
            let prev_tx = chain
                .find_transaction(&txid)
                .or_else(|| self.unapproved.get(&txid))
                .ok_or_else(missing)?;
            let output = prev_tx
                .outputs
                .get(input.vout as usize)
                .ok_or_else(missing)?;

            if !seen.insert((txid, input.vout)) {
                return Err(TxVerifyError::DoubleSpend(format!(
                    "output {}:{} is spent twice by this transaction",
                    hex::encode(txid),
                    input.vout
                )));
            }
            if chain.output_is_spent(&txid, input.vout) {
                return Err(TxVerifyError::DoubleSpend(format!(
                    "output {}:{} is already spent in the chain",
                    hex::encode(txid),
                    input.vout
                )));
            }
            if self.output_is_reserved(&txid, input.vout) {
                return Err(TxVerifyError::DoubleSpend(format!(
                    "output {}:{} is claimed by another unapproved transaction",
                    hex::encode(txid),
                    input.vout
                )));
            }
            prev_outputs.push(output.clone());
        }

        let available: u64 = prev_outputs.iter().map(|o| o.value).sum();
        let spent: u64 = tx.outputs.iter().map(|o| o.value).sum();
        if spent > available {
            return Err(TxVerifyError::Malformed(format!(
                "outputs total {} exceeds inputs total {}",
                spent, available
            )));
        }

        tx.verify_input_signatures(&prev_outputs)
            .map_err(|e| TxVerifyError::InvalidSignature(e.to_string()))
    }

    /// True when some unapproved transaction already spends this output.
    fn output_is_reserved(&self, txid: &TxId, vout: u32) -> bool {
        self.unapproved
            .values()
            .flat_map(|tx| tx.inputs.iter())
            .any(|input| input.txid == txid.as_slice() && input.vout == vout)
    }

    /// Up to `count` transactions for block assembly, oldest first.
    pub fn get_for_block(&self, count: usize) -> Vec<Transaction> {
        let mut txs: Vec<_> = self.unapproved.values().cloned().collect();
        txs.sort_by_key(|tx| tx.timestamp);
        txs.truncate(count);
        txs
    }

    /// Drops transactions that made it into a block.
    pub fn remove_transactions(&mut self, ids: &[TxId]) {
        for id in ids {
            self.unapproved.remove(id);
        }
    }

    /// Builds an unsigned transaction spending the wallet's unspent outputs,
    /// returning it together with the digests the wallet must sign.
    pub fn prepare_new_transaction(
        &self,
        chain: &Blockchain,
        pub_key: &[u8],
        to: Address,
        amount: u64,
    ) -> Result<(Transaction, Vec<Vec<u8>>)> {
        if amount == 0 {
            return Err(NodeError::ChainError("amount must be positive".to_string()));
        }
        let from = crypto::pub_key_address(pub_key);

        let mut selected = Vec::new();
        let mut prev_outputs = Vec::new();
        let mut total = 0u64;
        for utxo in index::unspent_outputs(chain, &from) {
            if self.output_is_reserved(&utxo.txid, utxo.vout) {
                continue;
            }
            total += utxo.output.value;
            prev_outputs.push(utxo.output.clone());
            selected.push(TxInput {
                txid: utxo.txid.to_vec(),
                vout: utxo.vout,
                signature: Vec::new(),
                pub_key: Vec::new(),
            });
            if total >= amount {
                break;
            }
        }
        if total < amount {
            return Err(NodeError::ChainError(format!(
                "not enough funds: {} available, {} requested",
                total, amount
            )));
        }

        let mut outputs = vec![TxOutput {
            value: amount,
            pub_key_hash: to,
        }];
        if total > amount {
            outputs.push(TxOutput {
                value: total - amount,
                pub_key_hash: from,
            });
        }

        let tx = Transaction::new_unsigned(selected, outputs);
        let digests = tx.signable_digests(&prev_outputs)?;
        Ok((tx, digests))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BLOCK_REWARD;
    use crate::crypto::KeyPair;

    fn funded() -> (KeyPair, Blockchain, Mempool) {
        let miner = KeyPair::generate();
        let chain = Blockchain::new(miner.address());
        (miner, chain, Mempool::new())
    }

    fn signed_transfer(
        miner: &KeyPair,
        chain: &Blockchain,
        mempool: &Mempool,
        amount: u64,
    ) -> Transaction {
        let (mut tx, digests) = mempool
            .prepare_new_transaction(chain, &miner.public_key_bytes(), [9u8; 32], amount)
            .unwrap();
        tx.sign_inputs(miner, &digests).unwrap();
        tx
    }

    #[test]
    fn test_admission_is_idempotent() {
        let (miner, chain, mut mempool) = funded();
        let tx = signed_transfer(&miner, &chain, &mempool, 10);

        assert_eq!(
            mempool.received_new_transaction(tx.clone(), &chain).unwrap(),
            Admission::Accepted
        );
        assert_eq!(
            mempool.received_new_transaction(tx, &chain).unwrap(),
            Admission::AlreadyKnown
        );
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_unknown_input_is_no_such_input() {
        let (miner, chain, mut mempool) = funded();
        let mut tx = signed_transfer(&miner, &chain, &mempool, 10);
        tx.inputs[0].txid = vec![7u8; 32];
        tx.finalize();

        match mempool.received_new_transaction(tx, &chain) {
            Err(TxVerifyError::NoSuchInput { .. }) => {}
            other => panic!("expected NoSuchInput, got {:?}", other),
        }
    }

    #[test]
    fn test_tampered_transaction_is_rejected() {
        let (miner, chain, mut mempool) = funded();
        let mut tx = signed_transfer(&miner, &chain, &mempool, 10);
        tx.outputs[0].value = BLOCK_REWARD;
        tx.finalize();

        match mempool.received_new_transaction(tx, &chain) {
            Err(TxVerifyError::InvalidSignature(_)) => {}
            other => panic!("expected InvalidSignature, got {:?}", other),
        }
    }

    #[test]
    fn test_double_spend_across_unapproved_set() {
        let (miner, chain, mut mempool) = funded();
        let first = signed_transfer(&miner, &chain, &mempool, 10);

        // second spend of the same genesis output, built before the first
        // one is admitted so both reference the same input
        let second = {
            let empty = Mempool::new();
            let (mut tx, digests) = empty
                .prepare_new_transaction(&chain, &miner.public_key_bytes(), [8u8; 32], 5)
                .unwrap();
            tx.sign_inputs(&miner, &digests).unwrap();
            tx
        };

        mempool.received_new_transaction(first, &chain).unwrap();
        match mempool.received_new_transaction(second, &chain) {
            Err(TxVerifyError::DoubleSpend(_)) => {}
            other => panic!("expected DoubleSpend, got {:?}", other),
        }
    }

    #[test]
    fn test_prepare_skips_reserved_outputs() {
        let (miner, chain, mut mempool) = funded();
        let tx = signed_transfer(&miner, &chain, &mempool, 10);
        mempool.received_new_transaction(tx, &chain).unwrap();

        // the only chain output is now reserved by the unapproved spend
        let result =
            mempool.prepare_new_transaction(&chain, &miner.public_key_bytes(), [9u8; 32], 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_prepare_builds_change_output() {
        let (miner, chain, mempool) = funded();
        let (tx, digests) = mempool
            .prepare_new_transaction(&chain, &miner.public_key_bytes(), [9u8; 32], 20)
            .unwrap();

        assert_eq!(digests.len(), tx.inputs.len());
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 20);
        assert_eq!(tx.outputs[1].value, BLOCK_REWARD - 20);
        assert_eq!(tx.outputs[1].pub_key_hash, miner.address());
    }

    #[test]
    fn test_coinbase_is_not_relayable() {
        let (miner, chain, mut mempool) = funded();
        let coinbase = Transaction::new_coinbase(miner.address(), BLOCK_REWARD);

        match mempool.received_new_transaction(coinbase, &chain) {
            Err(TxVerifyError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_get_for_block_is_oldest_first() {
        let (miner, chain, mut mempool) = funded();
        let tx = signed_transfer(&miner, &chain, &mempool, 10);
        let id = tx.id;
        mempool.received_new_transaction(tx, &chain).unwrap();

        let picked = mempool.get_for_block(10);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, id);

        mempool.remove_transactions(&[id]);
        assert!(mempool.is_empty());
    }
}
