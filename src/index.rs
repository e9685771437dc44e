//! UTXO and history scans over the chain
//!
//! Answers `getunspent` and `gethistory` and feeds input selection when the
//! node prepares a transaction for a wallet. These are straight scans over
//! the in-memory chain; a persistent index is the storage layer's business.

use crate::chain::Blockchain;
use crate::crypto::{self, Address};
use crate::transaction::{Transaction, TxId, TxOutput};

/// One output owned by an address and not yet spent by anything in the chain.
#[derive(Debug, Clone)]
pub struct UnspentOutput {
    pub txid: TxId,
    pub vout: u32,
    pub output: TxOutput,
    pub is_base: bool,
    /// Address the funds came from; meaningless for coinbase outputs.
    pub from: Address,
}

/// One chain transaction seen from an address's point of view.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub outgoing: bool,
    pub txid: TxId,
    pub amount: u64,
    pub counterparty: Address,
}

fn sender_of(tx: &Transaction) -> Address {
    tx.inputs
        .first()
        .filter(|input| !input.pub_key.is_empty())
        .map(|input| crypto::pub_key_address(&input.pub_key))
        .unwrap_or([0u8; 32])
}

/// All unspent outputs currently owned by `address`.
pub fn unspent_outputs(chain: &Blockchain, address: &Address) -> Vec<UnspentOutput> {
    let mut result = Vec::new();
    for block in chain.blocks() {
        for tx in &block.transactions {
            for (vout, output) in tx.outputs.iter().enumerate() {
                let vout = vout as u32;
                if output.pub_key_hash != *address {
                    continue;
                }
                if chain.output_is_spent(&tx.id, vout) {
                    continue;
                }
                result.push(UnspentOutput {
                    txid: tx.id,
                    vout,
                    output: output.clone(),
                    is_base: tx.is_coinbase(),
                    from: sender_of(tx),
                });
            }
        }
    }
    result
}

/// Total value of all unspent outputs owned by `address`.
pub fn balance(chain: &Blockchain, address: &Address) -> u64 {
    unspent_outputs(chain, address)
        .iter()
        .map(|u| u.output.value)
        .sum()
}

/// The in/out records for an address, oldest block first.
pub fn address_history(chain: &Blockchain, address: &Address) -> Vec<HistoryEntry> {
    let mut result = Vec::new();
    for block in chain.blocks() {
        for tx in &block.transactions {
            let sender = sender_of(tx);
            let sent_by_us = !tx.is_coinbase() && sender == *address;

            if sent_by_us {
                // amount leaving the address; change outputs don't count
                let amount: u64 = tx
                    .outputs
                    .iter()
                    .filter(|o| o.pub_key_hash != *address)
                    .map(|o| o.value)
                    .sum();
                let counterparty = tx
                    .outputs
                    .iter()
                    .find(|o| o.pub_key_hash != *address)
                    .map(|o| o.pub_key_hash)
                    .unwrap_or([0u8; 32]);
                result.push(HistoryEntry {
                    outgoing: true,
                    txid: tx.id,
                    amount,
                    counterparty,
                });
            } else {
                let amount: u64 = tx
                    .outputs
                    .iter()
                    .filter(|o| o.pub_key_hash == *address)
                    .map(|o| o.value)
                    .sum();
                if amount > 0 {
                    result.push(HistoryEntry {
                        outgoing: false,
                        txid: tx.id,
                        amount,
                        counterparty: sender,
                    });
                }
            }
        }
    }
    result
}
