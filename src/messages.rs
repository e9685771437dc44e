//! Payload bodies for every protocol command
//!
//! These are the structures carried inside the wire envelope. Fire-and-forget
//! commands include the sender's own address so the receiving node can
//! register it and answer back over a fresh connection.

use crate::peers::PeerAddr;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// Protocol version announced in `version` messages.
pub const NODE_VERSION: u32 = 1;

/// What an `inv` or `getdata` item refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvKind {
    Block,
    Tx,
}

impl std::fmt::Display for InvKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvKind::Block => write!(f, "block"),
            InvKind::Tx => write!(f, "tx"),
        }
    }
}

/// `block`: a full serialized block pushed to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMessage {
    pub from: PeerAddr,
    #[serde(with = "serde_bytes")]
    pub block: Vec<u8>,
}

/// `getblocks` / `getblocksup`: request for block summaries starting at a
/// hash, walking down or up the chain depending on the command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlocksMessage {
    pub from: PeerAddr,
    #[serde(with = "serde_bytes")]
    pub start_from: Vec<u8>,
}

/// Response to `getfblocks`: the first blocks of the chain, lowest first,
/// plus the responder's best height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirstBlocksResponse {
    pub blocks: Vec<Vec<u8>>,
    pub height: u64,
}

/// `getdata`: request the full body of one block or transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDataMessage {
    pub from: PeerAddr,
    pub kind: InvKind,
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
}

/// `inv`: advertisement of block hashes or transaction ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvMessage {
    pub from: PeerAddr,
    pub kind: InvKind,
    pub items: Vec<Vec<u8>>,
}

/// `tx`: a serialized transaction relayed from another node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxMessage {
    pub from: PeerAddr,
    #[serde(with = "serde_bytes")]
    pub transaction: Vec<u8>,
}

/// `version`: handshake message carrying the sender's best height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMessage {
    pub version: u32,
    pub best_height: u64,
    pub from: PeerAddr,
}

/// `txfull`: a wallet submits a complete, signed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransactionMessage {
    pub address: String,
    pub tx: Transaction,
}

/// `txrequest`: a wallet asks the node to prepare an unsigned transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTransactionMessage {
    #[serde(with = "serde_bytes")]
    pub pub_key: Vec<u8>,
    pub to: String,
    pub amount: u64,
}

/// Response to `txrequest`: the unsigned transaction and the digests the
/// wallet must sign, one per input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedTransaction {
    pub tx: Transaction,
    pub data_to_sign: Vec<Vec<u8>>,
}

/// `getunspent`: request the unspent outputs of an address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUnspentMessage {
    pub address: String,
    #[serde(with = "serde_bytes")]
    pub last_block: Vec<u8>,
}

/// One unspent output record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnspentRecord {
    #[serde(with = "serde_bytes")]
    pub txid: Vec<u8>,
    pub vout: u32,
    pub amount: u64,
    pub is_base: bool,
    pub from: String,
}

/// Response to `getunspent`: the records plus the responder's tip hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnspentResponse {
    pub transactions: Vec<UnspentRecord>,
    #[serde(with = "serde_bytes")]
    pub last_block: Vec<u8>,
}

/// `gethistory`: request the transaction history of an address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHistoryMessage {
    pub address: String,
}

/// Direction of a history record relative to the queried address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryDirection {
    Incoming,
    Outgoing,
}

/// One transaction history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub direction: HistoryDirection,
    #[serde(with = "serde_bytes")]
    pub txid: Vec<u8>,
    pub amount: u64,
    pub from: String,
    pub to: String,
}

/// `addnode` / `removenode`: local management of the known-peer set.
/// Carries the shared auth token checked by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManageNodeMessage {
    pub auth: String,
    pub peer: PeerAddr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{from_payload, to_payload};

    #[test]
    fn test_inv_message_roundtrip() {
        let msg = InvMessage {
            from: PeerAddr::new("10.0.0.1", 8333),
            kind: InvKind::Block,
            items: vec![vec![1; 32], vec![2; 32]],
        };
        let bytes = to_payload(&msg).unwrap();
        let decoded: InvMessage = from_payload(&bytes).unwrap();
        assert_eq!(decoded.kind, InvKind::Block);
        assert_eq!(decoded.items.len(), 2);
        assert_eq!(decoded.from.to_string(), "10.0.0.1:8333");
    }

    #[test]
    fn test_unspent_response_roundtrip() {
        let msg = UnspentResponse {
            transactions: vec![UnspentRecord {
                txid: vec![9; 32],
                vout: 1,
                amount: 250,
                is_base: false,
                from: "abcd".to_string(),
            }],
            last_block: vec![3; 32],
        };
        let bytes = to_payload(&msg).unwrap();
        let decoded: UnspentResponse = from_payload(&bytes).unwrap();
        assert_eq!(decoded.transactions[0].amount, 250);
        assert_eq!(decoded.last_block, vec![3; 32]);
    }
}
