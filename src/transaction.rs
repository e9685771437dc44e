//! UTXO-model transactions
//!
//! A transaction spends previously created outputs and creates new ones.
//! Each input carries a compact signature over a per-input digest plus the
//! signer's public key; ownership is checked against the referenced output's
//! public key hash. A coinbase transaction has a single input referencing
//! nothing and is created only by block assembly.

use crate::crypto::{self, Address, KeyPair};
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type TxId = [u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction whose output is being spent. Empty for coinbase.
    #[serde(with = "serde_bytes")]
    pub txid: Vec<u8>,
    /// Index of the referenced output in that transaction.
    pub vout: u32,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub pub_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in base units.
    pub value: u64,
    pub pub_key_hash: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub timestamp: u64,
}

impl Transaction {
    /// Builds an unsigned transaction spending the given outputs.
    pub fn new_unsigned(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Transaction {
            id: [0u8; 32],
            inputs,
            outputs,
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
        }
    }

    /// Builds the coinbase transaction rewarding a block's beneficiary.
    pub fn new_coinbase(beneficiary: Address, reward: u64) -> Self {
        let mut tx = Transaction::new_unsigned(
            vec![TxInput {
                txid: Vec::new(),
                vout: 0,
                signature: Vec::new(),
                pub_key: Vec::new(),
            }],
            vec![TxOutput {
                value: reward,
                pub_key_hash: beneficiary,
            }],
        );
        tx.finalize();
        tx
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].txid.is_empty()
    }

    /// Hash of the transaction contents, excluding the id field itself.
    pub fn hash(&self) -> TxId {
        let mut copy = self.clone();
        copy.id = [0u8; 32];
        let bytes = bincode::serialize(&copy).expect("transaction is always serializable");
        Sha256::digest(&bytes).into()
    }

    /// Seals the transaction by setting its id to the content hash.
    /// Must be called after signing; the id covers the signatures.
    pub fn finalize(&mut self) {
        self.id = self.hash();
    }

    /// The digests a wallet has to sign, one per input. Both signing and
    /// verification derive these the same way: a copy with id and input
    /// credentials cleared, bound to the input index and the referenced
    /// output's owner and value.
    pub fn signable_digests(&self, prev_outputs: &[TxOutput]) -> Result<Vec<Vec<u8>>> {
        if prev_outputs.len() != self.inputs.len() {
            return Err(NodeError::ChainError(format!(
                "{} referenced outputs for {} inputs",
                prev_outputs.len(),
                self.inputs.len()
            )));
        }

        let mut trimmed = self.clone();
        trimmed.id = [0u8; 32];
        for input in &mut trimmed.inputs {
            input.signature = Vec::new();
            input.pub_key = Vec::new();
        }
        let base = bincode::serialize(&trimmed)?;

        let mut digests = Vec::with_capacity(self.inputs.len());
        for (index, prev) in prev_outputs.iter().enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(&base);
            hasher.update((index as u32).to_le_bytes());
            hasher.update(prev.pub_key_hash);
            hasher.update(prev.value.to_le_bytes());
            digests.push(hasher.finalize().to_vec());
        }
        Ok(digests)
    }

    /// Wallet-side: signs every input with one key and seals the id.
    pub fn sign_inputs(&mut self, keypair: &KeyPair, digests: &[Vec<u8>]) -> Result<()> {
        if digests.len() != self.inputs.len() {
            return Err(NodeError::CryptoError(format!(
                "{} digests for {} inputs",
                digests.len(),
                self.inputs.len()
            )));
        }
        for (input, digest) in self.inputs.iter_mut().zip(digests) {
            input.signature = keypair.sign_digest(digest)?;
            input.pub_key = keypair.public_key_bytes();
        }
        self.finalize();
        Ok(())
    }

    /// Node-side: checks every input's signature and that the signer owns
    /// the referenced output.
    pub fn verify_input_signatures(&self, prev_outputs: &[TxOutput]) -> Result<()> {
        let digests = self.signable_digests(prev_outputs)?;
        for ((input, prev), digest) in self.inputs.iter().zip(prev_outputs).zip(&digests) {
            if crypto::pub_key_address(&input.pub_key) != prev.pub_key_hash {
                return Err(NodeError::CryptoError(
                    "Input key does not own the referenced output".to_string(),
                ));
            }
            crypto::verify_digest(&input.pub_key, digest, &input.signature)?;
        }
        Ok(())
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
