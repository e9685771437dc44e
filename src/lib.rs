//! Emberchain - A peer-to-peer cryptocurrency node
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Protocol
//! - [`wire`] - Envelope codec and response framing
//! - [`messages`] - Payload bodies for every command
//! - [`client`] - Outbound client (one method per command)
//! - [`server`] - Inbound dispatcher and handler table
//!
//! ## Synchronization
//! - [`sync`] - Pull-based catch-up state machine
//! - [`transit`] - Per-peer block-transit queue
//! - [`peers`] - Peer addresses and the known-peer directory
//!
//! ## Ledger
//! - [`chain`] - In-memory blockchain store
//! - [`transaction`] - UTXO-model transactions
//! - [`mempool`] - Unapproved-transaction admission
//! - [`index`] - UTXO and history scans
//!
//! ## Cryptography
//! - [`crypto`] - Keypairs, signatures, addresses (secp256k1)
//!
//! ## Node & Utilities
//! - [`node`] - The node service object
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Protocol
// ============================================================================
pub mod client;
pub mod messages;
pub mod server;
pub mod wire;

// ============================================================================
// Synchronization
// ============================================================================
pub mod peers;
pub mod sync;
pub mod transit;

// ============================================================================
// Ledger
// ============================================================================
pub mod chain;
pub mod index;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// Node & Configuration
// ============================================================================
pub mod config;
pub mod error;
pub mod node;
