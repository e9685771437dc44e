//! Error types for Emberchain

use crate::mempool::TxVerifyError;
use std::fmt;

#[derive(Debug, Clone)]
pub enum NodeError {
    MalformedEnvelope(String),
    InvalidPeerAddress(String),
    PeerUnavailable(String),
    EmptyResponse,
    RemoteError(String),
    Unauthorized,
    NetworkError(String),
    IoError(String),
    BincodeError(String),
    ChainError(String),
    CryptoError(String),
    ConfigError(String),
    TxVerify(TxVerifyError),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeError::MalformedEnvelope(msg) => write!(f, "Malformed envelope: {}", msg),
            NodeError::InvalidPeerAddress(msg) => write!(f, "Invalid peer address: {}", msg),
            NodeError::PeerUnavailable(peer) => write!(f, "{} is not available", peer),
            NodeError::EmptyResponse => {
                write!(f, "Received 0 bytes as a response. Expected at least 1 byte")
            }
            NodeError::RemoteError(msg) => write!(f, "Remote error: {}", msg),
            NodeError::Unauthorized => write!(f, "Local network auth is required"),
            NodeError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            NodeError::IoError(msg) => write!(f, "IO error: {}", msg),
            NodeError::BincodeError(msg) => write!(f, "Bincode error: {}", msg),
            NodeError::ChainError(msg) => write!(f, "Chain error: {}", msg),
            NodeError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            NodeError::ConfigError(msg) => write!(f, "Config error: {}", msg),
            NodeError::TxVerify(err) => write!(f, "Transaction verification failed: {}", err),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for NodeError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        NodeError::BincodeError(err.to_string())
    }
}

impl From<TxVerifyError> for NodeError {
    fn from(err: TxVerifyError) -> Self {
        NodeError::TxVerify(err)
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, NodeError>;
