//! Peer addresses and the process-wide known-peer directory
//!
//! A `PeerAddr` is the identity key for all per-peer state (transit queue,
//! known-peer set). The `PeerDirectory` is constructed once at node startup
//! and shared by handle with every connection task.

use crate::error::{NodeError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Lowest port a peer is allowed to listen on. Ports below this are
/// reserved for system services and never valid peer addresses.
pub const MIN_PEER_PORT: u16 = 1024;

/// Network address of another node participating in the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        PeerAddr {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            NodeError::InvalidPeerAddress(format!("expected host:port, got {:?}", s))
        })?;

        let port: u16 = port.parse().map_err(|_| {
            NodeError::InvalidPeerAddress(format!("port {:?} is out of range", port))
        })?;

        let addr = PeerAddr::new(host, port);
        check_peer_address(&addr)?;
        Ok(addr)
    }
}

/// Pre-flight validation done before any connection attempt.
pub fn check_peer_address(addr: &PeerAddr) -> Result<()> {
    if addr.port < MIN_PEER_PORT {
        return Err(NodeError::InvalidPeerAddress(format!(
            "port {} is below {}",
            addr.port, MIN_PEER_PORT
        )));
    }
    if addr.host.is_empty() {
        return Err(NodeError::InvalidPeerAddress("empty host".to_string()));
    }
    Ok(())
}

/// Thread-safe set of known peers, shared across all connection tasks.
///
/// Mutated by `addr`, `addnode` and `removenode` handlers and by the
/// auto-registration done for any peer we hear from.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    inner: Arc<Mutex<HashSet<PeerAddr>>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer to the known set. Returns true when the peer was not
    /// known before.
    pub fn add_known(&self, peer: PeerAddr) -> bool {
        if check_peer_address(&peer).is_err() {
            return false;
        }
        self.inner.lock().insert(peer)
    }

    /// Removes a peer from the known set. Unknown peers are a no-op.
    pub fn remove_known(&self, peer: &PeerAddr) {
        self.inner.lock().remove(peer);
    }

    pub fn is_known(&self, peer: &PeerAddr) -> bool {
        self.inner.lock().contains(peer)
    }

    /// Snapshot of all known peers. The lock is released before the
    /// caller does anything with the list.
    pub fn list_known(&self) -> Vec<PeerAddr> {
        self.inner.lock().iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }
}
