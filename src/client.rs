//! Outbound client: one method per protocol command
//!
//! Every exchange uses a fresh connection. Fire-and-forget commands write
//! the envelope and close. Request/response commands write, half-close the
//! write side to signal "payload complete", then read until the peer closes
//! the end-of-stream is the protocol-level "message complete" marker and
//! must be preserved for interoperability.

use crate::error::{NodeError, Result};
use crate::messages::*;
use crate::peers::{check_peer_address, PeerAddr};
use crate::transaction::Transaction;
use crate::wire;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct NodeClient {
    /// Our own address, included in requests so peers can answer back.
    node_address: PeerAddr,
    reply_timeout: Duration,
}

impl NodeClient {
    pub fn new(node_address: PeerAddr, reply_timeout: Duration) -> Self {
        NodeClient {
            node_address,
            reply_timeout,
        }
    }

    pub fn node_address(&self) -> &PeerAddr {
        &self.node_address
    }

    /// Sends a prepared envelope without waiting for any reply.
    pub async fn send_only(&self, addr: &PeerAddr, data: &[u8]) -> Result<()> {
        check_peer_address(addr)?;
        trace!("Sending {} bytes to {}", data.len(), addr);

        let mut stream = self.connect(addr).await?;
        stream.write_all(data).await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Sends a prepared envelope and reads the full response. The peer
    /// signals completion by closing its write side.
    pub async fn send_and_await(&self, addr: &PeerAddr, data: &[u8]) -> Result<Vec<u8>> {
        check_peer_address(addr)?;
        trace!("Sending {} bytes to {} and waiting for reply", data.len(), addr);

        let mut stream = self.connect(addr).await?;
        stream.write_all(data).await?;
        // half-close: our payload is complete, the reply may now come
        stream.shutdown().await?;

        let mut response = Vec::new();
        timeout(self.reply_timeout, stream.read_to_end(&mut response))
            .await
            .map_err(|_| {
                NodeError::NetworkError(format!(
                    "no reply from {} within {:?}",
                    addr, self.reply_timeout
                ))
            })??;

        trace!("Received {} bytes as a response from {}", response.len(), addr);
        Ok(response)
    }

    async fn connect(&self, addr: &PeerAddr) -> Result<TcpStream> {
        timeout(
            self.reply_timeout,
            TcpStream::connect((addr.host.as_str(), addr.port)),
        )
        .await
        .map_err(|_| NodeError::PeerUnavailable(addr.to_string()))?
        .map_err(|_| NodeError::PeerUnavailable(addr.to_string()))
    }

    async fn send_command<P: serde::Serialize>(
        &self,
        addr: &PeerAddr,
        command: &str,
        payload: &P,
    ) -> Result<()> {
        let body = wire::to_payload(payload)?;
        self.send_only(addr, &wire::encode_envelope(command, Some(&body)))
            .await
    }

    async fn request<P: serde::Serialize, T: DeserializeOwned>(
        &self,
        addr: &PeerAddr,
        command: &str,
        payload: Option<&P>,
    ) -> Result<T> {
        let body = match payload {
            Some(payload) => Some(wire::to_payload(payload)?),
            None => None,
        };
        let envelope = wire::encode_envelope(command, body.as_deref());
        let response = self.send_and_await(addr, &envelope).await?;
        wire::read_response(&response)
    }

    // ---- fire-and-forget commands ----

    /// Shares a list of known peers.
    pub async fn send_addr_list(&self, addr: &PeerAddr, peers: &[PeerAddr]) -> Result<()> {
        self.send_command(addr, "addr", &peers).await
    }

    /// Pushes a full serialized block.
    pub async fn send_block(&self, addr: &PeerAddr, block: Vec<u8>) -> Result<()> {
        let data = BlockMessage {
            from: self.node_address.clone(),
            block,
        };
        self.send_command(addr, "block", &data).await
    }

    /// Advertises block hashes or transaction ids.
    pub async fn send_inv(&self, addr: &PeerAddr, kind: InvKind, items: Vec<Vec<u8>>) -> Result<()> {
        let data = InvMessage {
            from: self.node_address.clone(),
            kind,
            items,
        };
        self.send_command(addr, "inv", &data).await
    }

    /// Asks for block summaries below `start_from`.
    pub async fn send_get_blocks(&self, addr: &PeerAddr, start_from: Vec<u8>) -> Result<()> {
        let data = GetBlocksMessage {
            from: self.node_address.clone(),
            start_from,
        };
        self.send_command(addr, "getblocks", &data).await
    }

    /// Asks for block summaries above `start_from`.
    pub async fn send_get_blocks_upper(&self, addr: &PeerAddr, start_from: Vec<u8>) -> Result<()> {
        let data = GetBlocksMessage {
            from: self.node_address.clone(),
            start_from,
        };
        self.send_command(addr, "getblocksup", &data).await
    }

    /// Asks for the full body of a block or transaction. The answer arrives
    /// later as a separate `block`/`tx` message, if at all.
    pub async fn send_get_data(&self, addr: &PeerAddr, kind: InvKind, id: Vec<u8>) -> Result<()> {
        let data = GetDataMessage {
            from: self.node_address.clone(),
            kind,
            id,
        };
        self.send_command(addr, "getdata", &data).await
    }

    /// Relays a serialized transaction.
    pub async fn send_tx(&self, addr: &PeerAddr, transaction: Vec<u8>) -> Result<()> {
        let data = TxMessage {
            from: self.node_address.clone(),
            transaction,
        };
        self.send_command(addr, "tx", &data).await
    }

    /// Announces our protocol version and best height.
    pub async fn send_version(&self, addr: &PeerAddr, best_height: u64) -> Result<()> {
        let data = VersionMessage {
            version: NODE_VERSION,
            best_height,
            from: self.node_address.clone(),
        };
        self.send_command(addr, "version", &data).await
    }

    /// Bodyless wake-up a node sends to itself to unblock its accept loop
    /// when shutting down.
    pub async fn send_void(&self, addr: &PeerAddr) -> Result<()> {
        self.send_only(addr, &wire::encode_envelope("void", None))
            .await
    }

    // ---- request/response commands ----

    /// First blocks of the peer's chain, for bootstrapping a new node.
    pub async fn send_get_first_blocks(&self, addr: &PeerAddr) -> Result<FirstBlocksResponse> {
        self.request::<(), _>(addr, "getfblocks", None).await
    }

    /// Transaction history of a wallet address.
    pub async fn send_get_history(
        &self,
        addr: &PeerAddr,
        address: String,
    ) -> Result<Vec<HistoryRecord>> {
        let data = GetHistoryMessage { address };
        self.request(addr, "gethistory", Some(&data)).await
    }

    /// Submits a wallet-signed transaction; the node echoes it on success.
    pub async fn send_new_transaction(
        &self,
        addr: &PeerAddr,
        address: String,
        tx: Transaction,
    ) -> Result<Transaction> {
        let data = NewTransactionMessage { address, tx };
        self.request(addr, "txfull", Some(&data)).await
    }

    /// Asks the node to prepare an unsigned transaction plus the digests
    /// the wallet has to sign.
    pub async fn send_request_new_transaction(
        &self,
        addr: &PeerAddr,
        pub_key: Vec<u8>,
        to: String,
        amount: u64,
    ) -> Result<PreparedTransaction> {
        let data = RequestTransactionMessage { pub_key, to, amount };
        self.request(addr, "txrequest", Some(&data)).await
    }

    /// Unspent outputs of a wallet address, plus the peer's tip.
    pub async fn send_get_unspent(
        &self,
        addr: &PeerAddr,
        address: String,
        chain_tip: Vec<u8>,
    ) -> Result<UnspentResponse> {
        let data = GetUnspentMessage {
            address,
            last_block: chain_tip,
        };
        self.request(addr, "getunspent", Some(&data)).await
    }

    /// The peer's known-node list.
    pub async fn send_get_nodes(&self, addr: &PeerAddr) -> Result<Vec<PeerAddr>> {
        self.request::<(), _>(addr, "getnodes", None).await
    }

    /// Asks the peer to add a node to its known set. Requires the peer's
    /// local auth token.
    pub async fn send_add_node(&self, addr: &PeerAddr, auth: String, peer: PeerAddr) -> Result<()> {
        let data = ManageNodeMessage { auth, peer };
        let body = wire::to_payload(&data)?;
        let envelope = wire::encode_envelope("addnode", Some(&body));
        let response = self.send_and_await(addr, &envelope).await?;
        wire::read_empty_response(&response)
    }

    /// Asks the peer to drop a node from its known set. Requires the peer's
    /// local auth token.
    pub async fn send_remove_node(
        &self,
        addr: &PeerAddr,
        auth: String,
        peer: PeerAddr,
    ) -> Result<()> {
        let data = ManageNodeMessage { auth, peer };
        let body = wire::to_payload(&data)?;
        let envelope = wire::encode_envelope("removenode", Some(&body));
        let response = self.send_and_await(addr, &envelope).await?;
        wire::read_empty_response(&response)
    }
}
