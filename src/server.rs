//! Inbound dispatcher
//!
//! One task per accepted connection: read the whole request (the peer
//! half-closes to mark it complete), decode the envelope, route by command
//! tag, run the handler, write back whatever response it set. A malformed
//! envelope or an unknown tag closes the connection with no response; the
//! peer sees end-of-stream and treats it accordingly.
//!
//! Routing goes through a table built once at startup instead of a command
//! switch, so adding a command is one registration line.

use crate::crypto;
use crate::error::{NodeError, Result};
use crate::index;
use crate::mempool::Admission;
use crate::messages::*;
use crate::node::Node;
use crate::peers::PeerAddr;
use crate::transaction::Transaction;
use crate::wire;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace};

/// One decoded inbound request being handled.
pub struct ServerRequest {
    pub node: Arc<Node>,
    payload: Vec<u8>,
    has_response: bool,
    response: Vec<u8>,
    auth_ok: bool,
}

type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
type Handler = for<'a> fn(&'a mut ServerRequest) -> HandlerFuture<'a>;

macro_rules! route {
    ($name:ident) => {{
        fn wrapper(req: &mut ServerRequest) -> HandlerFuture<'_> {
            Box::pin(req.$name())
        }
        wrapper as Handler
    }};
}

/// Command tag → handler, built once.
static ROUTES: Lazy<HashMap<&'static str, Handler>> = Lazy::new(|| {
    let mut table: HashMap<&'static str, Handler> = HashMap::new();
    table.insert("addr", route!(handle_addr));
    table.insert("block", route!(handle_block));
    table.insert("inv", route!(handle_inv));
    table.insert("getblocks", route!(handle_get_blocks));
    table.insert("getblocksup", route!(handle_get_blocks_upper));
    table.insert("getfblocks", route!(handle_get_first_blocks));
    table.insert("getdata", route!(handle_get_data));
    table.insert("tx", route!(handle_tx));
    table.insert("version", route!(handle_version));
    table.insert("gethistory", route!(handle_get_history));
    table.insert("txfull", route!(handle_tx_full));
    table.insert("txrequest", route!(handle_tx_request));
    table.insert("getunspent", route!(handle_get_unspent));
    table.insert("getnodes", route!(handle_get_nodes));
    table.insert("addnode", route!(handle_add_node));
    table.insert("removenode", route!(handle_remove_node));
    table.insert("void", route!(handle_void));
    table
});

/// Binds the node's configured address and serves connections forever.
pub async fn serve(node: Arc<Node>) -> Result<()> {
    let own = node.own_address();
    let listener = TcpListener::bind((own.host.as_str(), own.port)).await?;
    info!("Listening on {}", own);
    serve_on(node, listener).await
}

/// Accept loop over an already-bound listener.
pub async fn serve_on(node: Arc<Node>, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, remote) = listener.accept().await?;
        let node = node.clone();
        tokio::spawn(async move {
            trace!("Connection from {}", remote);
            handle_connection(node, stream).await;
        });
    }
}

async fn handle_connection(node: Arc<Node>, mut stream: TcpStream) {
    let mut raw = Vec::new();
    if let Err(e) = stream.read_to_end(&mut raw).await {
        debug!("Failed to read request: {}", e);
        return;
    }

    let (command, payload) = match wire::decode_envelope(&raw) {
        Ok(decoded) => decoded,
        Err(e) => {
            // protocol violation: close with no response
            debug!("Dropping connection: {}", e);
            return;
        }
    };

    let Some(handler) = ROUTES.get(command.as_str()) else {
        trace!("Unknown command {:?}, closing", command);
        return;
    };
    trace!("Dispatching {:?} ({} payload bytes)", command, payload.len());

    let mut request = ServerRequest {
        node,
        payload: payload.to_vec(),
        has_response: false,
        response: Vec::new(),
        auth_ok: false,
    };

    let outcome = handler(&mut request).await;
    let reply = match outcome {
        Ok(()) if request.has_response => Some(request.response),
        Ok(()) => None,
        Err(e) if request.has_response => {
            debug!("Handler for {:?} failed: {}", command, e);
            Some(wire::err_response(&e.to_string()))
        }
        Err(e) => {
            debug!("Handler for {:?} failed: {}", command, e);
            None
        }
    };

    if let Some(reply) = reply {
        if let Err(e) = stream.write_all(&reply).await {
            debug!("Failed to write response: {}", e);
        }
    }
    let _ = stream.shutdown().await;
}

impl ServerRequest {
    fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        wire::from_payload(&self.payload)
            .map_err(|e| NodeError::MalformedEnvelope(format!("parse request: {}", e)))
    }

    fn respond<T: Serialize>(&mut self, result: Option<&T>) -> Result<()> {
        self.response = wire::ok_response(result)?;
        Ok(())
    }

    /// Management commands carry the shared token; the flag is kept so the
    /// handler body can be sure the check ran before it mutates anything.
    fn check_local_auth(&mut self, supplied: &str) -> Result<()> {
        let token = &self.node.config.network.auth_token;
        self.auth_ok = !token.is_empty() && supplied == token;
        if self.auth_ok {
            Ok(())
        } else {
            Err(NodeError::Unauthorized)
        }
    }

    /// A peer shared its known-node list: keep the new ones and greet them.
    async fn handle_addr(&mut self) -> Result<()> {
        let peers: Vec<PeerAddr> = self.parse()?;
        debug!("Received {} node addresses", peers.len());

        let mut added = Vec::new();
        for peer in peers {
            if peer == self.node.own_address() {
                continue;
            }
            if self.node.peers.add_known(peer.clone()) {
                added.push(peer);
            }
        }
        debug!(
            "{} known nodes now, {} new",
            self.node.peers.count(),
            added.len()
        );
        // maybe they hold blocks we miss; they will register us in return
        self.node.send_version_to_nodes(&added).await;
        Ok(())
    }

    /// A full block arrived. Apply it, then keep draining whatever the
    /// sending peer advertised earlier.
    async fn handle_block(&mut self) -> Result<()> {
        let msg: BlockMessage = self.parse()?;
        // how the adding went is not interesting here; the transit loop
        // below decides whether anything else must be fetched
        self.node.received_full_block(&msg.block).await?;

        if self.node.transit.blocks_count(&msg.from) > 0 {
            self.node.drain_transit(&msg.from).await?;
        }
        self.node.check_address_known(&msg.from).await;
        Ok(())
    }

    async fn handle_inv(&mut self) -> Result<()> {
        let msg: InvMessage = self.parse()?;
        let from = msg.from.clone();
        self.node.process_inv(msg).await?;
        self.node.check_address_known(&from).await;
        Ok(())
    }

    async fn handle_version(&mut self) -> Result<()> {
        let msg: VersionMessage = self.parse()?;
        let from = msg.from.clone();
        self.node.process_version(msg).await?;
        self.node.check_address_known(&from).await;
        Ok(())
    }

    async fn handle_get_blocks(&mut self) -> Result<()> {
        let msg: GetBlocksMessage = self.parse()?;
        self.node.check_address_known(&msg.from).await;
        self.node
            .answer_get_blocks(&msg.from, &msg.start_from, false)
            .await
    }

    async fn handle_get_blocks_upper(&mut self) -> Result<()> {
        let msg: GetBlocksMessage = self.parse()?;
        self.node.check_address_known(&msg.from).await;
        self.node
            .answer_get_blocks(&msg.from, &msg.start_from, true)
            .await
    }

    /// First blocks of our chain, for a node bootstrapping from scratch.
    async fn handle_get_first_blocks(&mut self) -> Result<()> {
        self.has_response = true;

        let (blocks, height) = {
            let chain = self.node.chain.read().await;
            let (blocks, height) = chain.get_first_blocks(100);
            let mut serialized = Vec::with_capacity(blocks.len());
            for block in blocks {
                serialized.push(block.serialize()?);
            }
            (serialized, height)
        };
        debug!("Returning first {} blocks", blocks.len());
        self.respond(Some(&FirstBlocksResponse { blocks, height }))
    }

    /// Look up a full block or a pending transaction and send it back over
    /// a fresh connection. A miss is silent: absence is indistinguishable
    /// from "still fetching" in this protocol.
    async fn handle_get_data(&mut self) -> Result<()> {
        let msg: GetDataMessage = self.parse()?;
        trace!("Data requested: {} {}", msg.kind, hex::encode(&msg.id));

        match msg.kind {
            InvKind::Block => {
                let block = {
                    let chain = self.node.chain.read().await;
                    msg.id
                        .as_slice()
                        .try_into()
                        .ok()
                        .and_then(|hash| chain.get_block(&hash))
                        .map(|b| b.serialize())
                        .transpose()?
                };
                match block {
                    Some(data) => self.node.client.send_block(&msg.from, data).await?,
                    None => trace!("Block {} not found", hex::encode(&msg.id)),
                }
            }
            InvKind::Tx => {
                let tx = {
                    let mempool = self.node.mempool.read().await;
                    msg.id
                        .as_slice()
                        .try_into()
                        .ok()
                        .and_then(|id| mempool.get_if_exists(&id))
                        .map(|tx| tx.serialize())
                        .transpose()?
                };
                match tx {
                    Some(data) => self.node.client.send_tx(&msg.from, data).await?,
                    None => trace!("Transaction {} not found", hex::encode(&msg.id)),
                }
            }
        }
        self.node.check_address_known(&msg.from).await;
        Ok(())
    }

    /// A transaction relayed by another node. Already-known ids are a
    /// silent no-op; a missing input is tolerated, since the node holding the
    /// dependency will complete it.
    async fn handle_tx(&mut self) -> Result<()> {
        let msg: TxMessage = self.parse()?;
        let tx = Transaction::deserialize(&msg.transaction)?;
        let txid = tx.id;

        match self.node.received_new_transaction(tx).await {
            Ok(Admission::AlreadyKnown) => return Ok(()),
            Ok(Admission::Accepted) => {}
            Err(e) if Node::is_tolerable_admission_failure(&e) => {
                trace!("Ignoring transaction {}: {}", hex::encode(txid), e);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.node.try_build_block(Some(txid)).await?;
        Ok(())
    }

    /// A wallet submits a complete signed transaction.
    async fn handle_tx_full(&mut self) -> Result<()> {
        self.has_response = true;

        let msg: NewTransactionMessage = self.parse()?;
        let tx = msg.tx.clone();
        let txid = tx.id;

        self.node.received_new_transaction(tx).await?;
        debug!("Accepted new transaction from {}", msg.address);

        self.node.try_build_block(Some(txid)).await?;
        self.respond(Some(&msg.tx))
    }

    /// A wallet asks for an unsigned transaction to sign.
    async fn handle_tx_request(&mut self) -> Result<()> {
        self.has_response = true;

        let msg: RequestTransactionMessage = self.parse()?;
        let to = crypto::address_from_hex(&msg.to)?;

        let (tx, data_to_sign) = {
            let chain = self.node.chain.read().await;
            let mempool = self.node.mempool.read().await;
            mempool.prepare_new_transaction(&chain, &msg.pub_key, to, msg.amount)?
        };
        debug!(
            "Prepared transaction with {} inputs for {}",
            tx.inputs.len(),
            hex::encode(crypto::pub_key_address(&msg.pub_key))
        );
        self.respond(Some(&PreparedTransaction { tx, data_to_sign }))
    }

    async fn handle_get_unspent(&mut self) -> Result<()> {
        self.has_response = true;

        let msg: GetUnspentMessage = self.parse()?;
        let address = crypto::address_from_hex(&msg.address)?;

        let result = {
            let chain = self.node.chain.read().await;
            let (tip, _) = chain.get_state();
            let transactions = index::unspent_outputs(&chain, &address)
                .into_iter()
                .map(|u| UnspentRecord {
                    txid: u.txid.to_vec(),
                    vout: u.vout,
                    amount: u.output.value,
                    is_base: u.is_base,
                    from: if u.is_base {
                        "Base Coin".to_string()
                    } else {
                        crypto::address_to_hex(&u.from)
                    },
                })
                .collect::<Vec<_>>();
            UnspentResponse {
                transactions,
                last_block: tip.to_vec(),
            }
        };
        debug!(
            "Returning {} unspent outputs for {}",
            result.transactions.len(),
            msg.address
        );
        self.respond(Some(&result))
    }

    async fn handle_get_history(&mut self) -> Result<()> {
        self.has_response = true;

        let msg: GetHistoryMessage = self.parse()?;
        let address = crypto::address_from_hex(&msg.address)?;

        let result = {
            let chain = self.node.chain.read().await;
            index::address_history(&chain, &address)
                .into_iter()
                .map(|entry| {
                    let counterparty = crypto::address_to_hex(&entry.counterparty);
                    let (direction, from, to) = if entry.outgoing {
                        (HistoryDirection::Outgoing, String::new(), counterparty)
                    } else {
                        (HistoryDirection::Incoming, counterparty, String::new())
                    };
                    HistoryRecord {
                        direction,
                        txid: entry.txid.to_vec(),
                        amount: entry.amount,
                        from,
                        to,
                    }
                })
                .collect::<Vec<_>>()
        };
        debug!("Returning {} history records for {}", result.len(), msg.address);
        self.respond(Some(&result))
    }

    async fn handle_get_nodes(&mut self) -> Result<()> {
        self.has_response = true;

        let nodes = self.node.peers.list_known();
        debug!("Returning {} known nodes", nodes.len());
        self.respond(Some(&nodes))
    }

    async fn handle_add_node(&mut self) -> Result<()> {
        self.has_response = true;

        let msg: ManageNodeMessage = self.parse()?;
        self.check_local_auth(&msg.auth)?;

        if self.node.peers.add_known(msg.peer.clone()) {
            debug!("Added node {}", msg.peer);
            self.node
                .send_version_to_nodes(std::slice::from_ref(&msg.peer))
                .await;
        }
        self.respond::<()>(None)
    }

    async fn handle_remove_node(&mut self) -> Result<()> {
        self.has_response = true;

        let msg: ManageNodeMessage = self.parse()?;
        self.check_local_auth(&msg.auth)?;

        self.node.peers.remove_known(&msg.peer);
        debug!("Removed node {}", msg.peer);
        self.respond::<()>(None)
    }

    /// Bodyless wake-up; exists only to unblock the accept loop.
    async fn handle_void(&mut self) -> Result<()> {
        Ok(())
    }
}
