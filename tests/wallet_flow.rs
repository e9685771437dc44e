//! Integration test for the wallet flow: prepare, sign, submit, query

use emberchain::client::NodeClient;
use emberchain::config::{BuilderConfig, ChainConfig, Config, NetworkConfig, NodeConfig};
use emberchain::crypto::{address_to_hex, KeyPair};
use emberchain::error::NodeError;
use emberchain::messages::HistoryDirection;
use emberchain::node::Node;
use emberchain::peers::PeerAddr;
use emberchain::server;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Node whose genesis credits the miner and whose builder assembles a block
/// as soon as one transaction is admitted.
async fn start_funded_node(miner: &KeyPair) -> Arc<Node> {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let node = Node::new(Config {
        node: NodeConfig {
            host: "127.0.0.1".to_string(),
            port,
        },
        network: NetworkConfig {
            bootstrap_peers: Vec::new(),
            auth_token: String::new(),
            reply_timeout_secs: 5,
        },
        chain: ChainConfig {
            genesis_beneficiary: address_to_hex(&miner.address()),
        },
        builder: BuilderConfig {
            enabled: true,
            min_transactions: 1,
            max_transactions: 100,
            beneficiary_address: address_to_hex(&miner.address()),
        },
    })
    .unwrap();

    let server_node = node.clone();
    tokio::spawn(async move {
        let _ = server::serve(server_node).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    node
}

fn wallet_client() -> NodeClient {
    NodeClient::new(PeerAddr::new("127.0.0.1", 9999), Duration::from_secs(5))
}

#[tokio::test]
async fn test_prepare_sign_submit_and_query() {
    tokio::time::timeout(Duration::from_secs(30), async {
        let miner = KeyPair::generate();
        let friend = KeyPair::generate();
        let node = start_funded_node(&miner).await;
        let client = wallet_client();
        let node_addr = node.own_address();

        // 1. ask the node to prepare an unsigned transaction
        let prepared = client
            .send_request_new_transaction(
                &node_addr,
                miner.public_key_bytes(),
                address_to_hex(&friend.address()),
                20,
            )
            .await
            .unwrap();
        assert_eq!(prepared.data_to_sign.len(), prepared.tx.inputs.len());

        // 2. sign it wallet-side and submit the completed transaction
        let mut tx = prepared.tx;
        tx.sign_inputs(&miner, &prepared.data_to_sign).unwrap();
        let echoed = client
            .send_new_transaction(&node_addr, address_to_hex(&miner.address()), tx.clone())
            .await
            .unwrap();
        assert_eq!(echoed.id, tx.id);

        // 3. admission triggered block assembly
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while node.best_height().await < 1 {
            assert!(tokio::time::Instant::now() < deadline, "no block was built");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(node.mempool.read().await.is_empty());

        // 4. the friend's outputs and both histories reflect the payment
        let unspent = client
            .send_get_unspent(&node_addr, address_to_hex(&friend.address()), Vec::new())
            .await
            .unwrap();
        assert_eq!(unspent.transactions.len(), 1);
        assert_eq!(unspent.transactions[0].amount, 20);
        assert_eq!(
            unspent.transactions[0].from,
            address_to_hex(&miner.address())
        );

        let history = client
            .send_get_history(&node_addr, address_to_hex(&miner.address()))
            .await
            .unwrap();
        let outgoing: Vec<_> = history
            .iter()
            .filter(|r| r.direction == HistoryDirection::Outgoing)
            .collect();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].amount, 20);
        assert_eq!(outgoing[0].to, address_to_hex(&friend.address()));
    })
    .await
    .expect("test_prepare_sign_submit_and_query timed out");
}

#[tokio::test]
async fn test_double_submission_is_remote_error() {
    tokio::time::timeout(Duration::from_secs(30), async {
        let miner = KeyPair::generate();
        let node = start_funded_node(&miner).await;
        let client = wallet_client();
        let node_addr = node.own_address();

        let prepared = client
            .send_request_new_transaction(
                &node_addr,
                miner.public_key_bytes(),
                address_to_hex(&[5u8; 32]),
                10,
            )
            .await
            .unwrap();
        let mut tx = prepared.tx;
        tx.sign_inputs(&miner, &prepared.data_to_sign).unwrap();

        client
            .send_new_transaction(&node_addr, address_to_hex(&miner.address()), tx.clone())
            .await
            .unwrap();

        // the first submission went into a block; replaying it now spends
        // an output the chain already consumed
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while node.best_height().await < 1 {
            assert!(tokio::time::Instant::now() < deadline, "no block was built");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let err = client
            .send_new_transaction(&node_addr, address_to_hex(&miner.address()), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::RemoteError(_)));
    })
    .await
    .expect("test_double_submission_is_remote_error timed out");
}

#[tokio::test]
async fn test_insufficient_funds_is_remote_error() {
    tokio::time::timeout(Duration::from_secs(30), async {
        let miner = KeyPair::generate();
        let broke = KeyPair::generate();
        let node = start_funded_node(&miner).await;
        let client = wallet_client();

        let err = client
            .send_request_new_transaction(
                &node.own_address(),
                broke.public_key_bytes(),
                address_to_hex(&[5u8; 32]),
                10,
            )
            .await
            .unwrap_err();
        match err {
            NodeError::RemoteError(msg) => assert!(msg.contains("not enough funds")),
            other => panic!("unexpected error: {}", other),
        }
    })
    .await
    .expect("test_insufficient_funds_is_remote_error timed out");
}
