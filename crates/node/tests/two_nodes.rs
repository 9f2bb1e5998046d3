//! Two full nodes over real TCP: a validator produces blocks, a fresh
//! node connects, syncs headers-first to the same tip, and keeps up with
//! announcements; gossiped transactions travel the other way and settle.

use axon_crypto::{sign_transaction, Keypair};
use axon_node::genesis::{GenesisAccount, GenesisValidator};
use axon_node::{FullNode, GenesisConfig, NodeConfig};
use axon_types::app::{Address, ChainTransaction, Transaction};
use std::time::Duration;

fn shared_genesis(validator: &Keypair, faucet: &Keypair) -> GenesisConfig {
    let mut genesis = GenesisConfig::dev_template(4242, validator);
    genesis.initial_validators = vec![GenesisValidator {
        address: validator.address(),
        stake: 10_000_000,
        public_key: hex::encode(validator.validator_id()),
        name: None,
    }];
    genesis.initial_accounts = vec![GenesisAccount {
        address: faucet.address(),
        balance: 100_000_000,
        nonce: 0,
    }];
    genesis
}

fn node_config(dir: &tempfile::TempDir, validator: Option<&Keypair>) -> NodeConfig {
    NodeConfig {
        data_dir: dir.path().to_path_buf(),
        listen_addr: "127.0.0.1".into(),
        listen_port: 0,
        validator_secret: validator.map(|k| hex::encode(k.secret_bytes())),
        ..NodeConfig::default()
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fresh_node_syncs_to_the_producing_tip() {
    let validator = Keypair::generate();
    let faucet = Keypair::generate();
    let genesis = shared_genesis(&validator, &faucet);

    let dir_a = tempfile::tempdir().unwrap();
    let a = FullNode::open(node_config(&dir_a, Some(&validator)), genesis.clone()).unwrap();

    // A builds some history before B exists.
    for _ in 0..5 {
        a.produce_once().await.unwrap().expect("elected leader");
    }
    assert_eq!(a.best_height().unwrap(), 5);

    a.start().await.unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let b = FullNode::open(node_config(&dir_b, None), genesis).unwrap();
    b.start().await.unwrap();

    let a_port = a.p2p().local_addr().unwrap().port();
    b.p2p().connect("127.0.0.1", a_port).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    b.sync_manager().sync().await.unwrap();
    assert_eq!(b.best_height().unwrap(), 5);
    assert_eq!(b.best_hash().unwrap(), a.best_hash().unwrap());

    // A produces one more block; the announcement alone must carry B to
    // the new tip.
    a.produce_once().await.unwrap().expect("elected leader");
    wait_for("announcement-driven catch-up", || {
        b.best_height().map(|h| h == 6).unwrap_or(false)
    })
    .await;
    assert_eq!(b.best_hash().unwrap(), a.best_hash().unwrap());

    a.stop().await;
    b.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gossiped_transactions_settle_across_nodes() {
    let validator = Keypair::generate();
    let faucet = Keypair::generate();
    let recipient = Address([0x05; 20]);
    let genesis = shared_genesis(&validator, &faucet);

    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let a = FullNode::open(node_config(&dir_a, Some(&validator)), genesis.clone()).unwrap();
    let b = FullNode::open(node_config(&dir_b, None), genesis).unwrap();

    a.start().await.unwrap();
    b.start().await.unwrap();
    let a_port = a.p2p().local_addr().unwrap().port();
    b.p2p().connect("127.0.0.1", a_port).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Submitted at B, the transaction gossips to the validator A.
    let mut tx = ChainTransaction::Transfer(Transaction::transfer(
        0,
        faucet.address(),
        recipient,
        2_000,
        1,
        21_000,
    ));
    sign_transaction(&mut tx, &faucet).unwrap();
    b.submit_transaction(tx).await.unwrap();

    wait_for("transaction gossip", || a.mempool_len() == 1).await;

    let block = a.produce_once().await.unwrap().expect("elected leader");
    assert_eq!(block.transactions.len(), 1);

    // The announcement carries the block back to B.
    wait_for("settlement on b", || b.balance_of(&recipient) == 2_000).await;
    assert_eq!(b.best_hash().unwrap(), a.best_hash().unwrap());

    a.stop().await;
    b.stop().await;
}
