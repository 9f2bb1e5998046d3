//! Genesis bootstrap and the first transfer, end to end through the full
//! node: a chain with one validator and one funded faucet account loads
//! its genesis deterministically, accepts a signed transfer, and settles
//! it in the first produced block.

use axon_crypto::{sign_transaction, Keypair};
use axon_node::genesis::{GenesisAccount, GenesisValidator};
use axon_node::{FullNode, GenesisConfig, NodeConfig};
use axon_types::app::{Address, ChainTransaction, Transaction};

fn two_party_genesis(validator: &Keypair, faucet: &Keypair) -> GenesisConfig {
    let mut genesis = GenesisConfig::dev_template(9999, validator);
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

#[tokio::test]
async fn genesis_state_root_is_reproducible() {
    let validator = Keypair::generate();
    let faucet = Keypair::generate();
    let genesis = two_party_genesis(&validator, &faucet);

    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let a = FullNode::open(node_config(&dir_a, None), genesis.clone()).unwrap();
    let b = FullNode::open(node_config(&dir_b, None), genesis).unwrap();

    assert_eq!(a.best_height().unwrap(), 0);
    assert_eq!(a.best_hash().unwrap(), b.best_hash().unwrap());
    assert_eq!(a.balance_of(&faucet.address()), 100_000_000);
    assert_eq!(a.stake_of(&validator.address()), 10_000_000);
}

#[tokio::test]
async fn first_transfer_settles_in_the_first_block() {
    let validator = Keypair::generate();
    let faucet = Keypair::generate();
    let recipient = Address([0x01; 20]);
    let genesis = two_party_genesis(&validator, &faucet);

    let dir = tempfile::tempdir().unwrap();
    let node = FullNode::open(node_config(&dir, Some(&validator)), genesis).unwrap();

    let mut tx = ChainTransaction::Transfer(Transaction::transfer(
        0,
        faucet.address(),
        recipient,
        1_000_000,
        1,
        21_000,
    ));
    sign_transaction(&mut tx, &faucet).unwrap();
    let tx_hash = node.submit_transaction(tx).await.unwrap();
    assert_eq!(node.mempool_len(), 1);

    // The single validator wins every slot.
    let block = node.produce_once().await.unwrap().expect("elected leader");
    assert_eq!(block.header.height, 1);
    assert_eq!(block.transactions.len(), 1);
    assert_eq!(block.header.gas_used, 21_000);
    assert_eq!(node.mempool_len(), 0);

    assert_eq!(
        node.balance_of(&faucet.address()),
        100_000_000 - 1_000_000 - 21_000
    );
    assert_eq!(node.balance_of(&recipient), 1_000_000);
    assert_eq!(node.nonce_of(&faucet.address()), 1);

    // The transaction is permanently indexed by hash.
    let (stored, containing) = node.transaction(&tx_hash).unwrap();
    assert_eq!(stored.hash(), tx_hash);
    assert_eq!(containing, block.hash());
    assert_eq!(node.best_height().unwrap(), 1);
}

#[tokio::test]
async fn duplicate_submission_is_idempotent() {
    let validator = Keypair::generate();
    let faucet = Keypair::generate();
    let genesis = two_party_genesis(&validator, &faucet);
    let dir = tempfile::tempdir().unwrap();
    let node = FullNode::open(node_config(&dir, None), genesis).unwrap();

    let mut tx = ChainTransaction::Transfer(Transaction::transfer(
        0,
        faucet.address(),
        Address([0x02; 20]),
        10,
        1,
        21_000,
    ));
    sign_transaction(&mut tx, &faucet).unwrap();
    let first = node.submit_transaction(tx.clone()).await.unwrap();
    let second = node.submit_transaction(tx).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(node.mempool_len(), 1);
}

#[tokio::test]
async fn invalid_transactions_are_refused() {
    let validator = Keypair::generate();
    let faucet = Keypair::generate();
    let stranger = Keypair::generate();
    let genesis = two_party_genesis(&validator, &faucet);
    let dir = tempfile::tempdir().unwrap();
    let node = FullNode::open(node_config(&dir, None), genesis).unwrap();

    // Unfunded sender.
    let mut tx = ChainTransaction::Transfer(Transaction::transfer(
        0,
        stranger.address(),
        Address([0x02; 20]),
        10,
        1,
        21_000,
    ));
    sign_transaction(&mut tx, &stranger).unwrap();
    assert!(node.submit_transaction(tx).await.is_err());

    // Wrong nonce.
    let mut tx = ChainTransaction::Transfer(Transaction::transfer(
        7,
        faucet.address(),
        Address([0x02; 20]),
        10,
        1,
        21_000,
    ));
    sign_transaction(&mut tx, &faucet).unwrap();
    assert!(node.submit_transaction(tx).await.is_err());
    assert_eq!(node.mempool_len(), 0);
}

#[tokio::test]
async fn restart_replays_the_persisted_chain() {
    let validator = Keypair::generate();
    let faucet = Keypair::generate();
    let recipient = Address([0x03; 20]);
    let genesis = two_party_genesis(&validator, &faucet);
    let dir = tempfile::tempdir().unwrap();

    let best_hash = {
        let node =
            FullNode::open(node_config(&dir, Some(&validator)), genesis.clone()).unwrap();
        let mut tx = ChainTransaction::Transfer(Transaction::transfer(
            0,
            faucet.address(),
            recipient,
            500,
            1,
            21_000,
        ));
        sign_transaction(&mut tx, &faucet).unwrap();
        node.submit_transaction(tx).await.unwrap();
        node.produce_once().await.unwrap().expect("elected leader");
        node.best_hash().unwrap()
    };

    // Reopen over the same data directory: state is rebuilt by replay.
    let node = FullNode::open(node_config(&dir, Some(&validator)), genesis).unwrap();
    assert_eq!(node.best_height().unwrap(), 1);
    assert_eq!(node.best_hash().unwrap(), best_hash);
    assert_eq!(node.balance_of(&recipient), 500);
    assert_eq!(node.nonce_of(&faucet.address()), 1);
}

#[tokio::test]
async fn mismatched_genesis_refuses_to_start() {
    let validator = Keypair::generate();
    let faucet = Keypair::generate();
    let genesis = two_party_genesis(&validator, &faucet);
    let dir = tempfile::tempdir().unwrap();
    {
        let _node = FullNode::open(node_config(&dir, None), genesis).unwrap();
    }
    // A different validator means a different genesis block.
    let other = two_party_genesis(&Keypair::generate(), &faucet);
    assert!(FullNode::open(node_config(&dir, None), other).is_err());
}
