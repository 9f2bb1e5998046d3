//! The in-memory address indexer.
//!
//! Derived lookups over the canonical chain store: transactions by
//! address, per-address transaction counts, and balance/nonce snapshots
//! as reported by the latest state. The index is entirely rebuildable by
//! replaying storage, so it is never consulted for consensus.

use crate::chain_store::ChainStore;
use axon_types::app::{Address, Block, Hash256};
use axon_types::error::StorageError;
use std::collections::HashMap;
use tracing::{debug, info};

/// Derived per-address lookups.
#[derive(Debug, Default)]
pub struct Indexer {
    txs_by_address: HashMap<Address, Vec<Hash256>>,
    tx_counts: HashMap<Address, u64>,
    balances: HashMap<Address, u128>,
    nonces: HashMap<Address, u64>,
}

impl Indexer {
    /// Creates an empty index.
    pub fn new() -> Self {
        Indexer::default()
    }

    /// Indexes one block's transactions.
    pub fn index_block(&mut self, block: &Block) {
        for tx in &block.transactions {
            let tx_hash = tx.hash();
            self.note_tx(tx.from(), tx_hash);
            let counterparty = match tx {
                axon_types::app::ChainTransaction::Transfer(t) => t.to,
                axon_types::app::ChainTransaction::Staking(t) => Some(t.validator),
            };
            if let Some(address) = counterparty {
                if address != tx.from() {
                    self.note_tx(address, tx_hash);
                }
            }
        }
        debug!(
            target: "storage",
            height = block.header.height,
            txs = block.transactions.len(),
            "indexed block"
        );
    }

    fn note_tx(&mut self, address: Address, tx_hash: Hash256) {
        self.txs_by_address.entry(address).or_default().push(tx_hash);
        *self.tx_counts.entry(address).or_insert(0) += 1;
    }

    /// Records an address's balance and nonce from the latest state.
    pub fn note_account(&mut self, address: Address, balance: u128, nonce: u64) {
        self.balances.insert(address, balance);
        self.nonces.insert(address, nonce);
    }

    /// Transaction hashes touching `address`, newest last, capped at
    /// `limit`.
    pub fn transactions_of(&self, address: &Address, limit: usize) -> Vec<Hash256> {
        self.txs_by_address
            .get(address)
            .map(|hashes| hashes.iter().take(limit).copied().collect())
            .unwrap_or_default()
    }

    /// Number of indexed transactions touching `address`.
    pub fn transaction_count(&self, address: &Address) -> u64 {
        self.tx_counts.get(address).copied().unwrap_or(0)
    }

    /// Last reported balance of `address`.
    pub fn balance_of(&self, address: &Address) -> u128 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    /// Last reported nonce of `address`.
    pub fn nonce_of(&self, address: &Address) -> u64 {
        self.nonces.get(address).copied().unwrap_or(0)
    }

    /// Rebuilds the transaction index from the canonical store by
    /// replaying every stored block in height order. Balance and nonce
    /// snapshots are state-derived and repopulate as blocks apply.
    pub fn rebuild(store: &ChainStore) -> Result<Self, StorageError> {
        let mut indexer = Indexer::new();
        let Some(best) = store.best_height()? else {
            return Ok(indexer);
        };
        for height in 0..=best {
            match store.get_block_by_height(height) {
                Ok(block) => indexer.index_block(&block),
                Err(StorageError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        info!(target: "storage", best, "rebuilt address index");
        Ok(indexer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_crypto::{sign_transaction, Keypair};
    use axon_types::app::{ChainTransaction, Transaction};

    fn transfer(keypair: &Keypair, nonce: u64, to: Address) -> ChainTransaction {
        let mut tx = ChainTransaction::Transfer(Transaction::transfer(
            nonce,
            keypair.address(),
            to,
            5,
            1,
            21_000,
        ));
        sign_transaction(&mut tx, keypair).unwrap();
        tx
    }

    #[test]
    fn indexes_sender_and_recipient() {
        let keypair = Keypair::generate();
        let recipient = Address([7u8; 20]);
        let tx = transfer(&keypair, 0, recipient);
        let mut block = Block::create_genesis(1, 1, [0u8; 32], 10_000_000);
        block.transactions = vec![tx.clone()];

        let mut indexer = Indexer::new();
        indexer.index_block(&block);

        assert_eq!(indexer.transactions_of(&keypair.address(), 10), vec![tx.hash()]);
        assert_eq!(indexer.transactions_of(&recipient, 10), vec![tx.hash()]);
        assert_eq!(indexer.transaction_count(&keypair.address()), 1);
        assert_eq!(indexer.transaction_count(&recipient), 1);
        assert!(indexer.transactions_of(&Address([9u8; 20]), 10).is_empty());
    }

    #[test]
    fn limit_caps_results() {
        let keypair = Keypair::generate();
        let mut indexer = Indexer::new();
        let mut block = Block::create_genesis(1, 1, [0u8; 32], 10_000_000);
        block.transactions = (0..5)
            .map(|n| transfer(&keypair, n, Address([7u8; 20])))
            .collect();
        indexer.index_block(&block);
        assert_eq!(indexer.transactions_of(&keypair.address(), 3).len(), 3);
        assert_eq!(indexer.transaction_count(&keypair.address()), 5);
    }

    #[test]
    fn account_snapshots_update() {
        let mut indexer = Indexer::new();
        let address = Address([1u8; 20]);
        assert_eq!(indexer.balance_of(&address), 0);
        indexer.note_account(address, 1_000, 3);
        assert_eq!(indexer.balance_of(&address), 1_000);
        assert_eq!(indexer.nonce_of(&address), 3);
        indexer.note_account(address, 900, 4);
        assert_eq!(indexer.balance_of(&address), 900);
        assert_eq!(indexer.nonce_of(&address), 4);
    }

    #[test]
    fn rebuild_matches_incremental_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        let keypair = Keypair::generate();

        let mut genesis = Block::create_genesis(1, 1, [0u8; 32], 10_000_000);
        genesis.transactions = vec![transfer(&keypair, 0, Address([7u8; 20]))];
        store.store_block(&genesis).unwrap();
        let mut next = Block::create_genesis(1, 2, [0u8; 32], 10_000_000);
        next.header.height = 1;
        next.header.previous_hash = genesis.hash();
        next.transactions = vec![transfer(&keypair, 1, Address([8u8; 20]))];
        store.store_block(&next).unwrap();

        let mut incremental = Indexer::new();
        incremental.index_block(&genesis);
        incremental.index_block(&next);

        let rebuilt = Indexer::rebuild(&store).unwrap();
        assert_eq!(
            rebuilt.transactions_of(&keypair.address(), 10),
            incremental.transactions_of(&keypair.address(), 10)
        );
        assert_eq!(
            rebuilt.transaction_count(&keypair.address()),
            incremental.transaction_count(&keypair.address())
        );
    }
}
