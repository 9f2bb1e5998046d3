//! The mempool: FIFO with per-sender nonce sequencing and hygiene rules.
//!
//! Transactions enter after stateless validation and leave when a block
//! producer drains them. Draining preserves arrival order across senders
//! and strict nonce order within a sender; a transaction whose nonce is not
//! yet ready stays in the pool.

use axon_types::app::{Address, ChainTransaction, Hash256};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Default maximum number of pooled transactions.
pub const DEFAULT_MAX_POOL_SIZE: usize = 4096;

/// Rejection reasons for mempool admission.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MempoolError {
    /// The transaction is already pooled.
    #[error("Transaction already in mempool")]
    Duplicate,
    /// The nonce is below the sender's current account nonce.
    #[error("Stale nonce {got}, account nonce is {account_nonce}")]
    StaleNonce {
        /// The nonce carried by the transaction.
        got: u64,
        /// The sender's current account nonce.
        account_nonce: u64,
    },
    /// The pool is at capacity.
    #[error("Mempool is full ({capacity} transactions)")]
    Full {
        /// The configured capacity.
        capacity: usize,
    },
}

/// The set of validated, unincluded transactions awaiting block production.
#[derive(Debug)]
pub struct Mempool {
    capacity: usize,
    /// Arrival order; drained front-first.
    queue: Vec<ChainTransaction>,
    hashes: HashSet<Hash256>,
}

impl Default for Mempool {
    fn default() -> Self {
        Mempool::new(DEFAULT_MAX_POOL_SIZE)
    }
}

impl Mempool {
    /// Creates a pool bounded to `capacity` transactions.
    pub fn new(capacity: usize) -> Self {
        Mempool {
            capacity,
            queue: Vec::new(),
            hashes: HashSet::new(),
        }
    }

    /// Number of pooled transactions.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// True when a transaction with this hash is pooled.
    pub fn contains(&self, hash: &Hash256) -> bool {
        self.hashes.contains(hash)
    }

    /// Admits a transaction. `account_nonce` is the sender's current nonce
    /// from the latest state; anything below it can never execute and is
    /// rejected outright.
    pub fn insert(
        &mut self,
        tx: ChainTransaction,
        account_nonce: u64,
    ) -> Result<(), MempoolError> {
        let hash = tx.hash();
        if self.hashes.contains(&hash) {
            return Err(MempoolError::Duplicate);
        }
        if tx.nonce() < account_nonce {
            return Err(MempoolError::StaleNonce {
                got: tx.nonce(),
                account_nonce,
            });
        }
        if self.queue.len() >= self.capacity {
            return Err(MempoolError::Full {
                capacity: self.capacity,
            });
        }
        debug!(target: "mempool", tx = %hex_prefix(&hash), nonce = tx.nonce(), "pooled transaction");
        self.hashes.insert(hash);
        self.queue.push(tx);
        Ok(())
    }

    /// Drains up to `max` executable transactions, oldest first, keeping
    /// strict nonce order per sender. `next_nonce` supplies each sender's
    /// current account nonce; transactions whose nonce is not yet ready
    /// remain pooled.
    pub fn drain_for_block<F>(&mut self, max: usize, next_nonce: F) -> Vec<ChainTransaction>
    where
        F: Fn(&Address) -> u64,
    {
        let mut expected: HashMap<Address, u64> = HashMap::new();
        let mut selected: Vec<ChainTransaction> = Vec::new();
        let mut remaining: Vec<ChainTransaction> = Vec::new();

        for tx in self.queue.drain(..) {
            if selected.len() >= max {
                remaining.push(tx);
                continue;
            }
            let sender = tx.from();
            let ready = *expected.entry(sender).or_insert_with(|| next_nonce(&sender));
            if tx.nonce() == ready {
                expected.insert(sender, ready + 1);
                self.hashes.remove(&tx.hash());
                selected.push(tx);
            } else {
                remaining.push(tx);
            }
        }

        self.queue = remaining;
        selected
    }

    /// Removes transactions included in a block produced elsewhere.
    pub fn remove_included(&mut self, hashes: &[Hash256]) {
        let included: HashSet<&Hash256> = hashes.iter().collect();
        self.queue.retain(|tx| !included.contains(&tx.hash()));
        for hash in hashes {
            self.hashes.remove(hash);
        }
    }
}

fn hex_prefix(hash: &Hash256) -> String {
    hash.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_types::app::Transaction;

    fn tx(sender: u8, nonce: u64) -> ChainTransaction {
        ChainTransaction::Transfer(Transaction::transfer(
            nonce,
            Address([sender; 20]),
            Address([0xee; 20]),
            1,
            1,
            21_000,
        ))
    }

    #[test]
    fn rejects_duplicates_and_stale_nonces() {
        let mut pool = Mempool::default();
        pool.insert(tx(1, 0), 0).unwrap();
        assert_eq!(pool.insert(tx(1, 0), 0), Err(MempoolError::Duplicate));
        assert_eq!(
            pool.insert(tx(1, 1), 2),
            Err(MempoolError::StaleNonce {
                got: 1,
                account_nonce: 2
            })
        );
    }

    #[test]
    fn enforces_capacity() {
        let mut pool = Mempool::new(2);
        pool.insert(tx(1, 0), 0).unwrap();
        pool.insert(tx(2, 0), 0).unwrap();
        assert_eq!(
            pool.insert(tx(3, 0), 0),
            Err(MempoolError::Full { capacity: 2 })
        );
    }

    #[test]
    fn drain_preserves_sender_nonce_order() {
        let mut pool = Mempool::default();
        // Sender 1's nonce-1 tx arrives before its nonce-0 tx.
        pool.insert(tx(1, 1), 0).unwrap();
        pool.insert(tx(1, 0), 0).unwrap();
        pool.insert(tx(2, 0), 0).unwrap();

        let drained = pool.drain_for_block(10, |_| 0);
        let nonces: Vec<(u8, u64)> = drained.iter().map(|t| (t.from().0[0], t.nonce())).collect();
        // First pass takes the ready transactions in arrival order; the
        // nonce-1 tx is not ready until nonce 0 is drained.
        assert_eq!(nonces, vec![(1, 0), (2, 0)]);
        // The gap transaction stays pooled and becomes ready next round.
        let drained = pool.drain_for_block(10, |_| 1);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].nonce(), 1);
    }

    #[test]
    fn drain_respects_max() {
        let mut pool = Mempool::default();
        for i in 0..5 {
            pool.insert(tx(1, i), 0).unwrap();
        }
        let drained = pool.drain_for_block(3, |_| 0);
        assert_eq!(drained.len(), 3);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn remove_included_evicts_by_hash() {
        let mut pool = Mempool::default();
        let a = tx(1, 0);
        let b = tx(2, 0);
        pool.insert(a.clone(), 0).unwrap();
        pool.insert(b.clone(), 0).unwrap();
        pool.remove_included(&[a.hash()]);
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&a.hash()));
        assert!(pool.contains(&b.hash()));
    }

    #[test]
    fn sequential_nonces_drain_in_one_pass() {
        let mut pool = Mempool::default();
        pool.insert(tx(1, 0), 0).unwrap();
        pool.insert(tx(1, 1), 0).unwrap();
        pool.insert(tx(1, 2), 0).unwrap();
        let drained = pool.drain_for_block(10, |_| 0);
        let nonces: Vec<u64> = drained.iter().map(|t| t.nonce()).collect();
        assert_eq!(nonces, vec![0, 1, 2]);
    }
}
