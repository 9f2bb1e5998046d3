//! The redb-backed chain store.
//!
//! Layout, one table per record kind:
//!
//! - `blocks/chain.redb`: `BLOCKS` (hash → block bytes), `HEADERS`
//!   (hash → header bytes, indexed separately for header-only queries).
//! - `index/chain.redb`: `TXS` (tx hash → (block hash, tx bytes)),
//!   `HEIGHT` (big-endian height → block hash), `META` (best height/hash,
//!   genesis hash, total transaction count).

use axon_types::app::{Block, BlockHeader, ChainTransaction, Hash256};
use axon_types::codec;
use axon_types::error::StorageError;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use tracing::{debug, info};

const BLOCKS: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("BLOCKS");
const HEADERS: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("HEADERS");
const TXS: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("TXS");
const HEIGHT: TableDefinition<&[u8; 8], &[u8; 32]> = TableDefinition::new("HEIGHT");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("META");

const META_BEST_HEIGHT: &str = "best_height";
const META_BEST_HASH: &str = "best_hash";
const META_GENESIS_HASH: &str = "genesis_hash";
const META_TOTAL_TXS: &str = "total_txs";

fn backend(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn corrupted(e: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupted(e.to_string())
}

/// Persistent storage for blocks, headers, transactions, and chain
/// metadata.
pub struct ChainStore {
    blocks_db: Database,
    index_db: Database,
}

impl ChainStore {
    /// Opens (or creates) the chain store under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        let blocks_dir = data_dir.join("blocks");
        let index_dir = data_dir.join("index");
        std::fs::create_dir_all(&blocks_dir).map_err(backend)?;
        std::fs::create_dir_all(&index_dir).map_err(backend)?;

        let blocks_db = Database::create(blocks_dir.join("chain.redb")).map_err(backend)?;
        let index_db = Database::create(index_dir.join("chain.redb")).map_err(backend)?;

        // Materialize every table so later read transactions never race a
        // missing table.
        let txn = blocks_db.begin_write().map_err(backend)?;
        txn.open_table(BLOCKS).map_err(backend)?;
        txn.open_table(HEADERS).map_err(backend)?;
        txn.commit().map_err(backend)?;
        let txn = index_db.begin_write().map_err(backend)?;
        txn.open_table(TXS).map_err(backend)?;
        txn.open_table(HEIGHT).map_err(backend)?;
        txn.open_table(META).map_err(backend)?;
        txn.commit().map_err(backend)?;

        info!(target: "storage", dir = %data_dir.display(), "chain store opened");
        Ok(ChainStore {
            blocks_db,
            index_db,
        })
    }

    /// Persists a block: the full block, its header, each transaction, the
    /// height index entry, and the best-block metadata, each database
    /// updated in a single atomic commit.
    pub fn store_block(&self, block: &Block) -> Result<(), StorageError> {
        let block_hash = block.hash();
        let height = block.header.height;
        let block_bytes = codec::to_bytes_canonical(block);
        let header_bytes = codec::to_bytes_canonical(&block.header);

        let txn = self.blocks_db.begin_write().map_err(backend)?;
        {
            let mut blocks = txn.open_table(BLOCKS).map_err(backend)?;
            blocks
                .insert(&block_hash, block_bytes.as_slice())
                .map_err(backend)?;
            let mut headers = txn.open_table(HEADERS).map_err(backend)?;
            headers
                .insert(&block_hash, header_bytes.as_slice())
                .map_err(backend)?;
        }
        txn.commit()
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        let txn = self.index_db.begin_write().map_err(backend)?;
        {
            let mut txs = txn.open_table(TXS).map_err(backend)?;
            for tx in &block.transactions {
                let record = codec::to_bytes_canonical(&(&block_hash, tx));
                txs.insert(&tx.hash(), record.as_slice()).map_err(backend)?;
            }
            let mut heights = txn.open_table(HEIGHT).map_err(backend)?;
            heights
                .insert(&height.to_be_bytes(), &block_hash)
                .map_err(backend)?;

            let mut meta = txn.open_table(META).map_err(backend)?;
            let best = meta
                .get(META_BEST_HEIGHT)
                .map_err(backend)?
                .map(|g| decode_u64(g.value()))
                .transpose()?;
            if best.map_or(true, |b| height >= b) {
                meta.insert(META_BEST_HEIGHT, height.to_be_bytes().as_slice())
                    .map_err(backend)?;
                meta.insert(META_BEST_HASH, block_hash.as_slice())
                    .map_err(backend)?;
            }
            if height == 0 {
                meta.insert(META_GENESIS_HASH, block_hash.as_slice())
                    .map_err(backend)?;
            }
            let total = meta
                .get(META_TOTAL_TXS)
                .map_err(backend)?
                .map(|g| decode_u64(g.value()))
                .transpose()?
                .unwrap_or(0);
            let total = total + block.transactions.len() as u64;
            meta.insert(META_TOTAL_TXS, total.to_be_bytes().as_slice())
                .map_err(backend)?;
        }
        txn.commit()
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        debug!(
            target: "storage",
            height,
            hash = %hex::encode(block_hash.get(..8).unwrap_or_default()),
            txs = block.transactions.len(),
            "stored block"
        );
        Ok(())
    }

    /// Fetches a block by hash.
    pub fn get_block(&self, hash: &Hash256) -> Result<Block, StorageError> {
        let txn = self.blocks_db.begin_read().map_err(backend)?;
        let table = txn.open_table(BLOCKS).map_err(backend)?;
        let guard = table.get(hash).map_err(backend)?.ok_or(StorageError::NotFound)?;
        codec::from_bytes_canonical(guard.value()).map_err(corrupted)
    }

    /// Fetches a block by height via the height index.
    pub fn get_block_by_height(&self, height: u64) -> Result<Block, StorageError> {
        let hash = self.block_hash_at(height)?;
        self.get_block(&hash)
    }

    /// Fetches only a block's header.
    pub fn get_block_header(&self, hash: &Hash256) -> Result<BlockHeader, StorageError> {
        let txn = self.blocks_db.begin_read().map_err(backend)?;
        let table = txn.open_table(HEADERS).map_err(backend)?;
        let guard = table.get(hash).map_err(backend)?.ok_or(StorageError::NotFound)?;
        codec::from_bytes_canonical(guard.value()).map_err(corrupted)
    }

    /// The block hash recorded at `height`.
    pub fn block_hash_at(&self, height: u64) -> Result<Hash256, StorageError> {
        let txn = self.index_db.begin_read().map_err(backend)?;
        let table = txn.open_table(HEIGHT).map_err(backend)?;
        let guard = table
            .get(&height.to_be_bytes())
            .map_err(backend)?
            .ok_or(StorageError::NotFound)?;
        Ok(*guard.value())
    }

    /// Fetches a transaction and the hash of the block containing it.
    pub fn get_transaction(
        &self,
        tx_hash: &Hash256,
    ) -> Result<(ChainTransaction, Hash256), StorageError> {
        let txn = self.index_db.begin_read().map_err(backend)?;
        let table = txn.open_table(TXS).map_err(backend)?;
        let guard = table
            .get(tx_hash)
            .map_err(backend)?
            .ok_or(StorageError::NotFound)?;
        let (block_hash, tx): (Hash256, ChainTransaction) =
            codec::from_bytes_canonical(guard.value()).map_err(corrupted)?;
        Ok((tx, block_hash))
    }

    /// Fetches blocks for heights `start..=end`, skipping gaps.
    pub fn get_blocks_in_range(&self, start: u64, end: u64) -> Result<Vec<Block>, StorageError> {
        let mut blocks = Vec::new();
        for height in start..=end {
            match self.get_block_by_height(height) {
                Ok(block) => blocks.push(block),
                Err(StorageError::NotFound) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(blocks)
    }

    /// True when a block with this hash is stored.
    pub fn block_exists(&self, hash: &Hash256) -> Result<bool, StorageError> {
        let txn = self.blocks_db.begin_read().map_err(backend)?;
        let table = txn.open_table(BLOCKS).map_err(backend)?;
        let exists = table.get(hash).map_err(backend)?.is_some();
        Ok(exists)
    }

    /// True when a transaction with this hash is indexed.
    pub fn transaction_exists(&self, tx_hash: &Hash256) -> Result<bool, StorageError> {
        let txn = self.index_db.begin_read().map_err(backend)?;
        let table = txn.open_table(TXS).map_err(backend)?;
        let exists = table.get(tx_hash).map_err(backend)?.is_some();
        Ok(exists)
    }

    /// The best (highest) stored height, if any block is stored.
    pub fn best_height(&self) -> Result<Option<u64>, StorageError> {
        self.meta_u64(META_BEST_HEIGHT)
    }

    /// The hash of the best stored block.
    pub fn best_hash(&self) -> Result<Option<Hash256>, StorageError> {
        self.meta_hash(META_BEST_HASH)
    }

    /// The genesis block hash.
    pub fn genesis_hash(&self) -> Result<Option<Hash256>, StorageError> {
        self.meta_hash(META_GENESIS_HASH)
    }

    /// Total number of transactions across all stored blocks.
    pub fn total_transactions(&self) -> Result<u64, StorageError> {
        Ok(self.meta_u64(META_TOTAL_TXS)?.unwrap_or(0))
    }

    fn meta_u64(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let txn = self.index_db.begin_read().map_err(backend)?;
        let table = txn.open_table(META).map_err(backend)?;
        let result = table
            .get(key)
            .map_err(backend)?
            .map(|g| decode_u64(g.value()))
            .transpose();
        result
    }

    fn meta_hash(&self, key: &str) -> Result<Option<Hash256>, StorageError> {
        let txn = self.index_db.begin_read().map_err(backend)?;
        let table = txn.open_table(META).map_err(backend)?;
        let result = table
            .get(key)
            .map_err(backend)?
            .map(|g| {
                let bytes = g.value();
                let mut hash = [0u8; 32];
                if bytes.len() != 32 {
                    return Err(StorageError::Corrupted(format!(
                        "meta key {} holds {} bytes, expected 32",
                        key,
                        bytes.len()
                    )));
                }
                hash.copy_from_slice(bytes);
                Ok(hash)
            })
            .transpose();
        result
    }
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StorageError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Corrupted(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_crypto::sign_transaction;
    use axon_crypto::Keypair;
    use axon_types::app::{Address, Transaction};

    fn store() -> (ChainStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn block_at(height: u64, parent: &Hash256, txs: Vec<ChainTransaction>) -> Block {
        let mut block = Block::create_genesis(1, 1_700_000_000 + height, [1u8; 32], 10_000_000);
        block.header.height = height;
        block.header.previous_hash = *parent;
        block.transactions = txs;
        block
    }

    fn signed_tx(nonce: u64) -> ChainTransaction {
        let keypair = Keypair::generate();
        let mut tx = ChainTransaction::Transfer(Transaction::transfer(
            nonce,
            keypair.address(),
            Address([2u8; 20]),
            5,
            1,
            21_000,
        ));
        sign_transaction(&mut tx, &keypair).unwrap();
        tx
    }

    #[test]
    fn store_and_fetch_round_trip() {
        let (store, _dir) = store();
        let tx = signed_tx(0);
        let genesis = block_at(0, &[0u8; 32], vec![tx.clone()]);
        store.store_block(&genesis).unwrap();

        let fetched = store.get_block(&genesis.hash()).unwrap();
        assert_eq!(fetched, genesis);
        let by_height = store.get_block_by_height(0).unwrap();
        assert_eq!(by_height.hash(), genesis.hash());
        let header = store.get_block_header(&genesis.hash()).unwrap();
        assert_eq!(header, genesis.header);

        let (stored_tx, block_hash) = store.get_transaction(&tx.hash()).unwrap();
        assert_eq!(stored_tx, tx);
        assert_eq!(block_hash, genesis.hash());
    }

    #[test]
    fn metadata_tracks_best_and_genesis() {
        let (store, _dir) = store();
        assert_eq!(store.best_height().unwrap(), None);

        let genesis = block_at(0, &[0u8; 32], vec![signed_tx(0)]);
        store.store_block(&genesis).unwrap();
        let next = block_at(1, &genesis.hash(), vec![signed_tx(0), signed_tx(0)]);
        store.store_block(&next).unwrap();

        assert_eq!(store.best_height().unwrap(), Some(1));
        assert_eq!(store.best_hash().unwrap(), Some(next.hash()));
        assert_eq!(store.genesis_hash().unwrap(), Some(genesis.hash()));
        assert_eq!(store.total_transactions().unwrap(), 3);
    }

    #[test]
    fn missing_records_report_not_found() {
        let (store, _dir) = store();
        assert!(matches!(
            store.get_block(&[9u8; 32]),
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            store.get_block_by_height(4),
            Err(StorageError::NotFound)
        ));
        assert!(!store.block_exists(&[9u8; 32]).unwrap());
        assert!(!store.transaction_exists(&[9u8; 32]).unwrap());
    }

    #[test]
    fn range_query_returns_contiguous_chain() {
        let (store, _dir) = store();
        let genesis = block_at(0, &[0u8; 32], Vec::new());
        store.store_block(&genesis).unwrap();
        let mut parent = genesis.hash();
        for height in 1..=4 {
            let block = block_at(height, &parent, Vec::new());
            parent = block.hash();
            store.store_block(&block).unwrap();
        }

        let blocks = store.get_blocks_in_range(1, 3).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].header.height, 1);
        assert_eq!(blocks[2].header.height, 3);
        // Chain linearity: every block links to its predecessor.
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].header.previous_hash, pair[0].hash());
        }

        // A range running past the tip stops at the last stored block.
        let blocks = store.get_blocks_in_range(3, 100).unwrap();
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = block_at(0, &[0u8; 32], Vec::new());
        {
            let store = ChainStore::open(dir.path()).unwrap();
            store.store_block(&genesis).unwrap();
        }
        let store = ChainStore::open(dir.path()).unwrap();
        assert_eq!(store.best_height().unwrap(), Some(0));
        assert_eq!(store.get_block_by_height(0).unwrap().hash(), genesis.hash());
    }
}
