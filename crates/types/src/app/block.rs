//! Block and header structures plus the deterministic header hash.

use crate::app::{ChainTransaction, Hash256, ValidatorId};
use crate::error::BlockError;
use parity_scale_codec::{Decode, Encode};
use sha2::{Digest, Sha256};

/// Current block format version.
pub const BLOCK_VERSION: u32 = 1;

/// The header of a block, containing metadata and state commitments.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct BlockHeader {
    /// Protocol version number.
    pub version: u32,
    /// Block height (position in the chain).
    pub height: u64,
    /// UNIX timestamp (seconds) when the block was created.
    pub timestamp: u64,
    /// Hash of the previous block's header.
    pub previous_hash: Hash256,
    /// Deterministic digest of the world state after this block.
    pub state_root: Hash256,
    /// Merkle root of the block's transactions.
    pub txs_root: Hash256,
    /// Merkle root of the transaction receipts.
    pub receipts_root: Hash256,
    /// Identifier of the block producer.
    pub validator: ValidatorId,
    /// Producer's signature over the header hash.
    pub signature: [u8; 64],
    /// Total gas consumed by the block's transactions.
    pub gas_used: u64,
    /// Maximum gas allowed in the block.
    pub gas_limit: u64,
    /// Additional arbitrary data.
    pub extra_data: Vec<u8>,
}

impl BlockHeader {
    /// The canonical hash preimage: every field except the signature.
    pub fn signing_preimage(&self) -> Vec<u8> {
        crate::codec::to_bytes_canonical(&(
            self.version,
            self.height,
            self.timestamp,
            &self.previous_hash,
            &self.state_root,
            &self.txs_root,
            &self.receipts_root,
            &self.validator,
            self.gas_used,
            self.gas_limit,
            &self.extra_data,
        ))
    }

    /// The deterministic header hash: SHA-256 of the signing preimage.
    pub fn hash(&self) -> Hash256 {
        Sha256::digest(self.signing_preimage()).into()
    }
}

/// A complete block: header plus the ordered transaction body.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
    /// Transactions included in this block, in execution order.
    pub transactions: Vec<ChainTransaction>,
}

impl Block {
    /// The block hash (the header hash).
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Validates the block's structural invariants, independent of any
    /// chain state or consensus rules.
    pub fn validate_structure(&self) -> Result<(), BlockError> {
        if self.header.gas_used > self.header.gas_limit {
            return Err(BlockError::GasLimitExceeded {
                gas_used: self.header.gas_used,
                gas_limit: self.header.gas_limit,
            });
        }
        Ok(())
    }

    /// Creates the genesis block for a chain.
    ///
    /// The genesis block is a pure function of its arguments: it links to an
    /// all-zero parent, sits at height zero, and carries no transactions.
    /// The caller stamps the post-allocation `state_root` before persisting.
    pub fn create_genesis(
        chain_id: u64,
        timestamp: u64,
        validator: ValidatorId,
        gas_limit: u64,
    ) -> Block {
        Block {
            header: BlockHeader {
                version: BLOCK_VERSION,
                height: 0,
                timestamp,
                previous_hash: [0u8; 32],
                state_root: [0u8; 32],
                txs_root: [0u8; 32],
                receipts_root: [0u8; 32],
                validator,
                signature: [0u8; 64],
                gas_used: 0,
                gas_limit,
                extra_data: format!("Axon Genesis - Chain {}", chain_id).into_bytes(),
            },
            transactions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: BLOCK_VERSION,
            height: 5,
            timestamp: 1_700_000_000,
            previous_hash: [1u8; 32],
            state_root: [2u8; 32],
            txs_root: [3u8; 32],
            receipts_root: [4u8; 32],
            validator: [5u8; 32],
            signature: [0u8; 64],
            gas_used: 21_000,
            gas_limit: 10_000_000,
            extra_data: Vec::new(),
        }
    }

    #[test]
    fn hash_is_stable_and_ignores_signature() {
        let header = sample_header();
        let h1 = header.hash();
        let mut signed = header.clone();
        signed.signature = [9u8; 64];
        assert_eq!(signed.hash(), h1);
    }

    #[test]
    fn hash_changes_with_any_field() {
        let base = sample_header();
        let mut h = base.clone();
        h.height += 1;
        assert_ne!(h.hash(), base.hash());
        let mut h = base.clone();
        h.timestamp += 1;
        assert_ne!(h.hash(), base.hash());
        let mut h = base.clone();
        h.state_root[0] ^= 1;
        assert_ne!(h.hash(), base.hash());
        let mut h = base.clone();
        h.validator[31] ^= 1;
        assert_ne!(h.hash(), base.hash());
        let mut h = base.clone();
        h.extra_data.push(0);
        assert_ne!(h.hash(), base.hash());
    }

    #[test]
    fn structure_rejects_gas_overflow() {
        let mut block = Block {
            header: sample_header(),
            transactions: Vec::new(),
        };
        block.header.gas_used = block.header.gas_limit + 1;
        assert!(matches!(
            block.validate_structure(),
            Err(BlockError::GasLimitExceeded { .. })
        ));
    }

    #[test]
    fn genesis_is_deterministic() {
        let a = Block::create_genesis(9999, 1_700_000_000, [7u8; 32], 10_000_000);
        let b = Block::create_genesis(9999, 1_700_000_000, [7u8; 32], 10_000_000);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.header.height, 0);
        assert_eq!(a.header.previous_hash, [0u8; 32]);
        // A different chain id changes the extra data and therefore the hash.
        let c = Block::create_genesis(1, 1_700_000_000, [7u8; 32], 10_000_000);
        assert_ne!(a.hash(), c.hash());
    }
}
