//! Shared chain and consensus configuration structures.

use serde::{Deserialize, Serialize};

/// Chain-level execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Network identifier.
    pub chain_id: u64,
    /// Maximum gas per block.
    pub block_gas_limit: u64,
    /// Target seconds between blocks.
    pub block_time: u64,
    /// Minimum gas price accepted by validation.
    pub min_gas_price: u64,
    /// Maximum seconds a block timestamp may sit in the future.
    pub max_clock_skew: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            chain_id: 1,
            block_gas_limit: 10_000_000,
            block_time: 12,
            min_gas_price: 1,
            max_clock_skew: 15,
        }
    }
}

/// Proof-of-Stake consensus parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Number of slots per epoch.
    pub epoch_length: u64,
    /// Target size of the active validator set.
    pub validator_count: usize,
    /// Minimum stake required to remain a validator.
    pub min_stake: u128,
    /// Seconds per slot.
    pub block_time: u64,
    /// Missed slots per epoch before slashing applies.
    pub max_missed_blocks: u64,
    /// Percentage of stake slashed for liveness faults.
    pub slash_percent: u8,
    /// Percentage of stake slashed for double signing.
    pub double_sign_slash_percent: u8,
    /// Base reward distributed per epoch, split by stake and performance.
    pub base_reward: u128,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        ConsensusParams {
            epoch_length: 100,
            validator_count: 21,
            min_stake: 1_000_000,
            block_time: 12,
            max_missed_blocks: 10,
            slash_percent: 5,
            double_sign_slash_percent: 50,
            base_reward: 100,
        }
    }
}

impl ConsensusParams {
    /// The epoch that contains `height`.
    pub fn epoch_of(&self, height: u64) -> u64 {
        if self.epoch_length == 0 {
            return 0;
        }
        height / self.epoch_length
    }

    /// True if `height` sits on an epoch boundary (and is not genesis).
    pub fn is_epoch_boundary(&self, height: u64) -> bool {
        self.epoch_length != 0 && height != 0 && height % self.epoch_length == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_arithmetic() {
        let params = ConsensusParams::default();
        assert_eq!(params.epoch_of(0), 0);
        assert_eq!(params.epoch_of(99), 0);
        assert_eq!(params.epoch_of(100), 1);
        assert!(!params.is_epoch_boundary(0));
        assert!(params.is_epoch_boundary(100));
        assert!(!params.is_epoch_boundary(101));
    }
}
