//! Validator records and the canonical validator ordering.

use crate::app::{Address, Hash256};
use parity_scale_codec::{Decode, Encode};
use std::cmp::Ordering;

/// On-chain validator metadata, kept in a state overlay keyed by address.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ValidatorMeta {
    /// The validator's 32-byte identity key.
    pub public_key: Hash256,
    /// Whether the validator is currently active.
    pub active: bool,
}

/// A registered validator and its consensus-relevant state.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Validator {
    /// The validator's account address.
    pub address: Address,
    /// The validator's 32-byte identity key.
    pub public_key: Hash256,
    /// Currently bonded stake.
    pub stake: u128,
    /// Whether the validator participates in leader selection.
    pub active: bool,
    /// Height of the last block this validator produced.
    pub last_block_height: u64,
    /// Missed production slots in the current epoch.
    pub missed_blocks: u64,
}

impl Validator {
    /// Creates a fresh, active validator record.
    pub fn new(address: Address, public_key: Hash256, stake: u128) -> Self {
        Validator {
            address,
            public_key,
            stake,
            active: true,
            last_block_height: 0,
            missed_blocks: 0,
        }
    }
}

/// The canonical ordering of the active set: descending stake, ties broken
/// by bytewise address order. Every honest node must walk validators in
/// this order during leader selection.
pub fn active_set_ordering(a: &Validator, b: &Validator) -> Ordering {
    b.stake
        .cmp(&a.stake)
        .then_with(|| a.address.0.cmp(&b.address.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_stake_desc_then_address() {
        let a = Validator::new(Address([1u8; 20]), [0u8; 32], 100);
        let b = Validator::new(Address([2u8; 20]), [0u8; 32], 400);
        let c = Validator::new(Address([3u8; 20]), [0u8; 32], 100);
        let mut set = vec![c.clone(), a.clone(), b.clone()];
        set.sort_by(active_set_ordering);
        assert_eq!(set[0].address, b.address);
        assert_eq!(set[1].address, a.address);
        assert_eq!(set[2].address, c.address);
    }
}
