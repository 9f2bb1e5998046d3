#![forbid(unsafe_code)]
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # Axon Consensus
//!
//! The three consensus layers of the chain:
//!
//! - [`pos`]: the Proof-of-Stake engine: validator registry,
//!   stake-weighted deterministic slot-leader selection, epoch processing
//!   with reward distribution and slashing, and double-sign evidence.
//! - [`scoring`]: the enhanced scoring algorithm: stake-dampened,
//!   trust-adjusted weighted aggregation of validator-reported scores with
//!   outlier suppression and a bonding curve.
//! - [`rollup`]: the optimistic rollup layer: off-chain aggregation,
//!   on-chain commitments, challenge periods, and fraud proofs.

/// The Proof-of-Stake engine.
pub mod pos;
/// The optimistic rollup layer.
pub mod rollup;
/// The enhanced scoring algorithm.
pub mod scoring;

pub use pos::{ProofOfStake, ValidatorSet};
pub use rollup::{
    CommitmentStatus, ConsensusCommitment, FraudProof, L1Interface, OptimisticRollup, RollupConfig,
};
pub use scoring::{aggregate_scores, ScoringConfig, ScoringEngine};
