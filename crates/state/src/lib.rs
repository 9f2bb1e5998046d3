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

//! # Axon State
//!
//! The account-based world state of the Axon chain: a mapping from 20-byte
//! addresses to account records, plus staking, reward, validator-metadata
//! and contract-code overlays. The store supports staged writes with
//! commit, a nesting snapshot stack for transactional execution, and a
//! deterministic state-root digest that every honest node can recompute
//! byte-for-byte.

/// The state store implementation.
pub mod store;

pub use store::StateStore;
