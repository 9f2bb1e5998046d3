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

//! # Axon Tx
//!
//! The mempool of validated, unincluded transactions, and the builder
//! surface that assembles and signs transfer and staking transactions.

/// The mempool: FIFO with per-sender nonce sequencing and hygiene rules.
pub mod mempool;
/// Builders that pre-validate and sign transactions.
pub mod staking;

pub use mempool::{Mempool, MempoolError};
pub use staking::TxBuilder;
