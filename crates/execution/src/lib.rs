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

//! # Axon Execution
//!
//! Block validation and transaction execution. The validator performs the
//! stateless structural checks, the stateful per-transaction checks, gas
//! accounting, value transfers and staking transitions, receipt emission,
//! and the state-root advancement that block validation compares against
//! the header. Every failure is a typed error; nothing on a
//! consensus-critical path is silently swallowed.

/// The block validator and transaction executor.
pub mod validator;

pub use validator::{BlockOutcome, BlockValidator};
