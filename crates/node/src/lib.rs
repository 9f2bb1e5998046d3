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

//! # Axon Node
//!
//! The full-node orchestrator: loads or creates the genesis state, wires
//! storage, execution, consensus, networking, and synchronization
//! together, accepts transactions, and, when configured as a validator,
//! produces blocks in the slots it wins.

/// Genesis configuration: loading, validation, and state initialization.
pub mod genesis;
/// The full-node orchestrator.
pub mod node;

pub use genesis::GenesisConfig;
pub use node::{FullNode, NodeConfig};
