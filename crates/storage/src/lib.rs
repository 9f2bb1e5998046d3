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

//! # Axon Storage
//!
//! Persistent chain storage over redb, split across two databases under the
//! node's data directory: `blocks/` (full blocks and headers) and `index/`
//! (height index, transaction lookups, chain metadata). Writes inside
//! `store_block` are batched into single commits so concurrent readers
//! only ever observe fully-written blocks. The in-memory [`Indexer`]
//! maintains derived per-address lookups and is rebuildable from the
//! canonical store.

/// The redb-backed chain store.
pub mod chain_store;
/// The in-memory address indexer.
pub mod indexer;

pub use chain_store::ChainStore;
pub use indexer::Indexer;
