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

//! # Axon Networking
//!
//! The peer-to-peer layer of the chain: a length-prefixed framed wire
//! protocol over TCP, peer lifecycle management (handshake, keep-alive,
//! discovery, reputation), gossip primitives for blocks and transactions,
//! and a headers-first synchronization manager.
//!
//! Consensus-critical payloads (blocks, headers, transactions) travel as
//! canonical SCALE bytes; the self-describing handshake and peer-exchange
//! payloads are JSON, as the protocol allows.

/// The P2P node: peer lifecycle, dispatch, and broadcast.
pub mod node;
/// Connected-peer bookkeeping.
pub mod peer;
/// Headers-first chain synchronization.
pub mod sync;
/// Frame codec and message payloads.
pub mod wire;

pub use node::{P2pConfig, P2pNode, PeerContext};
pub use peer::PeerInfo;
pub use sync::{SyncManager, SyncStatus};
pub use wire::{Frame, MessageType, DEFAULT_MAX_MESSAGE_SIZE};
