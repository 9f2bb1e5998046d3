//! Connected-peer bookkeeping.

use crate::wire::Frame;
use axon_types::app::Hash256;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Information about a peer, learned during the handshake and updated by
/// announcements.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Host address of the peer.
    pub address: String,
    /// The port the peer accepts inbound connections on.
    pub listen_port: u16,
    /// The peer's node id.
    pub node_id: Hash256,
    /// The peer's best height, from the handshake or announcements.
    pub best_height: u64,
    /// The peer's best block hash.
    pub best_hash: Hash256,
    /// Capability strings advertised in the handshake.
    pub capabilities: Vec<String>,
}

/// Starting reputation of a fresh peer. Misbehavior subtracts from it; at
/// zero the peer is disconnected.
pub const INITIAL_REPUTATION: i32 = 100;

/// A registered, handshaken peer connection.
pub(crate) struct PeerHandle {
    /// Unique id of this connection; reader-side cleanup checks it so a
    /// stale connection can never remove a newer one under the same key.
    pub connection_id: u64,
    /// Peer metadata.
    pub info: PeerInfo,
    /// Outbound frame queue feeding the writer task.
    pub sender: mpsc::Sender<Frame>,
    /// When the last pong (or any life sign) was observed.
    pub last_pong: Instant,
    /// Remaining reputation.
    pub reputation: i32,
    /// The reader task, aborted on disconnect.
    pub reader_task: JoinHandle<()>,
    /// The writer task; exits when the sender side is dropped.
    pub writer_task: JoinHandle<()>,
}

impl PeerHandle {
    /// Tears down the connection tasks. The writer exits on its own once
    /// the last sender clone is dropped; the reader is aborted.
    pub(crate) fn shutdown(&self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}
