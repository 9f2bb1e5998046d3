//! Headers-first chain synchronization.
//!
//! The manager downloads headers in batches from the best known peer,
//! validates their parent-hash linkage, then downloads bodies and hands
//! each block to the chain's apply function in strict height order. Peers
//! that time out or serve bad data are penalized and the download retries
//! against another peer. Incoming block announcements above the local
//! height trigger an immediate targeted fetch through the same ingest
//! path.

use crate::node::{P2pNode, PeerContext};
use crate::wire::{
    decode_scale, json_frame, BlockAnnouncement, GetBlocksMessage, GetHeadersMessage, MessageType,
};
use axon_types::app::{Block, BlockHeader};
use axon_types::error::{ChainError, NetworkError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Tuning for the sync download loops.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Headers requested per batch.
    pub header_batch: u32,
    /// Blocks requested per batch.
    pub block_batch: u32,
    /// Time allowed for a header batch to arrive.
    pub headers_timeout: Duration,
    /// Time allowed for a block batch to arrive and apply.
    pub blocks_timeout: Duration,
    /// Attempts against fresh peers before giving up.
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            header_batch: 192,
            block_batch: 128,
            headers_timeout: Duration::from_secs(30),
            blocks_timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

/// A snapshot of synchronization progress.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// True while a sync run is in flight.
    pub syncing: bool,
    /// Height at which the current run started.
    pub start_height: u64,
    /// Latest applied height.
    pub current_height: u64,
    /// Height the run is heading for.
    pub target_height: u64,
    /// Blocks applied during the current run.
    pub blocks_downloaded: u64,
    /// Seconds since the run started.
    pub elapsed_secs: f64,
}

impl SyncStatus {
    /// Completion percentage of the current run.
    pub fn progress(&self) -> f64 {
        if self.target_height == 0 {
            return 100.0;
        }
        (self.current_height as f64 / self.target_height as f64) * 100.0
    }

    /// Applied blocks per second over the current run.
    pub fn blocks_per_second(&self) -> f64 {
        if self.elapsed_secs == 0.0 {
            return 0.0;
        }
        self.blocks_downloaded as f64 / self.elapsed_secs
    }
}

#[derive(Debug, Default)]
struct StatusInner {
    syncing: bool,
    start_height: u64,
    current_height: u64,
    target_height: u64,
    blocks_downloaded: u64,
    started_at: Option<Instant>,
}

/// Applies a validated block to the chain; owned by the chain task.
pub type ApplyBlock = Arc<dyn Fn(Block) -> Result<(), ChainError> + Send + Sync>;
/// Invoked after each successfully applied block.
pub type BlockCallback = Arc<dyn Fn(&Block) + Send + Sync>;

/// Manages headers-first synchronization against the peer set.
pub struct SyncManager {
    p2p: Arc<P2pNode>,
    config: SyncConfig,
    status: Mutex<StatusInner>,
    headers: Mutex<BTreeMap<u64, BlockHeader>>,
    pending_blocks: Mutex<BTreeMap<u64, (String, Block)>>,
    local_height: AtomicU64,
    progress: Notify,
    /// Serializes block application: the sync loop and announcement
    /// handlers both funnel through here.
    apply_gate: tokio::sync::Mutex<()>,
    apply: ApplyBlock,
    on_block_synced: Mutex<Option<BlockCallback>>,
}

impl SyncManager {
    /// Creates a sync manager with default tuning and registers its
    /// message handlers on the P2P node.
    pub fn new(p2p: Arc<P2pNode>, local_height: u64, apply: ApplyBlock) -> Arc<Self> {
        SyncManager::with_config(p2p, local_height, apply, SyncConfig::default())
    }

    /// Creates a sync manager with explicit download tuning.
    pub fn with_config(
        p2p: Arc<P2pNode>,
        local_height: u64,
        apply: ApplyBlock,
        config: SyncConfig,
    ) -> Arc<Self> {
        let manager = Arc::new(SyncManager {
            p2p,
            config,
            status: Mutex::new(StatusInner::default()),
            headers: Mutex::new(BTreeMap::new()),
            pending_blocks: Mutex::new(BTreeMap::new()),
            local_height: AtomicU64::new(local_height),
            progress: Notify::new(),
            apply_gate: tokio::sync::Mutex::new(()),
            apply,
            on_block_synced: Mutex::new(None),
        });
        manager.register_handlers();
        manager
    }

    /// Sets the callback fired after each applied block.
    pub fn set_on_block_synced(&self, callback: BlockCallback) {
        *self
            .on_block_synced
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Updates the local chain height (e.g. after local block production).
    pub fn set_local_height(&self, height: u64) {
        self.local_height.store(height, Ordering::SeqCst);
    }

    /// The latest applied height.
    pub fn local_height(&self) -> u64 {
        self.local_height.load(Ordering::SeqCst)
    }

    /// A snapshot of the current progress.
    pub fn status(&self) -> SyncStatus {
        let inner = self.status.lock().unwrap_or_else(|e| e.into_inner());
        SyncStatus {
            syncing: inner.syncing,
            start_height: inner.start_height,
            current_height: inner.current_height,
            target_height: inner.target_height,
            blocks_downloaded: inner.blocks_downloaded,
            elapsed_secs: inner
                .started_at
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
        }
    }

    fn register_handlers(self: &Arc<Self>) {
        let weak: Weak<SyncManager> = Arc::downgrade(self);

        let headers_weak = weak.clone();
        self.p2p.register_handler(
            MessageType::Headers,
            Arc::new(move |peer, payload| {
                let weak = headers_weak.clone();
                Box::pin(async move {
                    let Some(sync) = weak.upgrade() else { return };
                    sync.handle_headers(peer, payload);
                })
            }),
        );

        let blocks_weak = weak.clone();
        self.p2p.register_handler(
            MessageType::Blocks,
            Arc::new(move |peer, payload| {
                let weak = blocks_weak.clone();
                Box::pin(async move {
                    let Some(sync) = weak.upgrade() else { return };
                    sync.handle_blocks(peer, payload).await;
                })
            }),
        );

        let announce_weak = weak.clone();
        self.p2p.register_handler(
            MessageType::NewBlockHashes,
            Arc::new(move |peer, payload| {
                let weak = announce_weak.clone();
                Box::pin(async move {
                    let Some(sync) = weak.upgrade() else { return };
                    sync.handle_announcement(peer, payload).await;
                })
            }),
        );

        let new_block_weak = weak;
        self.p2p.register_handler(
            MessageType::NewBlock,
            Arc::new(move |peer, payload| {
                let weak = new_block_weak.clone();
                Box::pin(async move {
                    let Some(sync) = weak.upgrade() else { return };
                    match decode_scale::<Block>(&payload) {
                        Ok(block) => sync.ingest_blocks(&peer.key, vec![block]).await,
                        Err(e) => {
                            warn!(target: "sync", peer = %peer.key, "bad NEW_BLOCK payload: {}", e);
                            sync.p2p.penalize(&peer.key, 20).await;
                        }
                    }
                })
            }),
        );
    }

    fn handle_headers(&self, peer: PeerContext, payload: Vec<u8>) {
        let headers: Vec<BlockHeader> = match decode_scale(&payload) {
            Ok(headers) => headers,
            Err(e) => {
                warn!(target: "sync", peer = %peer.key, "bad HEADERS payload: {}", e);
                return;
            }
        };
        debug!(target: "sync", peer = %peer.key, count = headers.len(), "received headers");
        let mut cache = self.headers.lock().unwrap_or_else(|e| e.into_inner());
        for header in headers {
            cache.insert(header.height, header);
        }
        drop(cache);
        self.progress.notify_waiters();
    }

    async fn handle_blocks(&self, peer: PeerContext, payload: Vec<u8>) {
        let blocks: Vec<Block> = match decode_scale(&payload) {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!(target: "sync", peer = %peer.key, "bad BLOCKS payload: {}", e);
                self.p2p.penalize(&peer.key, 20).await;
                return;
            }
        };
        debug!(target: "sync", peer = %peer.key, count = blocks.len(), "received blocks");
        self.ingest_blocks(&peer.key, blocks).await;
    }

    async fn handle_announcement(&self, peer: PeerContext, payload: Vec<u8>) {
        let announcement: BlockAnnouncement = match decode_scale(&payload) {
            Ok(a) => a,
            Err(e) => {
                warn!(target: "sync", peer = %peer.key, "bad announcement: {}", e);
                self.p2p.penalize(&peer.key, 10).await;
                return;
            }
        };
        self.p2p
            .update_peer_chain(&peer.key, announcement.height, announcement.hash);
        let local = self.local_height();
        if announcement.height <= local {
            return;
        }
        info!(
            target: "sync",
            height = announcement.height,
            peer = %peer.key,
            "new block announced above local height"
        );
        let request = GetBlocksMessage {
            start_height: local + 1,
            end_height: announcement.height,
            max_blocks: self.config.block_batch,
        };
        if let Ok(frame) = json_frame(MessageType::GetBlocks, &request) {
            let _ = peer.send(frame).await;
        }
    }

    /// Queues received blocks and applies everything that extends the
    /// local chain, in height order. Application failures penalize the
    /// supplying peer.
    async fn ingest_blocks(&self, peer_key: &str, blocks: Vec<Block>) {
        {
            let local = self.local_height();
            let mut pending = self
                .pending_blocks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for block in blocks {
                let height = block.header.height;
                if height > local {
                    pending.entry(height).or_insert((peer_key.to_string(), block));
                }
            }
        }

        let _gate = self.apply_gate.lock().await;
        loop {
            let next_height = self.local_height() + 1;
            let entry = {
                let mut pending = self
                    .pending_blocks
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                pending.remove(&next_height)
            };
            let Some((source, block)) = entry else { break };
            let block_hash = block.hash();
            match (self.apply)(block.clone()) {
                Ok(()) => {
                    self.local_height.store(next_height, Ordering::SeqCst);
                    self.p2p.set_chain_summary(next_height, block_hash);
                    {
                        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
                        status.current_height = next_height;
                        status.blocks_downloaded += 1;
                    }
                    let callback = self
                        .on_block_synced
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .clone();
                    if let Some(callback) = callback {
                        callback(&block);
                    }
                }
                Err(e) => {
                    warn!(
                        target: "sync",
                        height = next_height,
                        peer = %source,
                        "block failed validation during sync: {}", e
                    );
                    self.p2p.penalize(&source, 100).await;
                    break;
                }
            }
        }
        self.progress.notify_waiters();
    }

    /// Runs a full headers-first sync against the best known peer.
    /// Returns once the local chain has caught up with the target, or
    /// after exhausting retries against every peer.
    pub async fn sync(&self) -> Result<(), NetworkError> {
        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            if status.syncing {
                warn!(target: "sync", "sync already in progress");
                return Ok(());
            }
            status.syncing = true;
        }
        let result = self.run_sync().await;
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.syncing = false;
        if let Some(started) = status.started_at {
            info!(
                target: "sync",
                blocks = status.blocks_downloaded,
                secs = started.elapsed().as_secs_f64(),
                "sync finished"
            );
        }
        result
    }

    async fn run_sync(&self) -> Result<(), NetworkError> {
        let Some(mut peer) = self.p2p.best_peer() else {
            warn!(target: "sync", "no peers available for sync");
            return Ok(());
        };
        let target = peer.info.best_height;
        let local = self.local_height();
        if local >= target {
            debug!(target: "sync", local, target, "already caught up");
            return Ok(());
        }

        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            status.start_height = local;
            status.current_height = local;
            status.target_height = target;
            status.blocks_downloaded = 0;
            status.started_at = Some(Instant::now());
        }
        info!(target: "sync", from = local, to = target, peer = %peer.key, "starting headers-first sync");

        // Phase 1: headers.
        let mut next = local + 1;
        let mut retries = 0u32;
        while next <= target {
            let batch_end = (next + self.config.header_batch as u64 - 1).min(target);
            let request = GetHeadersMessage {
                start_height: next,
                max_headers: self.config.header_batch,
            };
            if peer.send(json_frame(MessageType::GetHeaders, &request)?).await.is_err() {
                peer = self.next_peer(&mut retries)?;
                continue;
            }

            let deadline = Instant::now() + self.config.headers_timeout;
            let complete = self
                .wait_until(deadline, || {
                    let cache = self.headers.lock().unwrap_or_else(|e| e.into_inner());
                    (next..=batch_end).all(|h| cache.contains_key(&h))
                })
                .await;
            if !complete {
                warn!(target: "sync", height = next, peer = %peer.key, "timeout waiting for headers");
                peer = self.next_peer(&mut retries)?;
                continue;
            }

            if let Err(bad_height) = self.verify_header_linkage(next, batch_end) {
                warn!(target: "sync", height = bad_height, peer = %peer.key, "broken header chain from peer");
                self.p2p.penalize(&peer.key, 100).await;
                let mut cache = self.headers.lock().unwrap_or_else(|e| e.into_inner());
                cache.retain(|h, _| *h < next);
                drop(cache);
                peer = self.next_peer(&mut retries)?;
                continue;
            }
            next = batch_end + 1;
        }
        debug!(target: "sync", target, "headers phase complete");

        // Phase 2: bodies.
        retries = 0;
        while self.local_height() < target {
            let start = self.local_height() + 1;
            let end = (start + self.config.block_batch as u64 - 1).min(target);
            let request = GetBlocksMessage {
                start_height: start,
                end_height: end,
                max_blocks: self.config.block_batch,
            };
            if peer.send(json_frame(MessageType::GetBlocks, &request)?).await.is_err() {
                peer = self.next_peer(&mut retries)?;
                continue;
            }

            let deadline = Instant::now() + self.config.blocks_timeout;
            let advanced = self.wait_until(deadline, || self.local_height() >= end).await;
            if !advanced {
                warn!(target: "sync", height = start, peer = %peer.key, "timeout waiting for blocks");
                peer = self.next_peer(&mut retries)?;
                continue;
            }
            retries = 0;
        }

        self.headers.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    /// Checks `previous_hash` linkage for cached headers in
    /// `start..=end`; the predecessor of `start` is checked when cached.
    fn verify_header_linkage(&self, start: u64, end: u64) -> Result<(), u64> {
        let cache = self.headers.lock().unwrap_or_else(|e| e.into_inner());
        for height in start..=end {
            let Some(header) = cache.get(&height) else {
                return Err(height);
            };
            if let Some(parent) = cache.get(&(height.wrapping_sub(1))) {
                if header.previous_hash != parent.hash() {
                    return Err(height);
                }
            }
        }
        Ok(())
    }

    fn next_peer(&self, retries: &mut u32) -> Result<PeerContext, NetworkError> {
        *retries += 1;
        if *retries > self.config.max_retries {
            return Err(NetworkError::PeerTimeout);
        }
        self.p2p.best_peer().ok_or(NetworkError::PeerTimeout)
    }

    async fn wait_until<F: Fn() -> bool>(&self, deadline: Instant, predicate: F) -> bool {
        loop {
            if predicate() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return predicate();
            }
            let notified = self.progress.notified();
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return predicate();
            }
        }
    }
}
