//! The full-node orchestrator.
//!
//! Composition follows the dependency order of the subsystems: storage and
//! state at the bottom, execution and consensus above them, networking and
//! sync on top. A single chain core owns every mutation of the tip; the
//! network tasks hand validated blocks and transactions to it. Lock order
//! inside the core is always state, then mempool or indexer, then the
//! consensus engine.

use crate::genesis::GenesisConfig;
use axon_consensus::ProofOfStake;
use axon_crypto::Keypair;
use axon_execution::BlockValidator;
use axon_networking::sync::SyncManager;
use axon_networking::wire::{
    decode_json, decode_scale, scale_frame, GetBlocksMessage, GetHeadersMessage,
};
use axon_networking::{MessageType, P2pConfig, P2pNode};
use axon_state::StateStore;
use axon_storage::{ChainStore, Indexer};
use axon_tx::{Mempool, MempoolError};
use axon_types::app::{
    Address, Block, BlockHeader, ChainTransaction, Hash256, Receipt,
};
use axon_types::config::{ChainConfig, ConsensusParams};
use axon_types::error::{ChainError, GenesisError, StorageError, TransactionError};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Node-level configuration, orthogonal to the genesis file.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Directory for persistent chain data.
    pub data_dir: PathBuf,
    /// Address the P2P listener binds to.
    pub listen_addr: String,
    /// Port the P2P listener binds to; 0 picks an ephemeral port.
    pub listen_port: u16,
    /// Extra bootstrap nodes, merged with the genesis list.
    pub bootstrap_nodes: Vec<String>,
    /// Hex-encoded validator secret key; present on validator nodes.
    pub validator_secret: Option<String>,
    /// Maximum transactions drained into one produced block.
    pub max_block_transactions: usize,
    /// Mempool capacity.
    pub mempool_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: PathBuf::from("./axon-data"),
            listen_addr: "0.0.0.0".into(),
            listen_port: 30303,
            bootstrap_nodes: Vec::new(),
            validator_secret: None,
            max_block_transactions: 500,
            mempool_capacity: 4096,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn tx_counterparty(tx: &ChainTransaction) -> Option<Address> {
    match tx {
        ChainTransaction::Transfer(t) => t.to,
        ChainTransaction::Staking(t) => Some(t.validator),
    }
}

/// The chain core: every tip mutation funnels through here.
pub(crate) struct ChainCore {
    params: ConsensusParams,
    storage: Arc<ChainStore>,
    state: Mutex<StateStore>,
    pos: Mutex<ProofOfStake>,
    mempool: Mutex<Mempool>,
    indexer: Mutex<Indexer>,
    validator: BlockValidator,
}

impl ChainCore {
    fn best_header(&self) -> Result<BlockHeader, ChainError> {
        let hash = self
            .storage
            .best_hash()?
            .ok_or(StorageError::NotFound)?;
        Ok(self.storage.get_block_header(&hash)?)
    }

    /// Validates and applies a received block on top of the current tip.
    fn apply_block(&self, block: Block) -> Result<(), ChainError> {
        if self.storage.block_exists(&block.hash())? {
            return Ok(());
        }
        let parent = self.best_header()?;
        self.validator
            .validate_header(&block.header, Some(&parent), unix_now(), None)?;
        {
            let mut pos = self.pos.lock();
            pos.validate_block_producer(&block.header, block.header.height)?;
            if pos.observe_header(&block.header).is_some() {
                warn!(
                    target: "node",
                    height = block.header.height,
                    producer = %Address::from_validator_id(&block.header.validator),
                    "conflicting header at same height observed (possible double sign)"
                );
            }
        }

        let mut state = self.state.lock();
        self.validator.execute_block(&block, &mut state)?;
        self.storage.store_block(&block)?;
        self.finalize_block(&block, &mut state)?;
        info!(
            target: "node",
            height = block.header.height,
            txs = block.transactions.len(),
            "applied block"
        );
        Ok(())
    }

    /// Produces a block for the next slot if the local validator is the
    /// elected leader.
    fn produce_block(
        &self,
        keypair: &Keypair,
        max_txs: usize,
    ) -> Result<Option<(Block, Vec<Receipt>)>, ChainError> {
        let parent = self.best_header()?;
        let slot = parent.height + 1;
        let leader = self.pos.lock().select_validator(slot, None)?;
        if leader != keypair.address() {
            debug!(target: "node", slot, %leader, "not our slot");
            return Ok(None);
        }

        let mut state = self.state.lock();
        let transactions = {
            let mut mempool = self.mempool.lock();
            mempool.drain_for_block(max_txs, |address| state.get_nonce(address))
        };
        let timestamp = unix_now().max(parent.timestamp + 1);
        let (block, receipts) =
            self.validator
                .build_block(transactions, &parent, &mut state, keypair, timestamp)?;
        self.storage.store_block(&block)?;
        self.finalize_block(&block, &mut state)?;
        info!(
            target: "node",
            height = block.header.height,
            txs = block.transactions.len(),
            "produced block"
        );
        Ok(Some((block, receipts)))
    }

    /// Shared post-application bookkeeping: mempool eviction, indexing,
    /// registry sync, and epoch processing at boundaries.
    fn finalize_block(&self, block: &Block, state: &mut StateStore) -> Result<(), ChainError> {
        let included: Vec<Hash256> = block.transactions.iter().map(|tx| tx.hash()).collect();
        self.mempool.lock().remove_included(&included);

        {
            let mut indexer = self.indexer.lock();
            indexer.index_block(block);
            for tx in &block.transactions {
                let from = tx.from();
                indexer.note_account(from, state.get_balance(&from), state.get_nonce(&from));
                if let Some(other) = tx_counterparty(tx) {
                    indexer.note_account(other, state.get_balance(&other), state.get_nonce(&other));
                }
            }
        }

        let mut pos = self.pos.lock();
        pos.sync_from_state(state);
        pos.record_produced(
            &Address::from_validator_id(&block.header.validator),
            block.header.height,
        );
        if self.params.is_epoch_boundary(block.header.height) {
            let epoch = self.params.epoch_of(block.header.height);
            pos.process_epoch(epoch, state)?;
            state.commit();
            pos.sync_from_state(state);
        }
        Ok(())
    }
}

/// The full node: storage, state, consensus, networking, and sync wired
/// together.
pub struct FullNode {
    config: NodeConfig,
    genesis: GenesisConfig,
    chain_config: ChainConfig,
    core: Arc<ChainCore>,
    p2p: Arc<P2pNode>,
    sync: Arc<SyncManager>,
    keypair: Option<Keypair>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FullNode {
    /// Opens the node: loads (or creates) the persisted chain, replays it
    /// into a fresh state, and wires every subsystem. Fatal errors here
    /// (corruption, a genesis mismatch against the persisted chain) refuse
    /// to start the node.
    pub fn open(config: NodeConfig, genesis: GenesisConfig) -> Result<Self, ChainError> {
        genesis.validate()?;
        let storage = Arc::new(ChainStore::open(&config.data_dir)?);
        let chain_config = genesis.chain_config();
        let params = genesis.consensus_params();

        let mut state = StateStore::new();
        let genesis_root = genesis.apply_to_state(&mut state)?;
        let genesis_block = genesis.build_block(genesis_root)?;

        match storage.genesis_hash()? {
            None => {
                storage.store_block(&genesis_block)?;
                info!(
                    target: "node",
                    hash = %hex::encode(genesis_block.hash()),
                    "initialized chain from genesis"
                );
            }
            Some(stored) if stored == genesis_block.hash() => {}
            Some(stored) => {
                return Err(GenesisError::Invalid(format!(
                    "persisted chain was created from a different genesis ({})",
                    hex::encode(stored)
                ))
                .into());
            }
        }

        // Rebuild state and the address index by replaying the persisted
        // chain; every replayed block re-verifies its roots, and epoch
        // boundaries are re-processed so the rebuilt state matches what
        // the live path produced.
        let validator = BlockValidator::new(chain_config.clone());
        let best = storage.best_height()?.unwrap_or(0);
        let indexer = Indexer::rebuild(&storage)?;
        let mut pos = ProofOfStake::new(params.clone());
        pos.sync_from_state(&state);
        for height in 1..=best {
            let block = storage.get_block_by_height(height)?;
            validator.execute_block(&block, &mut state)?;
            pos.sync_from_state(&state);
            if params.is_epoch_boundary(height) {
                pos.process_epoch(params.epoch_of(height), &mut state)?;
                state.commit();
                pos.sync_from_state(&state);
            }
        }
        if best > 0 {
            info!(target: "node", best, "replayed persisted chain");
        }

        let keypair = match &config.validator_secret {
            Some(secret_hex) => {
                let secret = hex::decode(secret_hex.strip_prefix("0x").unwrap_or(secret_hex))
                    .map_err(|e| GenesisError::Invalid(format!("bad validator secret: {}", e)))?;
                let keypair = Keypair::from_secret_bytes(&secret)?;
                info!(target: "node", address = %keypair.address(), "validator key loaded");
                Some(keypair)
            }
            None => None,
        };

        let core = Arc::new(ChainCore {
            params,
            storage: Arc::clone(&storage),
            state: Mutex::new(state),
            pos: Mutex::new(pos),
            mempool: Mutex::new(Mempool::new(config.mempool_capacity)),
            indexer: Mutex::new(indexer),
            validator,
        });

        let node_id = keypair
            .as_ref()
            .map(|k| k.validator_id())
            .unwrap_or_else(|| Keypair::generate().validator_id());
        let mut bootstrap = genesis.network.bootstrap_nodes.clone();
        bootstrap.extend(config.bootstrap_nodes.clone());
        let p2p = P2pNode::new(
            P2pConfig {
                listen_addr: config.listen_addr.clone(),
                listen_port: config.listen_port,
                network_id: genesis.chain_id,
                max_peers: genesis.network.max_peers,
                bootstrap_nodes: bootstrap,
                ..P2pConfig::default()
            },
            node_id,
            genesis_block.hash(),
        );
        let best_hash = storage.best_hash()?.unwrap_or_else(|| genesis_block.hash());
        p2p.set_chain_summary(best, best_hash);

        let apply_core = Arc::clone(&core);
        let sync = SyncManager::new(
            Arc::clone(&p2p),
            best,
            Arc::new(move |block: Block| apply_core.apply_block(block)),
        );

        Ok(FullNode {
            config,
            genesis,
            chain_config,
            core,
            p2p,
            sync,
            keypair,
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// The genesis this node runs on.
    pub fn genesis(&self) -> &GenesisConfig {
        &self.genesis
    }

    /// The chain configuration.
    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    /// The P2P node.
    pub fn p2p(&self) -> &Arc<P2pNode> {
        &self.p2p
    }

    /// The sync manager.
    pub fn sync_manager(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    /// Starts networking, the initial sync, and (on validator nodes) the
    /// block-production task.
    pub async fn start(&self) -> Result<(), ChainError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.register_network_handlers();
        self.p2p.start().await?;

        let sync = Arc::clone(&self.sync);
        let running = Arc::clone(&self.running);
        let sync_task = tokio::spawn(async move {
            // Let bootstrap dials land before measuring the best peer.
            tokio::time::sleep(Duration::from_millis(500)).await;
            if running.load(Ordering::SeqCst) {
                if let Err(e) = sync.sync().await {
                    warn!(target: "node", "initial sync failed: {}", e);
                }
            }
        });
        self.tasks.lock().push(sync_task);

        if self.keypair.is_some() {
            let this = self.production_handle();
            let block_time = self.chain_config.block_time.max(1);
            let running = Arc::clone(&self.running);
            let production_task = tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(block_time));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = this.produce_once().await {
                        warn!(target: "node", "block production failed: {}", e);
                    }
                }
            });
            self.tasks.lock().push(production_task);
        }
        info!(target: "node", validator = self.keypair.is_some(), "node started");
        Ok(())
    }

    fn production_handle(&self) -> ProductionHandle {
        ProductionHandle {
            core: Arc::clone(&self.core),
            p2p: Arc::clone(&self.p2p),
            sync: Arc::clone(&self.sync),
            keypair: self.keypair.clone(),
            max_block_transactions: self.config.max_block_transactions,
        }
    }

    /// Runs one production attempt: if the local validator is the next
    /// slot's leader, builds, persists, and announces a block.
    pub async fn produce_once(&self) -> Result<Option<Block>, ChainError> {
        self.production_handle().produce_once().await
    }

    /// Validates a transaction against the latest state, pools it, and
    /// gossips it to peers.
    pub async fn submit_transaction(
        &self,
        tx: ChainTransaction,
    ) -> Result<Hash256, ChainError> {
        let hash = tx.hash();
        {
            let state = self.core.state.lock();
            self.core.validator.validate_transaction(&tx, &state)?;
            let account_nonce = state.get_nonce(&tx.from());
            match self.core.mempool.lock().insert(tx.clone(), account_nonce) {
                Ok(()) => {}
                Err(MempoolError::Duplicate) => return Ok(hash),
                Err(e) => {
                    return Err(TransactionError::MempoolRejected(e.to_string()).into());
                }
            }
        }
        self.p2p.broadcast_transaction(&tx).await;
        debug!(target: "node", tx = %hex::encode(hash), "transaction accepted");
        Ok(hash)
    }

    /// Applies an externally received block (used by tests and façades;
    /// the network path goes through the sync manager).
    pub fn apply_block(&self, block: Block) -> Result<(), ChainError> {
        self.core.apply_block(block)?;
        self.refresh_summaries();
        Ok(())
    }

    fn refresh_summaries(&self) {
        if let (Ok(Some(height)), Ok(Some(hash))) =
            (self.core.storage.best_height(), self.core.storage.best_hash())
        {
            self.p2p.set_chain_summary(height, hash);
            self.sync.set_local_height(height);
        }
    }

    /// Stops every task and the networking layer. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.p2p.stop().await;
        info!(target: "node", "node stopped");
    }

    // ---- queries ----

    /// Best (highest) persisted height.
    pub fn best_height(&self) -> Result<u64, ChainError> {
        Ok(self.core.storage.best_height()?.unwrap_or(0))
    }

    /// Hash of the best persisted block.
    pub fn best_hash(&self) -> Result<Hash256, ChainError> {
        Ok(self
            .core
            .storage
            .best_hash()?
            .ok_or(StorageError::NotFound)?)
    }

    /// Balance of an account in the latest state.
    pub fn balance_of(&self, address: &Address) -> u128 {
        self.core.state.lock().get_balance(address)
    }

    /// Nonce of an account in the latest state.
    pub fn nonce_of(&self, address: &Address) -> u64 {
        self.core.state.lock().get_nonce(address)
    }

    /// Bonded stake of a validator in the latest state.
    pub fn stake_of(&self, address: &Address) -> u128 {
        self.core.state.lock().get_stake(address)
    }

    /// A stored block by height.
    pub fn block_by_height(&self, height: u64) -> Result<Block, ChainError> {
        Ok(self.core.storage.get_block_by_height(height)?)
    }

    /// A stored block by hash.
    pub fn block_by_hash(&self, hash: &Hash256) -> Result<Block, ChainError> {
        Ok(self.core.storage.get_block(hash)?)
    }

    /// A stored transaction and its containing block hash.
    pub fn transaction(
        &self,
        hash: &Hash256,
    ) -> Result<(ChainTransaction, Hash256), ChainError> {
        Ok(self.core.storage.get_transaction(hash)?)
    }

    /// Number of pooled transactions.
    pub fn mempool_len(&self) -> usize {
        self.core.mempool.lock().len()
    }

    /// Transaction hashes touching `address`, capped at `limit`.
    pub fn transactions_of(&self, address: &Address, limit: usize) -> Vec<Hash256> {
        self.core.indexer.lock().transactions_of(address, limit)
    }

    /// Number of indexed transactions touching `address`.
    pub fn transaction_count_of(&self, address: &Address) -> u64 {
        self.core.indexer.lock().transaction_count(address)
    }

    fn register_network_handlers(&self) {
        let storage = Arc::clone(&self.core.storage);
        self.p2p.register_handler(
            MessageType::GetHeaders,
            Arc::new(move |peer, payload| {
                let storage = Arc::clone(&storage);
                Box::pin(async move {
                    let Ok(request) = decode_json::<GetHeadersMessage>(&payload) else {
                        return;
                    };
                    let end = request
                        .start_height
                        .saturating_add(request.max_headers.max(1) as u64 - 1);
                    let headers: Vec<BlockHeader> = storage
                        .get_blocks_in_range(request.start_height, end)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|b| b.header)
                        .collect();
                    let _ = peer.send(scale_frame(MessageType::Headers, &headers)).await;
                })
            }),
        );

        let storage = Arc::clone(&self.core.storage);
        self.p2p.register_handler(
            MessageType::GetBlocks,
            Arc::new(move |peer, payload| {
                let storage = Arc::clone(&storage);
                Box::pin(async move {
                    let Ok(request) = decode_json::<GetBlocksMessage>(&payload) else {
                        return;
                    };
                    let end = request.end_height.min(
                        request
                            .start_height
                            .saturating_add(request.max_blocks.max(1) as u64 - 1),
                    );
                    let blocks = storage
                        .get_blocks_in_range(request.start_height, end)
                        .unwrap_or_default();
                    let _ = peer.send(scale_frame(MessageType::Blocks, &blocks)).await;
                })
            }),
        );

        let core = Arc::clone(&self.core);
        let p2p = Arc::clone(&self.p2p);
        self.p2p.register_handler(
            MessageType::NewTransaction,
            Arc::new(move |peer, payload| {
                let core = Arc::clone(&core);
                let p2p = Arc::clone(&p2p);
                Box::pin(async move {
                    let tx = match decode_scale::<ChainTransaction>(&payload) {
                        Ok(tx) => tx,
                        Err(e) => {
                            warn!(target: "node", peer = %peer.key, "bad transaction payload: {}", e);
                            p2p.penalize(&peer.key, 20).await;
                            return;
                        }
                    };
                    let validation = {
                        let state = core.state.lock();
                        core.validator
                            .validate_transaction(&tx, &state)
                            .map(|()| state.get_nonce(&tx.from()))
                    };
                    let account_nonce = match validation {
                        Ok(account_nonce) => account_nonce,
                        Err(e) => {
                            debug!(target: "node", peer = %peer.key, "rejected gossiped transaction: {}", e);
                            p2p.penalize(&peer.key, 5).await;
                            return;
                        }
                    };
                    let _ = core.mempool.lock().insert(tx, account_nonce);
                })
            }),
        );
    }
}

/// The pieces the production task needs, detached from `FullNode` so the
/// task owns its handles.
struct ProductionHandle {
    core: Arc<ChainCore>,
    p2p: Arc<P2pNode>,
    sync: Arc<SyncManager>,
    keypair: Option<Keypair>,
    max_block_transactions: usize,
}

impl ProductionHandle {
    async fn produce_once(&self) -> Result<Option<Block>, ChainError> {
        let Some(keypair) = &self.keypair else {
            return Ok(None);
        };
        let produced = self
            .core
            .produce_block(keypair, self.max_block_transactions)?;
        let Some((block, _receipts)) = produced else {
            return Ok(None);
        };
        self.p2p
            .set_chain_summary(block.header.height, block.hash());
        self.sync.set_local_height(block.header.height);
        self.p2p.broadcast_block(&block).await;
        Ok(Some(block))
    }
}
