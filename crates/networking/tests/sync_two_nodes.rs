//! End-to-end synchronization between two in-process nodes over real TCP:
//! an empty node connects to a node holding a chain, downloads headers
//! first, then bodies, and ends up on the same tip. A follow-up block
//! announcement is fetched and applied through the same path.

use axon_networking::sync::{ApplyBlock, SyncConfig, SyncManager};
use axon_networking::wire::{decode_json, scale_frame, GetBlocksMessage, GetHeadersMessage};
use axon_networking::{MessageType, P2pConfig, P2pNode};
use axon_types::app::{Block, BlockHeader};
use axon_types::error::{BlockError, ChainError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn test_config() -> P2pConfig {
    P2pConfig {
        listen_addr: "127.0.0.1".into(),
        listen_port: 0,
        network_id: 9999,
        handshake_timeout: Duration::from_secs(2),
        ping_interval: Duration::from_secs(5),
        peer_timeout: Duration::from_secs(30),
        discovery_interval: Duration::from_secs(60),
        ..P2pConfig::default()
    }
}

fn build_chain(length: u64) -> Vec<Block> {
    let mut blocks = vec![Block::create_genesis(9999, 1_700_000_000, [0u8; 32], 10_000_000)];
    for height in 1..=length {
        let parent_hash = blocks.last().unwrap().hash();
        let mut block = Block::create_genesis(9999, 1_700_000_000 + height, [0u8; 32], 10_000_000);
        block.header.height = height;
        block.header.previous_hash = parent_hash;
        blocks.push(block);
    }
    blocks
}

/// Registers GET_HEADERS / GET_BLOCKS responders over a shared chain, the
/// way the full-node orchestrator serves sync requests from storage.
fn serve_chain(node: &Arc<P2pNode>, chain: Arc<Mutex<Vec<Block>>>) {
    let headers_chain = Arc::clone(&chain);
    node.register_handler(
        MessageType::GetHeaders,
        Arc::new(move |peer, payload| {
            let chain = Arc::clone(&headers_chain);
            Box::pin(async move {
                let request: GetHeadersMessage = decode_json(&payload).unwrap();
                let headers: Vec<BlockHeader> = chain
                    .lock()
                    .unwrap()
                    .iter()
                    .skip(request.start_height as usize)
                    .take(request.max_headers as usize)
                    .map(|b| b.header.clone())
                    .collect();
                peer.send(scale_frame(MessageType::Headers, &headers))
                    .await
                    .unwrap();
            })
        }),
    );

    let blocks_chain = chain;
    node.register_handler(
        MessageType::GetBlocks,
        Arc::new(move |peer, payload| {
            let chain = Arc::clone(&blocks_chain);
            Box::pin(async move {
                let request: GetBlocksMessage = decode_json(&payload).unwrap();
                let blocks: Vec<Block> = chain
                    .lock()
                    .unwrap()
                    .iter()
                    .skip(request.start_height as usize)
                    .take(
                        (request.end_height - request.start_height + 1)
                            .min(request.max_blocks as u64) as usize,
                    )
                    .cloned()
                    .collect();
                peer.send(scale_frame(MessageType::Blocks, &blocks))
                    .await
                    .unwrap();
            })
        }),
    );
}

fn linking_apply(applied: Arc<Mutex<Vec<Block>>>) -> ApplyBlock {
    Arc::new(move |block: Block| {
        let mut chain = applied.lock().unwrap();
        let parent = chain.last().unwrap();
        if block.header.previous_hash != parent.hash() {
            return Err(ChainError::Block(BlockError::InvalidParent {
                expected: hex::encode(parent.hash()),
                got: hex::encode(block.header.previous_hash),
            }));
        }
        if block.header.height != parent.header.height + 1 {
            return Err(ChainError::Block(BlockError::InvalidHeight {
                expected: parent.header.height + 1,
                got: block.header.height,
            }));
        }
        chain.push(block);
        Ok(())
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn headers_first_sync_reaches_the_served_tip() {
    let chain = build_chain(30);
    let genesis_hash = chain[0].hash();
    let tip_hash = chain[30].hash();
    let served = Arc::new(Mutex::new(chain));

    let a = P2pNode::new(test_config(), [1u8; 32], genesis_hash);
    a.start().await.unwrap();
    a.set_chain_summary(30, tip_hash);
    serve_chain(&a, Arc::clone(&served));

    let b = P2pNode::new(test_config(), [2u8; 32], genesis_hash);
    b.start().await.unwrap();

    let applied = Arc::new(Mutex::new(vec![served.lock().unwrap()[0].clone()]));
    let sync = SyncManager::with_config(
        Arc::clone(&b),
        0,
        linking_apply(Arc::clone(&applied)),
        SyncConfig {
            header_batch: 8,
            block_batch: 5,
            headers_timeout: Duration::from_secs(5),
            blocks_timeout: Duration::from_secs(5),
            max_retries: 3,
        },
    );

    let a_port = a.local_addr().unwrap().port();
    b.connect("127.0.0.1", a_port).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    sync.sync().await.unwrap();

    assert_eq!(sync.local_height(), 30);
    assert_eq!(applied.lock().unwrap().len(), 31);
    let status = sync.status();
    assert!(!status.syncing);
    assert_eq!(status.blocks_downloaded, 30);
    assert_eq!(status.current_height, 30);
    assert!((status.progress() - 100.0).abs() < f64::EPSILON);

    // Both nodes now advertise the same tip.
    let last_applied = applied.lock().unwrap().last().unwrap().hash();
    assert_eq!(last_applied, tip_hash);

    a.stop().await;
    b.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn announcement_triggers_targeted_fetch() {
    let chain = build_chain(5);
    let genesis_hash = chain[0].hash();
    let served = Arc::new(Mutex::new(chain));

    let a = P2pNode::new(test_config(), [1u8; 32], genesis_hash);
    a.start().await.unwrap();
    {
        let served = served.lock().unwrap();
        a.set_chain_summary(5, served[5].hash());
    }
    serve_chain(&a, Arc::clone(&served));

    let b = P2pNode::new(test_config(), [2u8; 32], genesis_hash);
    b.start().await.unwrap();

    let applied = Arc::new(Mutex::new(vec![served.lock().unwrap()[0].clone()]));
    let sync = SyncManager::with_config(
        Arc::clone(&b),
        0,
        linking_apply(Arc::clone(&applied)),
        SyncConfig {
            header_batch: 8,
            block_batch: 5,
            headers_timeout: Duration::from_secs(5),
            blocks_timeout: Duration::from_secs(5),
            max_retries: 3,
        },
    );

    let a_port = a.local_addr().unwrap().port();
    b.connect("127.0.0.1", a_port).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    sync.sync().await.unwrap();
    assert_eq!(sync.local_height(), 5);

    // A produces one more block and only announces it; B must notice it is
    // behind and fetch the body.
    let new_block = {
        let mut served = served.lock().unwrap();
        let parent_hash = served.last().unwrap().hash();
        let mut block = Block::create_genesis(9999, 1_700_000_100, [0u8; 32], 10_000_000);
        block.header.height = 6;
        block.header.previous_hash = parent_hash;
        served.push(block.clone());
        block
    };
    a.set_chain_summary(6, new_block.hash());
    a.broadcast_block(&new_block).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while sync.local_height() < 6 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("announced block was never applied");

    assert_eq!(applied.lock().unwrap().len(), 7);

    a.stop().await;
    b.stop().await;
}
