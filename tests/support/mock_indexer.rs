use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use blockdispatch::{BlockHeader, BlockIndexer, ProcessBlockResponse, WorkerError};
use futures::future::BoxFuture;

pub const BLOCK_MEMORY_FOOTPRINT: u64 = 1024;

fn hash_for(height: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&(height + 1).to_le_bytes());
    BlockHash::from_slice(&bytes).expect("32 bytes")
}

/// Deterministic in-memory chain shared by every worker of a test.
pub struct MockChain {
    tip: AtomicU64,
    corrupt: Mutex<HashSet<u64>>,
    fetch_delay: Duration,
}

impl MockChain {
    pub fn new(tip: u64) -> Arc<Self> {
        Self::with_fetch_delay(tip, Duration::ZERO)
    }

    pub fn with_fetch_delay(tip: u64, fetch_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            tip: AtomicU64::new(tip),
            corrupt: Mutex::new(HashSet::new()),
            fetch_delay,
        })
    }

    pub fn tip(&self) -> u64 {
        self.tip.load(Ordering::SeqCst)
    }

    pub fn extend_to(&self, tip: u64) {
        self.tip.fetch_max(tip, Ordering::SeqCst);
    }

    /// Makes indexing of `height` fail with an unclassified error.
    pub fn corrupt(&self, height: u64) {
        self.corrupt.lock().unwrap().insert(height);
    }

    fn is_corrupt(&self, height: u64) -> bool {
        self.corrupt.lock().unwrap().contains(&height)
    }

    pub fn header(&self, height: u64) -> BlockHeader {
        let parent = match height {
            0 => BlockHash::all_zeros(),
            _ => hash_for(height - 1),
        };
        BlockHeader::new(height, hash_for(height), parent).with_timestamp(1_600_000_000 + height as u32)
    }
}

pub struct ChainIndexer {
    chain: Arc<MockChain>,
    indexed: Mutex<Vec<u64>>,
}

impl ChainIndexer {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self {
            chain,
            indexed: Mutex::new(Vec::new()),
        }
    }
}

impl BlockIndexer for ChainIndexer {
    type Block = BlockHeader;

    fn fetch_block(&self, height: u64) -> BoxFuture<'_, Result<Self::Block>> {
        Box::pin(async move {
            if !self.chain.fetch_delay.is_zero() {
                tokio::time::sleep(self.chain.fetch_delay).await;
            }
            if height > self.chain.tip() {
                return Err(WorkerError::BlockUnavailable { height }.into());
            }
            Ok(self.chain.header(height))
        })
    }

    fn header(&self, block: &Self::Block) -> BlockHeader {
        block.clone()
    }

    fn index_block(
        &self,
        height: u64,
        block: Self::Block,
    ) -> BoxFuture<'_, Result<ProcessBlockResponse>> {
        Box::pin(async move {
            if self.chain.is_corrupt(height) {
                bail!("index store rejected block {height}");
            }
            assert_eq!(block.height(), height, "worker cached the wrong block");
            self.indexed.lock().unwrap().push(height);
            Ok(ProcessBlockResponse::default())
        })
    }

    fn memory_used(&self) -> u64 {
        self.indexed.lock().unwrap().len() as u64 * BLOCK_MEMORY_FOOTPRINT
    }
}
