//! The mining loop
//!
//! A cooperative loop on its own tokio task. Each tick takes a point-in-time
//! snapshot of the mempool; once the snapshot is half a block or the block
//! interval has elapsed, the transactions are materialized into a block,
//! verified against a fresh UTXO view, committed atomically, appended to the
//! chain, and purged from the mempool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::block::{Block, MAX_BLOCK_BYTES};
use crate::core::blockchain::{commit_block, verify_block, Blockchain};
use crate::mining::mempool::Mempool;
use crate::storage::mirror::UtxoMirror;
use crate::storage::utxo_set::UtxoSet;

/// Time between blocks when transactions trickle in
pub const BLOCK_INTERVAL: Duration = Duration::from_secs(5);

/// Miner tick period
pub const MINER_TICK: Duration = Duration::from_millis(100);

/// Miner pacing configuration; the defaults are the canonical constants
#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub max_block_bytes: usize,
    pub block_interval: Duration,
    pub tick: Duration,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            max_block_bytes: MAX_BLOCK_BYTES,
            block_interval: BLOCK_INTERVAL,
            tick: MINER_TICK,
        }
    }
}

/// Builds, verifies, and commits blocks from mempool snapshots
pub struct Miner {
    chain: Arc<Blockchain>,
    mempool: Arc<Mempool>,
    utxo_set: Arc<UtxoSet>,
    mirror: Option<Arc<dyn UtxoMirror>>,
    config: MinerConfig,
}

impl Miner {
    pub fn new(
        chain: Arc<Blockchain>,
        mempool: Arc<Mempool>,
        utxo_set: Arc<UtxoSet>,
        mirror: Option<Arc<dyn UtxoMirror>>,
    ) -> Self {
        Self::with_config(chain, mempool, utxo_set, mirror, MinerConfig::default())
    }

    pub fn with_config(
        chain: Arc<Blockchain>,
        mempool: Arc<Mempool>,
        utxo_set: Arc<UtxoSet>,
        mirror: Option<Arc<dyn UtxoMirror>>,
        config: MinerConfig,
    ) -> Self {
        Self {
            chain,
            mempool,
            utxo_set,
            mirror,
            config,
        }
    }

    /// Spawn the mining loop; the returned handle stops it
    pub fn start(self) -> MinerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        MinerHandle { stop_tx, task }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        info!("miner started");

        let mut ticker = tokio::time::interval(self.config.tick);
        let mut anchor = Instant::now();

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    info!("miner stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick(&mut anchor);
                }
            }
        }
    }

    /// One miner tick; `anchor` marks the start of the current interval
    fn tick(&self, anchor: &mut Instant) {
        let snap = self.mempool.snapshot_until_size(self.config.max_block_bytes);

        if snap.txids.is_empty() {
            *anchor = Instant::now();
            return;
        }

        // Mine early when half a block is waiting, otherwise hold until the
        // interval elapses.
        if snap.size < self.config.max_block_bytes / 2
            && anchor.elapsed() < self.config.block_interval
        {
            return;
        }

        // Materialize the snapshot, dropping transactions removed since.
        let transactions: Vec<_> = snap
            .txids
            .iter()
            .filter_map(|txid| self.mempool.get_transaction(txid))
            .collect();
        if transactions.is_empty() {
            *anchor = Instant::now();
            return;
        }

        let tx_count = transactions.len();
        let mut block = Block::new(transactions, self.chain.tip_hash());
        block.size = snap.size;

        info!("building block with {} txs ({} bytes)", tx_count, snap.size);

        if !block.verify_merkle_root() {
            warn!("block merkle root mismatch, discarding");
            *anchor = Instant::now();
            return;
        }

        if let Err(err) = verify_block(&block, &self.utxo_set) {
            warn!("block verification failed: {err}");
            *anchor = Instant::now();
            return;
        }

        // The atomicity boundary: a failure here means a block passed
        // verification that should not have, and the set may be torn.
        if let Err(err) = commit_block(&block, &self.utxo_set, self.mirror.as_deref()) {
            panic!("block commit failed after verification: {err}");
        }

        self.chain.append_block(block.clone());

        for tx in &block.transactions {
            self.mempool.remove_transaction(tx);
        }

        info!(
            "block committed | height={} | txs={} | interval={:?}",
            self.chain.height(),
            tx_count,
            anchor.elapsed(),
        );

        *anchor = Instant::now();
    }
}

/// Handle to a running mining loop
pub struct MinerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MinerHandle {
    /// Signal the loop to stop and wait for the in-flight tick to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}
