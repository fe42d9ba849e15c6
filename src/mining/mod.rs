//! Mining module: the transaction pool and the block-producing loop

pub mod mempool;
pub mod miner;

pub use mempool::{Mempool, MempoolError, MempoolSnapshot};
pub use miner::{Miner, MinerConfig, MinerHandle, BLOCK_INTERVAL, MINER_TICK};
