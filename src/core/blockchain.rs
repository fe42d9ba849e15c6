//! The hash-linked chain and its open block
//!
//! The chain is a non-empty sequence starting at the genesis block, plus one
//! `current` open block accumulating admissions before finalization. Block
//! verification runs against a [`UtxoView`] so the canonical set is only
//! touched by [`commit_block`], which applies a whole block atomically.

use std::collections::HashSet;

use log::warn;
use parking_lot::RwLock;
use thiserror::Error;

use crate::core::block::{Block, MAX_BLOCK_BYTES};
use crate::core::codec::CodecError;
use crate::core::transaction::{apply_to_view, verify_with_view, Transaction, Utxo};
use crate::storage::mirror::{MirrorError, UtxoMirror};
use crate::storage::utxo_set::{UtxoSet, UtxoSetError};
use crate::storage::utxo_view::UtxoView;

/// Blockchain-related errors
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("block is full")]
    BlockFull,
    #[error("invalid block: {0}")]
    InvalidBlock(String),
    #[error("utxo set error: {0}")]
    UtxoSet(#[from] UtxoSetError),
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug)]
struct ChainInner {
    /// Finalized blocks, genesis first
    blocks: Vec<Block>,
    /// Open block accumulating admissions
    current: Block,
}

/// The hash-linked chain of blocks
#[derive(Debug)]
pub struct Blockchain {
    inner: RwLock<ChainInner>,
}

impl Blockchain {
    /// Create a chain holding only the genesis block
    pub fn new() -> Self {
        let genesis = Block::genesis();
        let current = Block::new(Vec::new(), genesis.hash.clone());
        Self {
            inner: RwLock::new(ChainInner {
                blocks: vec![genesis],
                current,
            }),
        }
    }

    /// Number of finalized blocks (including genesis)
    pub fn len(&self) -> usize {
        self.inner.read().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        // A chain always holds at least the genesis block.
        false
    }

    /// Height of the chain tip (genesis is height 0)
    pub fn height(&self) -> usize {
        self.inner.read().blocks.len() - 1
    }

    /// Hash of the chain tip
    pub fn tip_hash(&self) -> Vec<u8> {
        let inner = self.inner.read();
        inner.blocks[inner.blocks.len() - 1].hash.clone()
    }

    /// Snapshot of a finalized block by height
    pub fn block_at(&self, height: usize) -> Option<Block> {
        self.inner.read().blocks.get(height).cloned()
    }

    /// Snapshot of all finalized blocks
    pub fn blocks(&self) -> Vec<Block> {
        self.inner.read().blocks.clone()
    }

    /// Number of transactions waiting in the open block
    pub fn pending_len(&self) -> usize {
        self.inner.read().current.transactions.len()
    }

    /// Append a transaction to the open block
    ///
    /// Fails with [`BlockchainError::BlockFull`] when the transaction would
    /// push the open block past its byte budget; the caller retries after
    /// the block is finalized or mined.
    pub fn add_transaction_to_block(&self, tx: Transaction) -> Result<(), BlockchainError> {
        let size = tx.size()?;

        let mut inner = self.inner.write();
        if inner.current.size + size > MAX_BLOCK_BYTES {
            return Err(BlockchainError::BlockFull);
        }

        inner.current.transactions.push(tx);
        inner.current.size += size;
        Ok(())
    }

    /// Seal the open block and append it to the chain
    ///
    /// The candidate is verified against a fresh [`UtxoView`]; a failing
    /// block is discarded and a new empty block opened in its place. The
    /// UTXO set is never touched here, so nothing needs rolling back on
    /// failure.
    pub fn finalize_current_block(&self, utxo_set: &UtxoSet) -> Result<Block, BlockchainError> {
        let mut inner = self.inner.write();

        let mut candidate = inner.current.clone();
        candidate.reseal();

        let tip_hash = inner.blocks[inner.blocks.len() - 1].hash.clone();

        if let Err(err) = verify_block(&candidate, utxo_set) {
            warn!("discarding invalid block: {err}");
            inner.current = Block::new(Vec::new(), tip_hash);
            return Err(err);
        }

        inner.blocks.push(candidate.clone());
        inner.current = Block::new(Vec::new(), candidate.hash.clone());
        Ok(candidate)
    }

    /// Append an externally built and committed block (the mining path)
    ///
    /// The open block is re-linked to the new tip, keeping any admissions it
    /// already holds.
    pub fn append_block(&self, block: Block) {
        let mut inner = self.inner.write();

        let pending = std::mem::take(&mut inner.current.transactions);
        let pending_size = inner.current.size;

        let tip_hash = block.hash.clone();
        inner.blocks.push(block);

        let mut current = Block::new(pending, tip_hash);
        current.size = pending_size;
        inner.current = current;
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify every transaction of a block against a fresh shadow view
///
/// Transactions are verified and applied in block order, so later
/// transactions may spend outputs created earlier in the same block. Missing
/// previous outputs, script or signature failures, duplicate inputs, and
/// value violations all invalidate the whole block.
pub fn verify_block(block: &Block, utxo_set: &UtxoSet) -> Result<(), BlockchainError> {
    let mut view = UtxoView::from_set(utxo_set);

    for (index, tx) in block.transactions.iter().enumerate() {
        verify_with_view(tx, &view)
            .map_err(|err| invalid_tx(&tx.txid, index, &err.to_string()))?;
        apply_to_view(tx, &mut view)
            .map_err(|err| invalid_tx(&tx.txid, index, &err.to_string()))?;
    }

    Ok(())
}

fn invalid_tx(txid: &str, index: usize, reason: &str) -> BlockchainError {
    BlockchainError::InvalidBlock(format!("tx {txid} at index {index}: {reason}"))
}

/// Apply a verified block to the canonical UTXO set, then to the mirror
///
/// The in-memory application happens inside a single writer critical
/// section: observers see the set either fully pre-commit or fully
/// post-commit. Callers treat an error here as fatal; it means a block
/// passed verification that should not have.
pub fn commit_block(
    block: &Block,
    utxo_set: &UtxoSet,
    mirror: Option<&dyn UtxoMirror>,
) -> Result<(), BlockchainError> {
    utxo_set.apply_block(&block.transactions)?;

    if let Some(mirror) = mirror {
        let mut spent = Vec::new();
        let mut created = Vec::new();
        for tx in &block.transactions {
            for vin in &tx.vin {
                if !vin.txid.is_empty() {
                    spent.push((vin.txid.clone(), vin.vout));
                }
            }
            for (index, out) in tx.vout.iter().enumerate() {
                created.push(Utxo {
                    txid: tx.txid.clone(),
                    index: index as u32,
                    output: out.clone(),
                });
            }
        }

        // Outpoints both created and spent inside this block never reach
        // the mirror; it only sees the block's net effect.
        let spent_set: HashSet<(String, u32)> = spent.iter().cloned().collect();
        let created_set: HashSet<(String, u32)> = created
            .iter()
            .map(|utxo| (utxo.txid.clone(), utxo.index))
            .collect();
        let spent: Vec<(String, u32)> = spent
            .into_iter()
            .filter(|outpoint| !created_set.contains(outpoint))
            .collect();
        let created: Vec<Utxo> = created
            .into_iter()
            .filter(|utxo| !spent_set.contains(&(utxo.txid.clone(), utxo.index)))
            .collect();

        mirror.apply(&spent, &created)?;
    }

    Ok(())
}
