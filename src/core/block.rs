//! Blocks and the 80-byte header
//!
//! A block carries an ordered list of transactions plus a fixed-layout
//! header; the block hash is the double SHA-256 of the serialized header.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::transaction::Transaction;
use crate::crypto::hash::double_sha256;
use crate::crypto::merkle::compute_merkle_root;

/// Byte budget for the transactions of a single block (1 MiB)
///
/// The 80-byte header is accounted separately.
pub const MAX_BLOCK_BYTES: usize = 1024 * 1024;

/// Serialized header length in bytes
pub const BLOCK_HEADER_BYTES: usize = 80;

/// A block in the chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Creation time, seconds since epoch
    pub timestamp: i64,
    /// Hash of the previous block; empty for genesis
    pub prev_hash: Vec<u8>,
    /// Merkle root over the transaction ids
    pub merkle_root: Vec<u8>,
    pub nonce: u32,
    pub transactions: Vec<Transaction>,
    /// Accumulated transaction bytes
    pub size: usize,
    /// Double SHA-256 of the serialized header
    pub hash: Vec<u8>,
}

impl Block {
    /// Create a block holding `transactions`, linked to `prev_hash`
    pub fn new(transactions: Vec<Transaction>, prev_hash: Vec<u8>) -> Self {
        let txids: Vec<String> = transactions.iter().map(|tx| tx.txid.clone()).collect();
        let mut block = Self {
            timestamp: Utc::now().timestamp(),
            prev_hash,
            merkle_root: compute_merkle_root(&txids),
            nonce: 0,
            transactions,
            size: 0,
            hash: Vec::new(),
        };
        block.hash = block.block_hash();
        block
    }

    /// Create the genesis block: no transactions, empty previous hash
    pub fn genesis() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Serialize the fixed 80-byte little-endian header:
    /// `version(4)=1 || prev_hash(32) || merkle_root(32) || timestamp(4) ||
    /// bits(4)=0 || nonce(4)`
    ///
    /// Hash fields shorter than 32 bytes are zero-padded on the MSB side.
    pub fn serialize_header(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_HEADER_BYTES);

        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&pad32(&self.prev_hash));
        buf.extend_from_slice(&pad32(&self.merkle_root));
        buf.extend_from_slice(&(self.timestamp as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // bits
        buf.extend_from_slice(&self.nonce.to_le_bytes());

        buf
    }

    /// Double SHA-256 of the serialized header
    pub fn block_hash(&self) -> Vec<u8> {
        double_sha256(&self.serialize_header())
    }

    /// Header bytes plus accumulated transaction bytes
    pub fn current_size(&self) -> usize {
        BLOCK_HEADER_BYTES + self.size
    }

    /// Recompute the merkle root over the current transaction list and
    /// compare with the stored one
    pub fn verify_merkle_root(&self) -> bool {
        let txids: Vec<String> = self.transactions.iter().map(|tx| tx.txid.clone()).collect();
        compute_merkle_root(&txids) == self.merkle_root
    }

    /// Reseal the header after the transaction list changed
    pub fn reseal(&mut self) {
        let txids: Vec<String> = self.transactions.iter().map(|tx| tx.txid.clone()).collect();
        self.merkle_root = compute_merkle_root(&txids);
        self.hash = self.block_hash();
    }
}

fn pad32(bytes: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = bytes.len().min(32);
    padded[32 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::TxOut;
    use crate::crypto::KeyPair;

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();
        assert!(genesis.transactions.is_empty());
        assert!(genesis.prev_hash.is_empty());
        assert_eq!(genesis.merkle_root, vec![0u8; 32]);
        assert_eq!(genesis.hash, genesis.block_hash());
    }

    #[test]
    fn test_header_is_80_bytes() {
        let block = Block::genesis();
        assert_eq!(block.serialize_header().len(), BLOCK_HEADER_BYTES);
    }

    #[test]
    fn test_hash_commits_to_nonce() {
        let mut block = Block::genesis();
        let original = block.hash.clone();

        block.nonce += 1;
        assert_ne!(block.block_hash(), original);
    }

    #[test]
    fn test_merkle_root_matches_transactions() {
        let address = KeyPair::generate().address();
        let tx =
            Transaction::seed(vec![TxOut::new(50, 0, &address).unwrap()]).unwrap();

        let mut block = Block::new(vec![tx], Vec::new());
        assert!(block.verify_merkle_root());

        block.transactions[0].txid = "tampered".to_string();
        assert!(!block.verify_merkle_root());
    }

    #[test]
    fn test_reseal_tracks_new_transactions() {
        let address = KeyPair::generate().address();
        let tx = Transaction::seed(vec![TxOut::new(50, 0, &address).unwrap()]).unwrap();

        let mut block = Block::genesis();
        block.transactions.push(tx);
        assert!(!block.verify_merkle_root());

        block.reseal();
        assert!(block.verify_merkle_root());
        assert_eq!(block.hash, block.block_hash());
    }
}
