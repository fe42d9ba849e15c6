//! The authoritative in-memory UTXO set
//!
//! Primary storage maps `(txid, vout)` to the unspent output; a secondary
//! index maps every address carried by an output's locking script to the
//! outpoints paying it. Both structures are updated inline under the same
//! writer lock, so the index never lags the primary map.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use thiserror::Error;

use crate::core::transaction::{outpoint_key, Transaction, TxOut, Utxo};

/// UTXO set errors
#[derive(Error, Debug)]
pub enum UtxoSetError {
    #[error("utxo already exists: {0}")]
    Duplicate(String),
    #[error("utxo not found: {0}")]
    Missing(String),
}

#[derive(Debug, Default)]
struct UtxoSetInner {
    /// Primary storage: outpoint key -> UTXO
    utxos: HashMap<String, Utxo>,
    /// Secondary index: address -> set of outpoint keys
    addr_index: HashMap<String, HashSet<String>>,
}

impl UtxoSetInner {
    fn put(&mut self, txid: &str, vout: u32, output: TxOut) -> Result<(), UtxoSetError> {
        let key = outpoint_key(txid, vout);
        if self.utxos.contains_key(&key) {
            return Err(UtxoSetError::Duplicate(key));
        }

        // Index every address on the output, not just the first.
        for addr in &output.script_pub_key.addresses {
            self.addr_index
                .entry(addr.clone())
                .or_default()
                .insert(key.clone());
        }

        self.utxos.insert(
            key,
            Utxo {
                txid: txid.to_string(),
                index: vout,
                output,
            },
        );
        Ok(())
    }

    fn delete(&mut self, txid: &str, vout: u32) -> Result<(), UtxoSetError> {
        let key = outpoint_key(txid, vout);
        let utxo = self
            .utxos
            .remove(&key)
            .ok_or_else(|| UtxoSetError::Missing(key.clone()))?;

        for addr in &utxo.output.script_pub_key.addresses {
            if let Some(keys) = self.addr_index.get_mut(addr) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.addr_index.remove(addr);
                }
            }
        }
        Ok(())
    }
}

/// The sole authority for confirmed state
#[derive(Debug, Default)]
pub struct UtxoSet {
    inner: RwLock<UtxoSetInner>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a single UTXO
    pub fn get(&self, txid: &str, vout: u32) -> Option<Utxo> {
        self.inner.read().utxos.get(&outpoint_key(txid, vout)).cloned()
    }

    /// Insert a new UTXO; fails if the outpoint is already present
    pub fn put(&self, txid: &str, vout: u32, output: TxOut) -> Result<(), UtxoSetError> {
        self.inner.write().put(txid, vout, output)
    }

    /// Remove a UTXO; fails if the outpoint is absent
    pub fn delete(&self, txid: &str, vout: u32) -> Result<(), UtxoSetError> {
        self.inner.write().delete(txid, vout)
    }

    /// All UTXOs paying `addr`, via the secondary index
    pub fn find_by_address(&self, addr: &str) -> Vec<Utxo> {
        let inner = self.inner.read();
        let Some(keys) = inner.addr_index.get(addr) else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|key| inner.utxos.get(key).cloned())
            .collect()
    }

    /// Number of unspent outputs
    pub fn len(&self) -> usize {
        self.inner.read().utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().utxos.is_empty()
    }

    /// Apply a whole block inside one writer critical section
    ///
    /// Transactions are processed in block order: each one's inputs are
    /// deleted, then its outputs inserted, so intra-block chains resolve.
    /// Coinbase-style inputs (empty txid) are skipped. Any failure leaves
    /// the caller with a torn set and is treated as fatal upstream; block
    /// verification must guarantee it cannot happen.
    pub fn apply_block(&self, transactions: &[Transaction]) -> Result<(), UtxoSetError> {
        let mut inner = self.inner.write();

        for tx in transactions {
            for vin in &tx.vin {
                if vin.txid.is_empty() {
                    continue;
                }
                inner.delete(&vin.txid, vin.vout)?;
            }
            for (index, out) in tx.vout.iter().enumerate() {
                inner.put(&tx.txid, index as u32, out.clone())?;
            }
        }

        Ok(())
    }

    /// Clone the primary map, for building a [`crate::storage::UtxoView`]
    pub(crate) fn snapshot(&self) -> HashMap<String, Utxo> {
        self.inner.read().utxos.clone()
    }
}
