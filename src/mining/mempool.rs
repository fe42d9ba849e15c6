//! The transaction pool
//!
//! Admitted-but-uncommitted transactions, tracked across several structures
//! kept consistent under a single writer lock: the transactions themselves,
//! a spent-input index (double-spend protection), an unconfirmed-output
//! index (chained-output visibility), an address overlay, the admission
//! order, and per-transaction byte sizes.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use thiserror::Error;

use crate::core::codec::CodecError;
use crate::core::transaction::{outpoint_key, Transaction, TxOut, Utxo};

/// Mempool errors
#[derive(Error, Debug)]
pub enum MempoolError {
    #[error("transaction {0} already in mempool")]
    DuplicateTransaction(String),
    #[error("input {0} already spent by {1}")]
    DoubleSpend(String, String),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Point-in-time prefix of the admission order
#[derive(Debug, Clone)]
pub struct MempoolSnapshot {
    pub txids: Vec<String>,
    /// Total serialized bytes of the snapshot
    pub size: usize,
}

#[derive(Debug, Default)]
struct MempoolInner {
    /// txid -> transaction
    txs: HashMap<String, Transaction>,
    /// spent outpoint -> spending txid
    spent: HashMap<String, String>,
    /// unconfirmed outpoint -> output
    outputs: HashMap<String, TxOut>,
    /// address -> unconfirmed outpoints paying it
    addr_index: HashMap<String, HashSet<String>>,
    /// txids in admission order; removed entries linger until compaction
    order: Vec<String>,
    /// txid -> serialized size
    tx_size: HashMap<String, usize>,
    total_size: usize,
    /// order entries whose transaction is gone
    dead: usize,
}

/// Pool of admitted, not yet committed transactions
#[derive(Debug, Default)]
pub struct Mempool {
    inner: RwLock<MempoolInner>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a transaction
    ///
    /// One critical section inserts into every structure, so snapshots never
    /// observe a partial admission. Duplicates are rejected, and the spent
    /// index is re-checked here: verification runs outside this lock, so two
    /// conflicting transactions can both pass it concurrently, but only one
    /// of them is admitted.
    pub fn add_transaction(&self, tx: Transaction) -> Result<(), MempoolError> {
        let size = tx.size()?;

        let mut inner = self.inner.write();

        if inner.txs.contains_key(&tx.txid) {
            return Err(MempoolError::DuplicateTransaction(tx.txid));
        }

        for vin in &tx.vin {
            if vin.txid.is_empty() {
                continue;
            }
            let key = outpoint_key(&vin.txid, vin.vout);
            if let Some(spender) = inner.spent.get(&key) {
                if *spender != tx.txid {
                    return Err(MempoolError::DoubleSpend(key, spender.clone()));
                }
            }
        }

        for vin in &tx.vin {
            if vin.txid.is_empty() {
                continue;
            }
            inner
                .spent
                .insert(outpoint_key(&vin.txid, vin.vout), tx.txid.clone());
        }

        for (index, out) in tx.vout.iter().enumerate() {
            let key = outpoint_key(&tx.txid, index as u32);
            for addr in &out.script_pub_key.addresses {
                inner
                    .addr_index
                    .entry(addr.clone())
                    .or_default()
                    .insert(key.clone());
            }
            inner.outputs.insert(key, out.clone());
        }

        inner.order.push(tx.txid.clone());
        inner.tx_size.insert(tx.txid.clone(), size);
        inner.total_size += size;
        inner.txs.insert(tx.txid.clone(), tx);

        Ok(())
    }

    /// Remove a transaction, e.g. after its block committed
    ///
    /// The admission order is compacted lazily: the entry is only marked
    /// dead here and skipped by snapshots, until dead entries outnumber the
    /// live ones.
    pub fn remove_transaction(&self, tx: &Transaction) {
        let mut inner = self.inner.write();

        if inner.txs.remove(&tx.txid).is_none() {
            return;
        }

        if let Some(size) = inner.tx_size.remove(&tx.txid) {
            inner.total_size -= size;
        }

        for vin in &tx.vin {
            if vin.txid.is_empty() {
                continue;
            }
            inner.spent.remove(&outpoint_key(&vin.txid, vin.vout));
        }

        for (index, out) in tx.vout.iter().enumerate() {
            let key = outpoint_key(&tx.txid, index as u32);
            inner.outputs.remove(&key);
            for addr in &out.script_pub_key.addresses {
                if let Some(keys) = inner.addr_index.get_mut(addr) {
                    keys.remove(&key);
                    if keys.is_empty() {
                        inner.addr_index.remove(addr);
                    }
                }
            }
        }

        inner.dead += 1;
        if inner.dead > inner.txs.len() {
            let txs = std::mem::take(&mut inner.txs);
            inner.order.retain(|txid| txs.contains_key(txid));
            inner.txs = txs;
            inner.dead = 0;
        }
    }

    /// Fetch a transaction by id
    pub fn get_transaction(&self, txid: &str) -> Option<Transaction> {
        self.inner.read().txs.get(txid).cloned()
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.inner.read().txs.contains_key(txid)
    }

    /// Whether an outpoint is spent by any pooled transaction
    pub fn is_spent(&self, txid: &str, vout: u32) -> bool {
        self.inner.read().spent.contains_key(&outpoint_key(txid, vout))
    }

    /// The txid spending an outpoint, if any
    pub fn spender(&self, txid: &str, vout: u32) -> Option<String> {
        self.inner.read().spent.get(&outpoint_key(txid, vout)).cloned()
    }

    /// Look up an unconfirmed output
    pub fn get_output(&self, txid: &str, vout: u32) -> Option<TxOut> {
        self.inner.read().outputs.get(&outpoint_key(txid, vout)).cloned()
    }

    /// All unconfirmed outputs paying `addr`
    pub fn find_outputs_by_address(&self, addr: &str) -> Vec<Utxo> {
        let inner = self.inner.read();
        let Some(keys) = inner.addr_index.get(addr) else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|key| {
                let out = inner.outputs.get(key)?;
                let (txid, vout) = key.rsplit_once(':')?;
                Some(Utxo {
                    txid: txid.to_string(),
                    index: vout.parse().ok()?,
                    output: out.clone(),
                })
            })
            .collect()
    }

    /// Number of pooled transactions
    pub fn len(&self) -> usize {
        self.inner.read().txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().txs.is_empty()
    }

    /// Total serialized bytes across the pool
    pub fn total_size(&self) -> usize {
        self.inner.read().total_size
    }

    /// Longest admission-order prefix within `max_bytes`
    ///
    /// Entries removed since admission are skipped. The returned txids exist
    /// at snapshot time, but a concurrent removal can race the caller's
    /// later `get_transaction`, which must tolerate misses.
    pub fn snapshot_until_size(&self, max_bytes: usize) -> MempoolSnapshot {
        let inner = self.inner.read();

        let mut txids = Vec::new();
        let mut size = 0usize;

        for txid in &inner.order {
            if !inner.txs.contains_key(txid) {
                continue;
            }
            let tx_size = inner.tx_size.get(txid).copied().unwrap_or(0);
            if size + tx_size > max_bytes {
                break;
            }
            txids.push(txid.clone());
            size += tx_size;
        }

        MempoolSnapshot { txids, size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::script::ScriptSig;
    use crate::core::transaction::{TxIn, TxOut};
    use crate::crypto::KeyPair;
    use std::sync::Arc;

    /// Unsigned but well-formed transaction spending one outpoint
    fn spend(prev_txid: &str, prev_vout: u32, value: i64, tag: u32) -> Transaction {
        let address = KeyPair::generate().address();
        let mut tx = Transaction {
            version: 1,
            vin: vec![TxIn {
                txid: prev_txid.to_string(),
                vout: prev_vout,
                script_sig: ScriptSig::empty(),
            }],
            vout: vec![TxOut::new(value, 0, &address).unwrap()],
            locktime: tag,
            txid: String::new(),
        };
        tx.txid = tx.compute_txid().unwrap();
        tx
    }

    #[test]
    fn test_add_and_indexes() {
        let mempool = Mempool::new();
        let tx = spend(&"aa".repeat(32), 0, 100, 0);

        mempool.add_transaction(tx.clone()).unwrap();

        assert_eq!(mempool.len(), 1);
        assert!(mempool.contains(&tx.txid));
        assert!(mempool.is_spent(&"aa".repeat(32), 0));
        assert_eq!(mempool.spender(&"aa".repeat(32), 0).unwrap(), tx.txid);
        assert_eq!(mempool.get_output(&tx.txid, 0).unwrap().value, 100);
        assert_eq!(mempool.total_size(), tx.size().unwrap());

        let addr = &tx.vout[0].script_pub_key.addresses[0];
        let overlay = mempool.find_outputs_by_address(addr);
        assert_eq!(overlay.len(), 1);
        assert_eq!(overlay[0].txid, tx.txid);
        assert_eq!(overlay[0].index, 0);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mempool = Mempool::new();
        let tx = spend(&"aa".repeat(32), 0, 100, 0);

        mempool.add_transaction(tx.clone()).unwrap();
        assert!(matches!(
            mempool.add_transaction(tx),
            Err(MempoolError::DuplicateTransaction(_))
        ));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_double_spend_rejected() {
        let mempool = Mempool::new();
        let first = spend(&"aa".repeat(32), 0, 100, 0);
        let second = spend(&"aa".repeat(32), 0, 100, 1);
        assert_ne!(first.txid, second.txid);

        mempool.add_transaction(first.clone()).unwrap();
        let err = mempool.add_transaction(second).unwrap_err();
        assert!(matches!(err, MempoolError::DoubleSpend(_, spender) if spender == first.txid));
    }

    #[test]
    fn test_concurrent_double_spend_single_winner() {
        let mempool = Arc::new(Mempool::new());
        let first = spend(&"aa".repeat(32), 0, 100, 0);
        let second = spend(&"aa".repeat(32), 0, 100, 1);

        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|tx| {
                let mempool = Arc::clone(&mempool);
                std::thread::spawn(move || mempool.add_transaction(tx).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 1);
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_remove_cleans_all_structures() {
        let mempool = Mempool::new();
        let tx = spend(&"aa".repeat(32), 0, 100, 0);
        let addr = tx.vout[0].script_pub_key.addresses[0].clone();

        mempool.add_transaction(tx.clone()).unwrap();
        mempool.remove_transaction(&tx);

        assert!(mempool.is_empty());
        assert!(!mempool.is_spent(&"aa".repeat(32), 0));
        assert!(mempool.get_output(&tx.txid, 0).is_none());
        assert!(mempool.find_outputs_by_address(&addr).is_empty());
        assert_eq!(mempool.total_size(), 0);

        // Double removal is a no-op.
        mempool.remove_transaction(&tx);
        assert_eq!(mempool.total_size(), 0);
    }

    #[test]
    fn test_snapshot_respects_budget_and_order() {
        let mempool = Mempool::new();
        let txs: Vec<Transaction> = (0..4)
            .map(|i| spend(&"aa".repeat(32), i, 100, i))
            .collect();
        for tx in &txs {
            mempool.add_transaction(tx.clone()).unwrap();
        }

        let tx_size = txs[0].size().unwrap();

        let all = mempool.snapshot_until_size(tx_size * 4);
        assert_eq!(all.txids, txs.iter().map(|t| t.txid.clone()).collect::<Vec<_>>());
        assert_eq!(all.size, tx_size * 4);

        // A budget below four transactions keeps only the oldest prefix.
        let partial = mempool.snapshot_until_size(tx_size * 2 + 1);
        assert_eq!(partial.txids.len(), 2);
        assert_eq!(partial.txids, &all.txids[..2]);
    }

    #[test]
    fn test_snapshot_skips_removed() {
        let mempool = Mempool::new();
        let txs: Vec<Transaction> = (0..3)
            .map(|i| spend(&"aa".repeat(32), i, 100, i))
            .collect();
        for tx in &txs {
            mempool.add_transaction(tx.clone()).unwrap();
        }

        mempool.remove_transaction(&txs[1]);

        let snap = mempool.snapshot_until_size(usize::MAX);
        assert_eq!(snap.txids, vec![txs[0].txid.clone(), txs[2].txid.clone()]);
    }

    #[test]
    fn test_empty_snapshot() {
        let mempool = Mempool::new();
        let snap = mempool.snapshot_until_size(usize::MAX);
        assert!(snap.txids.is_empty());
        assert_eq!(snap.size, 0);
    }
}
