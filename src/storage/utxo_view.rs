//! Shadow copy of the UTXO set for block verification
//!
//! A view is cloned from the canonical set under a read lock and then
//! mutated freely while verifying a block: spends delete, new outputs
//! insert, and cross-transaction dependencies within the block resolve
//! against outputs produced earlier in that same block. The canonical set
//! is never touched.

use std::collections::HashMap;

use crate::core::transaction::{outpoint_key, TxOut, Utxo};
use crate::storage::utxo_set::{UtxoSet, UtxoSetError};

/// A block-local shadow of the UTXO set
#[derive(Debug, Default)]
pub struct UtxoView {
    utxos: HashMap<String, Utxo>,
}

impl UtxoView {
    /// Clone the canonical set's primary map into a fresh view
    pub fn from_set(utxo_set: &UtxoSet) -> Self {
        Self {
            utxos: utxo_set.snapshot(),
        }
    }

    pub fn get(&self, txid: &str, vout: u32) -> Option<Utxo> {
        self.utxos.get(&outpoint_key(txid, vout)).cloned()
    }

    /// Record an output created inside the block being verified
    pub fn put(&mut self, txid: &str, vout: u32, output: TxOut) -> Result<(), UtxoSetError> {
        let key = outpoint_key(txid, vout);
        if self.utxos.contains_key(&key) {
            return Err(UtxoSetError::Duplicate(key));
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

    /// Spend an output inside the block being verified
    pub fn delete(&mut self, txid: &str, vout: u32) -> Result<(), UtxoSetError> {
        let key = outpoint_key(txid, vout);
        if self.utxos.remove(&key).is_none() {
            return Err(UtxoSetError::Missing(key));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::TxOut;
    use crate::crypto::KeyPair;

    #[test]
    fn test_view_mirrors_set() {
        let set = UtxoSet::new();
        let address = KeyPair::generate().address();
        set.put("tx1", 0, TxOut::new(100, 0, &address).unwrap())
            .unwrap();

        let view = UtxoView::from_set(&set);
        assert_eq!(view.len(), 1);
        assert_eq!(view.get("tx1", 0).unwrap().output.value, 100);
    }

    #[test]
    fn test_view_mutation_leaves_set_untouched() {
        let set = UtxoSet::new();
        let address = KeyPair::generate().address();
        set.put("tx1", 0, TxOut::new(100, 0, &address).unwrap())
            .unwrap();

        let mut view = UtxoView::from_set(&set);
        view.delete("tx1", 0).unwrap();
        view.put("tx2", 0, TxOut::new(50, 0, &address).unwrap())
            .unwrap();

        assert!(set.get("tx1", 0).is_some());
        assert!(set.get("tx2", 0).is_none());
        assert!(view.get("tx1", 0).is_none());
        assert!(view.get("tx2", 0).is_some());
    }

    #[test]
    fn test_view_duplicate_put_fails() {
        let address = KeyPair::generate().address();
        let mut view = UtxoView::default();

        view.put("tx1", 0, TxOut::new(100, 0, &address).unwrap())
            .unwrap();
        assert!(matches!(
            view.put("tx1", 0, TxOut::new(100, 0, &address).unwrap()),
            Err(UtxoSetError::Duplicate(_))
        ));
    }

    #[test]
    fn test_view_missing_delete_fails() {
        let mut view = UtxoView::default();
        assert!(matches!(
            view.delete("tx1", 0),
            Err(UtxoSetError::Missing(_))
        ));
    }
}
