//! Per-address spendable views
//!
//! A [`Wallet`] tracks the UTXOs paying one address, combining confirmed
//! outputs loaded from the UTXO set with the effects of unconfirmed
//! transactions. The [`WalletManager`] owns all wallets, creates them
//! lazily, and broadcasts unconfirmed effects to every wallet they touch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::script::ScriptPubKey;
use crate::core::transaction::{outpoint_key, Transaction, TxOut, Utxo};
use crate::mining::mempool::Mempool;
use crate::storage::utxo_set::UtxoSet;

/// Whether an output's locking script pays the given address
pub fn is_output_for_address(out: &TxOut, addr: &str) -> bool {
    match ScriptPubKey::p2pkh(addr) {
        Ok(expected) => out.script_pub_key.hex == expected.hex,
        Err(_) => false,
    }
}

/// Spendable view for a single address
#[derive(Debug)]
pub struct Wallet {
    pub address: String,
    /// Confirmed and unconfirmed UTXOs, keyed by outpoint
    utxos: Mutex<HashMap<String, Utxo>>,
}

impl Wallet {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            utxos: Mutex::new(HashMap::new()),
        }
    }

    /// The wallet's UTXOs minus anything the mempool already spends
    ///
    /// The wallet lock is released before consulting the mempool; lock
    /// order runs mempool before wallet.
    pub fn get_spendable_utxos(&self, mempool: &Mempool) -> Vec<Utxo> {
        let utxos: Vec<Utxo> = self.utxos.lock().values().cloned().collect();
        utxos
            .into_iter()
            .filter(|utxo| !mempool.is_spent(&utxo.txid, utxo.index))
            .collect()
    }

    /// Total value currently spendable from this wallet
    pub fn spendable_balance(&self, mempool: &Mempool) -> i64 {
        self.get_spendable_utxos(mempool)
            .iter()
            .map(|utxo| utxo.output.value)
            .sum()
    }

    /// Seed the wallet with the confirmed UTXOs paying its address
    pub fn load_from_utxo_set(&self, utxo_set: &UtxoSet) {
        let confirmed = utxo_set.find_by_address(&self.address);
        let mut utxos = self.utxos.lock();
        for utxo in confirmed {
            utxos.insert(outpoint_key(&utxo.txid, utxo.index), utxo);
        }
    }

    /// Fold an unconfirmed transaction into the view: its inputs disappear,
    /// its outputs paying this address (typically change) appear
    pub fn apply_unconfirmed_tx(&self, tx: &Transaction) {
        let mut utxos = self.utxos.lock();

        for vin in &tx.vin {
            utxos.remove(&outpoint_key(&vin.txid, vin.vout));
        }

        for (index, out) in tx.vout.iter().enumerate() {
            if is_output_for_address(out, &self.address) {
                utxos.insert(
                    outpoint_key(&tx.txid, index as u32),
                    Utxo {
                        txid: tx.txid.clone(),
                        index: index as u32,
                        output: out.clone(),
                    },
                );
            }
        }
    }
}

/// Process-wide registry of wallets, one per address
#[derive(Debug, Default)]
pub struct WalletManager {
    wallets: Mutex<HashMap<String, Arc<Wallet>>>,
}

impl WalletManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the wallet for `addr`, creating and seeding it on first use
    pub fn get_wallet(&self, addr: &str, utxo_set: &UtxoSet) -> Arc<Wallet> {
        let mut wallets = self.wallets.lock();

        if let Some(wallet) = wallets.get(addr) {
            return Arc::clone(wallet);
        }

        let wallet = Arc::new(Wallet::new(addr));
        wallet.load_from_utxo_set(utxo_set);
        wallets.insert(addr.to_string(), Arc::clone(&wallet));
        wallet
    }

    /// Broadcast an unconfirmed transaction to every affected wallet:
    /// spent inputs leave whichever wallet holds them, outputs land in the
    /// receiving wallet
    pub fn apply_unconfirmed_tx(&self, tx: &Transaction) {
        let wallets = self.wallets.lock();
        for wallet in wallets.values() {
            wallet.apply_unconfirmed_tx(tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{create_transaction, Transaction, TxOut};
    use crate::crypto::KeyPair;

    fn seed(utxo_set: &UtxoSet, address: &str, value: i64) -> Transaction {
        let tx = Transaction::seed(vec![TxOut::new(value, 0, address).unwrap()]).unwrap();
        for out in &tx.vout {
            utxo_set.put(&tx.txid, out.n, out.clone()).unwrap();
        }
        tx
    }

    #[test]
    fn test_load_from_utxo_set() {
        let keys = KeyPair::generate();
        let utxo_set = UtxoSet::new();
        let mempool = Mempool::new();
        seed(&utxo_set, &keys.address(), 500_000);

        let wallet = Wallet::new(&keys.address());
        wallet.load_from_utxo_set(&utxo_set);

        assert_eq!(wallet.spendable_balance(&mempool), 500_000);
    }

    #[test]
    fn test_spendable_excludes_mempool_spent() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let utxo_set = UtxoSet::new();
        let mempool = Mempool::new();
        seed(&utxo_set, &alice.address(), 500_000);

        let wallet = Wallet::new(&alice.address());
        wallet.load_from_utxo_set(&utxo_set);

        let tx = create_transaction(
            &alice,
            &alice.address(),
            &bob.address(),
            10,
            &utxo_set,
            &mempool,
            &wallet,
        )
        .unwrap();
        mempool.add_transaction(tx).unwrap();

        // The seed output is spent in the pool and no change was applied
        // yet, so nothing is spendable.
        assert!(wallet.get_spendable_utxos(&mempool).is_empty());
    }

    #[test]
    fn test_apply_unconfirmed_surfaces_change() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let utxo_set = UtxoSet::new();
        let mempool = Mempool::new();
        seed(&utxo_set, &alice.address(), 500_000);

        let wallet = Wallet::new(&alice.address());
        wallet.load_from_utxo_set(&utxo_set);

        let tx = create_transaction(
            &alice,
            &alice.address(),
            &bob.address(),
            10,
            &utxo_set,
            &mempool,
            &wallet,
        )
        .unwrap();
        mempool.add_transaction(tx.clone()).unwrap();
        wallet.apply_unconfirmed_tx(&tx);

        let spendable = wallet.get_spendable_utxos(&mempool);
        assert_eq!(spendable.len(), 1);
        assert_eq!(spendable[0].txid, tx.txid);
        assert_eq!(spendable[0].index, 1);
        assert_eq!(wallet.spendable_balance(&mempool), 499_990);
    }

    #[test]
    fn test_manager_broadcasts_to_receiver() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let utxo_set = UtxoSet::new();
        let mempool = Mempool::new();
        let manager = WalletManager::new();
        seed(&utxo_set, &alice.address(), 500_000);

        let alice_wallet = manager.get_wallet(&alice.address(), &utxo_set);
        let bob_wallet = manager.get_wallet(&bob.address(), &utxo_set);

        let tx = create_transaction(
            &alice,
            &alice.address(),
            &bob.address(),
            10,
            &utxo_set,
            &mempool,
            &alice_wallet,
        )
        .unwrap();
        mempool.add_transaction(tx.clone()).unwrap();
        manager.apply_unconfirmed_tx(&tx);

        assert_eq!(alice_wallet.spendable_balance(&mempool), 499_990);
        assert_eq!(bob_wallet.spendable_balance(&mempool), 10);
    }

    #[test]
    fn test_manager_returns_same_wallet() {
        let utxo_set = UtxoSet::new();
        let manager = WalletManager::new();
        let address = KeyPair::generate().address();

        let first = manager.get_wallet(&address, &utxo_set);
        let second = manager.get_wallet(&address, &utxo_set);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_balance_reconciliation() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let utxo_set = UtxoSet::new();
        let mempool = Mempool::new();
        let manager = WalletManager::new();
        seed(&utxo_set, &alice.address(), 500_000);

        let wallet = manager.get_wallet(&alice.address(), &utxo_set);
        let tx = create_transaction(
            &alice,
            &alice.address(),
            &bob.address(),
            10,
            &utxo_set,
            &mempool,
            &wallet,
        )
        .unwrap();
        mempool.add_transaction(tx.clone()).unwrap();
        manager.apply_unconfirmed_tx(&tx);

        // confirmed + unspent unconfirmed outputs - mempool-spent inputs
        let confirmed: i64 = utxo_set
            .find_by_address(&alice.address())
            .iter()
            .map(|u| u.output.value)
            .sum();
        let unconfirmed: i64 = mempool
            .find_outputs_by_address(&alice.address())
            .iter()
            .filter(|u| !mempool.is_spent(&u.txid, u.index))
            .map(|u| u.output.value)
            .sum();
        let spent_inputs: i64 = tx
            .vin
            .iter()
            .filter_map(|vin| utxo_set.get(&vin.txid, vin.vout))
            .filter(|u| is_output_for_address(&u.output, &alice.address()))
            .map(|u| u.output.value)
            .sum();

        assert_eq!(
            confirmed + unconfirmed - spent_inputs,
            wallet.spendable_balance(&mempool)
        );
    }
}
