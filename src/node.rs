//! The node engine
//!
//! Owns the stateful containers (UTXO set, mempool, chain, wallets, the
//! per-address lock registry) and implements the ingest boundary: a
//! [`TxCreateRequest`] is turned into a signed transaction, verified,
//! admitted to the mempool, and reflected in the wallet overlays. Rejection
//! reasons are logged; there is no reply protocol.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::blockchain::Blockchain;
use crate::core::transaction::{
    create_transaction, verify_for_mempool, Transaction, TransactionError, TxOut,
};
use crate::crypto::keys::{KeyError, KeyPair};
use crate::mining::mempool::{Mempool, MempoolError};
use crate::mining::miner::{Miner, MinerConfig, MinerHandle};
use crate::storage::mirror::UtxoMirror;
use crate::storage::utxo_set::{UtxoSet, UtxoSetError};
use crate::wallet::address_lock::AddressLocks;
use crate::wallet::wallet::WalletManager;

/// A value-transfer request delivered by the external message bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxCreateRequest {
    pub private_key_hex: String,
    pub from_addr: String,
    pub to_addr: String,
    pub amount: i64,
}

/// Node-level errors surfaced by the ingest path
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("transaction {0} failed verification")]
    Rejected(String),
    #[error("mempool error: {0}")]
    Mempool(#[from] MempoolError),
    #[error("utxo set error: {0}")]
    UtxoSet(#[from] UtxoSetError),
    #[error("codec error: {0}")]
    Codec(#[from] crate::core::codec::CodecError),
    #[error("script error: {0}")]
    Script(#[from] crate::core::script::ScriptError),
}

/// The transactional state engine
///
/// All process-wide state lives here and is passed by reference; there are
/// no module-level singletons.
pub struct Node {
    utxo_set: Arc<UtxoSet>,
    mempool: Arc<Mempool>,
    chain: Arc<Blockchain>,
    wallets: Arc<WalletManager>,
    addr_locks: AddressLocks,
    mirror: Option<Arc<dyn UtxoMirror>>,
}

impl Node {
    pub fn new() -> Self {
        Self {
            utxo_set: Arc::new(UtxoSet::new()),
            mempool: Arc::new(Mempool::new()),
            chain: Arc::new(Blockchain::new()),
            wallets: Arc::new(WalletManager::new()),
            addr_locks: AddressLocks::new(),
            mirror: None,
        }
    }

    /// Attach a durable mirror; commits will keep it in step
    pub fn with_mirror(mirror: Arc<dyn UtxoMirror>) -> Self {
        Self {
            mirror: Some(mirror),
            ..Self::new()
        }
    }

    pub fn utxo_set(&self) -> Arc<UtxoSet> {
        Arc::clone(&self.utxo_set)
    }

    pub fn mempool(&self) -> Arc<Mempool> {
        Arc::clone(&self.mempool)
    }

    pub fn chain(&self) -> Arc<Blockchain> {
        Arc::clone(&self.chain)
    }

    pub fn wallets(&self) -> Arc<WalletManager> {
        Arc::clone(&self.wallets)
    }

    /// Insert a genesis seed UTXO paying `value` to `address`
    ///
    /// Seed transactions have no inputs and bypass the mempool; they are
    /// the only source of initial funds.
    pub fn seed_genesis(&self, value: i64, address: &str) -> Result<Transaction, NodeError> {
        let tx = Transaction::seed(vec![TxOut::new(value, 0, address)?])?;
        for out in &tx.vout {
            self.utxo_set.put(&tx.txid, out.n, out.clone())?;
        }
        info!("seeded genesis utxo {} -> {} ({})", tx.txid, address, value);
        Ok(tx)
    }

    /// Ingest one transfer request end to end
    ///
    /// The sender's address lock is held across build, sign, verify, and
    /// admit, so construction within one address is totally ordered while
    /// different addresses proceed in parallel.
    pub fn handle_tx_create(&self, req: &TxCreateRequest) -> Result<String, NodeError> {
        let keys = KeyPair::from_seed_hex(&req.private_key_hex)?;

        let addr_lock = self.addr_locks.lock_for(&req.from_addr);
        let _guard = addr_lock.lock();

        let wallet = self.wallets.get_wallet(&req.from_addr, &self.utxo_set);

        let tx = match create_transaction(
            &keys,
            &req.from_addr,
            &req.to_addr,
            req.amount,
            &self.utxo_set,
            &self.mempool,
            &wallet,
        ) {
            Ok(tx) => tx,
            Err(err) => {
                warn!("failed to create tx from {}: {}", req.from_addr, err);
                return Err(err.into());
            }
        };

        if !verify_for_mempool(&tx, &self.utxo_set, &self.mempool) {
            return Err(NodeError::Rejected(tx.txid));
        }

        self.mempool.add_transaction(tx.clone())?;
        self.wallets.apply_unconfirmed_tx(&tx);

        Ok(tx.txid)
    }

    /// Ingest a raw JSON request from the bus
    pub fn handle_tx_create_json(&self, payload: &[u8]) -> Option<String> {
        let req: TxCreateRequest = match serde_json::from_slice(payload) {
            Ok(req) => req,
            Err(err) => {
                warn!("failed to parse tx.create request: {err}");
                return None;
            }
        };
        match self.handle_tx_create(&req) {
            Ok(txid) => Some(txid),
            Err(err) => {
                warn!("tx.create rejected: {err}");
                None
            }
        }
    }

    /// Start the mining loop with the canonical pacing
    pub fn start_miner(&self) -> MinerHandle {
        self.start_miner_with_config(MinerConfig::default())
    }

    pub fn start_miner_with_config(&self, config: MinerConfig) -> MinerHandle {
        Miner::with_config(
            Arc::clone(&self.chain),
            Arc::clone(&self.mempool),
            Arc::clone(&self.utxo_set),
            self.mirror.clone(),
            config,
        )
        .start()
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}
