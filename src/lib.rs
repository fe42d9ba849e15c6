//! nanochain: a pedagogical UTXO blockchain node core
//!
//! The crate ingests signed value-transfer requests, admits transactions to
//! a mempool with double-spend protection and chained-output visibility,
//! and periodically bundles them into size-bounded, hash-chained blocks
//! committed atomically against an in-memory UTXO set. It features:
//! - Ed25519 signatures over per-input sighashes
//! - The fixed P2PKH script template
//! - Canonical binary transaction serialization (legacy Bitcoin layout)
//! - Per-wallet overlays reconciling confirmed and unconfirmed balances
//! - A periodic miner that verifies blocks against a shadow UTXO view
//!
//! # Example
//!
//! ```rust
//! use nanochain::crypto::KeyPair;
//! use nanochain::node::{Node, TxCreateRequest};
//!
//! let node = Node::new();
//! let alice = KeyPair::generate();
//! let bob = KeyPair::generate();
//!
//! // Seed Alice with a genesis UTXO, then transfer 10 to Bob.
//! node.seed_genesis(500_000, &alice.address()).unwrap();
//! let txid = node
//!     .handle_tx_create(&TxCreateRequest {
//!         private_key_hex: alice.seed_hex(),
//!         from_addr: alice.address(),
//!         to_addr: bob.address(),
//!         amount: 10,
//!     })
//!     .unwrap();
//!
//! assert!(node.mempool().contains(&txid));
//! ```

pub mod core;
pub mod crypto;
pub mod mining;
pub mod node;
pub mod storage;
pub mod wallet;

// Re-export commonly used types
pub use crate::core::{Block, Blockchain, Transaction, TxIn, TxOut, Utxo, MAX_BLOCK_BYTES};
pub use crypto::KeyPair;
pub use mining::{Mempool, Miner, MinerConfig, MinerHandle};
pub use node::{Node, TxCreateRequest};
pub use storage::{MemoryMirror, UtxoMirror, UtxoSet, UtxoView};
pub use wallet::{AddressLocks, Wallet, WalletManager};
