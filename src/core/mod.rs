//! Core transactional components
//!
//! This module contains the fundamental building blocks:
//! - Canonical binary encoding (varints, txids)
//! - The P2PKH script template
//! - Transactions and the build/sign/verify pipeline
//! - Blocks and the hash-linked chain

pub mod block;
pub mod blockchain;
pub mod codec;
pub mod script;
pub mod transaction;

pub use block::{Block, BLOCK_HEADER_BYTES, MAX_BLOCK_BYTES};
pub use blockchain::{commit_block, verify_block, Blockchain, BlockchainError};
pub use codec::CodecError;
pub use script::{ScriptError, ScriptPubKey, ScriptSig};
pub use transaction::{
    create_transaction, outpoint_key, verify_for_mempool, verify_with_view, Transaction,
    TransactionError, TxIn, TxOut, Utxo,
};
