//! Transactions and the transaction pipeline
//!
//! Implements the canonical binary serialization (legacy Bitcoin layout),
//! txid computation, per-input sighashes, Ed25519 signing, and the two
//! verification paths: mempool admission and block-time verification
//! against a [`UtxoView`].

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::codec::{reverse_bytes, txid_to_bytes, write_varint, CodecError, Reader};
use crate::core::script::{ScriptError, ScriptPubKey, ScriptSig};
use crate::crypto::hash::{double_sha256, hash160};
use crate::crypto::keys::{verify_signature, KeyError, KeyPair};
use crate::mining::mempool::Mempool;
use crate::storage::utxo_set::{UtxoSet, UtxoSetError};
use crate::storage::utxo_view::UtxoView;
use crate::wallet::wallet::Wallet;

/// Transaction-related errors
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("no spendable outputs")]
    NoSpendableOutputs,
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: i64, need: i64 },
    #[error("empty vin or vout")]
    EmptyTransaction,
    #[error("duplicate input {0}")]
    DuplicateInput(String),
    #[error("coinbase input not allowed")]
    CoinbaseInput,
    #[error("input {0} already spent by {1}")]
    DoubleSpent(String, String),
    #[error("missing utxo {0}")]
    MissingUtxo(String),
    #[error("pubkey hash mismatch on input {0}")]
    PubKeyHashMismatch(usize),
    #[error("invalid signature on input {0}")]
    InvalidSignature(usize),
    #[error("non-positive value on output {0}")]
    NonPositiveValue(usize),
    #[error("inputs {input} below outputs {output}")]
    InputsBelowOutputs { input: i64, output: i64 },
    #[error("value out of range")]
    ValueOverflow,
    #[error("script error: {0}")]
    Script(#[from] ScriptError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
}

/// Transaction input referencing a previous output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxIn {
    /// Txid of the transaction holding the spent output
    pub txid: String,
    /// Index of the spent output in that transaction
    pub vout: u32,
    #[serde(rename = "scriptSig")]
    pub script_sig: ScriptSig,
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOut {
    /// Amount carried by this output; must be positive
    pub value: i64,
    /// Index of this output within its transaction
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

impl TxOut {
    /// Build a P2PKH output paying `value` to `address`
    pub fn new(value: i64, n: u32, address: &str) -> Result<Self, ScriptError> {
        Ok(Self {
            value,
            n,
            script_pub_key: ScriptPubKey::p2pkh(address)?,
        })
    }
}

/// An unspent transaction output, keyed by `(txid, index)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub index: u32,
    pub output: TxOut,
}

/// Canonical map key for an outpoint
pub fn outpoint_key(txid: &str, vout: u32) -> String {
    format!("{txid}:{vout}")
}

/// A value-transfer transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub locktime: u32,
    /// Reversed hex of the double SHA-256 of the canonical serialization,
    /// computed after signing
    pub txid: String,
}

impl Transaction {
    /// Build a seed transaction: no inputs, arbitrary outputs
    ///
    /// Seed transactions are inserted into the UTXO set directly at genesis
    /// time and are never admitted through the mempool.
    pub fn seed(outputs: Vec<TxOut>) -> Result<Self, CodecError> {
        let mut tx = Self {
            version: 1,
            vin: Vec::new(),
            vout: outputs,
            locktime: 0,
            txid: String::new(),
        };
        tx.txid = tx.compute_txid()?;
        Ok(tx)
    }

    /// Canonical binary serialization (little-endian, legacy layout):
    /// `version(4) || varint(|vin|) || vins || varint(|vout|) || vouts ||
    /// locktime(4)`
    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&self.version.to_le_bytes());

        write_varint(&mut buf, self.vin.len() as u64);
        for vin in &self.vin {
            // prev txid stored in internal (reversed) byte order
            let prev = txid_to_bytes(&vin.txid)?;
            buf.extend_from_slice(&reverse_bytes(&prev));

            buf.extend_from_slice(&vin.vout.to_le_bytes());

            let script = hex::decode(&vin.script_sig.hex)?;
            write_varint(&mut buf, script.len() as u64);
            buf.extend_from_slice(&script);

            // sequence, constant
            buf.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        }

        write_varint(&mut buf, self.vout.len() as u64);
        for vout in &self.vout {
            buf.extend_from_slice(&(vout.value as u64).to_le_bytes());

            let script = hex::decode(&vout.script_pub_key.hex)?;
            write_varint(&mut buf, script.len() as u64);
            buf.extend_from_slice(&script);
        }

        buf.extend_from_slice(&self.locktime.to_le_bytes());

        Ok(buf)
    }

    /// Decode a transaction from its canonical serialization
    ///
    /// Output indices are implicit in the wire layout and reassigned by
    /// position; script asm forms and address lists are rederived.
    pub fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(data);

        let version = reader.read_u32_le()?;

        let vin_count = reader.read_varint()?;
        let mut vin = Vec::with_capacity(vin_count as usize);
        for _ in 0..vin_count {
            let prev = reverse_bytes(reader.read_bytes(32)?);
            let txid = hex::encode(prev);
            let vout = reader.read_u32_le()?;
            let script_len = reader.read_varint()? as usize;
            let script_sig = ScriptSig::from_bytes(reader.read_bytes(script_len)?);
            let _sequence = reader.read_u32_le()?;
            vin.push(TxIn {
                txid,
                vout,
                script_sig,
            });
        }

        let vout_count = reader.read_varint()?;
        let mut vout = Vec::with_capacity(vout_count as usize);
        for n in 0..vout_count {
            let value = reader.read_u64_le()? as i64;
            let script_len = reader.read_varint()? as usize;
            let script_pub_key = ScriptPubKey::from_bytes(reader.read_bytes(script_len)?);
            vout.push(TxOut {
                value,
                n: n as u32,
                script_pub_key,
            });
        }

        let locktime = reader.read_u32_le()?;

        if !reader.is_empty() {
            return Err(CodecError::TrailingBytes);
        }

        let mut tx = Self {
            version,
            vin,
            vout,
            locktime,
            txid: String::new(),
        };
        tx.txid = tx.compute_txid()?;
        Ok(tx)
    }

    /// Reversed hex of the double SHA-256 of the canonical serialization
    pub fn compute_txid(&self) -> Result<String, CodecError> {
        let raw = self.serialize()?;
        Ok(hex::encode(reverse_bytes(&double_sha256(&raw))))
    }

    /// Serialized size in bytes
    pub fn size(&self) -> Result<usize, CodecError> {
        Ok(self.serialize()?.len())
    }

    /// Whether this transaction has any coinbase-style input
    pub fn has_coinbase_input(&self) -> bool {
        self.vin.iter().any(|vin| vin.txid.is_empty())
    }

    /// Copy of this transaction with every script sig cleared
    fn clone_with_empty_sigs(&self) -> Self {
        let vin = self
            .vin
            .iter()
            .map(|vin| TxIn {
                txid: vin.txid.clone(),
                vout: vin.vout,
                script_sig: ScriptSig::empty(),
            })
            .collect();

        Self {
            version: self.version,
            vin,
            vout: self.vout.clone(),
            locktime: self.locktime,
            txid: String::new(),
        }
    }

    /// Sighash for input `input_index`
    ///
    /// The digest covers a copy of the transaction where every script sig is
    /// empty except the signed input, which carries the locking script of
    /// the output it spends. Each input therefore signs a distinct digest.
    pub fn sighash(
        &self,
        input_index: usize,
        prev_script_hex: &str,
    ) -> Result<Vec<u8>, CodecError> {
        let mut tx_copy = self.clone_with_empty_sigs();
        tx_copy.vin[input_index].script_sig.hex = prev_script_hex.to_string();

        let raw = tx_copy.serialize()?;
        Ok(double_sha256(&raw))
    }

    /// Sign every input with `keys` and recompute the txid
    ///
    /// Each input's previous output is resolved from the canonical UTXO set
    /// first, falling back to unconfirmed mempool outputs so chained spends
    /// of change outputs work before a commit.
    pub fn sign(
        &mut self,
        keys: &KeyPair,
        utxo_set: &UtxoSet,
        mempool: &Mempool,
    ) -> Result<(), TransactionError> {
        if self.vin.is_empty() {
            return Err(TransactionError::EmptyTransaction);
        }

        let public_key = keys.public_key_bytes();

        for input_index in 0..self.vin.len() {
            let (prev_txid, prev_vout) = {
                let vin = &self.vin[input_index];
                (vin.txid.clone(), vin.vout)
            };

            let prev_out = resolve_prev_out(&prev_txid, prev_vout, utxo_set, mempool)
                .ok_or_else(|| {
                    TransactionError::MissingUtxo(outpoint_key(&prev_txid, prev_vout))
                })?;

            let sighash = self.sighash(input_index, &prev_out.script_pub_key.hex)?;
            let signature = keys.sign(&sighash);

            self.vin[input_index].script_sig = ScriptSig::from_parts(&signature, &public_key);
        }

        self.txid = self.compute_txid()?;
        Ok(())
    }
}

/// Resolve an outpoint against the canonical set, then unconfirmed outputs
fn resolve_prev_out(
    txid: &str,
    vout: u32,
    utxo_set: &UtxoSet,
    mempool: &Mempool,
) -> Option<TxOut> {
    utxo_set
        .get(txid, vout)
        .map(|utxo| utxo.output)
        .or_else(|| mempool.get_output(txid, vout))
}

/// Check one input's script and signature against the output it spends
fn verify_input(
    tx: &Transaction,
    input_index: usize,
    prev_out: &TxOut,
) -> Result<(), TransactionError> {
    let (signature, public_key) = tx.vin[input_index].script_sig.decode()?;

    let expected_hash = prev_out.script_pub_key.pubkey_hash()?;
    if hash160(&public_key) != expected_hash.as_slice() {
        return Err(TransactionError::PubKeyHashMismatch(input_index));
    }

    let sighash = tx.sighash(input_index, &prev_out.script_pub_key.hex)?;
    if !verify_signature(&public_key, &sighash, &signature)? {
        return Err(TransactionError::InvalidSignature(input_index));
    }

    Ok(())
}

/// Reject duplicate `(txid, vout)` pairs within a single transaction
fn check_duplicate_inputs(tx: &Transaction) -> Result<(), TransactionError> {
    let mut seen = std::collections::HashSet::with_capacity(tx.vin.len());
    for vin in &tx.vin {
        let key = outpoint_key(&vin.txid, vin.vout);
        if !seen.insert(key.clone()) {
            return Err(TransactionError::DuplicateInput(key));
        }
    }
    Ok(())
}

/// Require every output positive and inputs covering outputs
///
/// Any difference between input and output sums is implicitly burned.
fn check_values(tx: &Transaction, input_sum: i64) -> Result<(), TransactionError> {
    let mut output_sum: i64 = 0;
    for (index, out) in tx.vout.iter().enumerate() {
        if out.value <= 0 {
            return Err(TransactionError::NonPositiveValue(index));
        }
        output_sum = output_sum
            .checked_add(out.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    if input_sum < output_sum {
        return Err(TransactionError::InputsBelowOutputs {
            input: input_sum,
            output: output_sum,
        });
    }

    Ok(())
}

fn check_for_mempool(
    tx: &Transaction,
    utxo_set: &UtxoSet,
    mempool: &Mempool,
) -> Result<(), TransactionError> {
    if tx.vin.is_empty() || tx.vout.is_empty() {
        return Err(TransactionError::EmptyTransaction);
    }

    check_duplicate_inputs(tx)?;

    let mut input_sum: i64 = 0;

    for (input_index, vin) in tx.vin.iter().enumerate() {
        // Coinbase-style inputs never pass through the mempool
        if vin.txid.is_empty() {
            return Err(TransactionError::CoinbaseInput);
        }

        let key = outpoint_key(&vin.txid, vin.vout);

        // A transaction stays verifiable after its own admission, so only
        // spends claimed by a different txid count as conflicts.
        if let Some(spender) = mempool.spender(&vin.txid, vin.vout) {
            if spender != tx.txid {
                return Err(TransactionError::DoubleSpent(key, spender));
            }
        }

        let prev_out = resolve_prev_out(&vin.txid, vin.vout, utxo_set, mempool)
            .ok_or(TransactionError::MissingUtxo(key))?;

        verify_input(tx, input_index, &prev_out)?;

        input_sum = input_sum
            .checked_add(prev_out.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    check_values(tx, input_sum)
}

/// Verify a transaction for mempool admission
///
/// Returns a bare boolean by policy; the rejection reason is logged, not
/// propagated.
pub fn verify_for_mempool(tx: &Transaction, utxo_set: &UtxoSet, mempool: &Mempool) -> bool {
    match check_for_mempool(tx, utxo_set, mempool) {
        Ok(()) => true,
        Err(err) => {
            warn!("rejecting tx {}: {}", tx.txid, err);
            false
        }
    }
}

/// Verify a transaction against a block-local UTXO view
///
/// Used during block verification: previous outputs resolve only through
/// the view, so intra-block chains see outputs created earlier in the same
/// block. Scripts and signatures are fully checked here as well, since a
/// block may carry transactions that never passed mempool admission.
pub fn verify_with_view(tx: &Transaction, view: &UtxoView) -> Result<(), TransactionError> {
    if tx.vin.is_empty() || tx.vout.is_empty() {
        return Err(TransactionError::EmptyTransaction);
    }

    check_duplicate_inputs(tx)?;

    let mut input_sum: i64 = 0;

    for (input_index, vin) in tx.vin.iter().enumerate() {
        if vin.txid.is_empty() {
            return Err(TransactionError::CoinbaseInput);
        }

        let key = outpoint_key(&vin.txid, vin.vout);
        let prev_out = view
            .get(&vin.txid, vin.vout)
            .map(|utxo| utxo.output)
            .ok_or(TransactionError::MissingUtxo(key))?;

        verify_input(tx, input_index, &prev_out)?;

        input_sum = input_sum
            .checked_add(prev_out.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    check_values(tx, input_sum)
}

/// Apply a verified transaction to a UTXO view: spend its inputs, publish
/// its outputs
pub fn apply_to_view(tx: &Transaction, view: &mut UtxoView) -> Result<(), UtxoSetError> {
    for vin in &tx.vin {
        view.delete(&vin.txid, vin.vout)?;
    }
    for (index, out) in tx.vout.iter().enumerate() {
        view.put(&tx.txid, index as u32, out.clone())?;
    }
    Ok(())
}

/// Build and sign a value transfer of `amount` from `from_addr` to `to_addr`
///
/// Selects spendable outputs greedily in wallet iteration order; any excess
/// over `amount` returns to `from_addr` as a change output at index 1.
/// Callers serialize per sender address (see
/// [`crate::wallet::AddressLocks`]) so concurrent builders never select the
/// same outputs.
pub fn create_transaction(
    keys: &KeyPair,
    from_addr: &str,
    to_addr: &str,
    amount: i64,
    utxo_set: &UtxoSet,
    mempool: &Mempool,
    wallet: &Wallet,
) -> Result<Transaction, TransactionError> {
    let candidates = wallet.get_spendable_utxos(mempool);
    if candidates.is_empty() {
        return Err(TransactionError::NoSpendableOutputs);
    }

    let mut selected = Vec::new();
    let mut total: i64 = 0;

    for candidate in candidates {
        total = total
            .checked_add(candidate.output.value)
            .ok_or(TransactionError::ValueOverflow)?;
        selected.push(candidate);
        if total >= amount {
            break;
        }
    }

    if total < amount {
        return Err(TransactionError::InsufficientFunds {
            have: total,
            need: amount,
        });
    }

    let vin = selected
        .iter()
        .map(|utxo| TxIn {
            txid: utxo.txid.clone(),
            vout: utxo.index,
            script_sig: ScriptSig::empty(),
        })
        .collect();

    let mut vout = vec![TxOut::new(amount, 0, to_addr)?];
    if total > amount {
        vout.push(TxOut::new(total - amount, 1, from_addr)?);
    }

    let mut tx = Transaction {
        version: 1,
        vin,
        vout,
        locktime: 0,
        txid: String::new(),
    };

    tx.sign(keys, utxo_set, mempool)?;

    Ok(tx)
}
