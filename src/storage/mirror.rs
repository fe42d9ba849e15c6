//! Durable mirror boundary for the UTXO set
//!
//! The persistent key-value store is an external collaborator; this module
//! owns only the contract: the key scheme, the fixed binary record, and the
//! [`UtxoMirror`] trait invoked from block commit. An in-memory
//! implementation backs the tests.
//!
//! Record layout (little-endian):
//! `txid(32) || index(u32) || value(i64) || n(u32) || script_len(u16) ||
//! script || addr_count(u8) || { addr_len(u8) || addr_utf8 }*`

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use crate::core::codec::{txid_to_bytes, CodecError, Reader};
use crate::core::script::ScriptPubKey;
use crate::core::transaction::{TxOut, Utxo};

/// Mirror errors
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("script too long for record: {0} bytes")]
    ScriptTooLong(usize),
    #[error("too many addresses for record: {0}")]
    TooManyAddresses(usize),
    #[error("address too long for record: {0} bytes")]
    AddressTooLong(usize),
    #[error("record is not valid utf-8")]
    InvalidUtf8,
}

/// Primary key for a persisted UTXO
pub fn utxo_key(txid: &str, index: u32) -> String {
    format!("utxo:{txid}:{index}")
}

/// Secondary (address index) key; the stored value is empty
pub fn addr_key(addr: &str, txid: &str, index: u32) -> String {
    format!("addr:{addr}:{txid}:{index}")
}

/// Encode a UTXO into its fixed binary record
pub fn encode_record(utxo: &Utxo) -> Result<Vec<u8>, MirrorError> {
    let script = hex::decode(&utxo.output.script_pub_key.hex).map_err(CodecError::from)?;
    if script.len() > u16::MAX as usize {
        return Err(MirrorError::ScriptTooLong(script.len()));
    }

    let addresses = &utxo.output.script_pub_key.addresses;
    if addresses.len() > u8::MAX as usize {
        return Err(MirrorError::TooManyAddresses(addresses.len()));
    }

    let mut buf = Vec::with_capacity(64 + script.len());
    buf.extend_from_slice(&txid_to_bytes(&utxo.txid)?);
    buf.extend_from_slice(&utxo.index.to_le_bytes());
    buf.extend_from_slice(&utxo.output.value.to_le_bytes());
    buf.extend_from_slice(&utxo.output.n.to_le_bytes());
    buf.extend_from_slice(&(script.len() as u16).to_le_bytes());
    buf.extend_from_slice(&script);
    buf.push(addresses.len() as u8);
    for addr in addresses {
        if addr.len() > u8::MAX as usize {
            return Err(MirrorError::AddressTooLong(addr.len()));
        }
        buf.push(addr.len() as u8);
        buf.extend_from_slice(addr.as_bytes());
    }

    Ok(buf)
}

/// Decode a fixed binary record back into a UTXO
///
/// The txid comes back as full 64-hex (records always store 32 bytes); the
/// script's asm form is rederived from its bytes and the address list taken
/// from the record.
pub fn decode_record(data: &[u8]) -> Result<Utxo, MirrorError> {
    let mut reader = Reader::new(data);

    let txid = hex::encode(reader.read_bytes(32)?);
    let index = reader.read_u32_le()?;
    let value = reader.read_u64_le()? as i64;
    let n = reader.read_u32_le()?;

    let script_len = reader.read_u16_le()? as usize;
    let script = reader.read_bytes(script_len)?;
    let mut script_pub_key = ScriptPubKey::from_bytes(script);

    let addr_count = reader.read_u8()?;
    let mut addresses = Vec::with_capacity(addr_count as usize);
    for _ in 0..addr_count {
        let len = reader.read_u8()? as usize;
        let raw = reader.read_bytes(len)?;
        let addr = std::str::from_utf8(raw).map_err(|_| MirrorError::InvalidUtf8)?;
        addresses.push(addr.to_string());
    }
    script_pub_key.addresses = addresses;

    if !reader.is_empty() {
        return Err(MirrorError::Codec(CodecError::TrailingBytes));
    }

    Ok(Utxo {
        txid,
        index,
        output: TxOut {
            value,
            n,
            script_pub_key,
        },
    })
}

/// Narrow contract the commit path uses to keep a durable store in step
///
/// One call covers a whole block: every spent outpoint deleted, every
/// created output written, in that order. Errors are treated as fatal by
/// the caller, like UTXO set integrity failures.
pub trait UtxoMirror: Send + Sync {
    fn apply(&self, spent: &[(String, u32)], created: &[Utxo]) -> Result<(), MirrorError>;
}

/// In-memory mirror used by tests and as a reference implementation
#[derive(Debug, Default)]
pub struct MemoryMirror {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the raw record stored under `utxo:<txid>:<index>`
    pub fn get(&self, txid: &str, index: u32) -> Option<Vec<u8>> {
        self.entries.lock().get(&utxo_key(txid, index)).cloned()
    }

    pub fn contains_addr_key(&self, addr: &str, txid: &str, index: u32) -> bool {
        self.entries.lock().contains_key(&addr_key(addr, txid, index))
    }

    /// Number of stored keys (primary and secondary)
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl UtxoMirror for MemoryMirror {
    fn apply(&self, spent: &[(String, u32)], created: &[Utxo]) -> Result<(), MirrorError> {
        // Encode before mutating so a bad record leaves the mirror intact.
        let mut records = Vec::with_capacity(created.len());
        for utxo in created {
            records.push((utxo, encode_record(utxo)?));
        }

        let mut entries = self.entries.lock();

        for (txid, index) in spent {
            if let Some(raw) = entries.remove(&utxo_key(txid, *index)) {
                if let Ok(old) = decode_record(&raw) {
                    for addr in &old.output.script_pub_key.addresses {
                        entries.remove(&addr_key(addr, txid, *index));
                    }
                }
            }
        }

        for (utxo, record) in records {
            entries.insert(utxo_key(&utxo.txid, utxo.index), record);
            for addr in &utxo.output.script_pub_key.addresses {
                entries.insert(addr_key(addr, &utxo.txid, utxo.index), Vec::new());
            }
        }

        Ok(())
    }
}
