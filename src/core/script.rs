//! The fixed P2PKH script template
//!
//! Locking scripts are always the 25-byte sequence
//! `OP_DUP OP_HASH160 <20-byte pubkey hash> OP_EQUALVERIFY OP_CHECKSIG`;
//! unlocking scripts are always `signature(64) || pubkey(32)`. Both carry a
//! hex form (the authoritative encoding) and a derived asm rendering.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::keys::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};

/// Length of the P2PKH locking script in bytes
pub const P2PKH_SCRIPT_LENGTH: usize = 25;

/// Length of the unlocking script in bytes: sig(64) || pub(32)
pub const SCRIPT_SIG_LENGTH: usize = SIGNATURE_LENGTH + PUBLIC_KEY_LENGTH;

/// Script errors
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("invalid address: expected 20 bytes of hex, got {0:?}")]
    InvalidAddress(String),
    #[error("invalid script sig: expected {SCRIPT_SIG_LENGTH} bytes")]
    InvalidScriptSig,
    #[error("invalid locking script: not a P2PKH template")]
    NotP2pkh,
}

/// Unlocking script placed on a transaction input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSig {
    pub asm: String,
    pub hex: String,
}

impl ScriptSig {
    /// An empty script sig, used on unsigned inputs and in sighash copies
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a script sig from a signature and the signer's public key
    pub fn from_parts(signature: &[u8], public_key: &[u8]) -> Self {
        let mut script = Vec::with_capacity(SCRIPT_SIG_LENGTH);
        script.extend_from_slice(signature);
        script.extend_from_slice(public_key);
        Self {
            asm: format!("{} {}", hex::encode(signature), hex::encode(public_key)),
            hex: hex::encode(script),
        }
    }

    /// Reconstruct a script sig from its raw bytes, deriving the asm form
    pub fn from_bytes(script: &[u8]) -> Self {
        if script.len() == SCRIPT_SIG_LENGTH {
            Self::from_parts(&script[..SIGNATURE_LENGTH], &script[SIGNATURE_LENGTH..])
        } else {
            Self {
                asm: String::new(),
                hex: hex::encode(script),
            }
        }
    }

    /// Split the script into `(signature, public_key)` bytes
    pub fn decode(&self) -> Result<(Vec<u8>, Vec<u8>), ScriptError> {
        let bytes = hex::decode(&self.hex).map_err(|_| ScriptError::InvalidScriptSig)?;
        if bytes.len() != SCRIPT_SIG_LENGTH {
            return Err(ScriptError::InvalidScriptSig);
        }
        let (sig, public_key) = bytes.split_at(SIGNATURE_LENGTH);
        Ok((sig.to_vec(), public_key.to_vec()))
    }
}

/// Locking script placed on a transaction output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    pub asm: String,
    pub hex: String,
    /// Addresses this output pays. Always a singleton for P2PKH, but the
    /// containers index every entry so future multi-recipient scripts keep
    /// working.
    pub addresses: Vec<String>,
}

impl ScriptPubKey {
    /// Build the P2PKH locking script for a 40-hex address
    pub fn p2pkh(address: &str) -> Result<Self, ScriptError> {
        let pubkey_hash =
            hex::decode(address).map_err(|_| ScriptError::InvalidAddress(address.to_string()))?;
        if pubkey_hash.len() != 20 {
            return Err(ScriptError::InvalidAddress(address.to_string()));
        }

        let mut script = Vec::with_capacity(P2PKH_SCRIPT_LENGTH);
        script.push(0x76); // OP_DUP
        script.push(0xa9); // OP_HASH160
        script.push(0x14); // push 20 bytes
        script.extend_from_slice(&pubkey_hash);
        script.push(0x88); // OP_EQUALVERIFY
        script.push(0xac); // OP_CHECKSIG

        Ok(Self {
            asm: p2pkh_asm(address),
            hex: hex::encode(script),
            addresses: vec![address.to_string()],
        })
    }

    /// Reconstruct a locking script from raw bytes
    ///
    /// Scripts matching the P2PKH template get their asm and address list
    /// derived; anything else is kept as opaque hex.
    pub fn from_bytes(script: &[u8]) -> Self {
        if let Some(address) = parse_p2pkh(script) {
            Self {
                asm: p2pkh_asm(&address),
                hex: hex::encode(script),
                addresses: vec![address],
            }
        } else {
            Self {
                asm: String::new(),
                hex: hex::encode(script),
                addresses: Vec::new(),
            }
        }
    }

    /// Extract the 20-byte pubkey hash carried by this locking script
    pub fn pubkey_hash(&self) -> Result<[u8; 20], ScriptError> {
        let script = hex::decode(&self.hex).map_err(|_| ScriptError::NotP2pkh)?;
        if script.len() < P2PKH_SCRIPT_LENGTH {
            return Err(ScriptError::NotP2pkh);
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        Ok(hash)
    }
}

fn p2pkh_asm(address: &str) -> String {
    format!("OP_DUP OP_HASH160 {address} OP_EQUALVERIFY OP_CHECKSIG")
}

fn parse_p2pkh(script: &[u8]) -> Option<String> {
    if script.len() != P2PKH_SCRIPT_LENGTH {
        return None;
    }
    if script[0] != 0x76 || script[1] != 0xa9 || script[2] != 0x14 {
        return None;
    }
    if script[23] != 0x88 || script[24] != 0xac {
        return None;
    }
    Some(hex::encode(&script[3..23]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn test_p2pkh_template_bytes() {
        let address = "ab".repeat(20);
        let script = ScriptPubKey::p2pkh(&address).unwrap();

        let bytes = hex::decode(&script.hex).unwrap();
        assert_eq!(bytes.len(), P2PKH_SCRIPT_LENGTH);
        assert_eq!(&bytes[..3], &[0x76, 0xa9, 0x14]);
        assert_eq!(&bytes[23..], &[0x88, 0xac]);
        assert_eq!(script.addresses, vec![address]);
    }

    #[test]
    fn test_p2pkh_round_trip() {
        let address = KeyPair::generate().address();
        let script = ScriptPubKey::p2pkh(&address).unwrap();
        let bytes = hex::decode(&script.hex).unwrap();
        assert_eq!(ScriptPubKey::from_bytes(&bytes), script);
    }

    #[test]
    fn test_pubkey_hash_extraction() {
        let address = "cd".repeat(20);
        let script = ScriptPubKey::p2pkh(&address).unwrap();
        assert_eq!(hex::encode(script.pubkey_hash().unwrap()), address);
    }

    #[test]
    fn test_invalid_address_rejected() {
        assert!(ScriptPubKey::p2pkh("not hex").is_err());
        assert!(ScriptPubKey::p2pkh("abcd").is_err());
    }

    #[test]
    fn test_script_sig_round_trip() {
        let sig = [7u8; SIGNATURE_LENGTH];
        let public_key = [9u8; PUBLIC_KEY_LENGTH];
        let script = ScriptSig::from_parts(&sig, &public_key);

        let (decoded_sig, decoded_pub) = script.decode().unwrap();
        assert_eq!(decoded_sig, sig);
        assert_eq!(decoded_pub, public_key);
        assert_eq!(script.asm, format!("{} {}", hex::encode(sig), hex::encode(public_key)));
    }

    #[test]
    fn test_script_sig_wrong_length_rejected() {
        let script = ScriptSig {
            asm: String::new(),
            hex: "aabb".to_string(),
        };
        assert!(script.decode().is_err());
        assert!(ScriptSig::empty().decode().is_err());
    }

    #[test]
    fn test_non_p2pkh_kept_opaque() {
        let script = ScriptPubKey::from_bytes(&[0x51, 0x52]);
        assert!(script.addresses.is_empty());
        assert!(script.asm.is_empty());
        assert_eq!(script.hex, "5152");
    }
}
