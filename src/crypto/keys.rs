//! Ed25519 key management
//!
//! Provides seed-based key pair generation, signing, and verification.
//! Addresses are the 40-hex RIPEMD160(SHA256(pubkey)) of the 32-byte
//! Ed25519 public key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use super::hash::hash160;

/// Length of an Ed25519 seed in bytes
pub const SEED_LENGTH: usize = 32;

/// Length of an Ed25519 public key in bytes
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Length of an Ed25519 signature in bytes
pub const SIGNATURE_LENGTH: usize = 64;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("invalid seed: expected {SEED_LENGTH} bytes")]
    InvalidSeed,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature")]
    InvalidSignature,
}

/// An Ed25519 key pair derived from a 32-byte seed
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let mut seed = [0u8; SEED_LENGTH];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// Derive a key pair from a 32-byte seed
    pub fn from_seed(seed: &[u8; SEED_LENGTH]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Recover a key pair from a hex-encoded seed
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(seed_hex).map_err(|_| KeyError::InvalidSeed)?;
        let seed: [u8; SEED_LENGTH] = bytes.try_into().map_err(|_| KeyError::InvalidSeed)?;
        Ok(Self::from_seed(&seed))
    }

    /// Get the seed as a hex string
    pub fn seed_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Get the 32-byte public key
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.verifying_key.to_bytes()
    }

    /// Derive the 40-hex address from this key pair's public key
    pub fn address(&self) -> String {
        address_from_pub(&self.public_key_bytes())
    }

    /// Sign a message, producing a 64-byte signature
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Derive the 40-hex address for a 32-byte public key
pub fn address_from_pub(public_key: &[u8]) -> String {
    hex::encode(hash160(public_key))
}

/// Verify a signature against a raw 32-byte public key
///
/// Returns `Ok(false)` when the signature does not check out and `Err` only
/// when the key or signature bytes are structurally invalid.
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let key_bytes: [u8; PUBLIC_KEY_LENGTH] = public_key
        .try_into()
        .map_err(|_| KeyError::InvalidPublicKey)?;
    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| KeyError::InvalidPublicKey)?;
    let signature = Signature::from_slice(signature).map_err(|_| KeyError::InvalidSignature)?;
    Ok(verifying_key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.seed_hex().len(), 64);
        assert_eq!(kp.address().len(), 40);
    }

    #[test]
    fn test_seed_round_trip() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_seed_hex(&kp1.seed_hex()).unwrap();
        assert_eq!(kp1.public_key_bytes(), kp2.public_key_bytes());
        assert_eq!(kp1.address(), kp2.address());
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let message = b"spend output 0";

        let signature = kp.sign(message);
        assert!(verify_signature(&kp.public_key_bytes(), message, &signature).unwrap());
    }

    #[test]
    fn test_verify_wrong_key_fails() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let signature = kp.sign(b"message");

        assert!(!verify_signature(&other.public_key_bytes(), b"message", &signature).unwrap());
    }

    #[test]
    fn test_invalid_seed_hex() {
        assert!(KeyPair::from_seed_hex("not hex").is_err());
        assert!(KeyPair::from_seed_hex("abcd").is_err());
    }
}
