//! Cryptographic utilities for the node core
//!
//! This module provides:
//! - SHA-256 and HASH160 hashing
//! - Ed25519 key management
//! - Merkle root computation

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{double_sha256, double_sha256_hex, hash160, sha256, sha256_hex};
pub use keys::{address_from_pub, verify_signature, KeyError, KeyPair};
pub use merkle::compute_merkle_root;
