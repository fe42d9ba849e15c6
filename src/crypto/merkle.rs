//! Merkle root computation over block transactions
//!
//! Leaves are the raw txid byte strings (the hex text, not decoded and not
//! reversed). Each internal node is the double SHA-256 of the concatenation
//! of its children; an odd trailing node is paired with itself.

use super::hash::double_sha256;

/// Calculate the merkle root for an ordered list of txids
///
/// Zero transactions yield 32 zero bytes; a single transaction yields the
/// double SHA-256 of its txid string.
pub fn compute_merkle_root(txids: &[String]) -> Vec<u8> {
    if txids.is_empty() {
        return vec![0u8; 32];
    }

    let mut level: Vec<Vec<u8>> = txids.iter().map(|id| id.as_bytes().to_vec()).collect();

    if level.len() == 1 {
        return double_sha256(&level[0]);
    }

    while level.len() > 1 {
        let mut next_level = Vec::with_capacity((level.len() + 1) / 2);

        for pair in level.chunks(2) {
            let mut data = pair[0].clone();
            if pair.len() == 2 {
                data.extend_from_slice(&pair[1]);
            } else {
                data.extend_from_slice(&pair[0]);
            }
            next_level.push(double_sha256(&data));
        }

        level = next_level;
    }

    level.remove(0)
}
