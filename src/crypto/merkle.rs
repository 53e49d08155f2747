//! Merkle root computation over transaction ids
//!
//! Pairwise double-SHA-256 of concatenated raw 32-byte hashes; a level
//! with an odd node count duplicates its last node. A single transaction
//! is its own root.

use super::hashing::double_sha256;
use crate::types::Hash;

pub fn compute_merkle_root(tx_hashes: &[Hash]) -> Hash {
    if tx_hashes.is_empty() {
        return Hash::ZERO;
    }

    let mut level: Vec<Hash> = tx_hashes.to_vec();

    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };

            let mut combined = [0u8; 64];
            combined[..32].copy_from_slice(left.as_bytes());
            combined[32..].copy_from_slice(right.as_bytes());
            next.push(double_sha256(&combined));
        }
        level = next;
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_hash(left: &Hash, right: &Hash) -> Hash {
        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(left.as_bytes());
        combined[32..].copy_from_slice(right.as_bytes());
        double_sha256(&combined)
    }

    #[test]
    fn test_single_hash_is_root() {
        let h = Hash::new([5u8; 32]);
        assert_eq!(compute_merkle_root(&[h]), h);
    }

    #[test]
    fn test_two_hashes() {
        let a = Hash::new([1u8; 32]);
        let b = Hash::new([2u8; 32]);
        assert_eq!(compute_merkle_root(&[a, b]), pair_hash(&a, &b));
    }

    #[test]
    fn test_three_hashes_duplicates_last() {
        // root([A, B, C]) = dsha(dsha(A||B) || dsha(C||C))
        let a = Hash::new([1u8; 32]);
        let b = Hash::new([2u8; 32]);
        let c = Hash::new([3u8; 32]);

        let ab = pair_hash(&a, &b);
        let cc = pair_hash(&c, &c);
        let expected = pair_hash(&ab, &cc);

        assert_eq!(compute_merkle_root(&[a, b, c]), expected);
    }

    #[test]
    fn test_order_sensitivity() {
        let a = Hash::new([1u8; 32]);
        let b = Hash::new([2u8; 32]);
        assert_ne!(compute_merkle_root(&[a, b]), compute_merkle_root(&[b, a]));
    }

    #[test]
    fn test_empty_is_zero() {
        assert!(compute_merkle_root(&[]).is_zero());
    }
}
