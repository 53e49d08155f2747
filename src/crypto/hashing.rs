//! Double-SHA-256 and HASH160

use crate::types::Hash;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// SHA-256 applied twice; the hash behind txids, block hashes, checksums.
pub fn double_sha256(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&second);
    Hash::new(bytes)
}

/// RIPEMD-160 of SHA-256; the 20-byte hash behind P2PKH addresses.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripe = Ripemd160::digest(sha);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&ripe);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_sha256_known_vector() {
        // dsha256("hello") =
        // 9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50
        let h = double_sha256(b"hello");
        assert_eq!(
            hex::encode(h.as_bytes()),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn test_double_sha256_empty() {
        let h = double_sha256(b"");
        assert_eq!(
            hex::encode(h.as_bytes()),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_hash160_length_and_determinism() {
        let a = hash160(b"pubkey bytes");
        let b = hash160(b"pubkey bytes");
        assert_eq!(a, b);
        assert_ne!(a, hash160(b"other bytes"));
    }
}
