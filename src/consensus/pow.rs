//! Proof of work: compact targets, numeric hash comparison, chain work

use super::Network;
use crate::error::{NodeError, Result};
use crate::types::Hash;
use primitive_types::{U256, U512};

/// Expand the compact `bits` representation into a 256-bit target.
///
/// Layout: high byte is the exponent (byte length of the target), the low
/// three bytes are the mantissa. A mantissa with the 0x00800000 bit set
/// encodes a negative target, which is invalid.
pub fn compact_to_target(bits: u32) -> Result<U256> {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007F_FFFF;

    if bits & 0x0080_0000 != 0 {
        return Err(NodeError::Consensus(format!("negative compact target: {:#010x}", bits)));
    }
    if mantissa == 0 {
        return Err(NodeError::Consensus(format!("zero compact target: {:#010x}", bits)));
    }
    if exponent > 34 {
        return Err(NodeError::Consensus(format!(
            "compact target overflow: {:#010x}",
            bits
        )));
    }

    let target = if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from(mantissa) << (8 * (exponent - 3))
    };

    if target.is_zero() {
        return Err(NodeError::Consensus(format!("zero compact target: {:#010x}", bits)));
    }
    Ok(target)
}

/// Interpret a block hash as a big-endian 256-bit integer.
///
/// The hash is stored little-endian relative to its numeric value, so the
/// bytes are reversed before comparison.
fn hash_to_u256(hash: &Hash) -> U256 {
    let mut be = *hash.as_bytes();
    be.reverse();
    U256::from_big_endian(&be)
}

/// Leading zero bytes of the hash in display orientation.
fn leading_zero_bytes(hash: &Hash) -> usize {
    hash.as_bytes().iter().rev().take_while(|b| **b == 0).count()
}

/// Check that `hash` satisfies the difficulty encoded in `bits`.
///
/// Regtest uses an N-leading-zero-bytes rule so single-digit nonce
/// searches succeed; other networks decode the compact target and compare
/// numerically.
pub fn check_proof_of_work(network: Network, hash: &Hash, bits: u32) -> Result<()> {
    if let Some(required) = network.pow_leading_zero_bytes() {
        let zeros = leading_zero_bytes(hash);
        if zeros < required {
            return Err(NodeError::Consensus(format!(
                "insufficient proof of work: {} leading zero bytes, need {}",
                zeros, required
            )));
        }
        return Ok(());
    }

    let target = compact_to_target(bits)?;
    if hash_to_u256(hash) > target {
        return Err(NodeError::Consensus(format!(
            "hash {} above target for bits {:#010x}",
            hash, bits
        )));
    }
    Ok(())
}

/// Work contributed by one block: 2^256 / (target + 1).
pub fn block_work(bits: u32) -> U256 {
    let target = match compact_to_target(bits) {
        Ok(t) => t,
        Err(_) => return U256::zero(),
    };
    let numerator = U512::one() << 256;
    let denominator = U512::from(target) + U512::one();
    let work = numerator / denominator;
    // The quotient always fits: denominator >= 1 and target >= 1.
    U256::try_from(work).unwrap_or(U256::MAX)
}
