//! Base58 and Base58Check encoding
//!
//! The Bitcoin alphabet (no 0, O, I, l). Base58Check wraps a version byte
//! and payload with a 4-byte double-SHA-256 checksum.

use super::hashing::double_sha256;
use crate::error::{NodeError, Result};

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn alphabet_index(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|a| *a == c).map(|i| i as u8)
}

pub fn encode(data: &[u8]) -> String {
    // Count leading zero bytes; each maps to a leading '1'.
    let zeros = data.iter().take_while(|b| **b == 0).count();

    // Long division of the byte string by 58.
    let mut digits: Vec<u8> = Vec::with_capacity(data.len() * 138 / 100 + 1);
    for &byte in &data[zeros..] {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    let mut result = String::with_capacity(zeros + digits.len());
    for _ in 0..zeros {
        result.push('1');
    }
    for &digit in digits.iter().rev() {
        result.push(ALPHABET[digit as usize] as char);
    }
    result
}

pub fn decode(input: &str) -> Result<Vec<u8>> {
    let bytes = input.as_bytes();
    let ones = bytes.iter().take_while(|c| **c == b'1').count();

    let mut result: Vec<u8> = Vec::with_capacity(input.len());
    for &c in &bytes[ones..] {
        let digit =
            alphabet_index(c).ok_or_else(|| NodeError::Decode(format!("invalid base58 character: {}", c as char)))?;
        let mut carry = digit as u32;
        for byte in result.iter_mut() {
            carry += (*byte as u32) * 58;
            *byte = (carry & 0xFF) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            result.push((carry & 0xFF) as u8);
            carry >>= 8;
        }
    }

    for _ in 0..ones {
        result.push(0);
    }
    result.reverse();
    Ok(result)
}

/// Encode `version || payload || checksum` where the checksum is the first
/// four bytes of double-SHA-256 over `version || payload`.
pub fn encode_check(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len() + 4);
    data.push(version);
    data.extend_from_slice(payload);
    let checksum = double_sha256(&data);
    data.extend_from_slice(&checksum.as_bytes()[..4]);
    encode(&data)
}

/// Decode and verify Base58Check; returns `(version, payload)`.
pub fn decode_check(input: &str) -> Result<(u8, Vec<u8>)> {
    let decoded = decode(input)?;
    if decoded.len() < 5 {
        return Err(NodeError::Decode("base58check data too short".into()));
    }

    let (data, checksum) = decoded.split_at(decoded.len() - 4);
    let expected = double_sha256(data);
    if checksum != &expected.as_bytes()[..4] {
        return Err(NodeError::Decode("base58check checksum mismatch".into()));
    }

    Ok((data[0], data[1..].to_vec()))
}
