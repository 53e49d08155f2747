//! Script interpreter: opcodes, stack machine, P2PKH templates

pub mod engine;
pub mod sighash;
pub mod stack;

pub use engine::{Engine, TxContext};

// Opcode constants (subset of the Bitcoin script opcode space)
pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4C;
pub const OP_PUSHDATA2: u8 = 0x4D;
pub const OP_PUSHDATA4: u8 = 0x4E;
pub const OP_1NEGATE: u8 = 0x4F;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_NOP: u8 = 0x61;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6A;
pub const OP_TOALTSTACK: u8 = 0x6B;
pub const OP_FROMALTSTACK: u8 = 0x6C;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_SWAP: u8 = 0x7C;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_RIPEMD160: u8 = 0xA6;
pub const OP_SHA256: u8 = 0xA8;
pub const OP_HASH160: u8 = 0xA9;
pub const OP_HASH256: u8 = 0xAA;
pub const OP_CODESEPARATOR: u8 = 0xAB;
pub const OP_CHECKSIG: u8 = 0xAC;
pub const OP_CHECKSIGVERIFY: u8 = 0xAD;

/// True for OP_1 through OP_16.
pub fn is_small_int(op: u8) -> bool {
    (OP_1..=OP_16).contains(&op)
}

/// Value of an OP_N opcode (OP_1 => 1, ... OP_16 => 16).
pub fn small_int_value(op: u8) -> i64 {
    debug_assert!(is_small_int(op));
    (op - OP_1 + 1) as i64
}

/// Build the 25-byte P2PKH locking script:
/// `OP_DUP OP_HASH160 <20-byte hash> OP_EQUALVERIFY OP_CHECKSIG`.
pub fn p2pkh(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Recognize the exact 25-byte P2PKH pattern.
pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

/// Extract the pubkey hash from a P2PKH script.
pub fn p2pkh_hash(script: &[u8]) -> Option<[u8; 20]> {
    if !is_p2pkh(script) {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&script[3..23]);
    Some(hash)
}

/// Build a standard P2PKH unlocking script: `<sig||hashtype> <pubkey>`.
pub fn p2pkh_sig_script(signature: &[u8], pubkey: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(2 + signature.len() + pubkey.len());
    script.push(signature.len() as u8);
    script.extend_from_slice(signature);
    script.push(pubkey.len() as u8);
    script.extend_from_slice(pubkey);
    script
}

/// Copy of a script with OP_CODESEPARATOR bytes removed; the subscript
/// that signature hashes commit to.
pub fn strip_code_separators(script: &[u8]) -> Vec<u8> {
    script
        .iter()
        .copied()
        .filter(|op| *op != OP_CODESEPARATOR)
        .collect()
}
