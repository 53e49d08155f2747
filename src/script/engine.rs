//! Stack-based script executor
//!
//! Executes a script sequentially over a main and alt stack. Success means
//! the final stack is non-empty with a truthy top element. OP_CHECKSIG
//! needs a transaction context; without one it degrades to accepting any
//! signature whose public key and DER encoding parse, which keeps the
//! verifier swappable for fixtures.

use super::sighash::signature_hash;
use super::stack::{cast_to_bool, Stack};
use super::{
    is_small_int, small_int_value, strip_code_separators, OP_0, OP_1NEGATE, OP_CHECKSIG,
    OP_CHECKSIGVERIFY, OP_CODESEPARATOR, OP_DROP, OP_DUP, OP_EQUAL, OP_EQUALVERIFY,
    OP_FROMALTSTACK, OP_HASH160, OP_HASH256, OP_NOP, OP_PUSHDATA1, OP_PUSHDATA2, OP_PUSHDATA4,
    OP_RETURN, OP_RIPEMD160, OP_SHA256, OP_SWAP, OP_TOALTSTACK, OP_VERIFY,
};
use crate::crypto::hashing::{double_sha256, hash160};
use crate::error::{NodeError, Result};
use crate::keys::verify_signature;
use crate::types::Transaction;
use ripemd::Ripemd160;
use secp256k1::ecdsa::Signature;
use secp256k1::{All, PublicKey, Secp256k1};
use sha2::{Digest, Sha256};

/// Execution bounds.
const MAX_SCRIPT_SIZE: usize = 10_000;
const MAX_STACK_SIZE: usize = 1_000;

/// Transaction context for signature checks.
#[derive(Clone)]
pub struct TxContext<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    /// The spent output's locking script.
    pub prev_script: &'a [u8],
}

pub struct Engine<'a> {
    secp: &'a Secp256k1<All>,
    stack: Stack,
    alt_stack: Stack,
    context: Option<TxContext<'a>>,
}

impl<'a> Engine<'a> {
    pub fn new(secp: &'a Secp256k1<All>) -> Self {
        Engine {
            secp,
            stack: Stack::new(),
            alt_stack: Stack::new(),
            context: None,
        }
    }

    pub fn with_context(secp: &'a Secp256k1<All>, context: TxContext<'a>) -> Self {
        Engine {
            secp,
            stack: Stack::new(),
            alt_stack: Stack::new(),
            context: Some(context),
        }
    }

    /// Run `sig_script` then `pub_key_script`; true iff the combined
    /// execution leaves a truthy top element.
    pub fn verify(&mut self, sig_script: &[u8], pub_key_script: &[u8]) -> Result<bool> {
        self.execute(sig_script)?;
        self.execute(pub_key_script)?;
        Ok(!self.stack.is_empty() && cast_to_bool(self.stack.peek()?))
    }

    /// Execute one script over the current stacks.
    pub fn execute(&mut self, script: &[u8]) -> Result<()> {
        if script.len() > MAX_SCRIPT_SIZE {
            return Err(NodeError::Script(format!(
                "script exceeds {} bytes: {}",
                MAX_SCRIPT_SIZE,
                script.len()
            )));
        }

        let mut pc = 0usize;
        while pc < script.len() {
            if self.stack.len() + self.alt_stack.len() > MAX_STACK_SIZE {
                return Err(NodeError::Script("stack overflow".into()));
            }

            let opcode = script[pc];
            pc += 1;

            // Direct pushes: opcode is the byte count.
            if (0x01..=0x4B).contains(&opcode) {
                pc = self.push_data(script, pc, opcode as usize)?;
                continue;
            }

            match opcode {
                OP_0 => self.stack.push(Vec::new()),
                OP_PUSHDATA1 => {
                    let len = *script
                        .get(pc)
                        .ok_or_else(|| NodeError::Script("PUSHDATA1 missing length".into()))?
                        as usize;
                    pc = self.push_data(script, pc + 1, len)?;
                }
                OP_PUSHDATA2 => {
                    if pc + 2 > script.len() {
                        return Err(NodeError::Script("PUSHDATA2 missing length".into()));
                    }
                    let len = u16::from_le_bytes([script[pc], script[pc + 1]]) as usize;
                    pc = self.push_data(script, pc + 2, len)?;
                }
                OP_PUSHDATA4 => {
                    if pc + 4 > script.len() {
                        return Err(NodeError::Script("PUSHDATA4 missing length".into()));
                    }
                    let len = u32::from_le_bytes([
                        script[pc],
                        script[pc + 1],
                        script[pc + 2],
                        script[pc + 3],
                    ]) as usize;
                    pc = self.push_data(script, pc + 4, len)?;
                }
                OP_1NEGATE => self.stack.push_int(-1),
                op if is_small_int(op) => self.stack.push_int(small_int_value(op)),
                OP_NOP => {}
                OP_VERIFY => {
                    let top = self.stack.pop()?;
                    if !cast_to_bool(&top) {
                        return Err(NodeError::Script("VERIFY failed".into()));
                    }
                }
                OP_RETURN => {
                    return Err(NodeError::Script("OP_RETURN executed".into()));
                }
                OP_TOALTSTACK => {
                    let top = self.stack.pop()?;
                    self.alt_stack.push(top);
                }
                OP_FROMALTSTACK => {
                    let top = self.alt_stack.pop()?;
                    self.stack.push(top);
                }
                OP_DROP => {
                    self.stack.pop()?;
                }
                OP_DUP => self.stack.dup()?,
                OP_SWAP => self.stack.swap()?,
                OP_EQUAL => {
                    let a = self.stack.pop()?;
                    let b = self.stack.pop()?;
                    self.stack.push(if a == b { vec![1] } else { Vec::new() });
                }
                OP_EQUALVERIFY => {
                    let a = self.stack.pop()?;
                    let b = self.stack.pop()?;
                    if a != b {
                        return Err(NodeError::Script("EQUALVERIFY failed".into()));
                    }
                }
                OP_RIPEMD160 => {
                    let item = self.stack.pop()?;
                    self.stack.push(Ripemd160::digest(&item).to_vec());
                }
                OP_SHA256 => {
                    let item = self.stack.pop()?;
                    self.stack.push(Sha256::digest(&item).to_vec());
                }
                OP_HASH160 => {
                    let item = self.stack.pop()?;
                    self.stack.push(hash160(&item).to_vec());
                }
                OP_HASH256 => {
                    let item = self.stack.pop()?;
                    self.stack.push(double_sha256(&item).as_bytes().to_vec());
                }
                OP_CODESEPARATOR => {}
                OP_CHECKSIG => {
                    let result = self.check_sig()?;
                    self.stack.push(if result { vec![1] } else { Vec::new() });
                }
                OP_CHECKSIGVERIFY => {
                    if !self.check_sig()? {
                        return Err(NodeError::Script("CHECKSIGVERIFY failed".into()));
                    }
                }
                other => {
                    return Err(NodeError::Script(format!("unimplemented opcode {:#04x}", other)));
                }
            }
        }

        Ok(())
    }

    fn push_data(&mut self, script: &[u8], start: usize, len: usize) -> Result<usize> {
        let end = start
            .checked_add(len)
            .ok_or_else(|| NodeError::Script("push length overflow".into()))?;
        if end > script.len() {
            return Err(NodeError::Script(format!(
                "push of {} bytes exceeds script length",
                len
            )));
        }
        self.stack.push(script[start..end].to_vec());
        Ok(end)
    }

    /// Pop `<pubkey> <sig||hashtype>` and verify against the sighash of
    /// the context transaction.
    fn check_sig(&mut self) -> Result<bool> {
        let pubkey_bytes = self.stack.pop()?;
        let sig_bytes = self.stack.pop()?;

        if sig_bytes.is_empty() || pubkey_bytes.is_empty() {
            return Ok(false);
        }

        // The final byte of the pushed signature is the hash type.
        let (der, hash_type) = sig_bytes.split_at(sig_bytes.len() - 1);
        let hash_type = hash_type[0] as u32;

        match &self.context {
            Some(ctx) => {
                let subscript = strip_code_separators(ctx.prev_script);
                let digest = match signature_hash(ctx.tx, ctx.input_index, &subscript, hash_type) {
                    Ok(h) => h,
                    Err(_) => return Ok(false),
                };
                Ok(verify_signature(
                    self.secp,
                    &pubkey_bytes,
                    der,
                    digest.as_bytes(),
                ))
            }
            // No transaction context: accept iff both sides parse. The
            // consensus path always supplies a context.
            None => Ok(PublicKey::from_slice(&pubkey_bytes).is_ok()
                && Signature::from_der(der).is_ok()),
        }
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }
}
