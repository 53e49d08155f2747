//! Wallet: key ring and tracked UTXOs
//!
//! Watches the UTXO set for P2PKH outputs paying our keys; other script
//! templates are ignored. Builds and signs P2PKH spends.

use crate::error::{NodeError, Result};
use crate::keys::{Address, KeyPair};
use crate::script::sighash::{signature_hash, SIGHASH_ALL};
use crate::script::{p2pkh, p2pkh_hash, p2pkh_sig_script};
use crate::types::{OutPoint, Transaction, TxInput, TxOutput};
use crate::utxo::{Utxo, UtxoSet};
use crate::consensus::Network;
use secp256k1::{All, Secp256k1};
use std::collections::HashMap;
use tracing::debug;

pub struct Wallet {
    secp: Secp256k1<All>,
    network: Network,
    /// address string -> keypair
    keys: HashMap<String, KeyPair>,
    /// pubkey hash -> address string, for script matching
    by_hash: HashMap<[u8; 20], String>,
    /// outputs we can spend
    utxos: HashMap<OutPoint, Utxo>,
}

impl Wallet {
    pub fn new(network: Network) -> Self {
        Wallet {
            secp: Secp256k1::new(),
            network,
            keys: HashMap::new(),
            by_hash: HashMap::new(),
            utxos: HashMap::new(),
        }
    }

    /// Create a fresh key and return its address.
    pub fn generate_address(&mut self) -> String {
        let pair = KeyPair::generate(&self.secp);
        let hash = pair.pubkey_hash();
        let address = pair.address(self.network.address_version()).encode();
        self.by_hash.insert(hash, address.clone());
        self.keys.insert(address.clone(), pair);
        address
    }

    /// Import a key from WIF and return its address.
    pub fn import_wif(&mut self, wif: &str) -> Result<String> {
        let (pair, _compressed) = KeyPair::from_wif(&self.secp, wif)?;
        let hash = pair.pubkey_hash();
        let address = pair.address(self.network.address_version()).encode();
        self.by_hash.insert(hash, address.clone());
        self.keys.insert(address.clone(), pair);
        Ok(address)
    }

    /// Export a key as WIF.
    pub fn export_wif(&self, address: &str) -> Result<String> {
        self.keys
            .get(address)
            .map(|pair| pair.to_wif(true))
            .ok_or_else(|| NodeError::Decode(format!("unknown address: {}", address)))
    }

    pub fn list_addresses(&self) -> Vec<String> {
        self.keys.keys().cloned().collect()
    }

    pub fn owns_address(&self, address: &str) -> bool {
        self.keys.contains_key(address)
    }

    /// Total value of tracked UTXOs.
    pub fn balance(&self) -> i64 {
        self.utxos.values().map(|u| u.value()).sum()
    }

    /// Track an output if its P2PKH script pays one of our keys.
    /// Non-P2PKH templates are silently ignored.
    pub fn observe_utxo(&mut self, utxo: &Utxo) {
        let hash = match p2pkh_hash(&utxo.output.pub_key_script) {
            Some(hash) => hash,
            None => return,
        };
        if self.by_hash.contains_key(&hash) {
            self.utxos.insert(utxo.outpoint(), utxo.clone());
        }
    }

    pub fn forget_utxo(&mut self, outpoint: &OutPoint) {
        self.utxos.remove(outpoint);
    }

    /// Replace the tracked outputs with a full scan of `set`.
    pub fn rescan(&mut self, set: &UtxoSet) {
        self.utxos.clear();
        for (_, utxo) in set.iter() {
            self.observe_utxo(utxo);
        }
        debug!(tracked = self.utxos.len(), "wallet rescan complete");
    }

    /// Build and sign a P2PKH transaction paying `amount` to `to_address`
    /// with the given fee; change returns to the first funding address.
    /// `spend_height` gates coinbase maturity.
    pub fn create_send(
        &self,
        to_address: &str,
        amount: i64,
        fee: i64,
        spend_height: u64,
    ) -> Result<Transaction> {
        if amount <= 0 {
            return Err(NodeError::Structural(format!("invalid amount: {}", amount)));
        }
        let destination = Address::decode(to_address)?;
        if !destination.is_p2pkh() {
            return Err(NodeError::Structural(format!(
                "unsupported address version: {:#04x}",
                destination.version()
            )));
        }

        // Largest-first selection over spendable outputs.
        let mut spendable: Vec<&Utxo> = self
            .utxos
            .values()
            .filter(|u| u.is_mature_at(spend_height))
            .collect();
        spendable.sort_by(|a, b| b.value().cmp(&a.value()));

        let target = amount + fee;
        let mut selected = Vec::new();
        let mut total = 0i64;
        for utxo in spendable {
            selected.push(utxo);
            total += utxo.value();
            if total >= target {
                break;
            }
        }
        if total < target {
            return Err(NodeError::Structural(format!(
                "insufficient funds: have {}, need {}",
                total, target
            )));
        }

        let mut outputs = vec![TxOutput {
            value: amount,
            pub_key_script: p2pkh(destination.hash160()),
        }];
        let change = total - target;
        if change > 0 {
            let change_hash = p2pkh_hash(&selected[0].output.pub_key_script)
                .ok_or_else(|| NodeError::Structural("non-P2PKH input tracked".into()))?;
            outputs.push(TxOutput {
                value: change,
                pub_key_script: p2pkh(&change_hash),
            });
        }

        let mut tx = Transaction {
            version: 1,
            inputs: selected
                .iter()
                .map(|u| TxInput {
                    prev: u.outpoint(),
                    sig_script: Vec::new(),
                    sequence: 0xFFFF_FFFF,
                })
                .collect(),
            outputs,
            lock_time: 0,
        };

        // Sign every input against its previous output's script.
        for index in 0..tx.inputs.len() {
            let prev_script = selected[index].output.pub_key_script.clone();
            let hash = p2pkh_hash(&prev_script)
                .ok_or_else(|| NodeError::Structural("non-P2PKH input tracked".into()))?;
            let address = self
                .by_hash
                .get(&hash)
                .ok_or_else(|| NodeError::Structural("no key for tracked input".into()))?;
            let pair = &self.keys[address];

            let digest = signature_hash(&tx, index, &prev_script, SIGHASH_ALL)?;
            let mut signature = pair.sign(&self.secp, digest.as_bytes())?;
            signature.push(SIGHASH_ALL as u8);
            tx.inputs[index].sig_script =
                p2pkh_sig_script(&signature, &pair.public_key_bytes());
        }

        Ok(tx)
    }

    /// Pubkey hash for one of our addresses (e.g. the miner address).
    pub fn pubkey_hash_for(&self, address: &str) -> Result<[u8; 20]> {
        let decoded = Address::decode(address)?;
        Ok(*decoded.hash160())
    }
}
