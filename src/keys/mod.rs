//! Keys and addresses: secp256k1 keypairs, WIF, P2PKH
//!
//! Addresses are Base58Check over the HASH160 of the compressed public
//! key, version 0x00 on mainnet and 0x6f on testnet/regtest.

use crate::crypto::base58;
use crate::crypto::hashing::hash160;
use crate::error::{NodeError, Result};
use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};

/// Address version bytes.
pub const VERSION_P2PKH_MAINNET: u8 = 0x00;
pub const VERSION_P2PKH_TESTNET: u8 = 0x6F;

/// WIF private-key version byte (mainnet).
pub const VERSION_WIF: u8 = 0x80;

/// A Base58Check P2PKH address: version byte + 20-byte pubkey hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    version: u8,
    hash: [u8; 20],
}

impl Address {
    pub fn new(version: u8, hash: [u8; 20]) -> Self {
        Address { version, hash }
    }

    pub fn decode(address: &str) -> Result<Address> {
        let (version, payload) = base58::decode_check(address)?;
        if payload.len() != 20 {
            return Err(NodeError::Decode(format!(
                "address hash must be 20 bytes, got {}",
                payload.len()
            )));
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload);
        Ok(Address { version, hash })
    }

    pub fn encode(&self) -> String {
        base58::encode_check(self.version, &self.hash)
    }

    pub fn hash160(&self) -> &[u8; 20] {
        &self.hash
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn is_p2pkh(&self) -> bool {
        self.version == VERSION_P2PKH_MAINNET || self.version == VERSION_P2PKH_TESTNET
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// A secp256k1 keypair with signing and address derivation.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate(secp: &Secp256k1<All>) -> KeyPair {
        let secret = SecretKey::new(&mut rand::thread_rng());
        let public = PublicKey::from_secret_key(secp, &secret);
        KeyPair { secret, public }
    }

    pub fn from_secret_bytes(secp: &Secp256k1<All>, bytes: &[u8]) -> Result<KeyPair> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| NodeError::Decode(format!("invalid private key: {}", e)))?;
        let public = PublicKey::from_secret_key(secp, &secret);
        Ok(KeyPair { secret, public })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Compressed SEC1 public key bytes (33 bytes).
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public.serialize()
    }

    /// HASH160 of the compressed public key.
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.public_key_bytes())
    }

    pub fn address(&self, version: u8) -> Address {
        Address::new(version, self.pubkey_hash())
    }

    /// Sign a 32-byte digest; returns the DER-encoded signature.
    pub fn sign(&self, secp: &Secp256k1<All>, digest: &[u8; 32]) -> Result<Vec<u8>> {
        let message = Message::from_digest_slice(digest)
            .map_err(|e| NodeError::Decode(format!("invalid digest: {}", e)))?;
        let signature = secp.sign_ecdsa(&message, &self.secret);
        Ok(signature.serialize_der().to_vec())
    }

    /// Export in Wallet Import Format. The trailing 0x01 flag marks the
    /// key as belonging to a compressed public key.
    pub fn to_wif(&self, compressed: bool) -> String {
        let mut payload = self.secret.secret_bytes().to_vec();
        if compressed {
            payload.push(0x01);
        }
        base58::encode_check(VERSION_WIF, &payload)
    }

    /// Import from WIF; returns the keypair and the compression flag.
    pub fn from_wif(secp: &Secp256k1<All>, wif: &str) -> Result<(KeyPair, bool)> {
        let (version, payload) = base58::decode_check(wif)?;
        if version != VERSION_WIF {
            return Err(NodeError::Decode(format!("invalid WIF version: {:#04x}", version)));
        }

        let (key_bytes, compressed) = match payload.len() {
            32 => (&payload[..], false),
            33 if payload[32] == 0x01 => (&payload[..32], true),
            n => {
                return Err(NodeError::Decode(format!("invalid WIF payload length: {}", n)));
            }
        };

        Ok((KeyPair::from_secret_bytes(secp, key_bytes)?, compressed))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret.
        write!(f, "KeyPair({})", hex::encode(self.public_key_bytes()))
    }
}

/// Verify a DER signature over a 32-byte digest.
pub fn verify_signature(
    secp: &Secp256k1<All>,
    pubkey_bytes: &[u8],
    der_signature: &[u8],
    digest: &[u8; 32],
) -> bool {
    let pubkey = match PublicKey::from_slice(pubkey_bytes) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let signature = match Signature::from_der(der_signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    let message = match Message::from_digest_slice(digest) {
        Ok(m) => m,
        Err(_) => return false,
    };
    secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
}
