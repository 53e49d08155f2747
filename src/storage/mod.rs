//! Chain storage facade over sled
//!
//! Blocks, height and transaction indexes, chain-tip metadata, and undo
//! records share one keyspace (prefixes in [`keys`]). A block save is one
//! atomic `sled::Batch`: block bytes, height row, per-transaction
//! locations, undo record, and both tip pointers.

pub mod keys;

use crate::codec::block::{block_hash, decode_block, encode_block};
use crate::codec::tx::tx_hash;
use crate::error::{NodeError, Result};
use crate::types::{Block, ChainTip, Hash, Transaction};
use crate::utxo::store::{decode_utxo, encode_utxo};
use crate::utxo::Utxo;
use keys::*;
use std::path::Path;
use tracing::debug;

/// Spent-output snapshots for one block, in block order; what revert
/// needs to restore the inputs the block consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockUndo {
    pub spent: Vec<Utxo>,
}

impl BlockUndo {
    fn encode(&self) -> Vec<u8> {
        let mut w = crate::codec::Writer::new();
        w.write_varint(self.spent.len() as u64);
        for utxo in &self.spent {
            w.write_var_bytes(&encode_utxo(utxo));
        }
        w.into_bytes()
    }

    fn decode(data: &[u8]) -> Result<BlockUndo> {
        let mut r = crate::codec::Reader::new(data);
        let count = r.read_varint()?;
        let mut spent = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let bytes = r.read_var_bytes()?;
            spent.push(decode_utxo(&bytes)?);
        }
        Ok(BlockUndo { spent })
    }
}

/// Persistent chain store.
pub struct ChainStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl ChainStore {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let db = sled::open(data_dir).map_err(NodeError::from)?;
        let tree = db.open_tree("chain").map_err(NodeError::from)?;
        Ok(ChainStore { db, tree })
    }

    /// The tree UTXO persistence shares.
    pub fn tree(&self) -> sled::Tree {
        self.tree.clone()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(NodeError::from)?;
        Ok(())
    }

    /// Persist a block and advance the tip, all in one batch.
    pub fn save_block(&self, block: &Block, height: u64, undo: &BlockUndo) -> Result<Hash> {
        let hash = block_hash(&block.header);
        let mut batch = sled::Batch::default();

        batch.insert(block_key(&hash), encode_block(block));
        batch.insert(height_key(height), hash.as_bytes().to_vec());

        for (index, tx) in block.transactions.iter().enumerate() {
            let txid = tx_hash(tx);
            let mut location = Vec::with_capacity(36);
            location.extend_from_slice(hash.as_bytes());
            location.extend_from_slice(&(index as u32).to_be_bytes());
            batch.insert(tx_key(&txid), location);
        }

        batch.insert(undo_key(&hash), undo.encode());

        batch.insert(chain_state_key(KEY_BEST_BLOCK), hash.as_bytes().to_vec());
        batch.insert(chain_state_key(KEY_BEST_HEIGHT), height.to_be_bytes().to_vec());

        self.tree.apply_batch(batch).map_err(NodeError::from)?;
        debug!(height, %hash, "block saved");
        Ok(hash)
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>> {
        match self.tree.get(block_key(hash)).map_err(NodeError::from)? {
            Some(bytes) => Ok(Some(decode_block(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_block(&self, hash: &Hash) -> Result<bool> {
        Ok(self
            .tree
            .contains_key(block_key(hash))
            .map_err(NodeError::from)?)
    }

    pub fn get_hash_by_height(&self, height: u64) -> Result<Option<Hash>> {
        match self.tree.get(height_key(height)).map_err(NodeError::from)? {
            Some(bytes) => Hash::from_slice(&bytes)
                .ok_or_else(|| NodeError::Storage("corrupt height index row".into()))
                .map(Some),
            None => Ok(None),
        }
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        match self.get_hash_by_height(height)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    /// Height of a stored main-chain block, by walking the height index.
    pub fn get_block_height(&self, hash: &Hash) -> Result<Option<u64>> {
        for item in self.tree.scan_prefix([PREFIX_HEIGHT]) {
            let (key, value) = item.map_err(NodeError::from)?;
            if value.as_ref() == hash.as_bytes() {
                let mut height_bytes = [0u8; 8];
                height_bytes.copy_from_slice(&key[1..9]);
                return Ok(Some(u64::from_be_bytes(height_bytes)));
            }
        }
        Ok(None)
    }

    /// `(block hash, tx index)` for a confirmed transaction.
    pub fn get_tx_location(&self, txid: &Hash) -> Result<Option<(Hash, u32)>> {
        match self.tree.get(tx_key(txid)).map_err(NodeError::from)? {
            Some(bytes) => {
                if bytes.len() != 36 {
                    return Err(NodeError::Storage(format!(
                        "corrupt tx location row: {} bytes",
                        bytes.len()
                    )));
                }
                let hash = Hash::from_slice(&bytes[..32])
                    .ok_or_else(|| NodeError::Storage("corrupt tx location hash".into()))?;
                let mut index_bytes = [0u8; 4];
                index_bytes.copy_from_slice(&bytes[32..]);
                Ok(Some((hash, u32::from_be_bytes(index_bytes))))
            }
            None => Ok(None),
        }
    }

    /// Fetch a confirmed transaction through its location row.
    pub fn get_transaction(&self, txid: &Hash) -> Result<Option<Transaction>> {
        let (block_hash, index) = match self.get_tx_location(txid)? {
            Some(loc) => loc,
            None => return Ok(None),
        };
        let block = self
            .get_block(&block_hash)?
            .ok_or_else(|| NodeError::Storage(format!("tx {} points at missing block", txid)))?;
        Ok(block.transactions.get(index as usize).cloned())
    }

    pub fn get_undo(&self, hash: &Hash) -> Result<Option<BlockUndo>> {
        match self.tree.get(undo_key(hash)).map_err(NodeError::from)? {
            Some(bytes) => Ok(Some(BlockUndo::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn tip(&self) -> Result<Option<ChainTip>> {
        let hash = match self
            .tree
            .get(chain_state_key(KEY_BEST_BLOCK))
            .map_err(NodeError::from)?
        {
            Some(bytes) => Hash::from_slice(&bytes)
                .ok_or_else(|| NodeError::Storage("corrupt best-block row".into()))?,
            None => return Ok(None),
        };

        let height = match self
            .tree
            .get(chain_state_key(KEY_BEST_HEIGHT))
            .map_err(NodeError::from)?
        {
            Some(bytes) => {
                if bytes.len() != 8 {
                    return Err(NodeError::Storage("corrupt best-height row".into()));
                }
                let mut height_bytes = [0u8; 8];
                height_bytes.copy_from_slice(&bytes);
                u64::from_be_bytes(height_bytes)
            }
            None => return Ok(None),
        };

        Ok(Some(ChainTip {
            best_hash: hash,
            best_height: height,
        }))
    }

    /// Rewind the tip pointer and drop abandoned index rows during a
    /// disconnect. The block bytes stay; only the main-chain view moves.
    pub fn rewind_tip(&self, disconnected: &Block, new_tip: ChainTip) -> Result<()> {
        let hash = block_hash(&disconnected.header);
        let mut batch = sled::Batch::default();

        for tx in &disconnected.transactions {
            batch.remove(tx_key(&tx_hash(tx)));
        }
        batch.insert(
            chain_state_key(KEY_BEST_BLOCK),
            new_tip.best_hash.as_bytes().to_vec(),
        );
        batch.insert(
            chain_state_key(KEY_BEST_HEIGHT),
            new_tip.best_height.to_be_bytes().to_vec(),
        );
        // The height row for the disconnected block will be overwritten
        // when the replacement chain connects; remove it in case it is not.
        if let Some(height) = self.get_block_height(&hash)? {
            if height > new_tip.best_height {
                batch.remove(height_key(height));
            }
        }

        self.tree.apply_batch(batch).map_err(NodeError::from)?;
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.tip()?.is_none())
    }

    pub fn block_count(&self) -> usize {
        self.tree.scan_prefix([PREFIX_BLOCK]).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockHeader, OutPoint, TxInput, TxOutput};
    use tempfile::TempDir;

    fn make_block(prev: Hash, seed: u8) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev,
                merkle_root: Hash::new([seed; 32]),
                timestamp: 1_600_000_000 + seed as u32,
                bits: 0x207F_FFFF,
                nonce: seed as u32,
            },
            transactions: vec![Transaction {
                version: 1,
                inputs: vec![TxInput {
                    prev: OutPoint::coinbase(),
                    sig_script: vec![0x01, seed],
                    sequence: 0xFFFF_FFFF,
                }],
                outputs: vec![TxOutput {
                    value: 50_0000_0000,
                    pub_key_script: vec![seed],
                }],
                lock_time: 0,
            }],
        }
    }

    #[test]
    fn test_save_and_fetch_block() {
        let dir = TempDir::new().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        assert!(store.is_empty().unwrap());

        let block = make_block(Hash::ZERO, 1);
        let hash = store.save_block(&block, 0, &BlockUndo::default()).unwrap();

        assert!(store.has_block(&hash).unwrap());
        assert_eq!(store.get_block(&hash).unwrap().unwrap(), block);
        assert_eq!(store.get_block_by_height(0).unwrap().unwrap(), block);
        assert_eq!(store.get_hash_by_height(0).unwrap().unwrap(), hash);
        assert_eq!(store.get_block_height(&hash).unwrap(), Some(0));
        assert_eq!(store.block_count(), 1);

        let tip = store.tip().unwrap().unwrap();
        assert_eq!(tip.best_hash, hash);
        assert_eq!(tip.best_height, 0);
    }

    #[test]
    fn test_tx_location_and_lookup() {
        let dir = TempDir::new().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();

        let block = make_block(Hash::ZERO, 2);
        let hash = store.save_block(&block, 0, &BlockUndo::default()).unwrap();

        let txid = tx_hash(&block.transactions[0]);
        let (located_hash, index) = store.get_tx_location(&txid).unwrap().unwrap();
        assert_eq!(located_hash, hash);
        assert_eq!(index, 0);

        let fetched = store.get_transaction(&txid).unwrap().unwrap();
        assert_eq!(fetched, block.transactions[0]);

        assert!(store
            .get_tx_location(&Hash::new([0xEE; 32]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_undo_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();

        let block = make_block(Hash::ZERO, 3);
        let undo = BlockUndo {
            spent: vec![Utxo::new(
                Hash::new([9u8; 32]),
                0,
                TxOutput {
                    value: 777,
                    pub_key_script: vec![1, 2, 3],
                },
                5,
                false,
            )],
        };
        let hash = store.save_block(&block, 0, &undo).unwrap();
        assert_eq!(store.get_undo(&hash).unwrap().unwrap(), undo);
    }

    #[test]
    fn test_rewind_tip() {
        let dir = TempDir::new().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();

        let genesis = make_block(Hash::ZERO, 1);
        let genesis_hash = store.save_block(&genesis, 0, &BlockUndo::default()).unwrap();
        let block1 = make_block(genesis_hash, 2);
        let _ = store.save_block(&block1, 1, &BlockUndo::default()).unwrap();

        store
            .rewind_tip(
                &block1,
                ChainTip {
                    best_hash: genesis_hash,
                    best_height: 0,
                },
            )
            .unwrap();

        let tip = store.tip().unwrap().unwrap();
        assert_eq!(tip.best_height, 0);
        assert_eq!(tip.best_hash, genesis_hash);
        // Block bytes remain for potential re-connect.
        assert!(store
            .has_block(&block_hash(&block1.header))
            .unwrap());
        // Its tx index rows are gone.
        let txid = tx_hash(&block1.transactions[0]);
        assert!(store.get_tx_location(&txid).unwrap().is_none());
        assert!(store.get_hash_by_height(1).unwrap().is_none());
    }
}
