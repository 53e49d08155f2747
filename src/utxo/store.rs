//! Disk persistence for the UTXO set
//!
//! Rows live under the `u` key prefix in the node's sled keyspace. The
//! value is the canonical UTXO serialization:
//! `tx_hash || index || value || varint(script_len) || script || height ||
//! is_coinbase`. Bulk save replaces the whole table in one batch.

use super::{Utxo, UtxoSet};
use crate::codec::{Reader, Writer};
use crate::error::{NodeError, Result};
use crate::storage::keys::{utxo_key, PREFIX_UTXO};
use crate::types::{OutPoint, TxOutput};

pub struct UtxoStore {
    tree: sled::Tree,
}

impl UtxoStore {
    pub fn new(db: &sled::Db) -> Result<Self> {
        Ok(UtxoStore {
            tree: db.open_tree("chain").map_err(NodeError::from)?,
        })
    }

    pub fn from_tree(tree: sled::Tree) -> Self {
        UtxoStore { tree }
    }

    /// Replace the persisted table with the contents of `set`, atomically.
    pub fn save_set(&self, set: &UtxoSet) -> Result<()> {
        let mut batch = sled::Batch::default();

        for item in self.tree.scan_prefix([PREFIX_UTXO]) {
            let (key, _) = item.map_err(NodeError::from)?;
            batch.remove(key.as_ref());
        }

        for (outpoint, utxo) in set.iter() {
            batch.insert(utxo_key(outpoint), encode_utxo(utxo));
        }

        self.tree.apply_batch(batch).map_err(NodeError::from)?;
        Ok(())
    }

    /// Load the entire persisted table into a fresh set.
    pub fn load_set(&self) -> Result<UtxoSet> {
        let mut set = UtxoSet::new();
        for item in self.tree.scan_prefix([PREFIX_UTXO]) {
            let (_, value) = item.map_err(NodeError::from)?;
            let utxo = decode_utxo(&value)?;
            set.add(utxo)?;
        }
        Ok(set)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<Utxo>> {
        match self.tree.get(utxo_key(outpoint)).map_err(NodeError::from)? {
            Some(value) => Ok(Some(decode_utxo(&value)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self) -> usize {
        self.tree.scan_prefix([PREFIX_UTXO]).count()
    }
}

pub(crate) fn encode_utxo(utxo: &Utxo) -> Vec<u8> {
    let mut w = Writer::with_capacity(32 + 4 + 8 + 1 + utxo.output.pub_key_script.len() + 8 + 1);
    w.write_hash(&utxo.tx_hash);
    w.write_u32(utxo.output_index);
    w.write_i64(utxo.output.value);
    w.write_var_bytes(&utxo.output.pub_key_script);
    w.write_u64(utxo.creation_height);
    w.write_u8(utxo.is_coinbase as u8);
    w.into_bytes()
}

pub(crate) fn decode_utxo(data: &[u8]) -> Result<Utxo> {
    let mut r = Reader::new(data);
    let tx_hash = r.read_hash()?;
    let output_index = r.read_u32()?;
    let value = r.read_i64()?;
    let pub_key_script = r.read_var_bytes()?;
    let creation_height = r.read_u64()?;
    let is_coinbase = r.read_u8()? != 0;
    if !r.is_empty() {
        return Err(NodeError::Decode("trailing bytes after UTXO".into()));
    }
    Ok(Utxo {
        tx_hash,
        output_index,
        output: TxOutput {
            value,
            pub_key_script,
        },
        creation_height,
        is_coinbase,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash;
    use tempfile::TempDir;

    fn sample_utxo() -> Utxo {
        Utxo::new(
            Hash::new([3u8; 32]),
            1,
            TxOutput {
                value: 1234,
                pub_key_script: vec![0x76, 0xA9, 0x14],
            },
            42,
            true,
        )
    }

    #[test]
    fn test_utxo_codec_round_trip() {
        let utxo = sample_utxo();
        assert_eq!(decode_utxo(&encode_utxo(&utxo)).unwrap(), utxo);
    }

    #[test]
    fn test_save_and_load_set() {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let store = UtxoStore::new(&db).unwrap();

        let mut set = UtxoSet::new();
        set.add(sample_utxo()).unwrap();
        let mut other = sample_utxo();
        other.tx_hash = Hash::new([4u8; 32]);
        other.is_coinbase = false;
        set.add(other).unwrap();

        store.save_set(&set).unwrap();
        assert_eq!(store.count(), 2);

        let loaded = store.load_set().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.total_value(), set.total_value());

        let fetched = store.get(&sample_utxo().outpoint()).unwrap().unwrap();
        assert_eq!(fetched, sample_utxo());
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let store = UtxoStore::new(&db).unwrap();

        let mut set = UtxoSet::new();
        set.add(sample_utxo()).unwrap();
        store.save_set(&set).unwrap();

        let mut replacement = UtxoSet::new();
        let mut other = sample_utxo();
        other.tx_hash = Hash::new([9u8; 32]);
        replacement.add(other).unwrap();
        store.save_set(&replacement).unwrap();

        assert_eq!(store.count(), 1);
        assert!(store.get(&sample_utxo().outpoint()).unwrap().is_none());
    }
}
