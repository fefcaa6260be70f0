//! Transactional key-value store.
//!
//! The chain state lives in an abstract key-value store with many concurrent
//! readers and a single writer. A [`StoreTx`] stages all writes of one block
//! application and records the before-image of every touched key; committing
//! applies the staged writes as one sled batch, and the before-images become
//! a persisted per-height undo record so a later rewind restores the prior
//! state exactly.
//!
//! Key layout:
//! - `accounts/<asset>/<pk>` → encoded confidential account
//! - `plain_accounts/<pk>` → encoded plain account
//! - `blocks/by_height/<h>` → block hash
//! - `blocks/by_hash/<hash>` → encoded block
//! - `txs/<hash>` → encoded transaction
//! - `chain/head` → encoded head record
//! - `chain/undo/<h>` → encoded undo record for the block at height `h`

use std::collections::BTreeMap;

use crate::serialize::{BufferReader, BufferWriter, CodecError, Serializable};

/// Errors from storage operations. These are internal failures: a store
/// error during block application aborts the apply.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("corrupt record under key {0}: {1}")]
    Corrupt(String, String),
}

/// Read access to the store. Implemented by both the backing store (committed
/// state) and a write transaction (committed state + staged writes).
pub trait KvRead {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get_raw(key)?.is_some())
    }
}

/// Sled-backed store.
pub struct SledStore {
    #[allow(dead_code)]
    db: sled::Db,
    tree: sled::Tree,
}

impl SledStore {
    /// Open or create a sled database at the given path.
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Io(e.to_string()))?;
        Self::from_db(db)
    }

    /// Open a temporary in-memory database (for testing).
    pub fn open_temporary() -> Result<Self, StoreError> {
        let config = sled::Config::new().temporary(true);
        let db = config.open().map_err(|e| StoreError::Io(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let tree = db
            .open_tree("chain")
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(SledStore { db, tree })
    }

    /// Begin a write transaction.
    pub fn begin_write(&self) -> StoreTx<'_> {
        StoreTx {
            store: self,
            staged: BTreeMap::new(),
            before: BTreeMap::new(),
        }
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.tree
            .flush()
            .map(|_| ())
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}

impl KvRead for SledStore {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.tree
            .get(key)
            .map(|v| v.map(|ivec| ivec.to_vec()))
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        self.tree
            .contains_key(key)
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}

/// A write transaction: staged writes over the committed state.
///
/// Nothing reaches the store until `commit`; dropping the transaction
/// discards all staged writes, so a failed block application leaves the
/// store untouched.
pub struct StoreTx<'a> {
    store: &'a SledStore,
    /// key → staged value (`None` = staged delete)
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// first-touch before-image per key
    before: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl KvRead for StoreTx<'_> {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        self.store.get_raw(key)
    }
}

impl StoreTx<'_> {
    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.record_before(key)?;
        self.staged.insert(key.to_vec(), Some(value));
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.record_before(key)?;
        self.staged.insert(key.to_vec(), None);
        Ok(())
    }

    fn record_before(&mut self, key: &[u8]) -> Result<(), StoreError> {
        if !self.before.contains_key(key) {
            let prior = self.store.get_raw(key)?;
            self.before.insert(key.to_vec(), prior);
        }
        Ok(())
    }

    /// The before-images of every key touched so far, for rewind.
    pub fn undo_record(&self) -> UndoRecord {
        UndoRecord {
            entries: self
                .before
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Apply all staged writes atomically and flush.
    pub fn commit(self) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for (key, value) in self.staged {
            match value {
                Some(bytes) => batch.insert(key, bytes),
                None => batch.remove(key),
            }
        }
        self.store
            .tree
            .apply_batch(batch)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        self.store.flush()
    }
}

/// Before-images of every key a block application touched. Restoring them
/// (in any order; keys are distinct) undoes the block exactly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoRecord {
    pub entries: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl UndoRecord {
    /// Stage the restoration of all before-images into a write transaction.
    pub fn restore_into(&self, tx: &mut StoreTx<'_>) -> Result<(), StoreError> {
        for (key, before) in &self.entries {
            match before {
                Some(value) => tx.put(key, value.clone())?,
                None => tx.delete(key)?,
            }
        }
        Ok(())
    }
}

impl Serializable for UndoRecord {
    fn write_to(&self, w: &mut BufferWriter) {
        w.write_uvarint(self.entries.len() as u64);
        for (key, value) in &self.entries {
            w.write_var_bytes(key);
            match value {
                Some(bytes) => {
                    w.write_byte(1);
                    w.write_var_bytes(bytes);
                }
                None => w.write_byte(0),
            }
        }
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        let count = r.read_uvarint()? as usize;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = r.read_var_bytes(1024)?.to_vec();
            let value = match r.read_byte()? {
                0 => None,
                _ => Some(r.read_var_bytes(crate::constants::MAX_TX_SIZE)?.to_vec()),
            };
            entries.push((key, value));
        }
        Ok(UndoRecord { entries })
    }
}

/// Store key construction.
pub mod keys {
    use crate::crypto::keys::PublicKey;
    use crate::{Asset, Hash};

    pub fn account(asset: &Asset, pk: &PublicKey) -> Vec<u8> {
        let mut key = Vec::with_capacity(9 + asset.len() + 1 + 32);
        key.extend_from_slice(b"accounts/");
        key.extend_from_slice(asset);
        key.push(b'/');
        key.extend_from_slice(pk.as_bytes());
        key
    }

    pub fn plain_account(pk: &PublicKey) -> Vec<u8> {
        let mut key = Vec::with_capacity(15 + 32);
        key.extend_from_slice(b"plain_accounts/");
        key.extend_from_slice(pk.as_bytes());
        key
    }

    pub fn block_by_height(height: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(17 + 8);
        key.extend_from_slice(b"blocks/by_height/");
        key.extend_from_slice(&height.to_be_bytes());
        key
    }

    pub fn block_by_hash(hash: &Hash) -> Vec<u8> {
        let mut key = Vec::with_capacity(15 + 32);
        key.extend_from_slice(b"blocks/by_hash/");
        key.extend_from_slice(hash);
        key
    }

    pub fn transaction(hash: &Hash) -> Vec<u8> {
        let mut key = Vec::with_capacity(4 + 32);
        key.extend_from_slice(b"txs/");
        key.extend_from_slice(hash);
        key
    }

    pub fn head() -> Vec<u8> {
        b"chain/head".to_vec()
    }

    pub fn undo(height: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(11 + 8);
        key.extend_from_slice(b"chain/undo/");
        key.extend_from_slice(&height.to_be_bytes());
        key
    }
}
