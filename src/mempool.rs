//! Transaction mempool.
//!
//! Pending transactions are indexed by fingerprint, with a secondary index
//! over `(sender, script)` enforcing the per-sender uniqueness predicates:
//! at most one pending unstake, delegate update, or stake claim per sender.
//! Selection for block proposal is insertion-ordered (first come, first
//! served).
//!
//! The pool does no verification itself: callers verify against a head
//! snapshot *before* taking the pool lock, so no user code runs under it
//! (admission re-checks only the O(1) index predicates). On every chain
//! advance, included transactions are dropped and the remainder is
//! revalidated against the new head; on rewind, the rewound block's
//! transactions are re-admitted in their original order.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::config::MempoolConfig;
use crate::crypto::keys::PublicKey;
use crate::store::KvRead;
use crate::transaction::{ScriptTag, Transaction, TxBloom, TxError};
use crate::Hash;

/// Errors from mempool admission. Never fatal to the node.
#[derive(Clone, Debug, thiserror::Error)]
pub enum MempoolError {
    #[error("transaction already pending")]
    AlreadyPresent,
    #[error("a conflicting transaction from this sender is already pending")]
    ConflictingPending,
    #[error("mempool is full")]
    PoolFull,
    #[error("verification failed: {0}")]
    Verification(#[from] TxError),
    #[error("admission deadline expired")]
    Timeout,
    #[error("admission cancelled")]
    Cancelled,
}

/// A pooled transaction with its cached serialization and index entries.
#[derive(Clone, Debug)]
pub struct TxEntry {
    pub tx: Transaction,
    pub bloom: TxBloom,
    /// `(sender, script)` pairs held in the uniqueness index.
    unique_scripts: Vec<(PublicKey, ScriptTag)>,
    sequence: u64,
}

/// Summary statistics for API handles.
#[derive(Clone, Debug, Serialize)]
pub struct MempoolStats {
    pub transaction_count: usize,
    pub total_bytes: usize,
    pub max_transactions: usize,
    pub max_bytes: usize,
}

/// Fingerprint-indexed pool of pending transactions.
pub struct Mempool {
    config: MempoolConfig,
    by_hash: HashMap<Hash, TxEntry>,
    by_sender_script: HashMap<(PublicKey, ScriptTag), Hash>,
    /// Admission order for fair selection.
    order: VecDeque<Hash>,
    total_bytes: usize,
    sequence: u64,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Mempool {
            config,
            by_hash: HashMap::new(),
            by_sender_script: HashMap::new(),
            order: VecDeque::new(),
            total_bytes: 0,
            sequence: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MempoolConfig::default())
    }

    /// Admit a pre-verified transaction.
    ///
    /// The caller has already run structural and semantic verification
    /// against a head snapshot; this only applies the index predicates and
    /// inserts atomically.
    pub fn insert(&mut self, tx: Transaction, bloom: TxBloom) -> Result<Hash, MempoolError> {
        if self.by_hash.contains_key(&bloom.hash) {
            return Err(MempoolError::AlreadyPresent);
        }
        let unique_scripts: Vec<(PublicKey, ScriptTag)> = tx
            .sender_scripts()
            .into_iter()
            .filter(|(_, script)| script.unique_per_sender())
            .collect();
        for key in &unique_scripts {
            if self.by_sender_script.contains_key(key) {
                return Err(MempoolError::ConflictingPending);
            }
        }
        if self.by_hash.len() >= self.config.max_transactions
            || self.total_bytes + bloom.serialized.len() > self.config.max_bytes
        {
            return Err(MempoolError::PoolFull);
        }

        let hash = bloom.hash;
        for key in &unique_scripts {
            self.by_sender_script.insert(*key, hash);
        }
        self.order.push_back(hash);
        self.total_bytes += bloom.serialized.len();
        let sequence = self.sequence;
        self.sequence += 1;
        self.by_hash.insert(
            hash,
            TxEntry {
                tx,
                bloom,
                unique_scripts,
                sequence,
            },
        );
        Ok(hash)
    }

    /// Remove a transaction by fingerprint, cleaning up all indices.
    pub fn remove(&mut self, hash: &Hash) -> Option<Transaction> {
        let entry = self.by_hash.remove(hash)?;
        for key in &entry.unique_scripts {
            self.by_sender_script.remove(key);
        }
        self.order.retain(|h| h != hash);
        self.total_bytes -= entry.bloom.serialized.len();
        Some(entry.tx)
    }

    /// O(1): is this fingerprint pending?
    pub fn exists(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// O(1): does the sender have a pending simple transaction of this
    /// uniqueness-constrained script?
    pub fn exists_tx_simple_version(&self, sender: &PublicKey, script: ScriptTag) -> bool {
        matches!(
            script,
            ScriptTag::SimpleUnstake | ScriptTag::SimpleUpdateDelegate
        ) && self.by_sender_script.contains_key(&(*sender, script))
    }

    /// O(1): does the sender have a pending zether transaction of this
    /// uniqueness-constrained script?
    pub fn exists_tx_zether_version(&self, sender: &PublicKey, script: ScriptTag) -> bool {
        matches!(script, ScriptTag::ZetherClaimStake)
            && self.by_sender_script.contains_key(&(*sender, script))
    }

    pub fn get(&self, hash: &Hash) -> Option<&Transaction> {
        self.by_hash.get(hash).map(|e| &e.tx)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// All pending transactions in admission order.
    pub fn pending_in_order(&self) -> Vec<Transaction> {
        self.order
            .iter()
            .filter_map(|h| self.by_hash.get(h))
            .map(|e| e.tx.clone())
            .collect()
    }

    /// Select transactions for a block proposal: admission order, bounded
    /// by serialized size. Does not remove them; eviction happens when the
    /// forged block is applied.
    pub fn select_for_block(&self, max_bytes: usize) -> Vec<Transaction> {
        let mut selected = Vec::new();
        let mut used = 0usize;
        for hash in &self.order {
            let Some(entry) = self.by_hash.get(hash) else {
                continue;
            };
            let size = entry.bloom.serialized.len();
            if used + size > max_bytes {
                continue;
            }
            used += size;
            selected.push(entry.tx.clone());
        }
        selected
    }

    /// React to a new block at `head_height`: drop included transactions,
    /// revalidate the remainder against the new head and evict entries
    /// that turned invalid (nonce consumed, stake drained, stale chain
    /// reference). Returns the evicted fingerprints.
    pub fn on_block_applied<R: KvRead + ?Sized>(
        &mut self,
        included: &[Hash],
        store: &R,
        network: crate::config::Network,
        head_height: u64,
    ) -> Vec<Hash> {
        for hash in included {
            self.remove(hash);
        }
        let mut evicted = Vec::new();
        let pending: Vec<Hash> = self.order.iter().copied().collect();
        for hash in pending {
            let Some(entry) = self.by_hash.get(&hash) else {
                continue;
            };
            if entry
                .tx
                .verify_semantic(store, network, head_height)
                .is_err()
            {
                self.remove(&hash);
                evicted.push(hash);
            }
        }
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted stale mempool entries");
        }
        evicted
    }

    /// Re-admit the transactions of a rewound block, preserving their
    /// in-block order ahead of later arrivals where possible. Conflicts and
    /// duplicates are skipped.
    pub fn on_block_rewound(&mut self, transactions: Vec<Transaction>) -> usize {
        let mut readmitted = 0;
        // Push in reverse so front-insertion restores the block order.
        for tx in transactions.into_iter().rev() {
            let bloom = tx.bloom();
            let hash = bloom.hash;
            match self.insert(tx, bloom) {
                Ok(_) => {
                    // move from back to front to keep pre-rewind ordering
                    self.order.retain(|h| h != &hash);
                    self.order.push_front(hash);
                    readmitted += 1;
                }
                Err(_) => {}
            }
        }
        readmitted
    }

    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            transaction_count: self.by_hash.len(),
            total_bytes: self.total_bytes,
            max_transactions: self.config.max_transactions,
            max_bytes: self.config.max_bytes,
        }
    }

    /// Index consistency: every uniqueness entry points at a pooled
    /// transaction that owns it, and vice versa. Exercised by tests.
    #[cfg(test)]
    fn check_consistency(&self) {
        for (key, hash) in &self.by_sender_script {
            let entry = self.by_hash.get(hash).expect("dangling uniqueness entry");
            assert!(entry.unique_scripts.contains(key));
        }
        for (hash, entry) in &self.by_hash {
            for key in &entry.unique_scripts {
                assert_eq!(self.by_sender_script.get(key), Some(hash));
            }
            assert!(self.order.contains(hash));
        }
        assert_eq!(self.order.len(), self.by_hash.len());
    }
}
