//! Chain update pipeline.
//!
//! A single writer applies candidate blocks: proofs are verified in
//! parallel against the parent state, then transactions apply in listed
//! order inside one write transaction (state checks run against the
//! evolving overlay, so sequential nonces within a block work). The commit
//! atomically swaps the head; the `ChainDataUpdate` is published *after*
//! commit, so a subscriber that reads the store after receiving update `U`
//! sees at least the state `U` describes.
//!
//! Fan-out uses a `tokio::sync::watch` channel: every subscriber holds its
//! own receiver, a slow subscriber observes only the newest update
//! (latest-wins coalescing), and no subscriber ever blocks the writer.
//!
//! Rewind walks head-down, restoring the per-height undo records captured
//! by each block's write transaction; rewound transactions are handed back
//! for mempool re-admission.

use std::collections::HashSet;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tokio::sync::watch;

use crate::accounts::{Account, AccountsCollection, PlainAccountsCollection};
use crate::block::BlockComplete;
use crate::config::Network;
use crate::constants::BLOCK_REWARD;
use crate::crypto::keys::PublicKey;
use crate::serialize::{BufferReader, BufferWriter, CodecError, Serializable};
use crate::store::{self, KvRead, SledStore, StoreError, StoreTx, UndoRecord};
use crate::transaction::{zether::ZetherPayloadExtra, Transaction, TxError};
use crate::Hash;

/// Errors from the chain pipeline.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ChainError {
    #[error("candidate does not extend the current head (caller retries against the new head)")]
    StaleSnapshot,
    #[error("invalid block: {0}")]
    InvalidBlock(&'static str),
    #[error("invalid transaction: {0}")]
    Tx(#[from] TxError),
    #[error("internal chain error: {0}")]
    Internal(String),
}

impl From<StoreError> for ChainError {
    fn from(e: StoreError) -> Self {
        ChainError::Internal(e.to_string())
    }
}

impl From<CodecError> for ChainError {
    fn from(e: CodecError) -> Self {
        ChainError::Internal(format!("corrupt chain record: {e}"))
    }
}

/// Snapshot published after every accepted head change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainDataUpdate {
    pub height: u64,
    pub hash: Hash,
    pub prev_hash: Hash,
    pub kernel_hash: Hash,
    pub prev_kernel_hash: Hash,
    pub timestamp: u64,
    pub tx_count: u64,
    pub target: u64,
    pub total_difficulty: u128,
}

/// The persisted head pointer.
#[derive(Clone, Debug, PartialEq, Eq)]
struct HeadRecord {
    height: u64,
    hash: Hash,
    total_difficulty: u128,
}

impl Serializable for HeadRecord {
    fn write_to(&self, w: &mut BufferWriter) {
        w.write_uvarint(self.height);
        w.write_bytes(&self.hash);
        w.write_bytes(&self.total_difficulty.to_le_bytes());
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(HeadRecord {
            height: r.read_uvarint()?,
            hash: r.read_array()?,
            total_difficulty: u128::from_le_bytes(r.read_array()?),
        })
    }
}

/// The blockchain: single-writer apply/rewind over the store, with an
/// atomically swapped head snapshot and coalescing update fan-out.
pub struct Chain {
    network: Network,
    store: Arc<SledStore>,
    /// Serializes apply/rewind; readers never take it.
    writer: tokio::sync::Mutex<()>,
    head_tx: watch::Sender<ChainDataUpdate>,
}

impl Chain {
    /// Open the chain, creating the genesis block if the store is empty.
    pub fn bootstrap(
        store: Arc<SledStore>,
        network: Network,
        genesis_timestamp: u64,
    ) -> Result<Self, ChainError> {
        let update = match store.get_raw(&store::keys::head())? {
            Some(_) => Self::update_for_head(&store)?,
            None => {
                let genesis = Self::genesis_block(network, genesis_timestamp);
                let hash = genesis.hash();
                let mut txn = store.begin_write();
                txn.put(&store::keys::block_by_hash(&hash), genesis.to_bytes())?;
                txn.put(&store::keys::block_by_height(0), hash.to_vec())?;
                let head = HeadRecord {
                    height: 0,
                    hash,
                    total_difficulty: genesis.header.difficulty(),
                };
                txn.put(&store::keys::head(), head.to_bytes())?;
                txn.commit()?;
                tracing::info!(hash = %hex::encode(&hash[..8]), "created genesis block");
                Self::make_update(&genesis, head.total_difficulty)
            }
        };
        let (head_tx, _) = watch::channel(update);
        Ok(Chain {
            network,
            store,
            writer: tokio::sync::Mutex::new(()),
            head_tx,
        })
    }

    fn genesis_block(network: Network, timestamp: u64) -> BlockComplete {
        BlockComplete {
            header: crate::block::BlockHeader {
                version: 0,
                height: 0,
                prev_hash: network.chain_id(),
                prev_kernel_hash: [0u8; 32],
                timestamp,
                target: crate::constants::GENESIS_TARGET,
                tx_root: BlockComplete::compute_tx_root(&[]),
                // the identity point; genesis is forged by nobody
                forger: PublicKey([0u8; 32]),
            },
            transactions: vec![],
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn store(&self) -> &Arc<SledStore> {
        &self.store
    }

    /// The current head snapshot (lock-free read).
    pub fn head(&self) -> ChainDataUpdate {
        self.head_tx.borrow().clone()
    }

    /// Subscribe to head updates. Each receiver coalesces: a slow
    /// subscriber observes only the newest update.
    pub fn subscribe(&self) -> watch::Receiver<ChainDataUpdate> {
        self.head_tx.subscribe()
    }

    /// The proof-of-stake target a candidate block must meet.
    pub fn current_target(&self) -> u64 {
        self.head().target
    }

    /// Apply a candidate block extending the current head.
    ///
    /// Returns the published update. `StaleSnapshot` means the candidate
    /// no longer extends the head and the caller should rebuild against
    /// the new head.
    pub async fn apply_block(&self, block: BlockComplete) -> Result<ChainDataUpdate, ChainError> {
        let _guard = self.writer.lock().await;
        let head = self.head();

        if block.header.prev_hash != head.hash || block.header.height != head.height + 1 {
            return Err(ChainError::StaleSnapshot);
        }
        if block.header.prev_kernel_hash != head.kernel_hash {
            return Err(ChainError::InvalidBlock("kernel chain mismatch"));
        }
        if block.header.timestamp <= head.timestamp {
            return Err(ChainError::InvalidBlock("timestamp not monotonic"));
        }
        if block.header.target != head.target {
            return Err(ChainError::InvalidBlock("wrong target"));
        }
        if !block.tx_root_valid() {
            return Err(ChainError::InvalidBlock("tx root mismatch"));
        }

        // No duplicate fingerprints or conflicting unique scripts in one block.
        let mut seen_hashes = HashSet::new();
        let mut seen_scripts = HashSet::new();
        let blooms: Vec<_> = block.transactions.iter().map(|tx| tx.bloom()).collect();
        for (tx, bloom) in block.transactions.iter().zip(&blooms) {
            if !seen_hashes.insert(bloom.hash) {
                return Err(ChainError::InvalidBlock("duplicate transaction"));
            }
            for key in tx.sender_scripts() {
                if key.1.unique_per_sender() && !seen_scripts.insert(key) {
                    return Err(ChainError::InvalidBlock("conflicting stake operations"));
                }
            }
        }

        // Pass 1 — structural checks and proof verification in parallel;
        // CPU-bound and state-independent.
        let network = self.network;
        block
            .transactions
            .par_iter()
            .zip(blooms.par_iter())
            .map(|(tx, bloom)| {
                tx.verify_structural(bloom)?;
                tx.verify_proofs(network)
            })
            .collect::<Result<Vec<()>, TxError>>()?;

        // Pass 2 — apply in listed order inside one write transaction.
        // State checks run against the evolving overlay.
        let height = block.header.height;
        let mut txn = self.store.begin_write();
        let mut total_fees = 0u64;
        for tx in &block.transactions {
            tx.verify_state(&txn, network, height)?;
            apply_transaction(&mut txn, tx, height)?;
            total_fees = total_fees.saturating_add(tx.fee());
        }

        // Credit fees and the block reward to the forger's stake.
        {
            let mut plain = PlainAccountsCollection::new(&mut txn);
            let mut forger = plain
                .get(&block.header.forger, height)?
                .unwrap_or_default();
            forger.credit_stake(total_fees.saturating_add(BLOCK_REWARD));
            plain.create_or_update(&block.header.forger, &forger)?;
        }

        // Block records, head pointer, then the undo record for rewind.
        let hash = block.hash();
        txn.put(&store::keys::block_by_hash(&hash), block.to_bytes())?;
        txn.put(&store::keys::block_by_height(height), hash.to_vec())?;
        for (tx, bloom) in block.transactions.iter().zip(&blooms) {
            txn.put(
                &store::keys::transaction(&bloom.hash),
                bloom.serialized.clone(),
            )?;
        }
        let head_record = HeadRecord {
            height,
            hash,
            total_difficulty: head.total_difficulty + block.header.difficulty(),
        };
        txn.put(&store::keys::head(), head_record.to_bytes())?;
        let undo = txn.undo_record();
        txn.put(&store::keys::undo(height), undo.to_bytes())?;
        txn.commit()?;

        let update = Self::make_update(&block, head_record.total_difficulty);
        tracing::info!(
            height,
            hash = %hex::encode(&hash[..8]),
            tx_count = block.transactions.len(),
            "applied block"
        );
        self.head_tx.send_replace(update.clone());
        Ok(update)
    }

    /// Rewind the head to `target_height`, restoring before-images block by
    /// block. Returns the new head update and the rewound blocks in
    /// ascending height order (for mempool re-admission).
    pub async fn rewind_to(
        &self,
        target_height: u64,
    ) -> Result<(ChainDataUpdate, Vec<BlockComplete>), ChainError> {
        let _guard = self.writer.lock().await;
        let head = self.head();
        if target_height > head.height {
            return Err(ChainError::Internal(format!(
                "rewind target {target_height} above head {}",
                head.height
            )));
        }

        let mut rewound = Vec::new();
        for height in (target_height + 1..=head.height).rev() {
            let block = self
                .block_by_height(height)?
                .ok_or_else(|| ChainError::Internal(format!("missing block at {height}")))?;
            let undo_bytes = self
                .store
                .get_raw(&store::keys::undo(height))?
                .ok_or_else(|| ChainError::Internal(format!("missing undo record at {height}")))?;
            let undo = UndoRecord::from_bytes(&undo_bytes)?;

            let mut txn = self.store.begin_write();
            undo.restore_into(&mut txn)?;
            txn.delete(&store::keys::undo(height))?;
            txn.commit()?;
            rewound.push(block);
        }
        rewound.reverse();

        let update = Self::update_for_head(&self.store)?;
        tracing::info!(
            from = head.height,
            to = update.height,
            blocks = rewound.len(),
            "rewound chain"
        );
        self.head_tx.send_replace(update.clone());
        Ok((update, rewound))
    }

    /// Fetch a block by height on the canonical chain.
    pub fn block_by_height(&self, height: u64) -> Result<Option<BlockComplete>, ChainError> {
        let Some(hash_bytes) = self.store.get_raw(&store::keys::block_by_height(height))? else {
            return Ok(None);
        };
        let hash: Hash = hash_bytes
            .as_slice()
            .try_into()
            .map_err(|_| ChainError::Internal("corrupt height index".into()))?;
        self.block_by_hash(&hash)
    }

    /// Fetch a block by hash.
    pub fn block_by_hash(&self, hash: &Hash) -> Result<Option<BlockComplete>, ChainError> {
        match self.store.get_raw(&store::keys::block_by_hash(hash))? {
            Some(bytes) => Ok(Some(BlockComplete::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn update_for_head(store: &SledStore) -> Result<ChainDataUpdate, ChainError> {
        let head_bytes = store
            .get_raw(&store::keys::head())?
            .ok_or_else(|| ChainError::Internal("missing head record".into()))?;
        let head = HeadRecord::from_bytes(&head_bytes)?;
        let block_bytes = store
            .get_raw(&store::keys::block_by_hash(&head.hash))?
            .ok_or_else(|| ChainError::Internal("missing head block".into()))?;
        let block = BlockComplete::from_bytes(&block_bytes)?;
        Ok(Self::make_update(&block, head.total_difficulty))
    }

    fn make_update(block: &BlockComplete, total_difficulty: u128) -> ChainDataUpdate {
        ChainDataUpdate {
            height: block.header.height,
            hash: block.hash(),
            prev_hash: block.header.prev_hash,
            kernel_hash: block.header.kernel_hash(),
            prev_kernel_hash: block.header.prev_kernel_hash,
            timestamp: block.header.timestamp,
            tx_count: block.transactions.len() as u64,
            target: block.header.target,
            total_difficulty,
        }
    }
}

/// Apply one verified transaction to the state overlay at `height`.
fn apply_transaction(
    txn: &mut StoreTx<'_>,
    tx: &Transaction,
    height: u64,
) -> Result<(), ChainError> {
    match tx {
        Transaction::Simple(stx) => {
            let mut plain = PlainAccountsCollection::new(txn);
            let mut account = plain
                .get(&stx.sender, height)?
                .ok_or(ChainError::Internal("verified sender vanished".into()))?;
            account.nonce += 1;
            account
                .debit_available(stx.fee)
                .map_err(TxError::Funds)?;
            match &stx.payload {
                crate::transaction::simple::SimplePayload::Normal => {}
                crate::transaction::simple::SimplePayload::Unstake { amount } => {
                    account.unstake(*amount, height).map_err(TxError::Funds)?;
                }
                crate::transaction::simple::SimplePayload::UpdateDelegate { delegate } => {
                    account.set_delegate(*delegate);
                }
            }
            plain.create_or_update(&stx.sender, &account)?;
        }
        Transaction::Zether(ztx) => {
            for payload in &ztx.payloads {
                let d = curve25519_dalek::ristretto::CompressedRistretto(payload.statement.d)
                    .decompress()
                    .ok_or(TxError::InvalidProof("bad point: D"))?;
                {
                    let mut accounts = AccountsCollection::new(txn, payload.asset);
                    for member in &payload.statement.ring {
                        let mut account =
                            accounts.get(&member.public_key)?.unwrap_or_else(Account::new);
                        let delta = member
                            .ciphertext(&d)
                            .ok_or(TxError::InvalidProof("bad point: delta"))?;
                        account.credit(&delta);
                        accounts.create_or_update(&member.public_key, &account)?;
                    }
                }
                if let ZetherPayloadExtra::ClaimStake {
                    claimer, amount, ..
                } = &payload.extra
                {
                    let mut plain = PlainAccountsCollection::new(txn);
                    let mut account = plain
                        .get(claimer, height)?
                        .ok_or(ChainError::Internal("verified claimer vanished".into()))?;
                    account.claim_rewards(*amount).map_err(TxError::Funds)?;
                    account.nonce += 1;
                    plain.create_or_update(claimer, &account)?;
                }
            }
        }
    }
    Ok(())
}
