//! In-process node handles.
//!
//! The boundary the external collaborators (API surface, forger, wallet UI)
//! talk to: block/transaction/account queries, mempool admission with
//! deadline and cancellation, chain update subscription, and block
//! proposal. HTTP/WebSocket transport, peer sync and the forging loop
//! live outside the core.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::accounts::{plain::PlainAccount, Account, AccountsReader, PlainAccountsReader};
use crate::block::BlockComplete;
use crate::chain::{Chain, ChainDataUpdate, ChainError};
use crate::config::CaligoConfig;
use crate::crypto::keys::PublicKey;
use crate::mempool::{Mempool, MempoolError, MempoolStats};
use crate::serialize::Serializable;
use crate::store::{self, KvRead, SledStore, StoreError};
use crate::transaction::Transaction;
use crate::{Asset, Hash};

/// A running node core.
pub struct Node {
    config: CaligoConfig,
    store: Arc<SledStore>,
    chain: Arc<Chain>,
    mempool: Arc<Mutex<Mempool>>,
}

impl Node {
    /// Open (or create) the node under the configured data directory.
    pub fn open(config: CaligoConfig, genesis_timestamp: u64) -> Result<Self, ChainError> {
        let path = std::path::Path::new(&config.node.data_dir).join("chain");
        let store = Arc::new(SledStore::open(&path).map_err(ChainError::from)?);
        Self::with_store(config, store, genesis_timestamp)
    }

    /// Open over an existing store (used by tests and embedders).
    pub fn with_store(
        config: CaligoConfig,
        store: Arc<SledStore>,
        genesis_timestamp: u64,
    ) -> Result<Self, ChainError> {
        let chain = Arc::new(Chain::bootstrap(
            store.clone(),
            config.network,
            genesis_timestamp,
        )?);
        let mempool = Arc::new(Mutex::new(Mempool::new(config.mempool.clone())));
        Ok(Node {
            config,
            store,
            chain,
            mempool,
        })
    }

    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    pub fn config(&self) -> &CaligoConfig {
        &self.config
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<BlockComplete>, ChainError> {
        self.chain.block_by_height(height)
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<BlockComplete>, ChainError> {
        self.chain.block_by_hash(hash)
    }

    /// Look up a transaction: pending pool first, then finalized store.
    pub fn get_transaction(&self, hash: &Hash) -> Result<Option<Transaction>, StoreError> {
        if let Some(tx) = self.mempool.lock().expect("mempool lock").get(hash).cloned() {
            return Ok(Some(tx));
        }
        match self.store.get_raw(&store::keys::transaction(hash))? {
            Some(bytes) => Ok(Some(Transaction::from_bytes(&bytes).map_err(|e| {
                StoreError::Corrupt(hex::encode(hash), e.to_string())
            })?)),
            None => Ok(None),
        }
    }

    pub fn get_account(
        &self,
        asset: &Asset,
        pk: &PublicKey,
    ) -> Result<Option<Account>, StoreError> {
        AccountsReader::new(self.store.as_ref(), *asset).get(pk)
    }

    /// The plain account as seen at the current head (pending unstakes
    /// materialized).
    pub fn get_plain_account(&self, pk: &PublicKey) -> Result<Option<PlainAccount>, StoreError> {
        let head = self.chain.head();
        PlainAccountsReader::new(self.store.as_ref()).get(pk, head.height)
    }

    pub fn get_mempool(&self) -> Vec<Transaction> {
        self.mempool.lock().expect("mempool lock").pending_in_order()
    }

    pub fn mempool_stats(&self) -> MempoolStats {
        self.mempool.lock().expect("mempool lock").stats()
    }

    pub fn subscribe_chain_updates(&self) -> tokio::sync::watch::Receiver<ChainDataUpdate> {
        self.chain.subscribe()
    }

    pub fn current_target(&self) -> u64 {
        self.chain.current_target()
    }

    // ── Mempool admission ───────────────────────────────────────────────

    /// Verify and admit a transaction.
    ///
    /// Verification runs against the current head snapshot *before* the
    /// pool lock is taken; a transaction verified at height `H` may be
    /// re-verified at `H+1` on the next chain advance. Network-sourced
    /// callers pass an admission `deadline` and a cancellation token.
    pub fn mempool_insert(
        &self,
        tx: Transaction,
        deadline: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Hash, MempoolError> {
        let started = Instant::now();
        let expired = |started: Instant| match deadline {
            Some(limit) => started.elapsed() > limit,
            None => false,
        };
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(MempoolError::Cancelled);
        }

        let bloom = tx.bloom();
        let head = self.chain.head();
        tx.verify(&bloom, self.store.as_ref(), self.config.network, head.height)?;

        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(MempoolError::Cancelled);
        }
        if expired(started) {
            return Err(MempoolError::Timeout);
        }

        let mut pool = self.mempool.lock().expect("mempool lock");
        pool.insert(tx, bloom)
    }

    // ── Chain writes ────────────────────────────────────────────────────

    /// Apply a candidate block and synchronize the mempool with the new
    /// head (drop included transactions, evict entries that turned
    /// invalid).
    pub async fn apply_block(&self, block: BlockComplete) -> Result<ChainDataUpdate, ChainError> {
        let included: Vec<Hash> = block.transactions.iter().map(|tx| tx.hash()).collect();
        let update = self.chain.apply_block(block).await?;
        let mut pool = self.mempool.lock().expect("mempool lock");
        pool.on_block_applied(
            &included,
            self.store.as_ref(),
            self.config.network,
            update.height,
        );
        Ok(update)
    }

    /// Rewind to `target_height` and re-admit the rewound transactions.
    pub async fn rewind_to(&self, target_height: u64) -> Result<ChainDataUpdate, ChainError> {
        let (update, rewound) = self.chain.rewind_to(target_height).await?;
        let transactions: Vec<Transaction> = rewound
            .into_iter()
            .flat_map(|block| block.transactions)
            .collect();
        let mut pool = self.mempool.lock().expect("mempool lock");
        pool.on_block_rewound(transactions);
        Ok(update)
    }

    // ── Forger boundary ─────────────────────────────────────────────────

    /// Select pending transactions for a proposal, bounded by size.
    pub fn select_transactions(&self, max_bytes: usize) -> Vec<Transaction> {
        self.mempool
            .lock()
            .expect("mempool lock")
            .select_for_block(max_bytes)
    }

    /// Assemble a candidate block over the given transactions with the
    /// forger's kernel. Checking the kernel against the stake distribution
    /// is the forger's job; the block still has to pass `apply_block`.
    pub fn propose_block(
        &self,
        transactions: Vec<Transaction>,
        forger: PublicKey,
        timestamp: u64,
    ) -> BlockComplete {
        let head = self.chain.head();
        BlockComplete {
            header: crate::block::BlockHeader {
                version: 0,
                height: head.height + 1,
                prev_hash: head.hash,
                prev_kernel_hash: head.kernel_hash,
                timestamp,
                target: head.target,
                tx_root: BlockComplete::compute_tx_root(&transactions),
                forger,
            },
            transactions,
        }
    }
}
