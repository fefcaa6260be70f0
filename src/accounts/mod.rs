//! Account state engines.
//!
//! Two parallel stores layered over the transactional key-value store:
//! - confidential accounts, keyed by `(asset, public_key)`, holding one
//!   ElGamal balance each (see [`Account`])
//! - plain accounts, keyed by `public_key`, holding the staking state
//!   (see [`plain`])
//!
//! Readers work over any [`KvRead`] (committed store or an open write
//! transaction); mutation goes through the `*Collection` types bound to a
//! [`StoreTx`], so every change is covered by the transaction's
//! before-images.

pub mod plain;

use serde::{Deserialize, Serialize};

use crate::crypto::elgamal::ElGamalCiphertext;
use crate::crypto::keys::PublicKey;
use crate::serialize::{BufferReader, BufferWriter, CodecError, Serializable};
use crate::store::{self, KvRead, StoreError, StoreTx};
use crate::Asset;

/// Errors from account mutations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("pending unstake queue is full")]
    PendingQueueFull,
    #[error("no delegate registered for this account")]
    NoDelegate,
}

/// A confidential account: a single homomorphic balance.
///
/// Created when first receiving an asset, never destroyed implicitly.
/// The balance is only ever mutated by homomorphic addition of transfer
/// ciphertexts; the store never learns the plaintext amount.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: ElGamalCiphertext,
}

impl Account {
    pub fn new() -> Self {
        Account {
            balance: ElGamalCiphertext::zero(),
        }
    }

    /// Apply a transfer delta homomorphically.
    pub fn credit(&mut self, delta: &ElGamalCiphertext) {
        self.balance = self.balance.add(delta);
    }
}

impl Serializable for Account {
    fn write_to(&self, w: &mut BufferWriter) {
        self.balance.write_to(w);
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Account {
            balance: ElGamalCiphertext::read_from(r)?,
        })
    }
}

fn decode<T: Serializable>(key: &[u8], bytes: &[u8]) -> Result<T, StoreError> {
    T::from_bytes(bytes)
        .map_err(|e| StoreError::Corrupt(String::from_utf8_lossy(key).into_owned(), e.to_string()))
}

/// Read-only view of the confidential accounts of one asset.
pub struct AccountsReader<'a, R: KvRead + ?Sized> {
    store: &'a R,
    asset: Asset,
}

impl<'a, R: KvRead + ?Sized> AccountsReader<'a, R> {
    pub fn new(store: &'a R, asset: Asset) -> Self {
        AccountsReader { store, asset }
    }

    pub fn get(&self, pk: &PublicKey) -> Result<Option<Account>, StoreError> {
        let key = store::keys::account(&self.asset, pk);
        match self.store.get_raw(&key)? {
            Some(bytes) => Ok(Some(decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, pk: &PublicKey) -> Result<bool, StoreError> {
        self.store.contains(&store::keys::account(&self.asset, pk))
    }
}

/// Mutable collection of the confidential accounts of one asset, bound to a
/// write transaction.
pub struct AccountsCollection<'a, 'tx> {
    tx: &'a mut StoreTx<'tx>,
    asset: Asset,
}

impl<'a, 'tx> AccountsCollection<'a, 'tx> {
    pub fn new(tx: &'a mut StoreTx<'tx>, asset: Asset) -> Self {
        AccountsCollection { tx, asset }
    }

    pub fn get(&self, pk: &PublicKey) -> Result<Option<Account>, StoreError> {
        AccountsReader::new(self.tx, self.asset).get(pk)
    }

    pub fn exists(&self, pk: &PublicKey) -> Result<bool, StoreError> {
        AccountsReader::new(self.tx, self.asset).exists(pk)
    }

    pub fn create_or_update(&mut self, pk: &PublicKey, account: &Account) -> Result<(), StoreError> {
        self.tx
            .put(&store::keys::account(&self.asset, pk), account.to_bytes())
    }

    pub fn delete(&mut self, pk: &PublicKey) -> Result<(), StoreError> {
        self.tx.delete(&store::keys::account(&self.asset, pk))
    }
}

/// Read-only view of the plain accounts.
pub struct PlainAccountsReader<'a, R: KvRead + ?Sized> {
    store: &'a R,
}

impl<'a, R: KvRead + ?Sized> PlainAccountsReader<'a, R> {
    pub fn new(store: &'a R) -> Self {
        PlainAccountsReader { store }
    }

    /// Fetch the account as seen at `at_height`: pending unstakes whose
    /// activation height has been reached are presented as unclaimed
    /// rewards. Reads never persist the drained view; block application
    /// does, and rewinds stay exact through the write transaction's
    /// before-image undo records.
    pub fn get(
        &self,
        pk: &PublicKey,
        at_height: u64,
    ) -> Result<Option<plain::PlainAccount>, StoreError> {
        let key = store::keys::plain_account(pk);
        match self.store.get_raw(&key)? {
            Some(bytes) => {
                let mut account: plain::PlainAccount = decode(&key, &bytes)?;
                account.materialize(at_height);
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    pub fn exists(&self, pk: &PublicKey) -> Result<bool, StoreError> {
        self.store.contains(&store::keys::plain_account(pk))
    }
}

/// Mutable collection of plain accounts, bound to a write transaction.
pub struct PlainAccountsCollection<'a, 'tx> {
    tx: &'a mut StoreTx<'tx>,
}

impl<'a, 'tx> PlainAccountsCollection<'a, 'tx> {
    pub fn new(tx: &'a mut StoreTx<'tx>) -> Self {
        PlainAccountsCollection { tx }
    }

    /// Fetch for mutation at `at_height`, with matured pending unstakes
    /// drained into unclaimed rewards. The caller persists the result via
    /// `create_or_update`, which is what makes the drain durable.
    pub fn get(
        &self,
        pk: &PublicKey,
        at_height: u64,
    ) -> Result<Option<plain::PlainAccount>, StoreError> {
        PlainAccountsReader::new(self.tx).get(pk, at_height)
    }

    pub fn exists(&self, pk: &PublicKey) -> Result<bool, StoreError> {
        PlainAccountsReader::new(self.tx).exists(pk)
    }

    pub fn create_or_update(
        &mut self,
        pk: &PublicKey,
        account: &plain::PlainAccount,
    ) -> Result<(), StoreError> {
        self.tx
            .put(&store::keys::plain_account(pk), account.to_bytes())
    }

    pub fn delete(&mut self, pk: &PublicKey) -> Result<(), StoreError> {
        self.tx.delete(&store::keys::plain_account(pk))
    }
}
