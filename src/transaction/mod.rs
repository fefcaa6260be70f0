//! Transaction model.
//!
//! A transaction is a tagged union over `Simple` (plaintext, stake-related,
//! Schnorr-signed) and `Zether` (confidential, ring-hidden) variants. The
//! serialized form is deterministic: variant tags as single bytes, integers
//! as uvarints, byte arrays length-prefixed. The 32-byte hash of the
//! canonical serialization is the transaction's fingerprint, used as its
//! identity everywhere (mempool index, store key, block body).
//!
//! Verification is staged and short-circuits: structural (parse, version,
//! size, minimum fee), then the cached bloom, then the per-variant semantic
//! checks against a head snapshot (see `simple` and `zether`).

pub mod simple;
pub mod zether;

use crate::accounts::AccountError;
use crate::config::Network;
use crate::constants::{FEE_PER_BYTE, MAX_TX_SIZE};
use crate::crypto::keys::PublicKey;
use crate::serialize::{BufferReader, BufferWriter, CodecError, Serializable};
use crate::store::{KvRead, StoreError};
use crate::Hash;

use simple::SimpleTx;
use zether::ZetherTx;

/// Variant tag bytes of the wire format.
const TAG_SIMPLE: u8 = 0;
const TAG_ZETHER: u8 = 1;

/// Transaction verification errors.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TxError {
    #[error("malformed transaction bytes: {0}")]
    Malformed(#[from] CodecError),
    #[error("unknown transaction or payload version")]
    InvalidVersion,
    #[error("transaction size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
    #[error("fee {fee} below minimum {min} for this size")]
    FeeTooLow { fee: u64, min: u64 },
    #[error("amount must be positive")]
    ZeroAmount,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("invalid proof: {0}")]
    InvalidProof(&'static str),
    #[error("ring size {got} invalid (power of two in {min}..={max} required)")]
    InvalidRingSize { got: usize, min: usize, max: usize },
    #[error("duplicate ring member")]
    DuplicateRingMember,
    #[error("ring member is not registered and carries no registration")]
    UnregisteredRingMember,
    #[error("sender plain account not found")]
    SenderNotFound,
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("chain reference stale or unknown")]
    StaleReference,
    #[error("too many confidential payloads")]
    TooManyPayloads,
    #[error(transparent)]
    Funds(#[from] AccountError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Script tag identifying what a transaction does, for mempool uniqueness
/// predicates and existence queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScriptTag {
    SimpleNormal,
    SimpleUnstake,
    SimpleUpdateDelegate,
    ZetherTransfer,
    ZetherClaimStake,
}

impl ScriptTag {
    /// Whether at most one pending transaction per `(sender, script)` is
    /// allowed in the mempool.
    pub fn unique_per_sender(&self) -> bool {
        matches!(
            self,
            ScriptTag::SimpleUnstake | ScriptTag::SimpleUpdateDelegate | ScriptTag::ZetherClaimStake
        )
    }
}

/// The cached canonical serialization and fingerprint of a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxBloom {
    pub serialized: Vec<u8>,
    pub hash: Hash,
}

/// A transaction: plaintext stake operation or confidential transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    Simple(SimpleTx),
    Zether(ZetherTx),
}

impl Transaction {
    /// Total fee carried by the transaction.
    pub fn fee(&self) -> u64 {
        match self {
            Transaction::Simple(tx) => tx.fee,
            Transaction::Zether(tx) => tx.fee(),
        }
    }

    /// Serialize and fingerprint. Callers on hot paths compute this once
    /// and carry the bloom alongside the transaction.
    pub fn bloom(&self) -> TxBloom {
        let serialized = self.to_bytes();
        let hash = crate::hash_domain(b"caligo.tx", &serialized);
        TxBloom { serialized, hash }
    }

    /// The transaction fingerprint.
    pub fn hash(&self) -> Hash {
        self.bloom().hash
    }

    /// The `(sender, script)` pairs this transaction occupies for mempool
    /// uniqueness predicates.
    pub fn sender_scripts(&self) -> Vec<(PublicKey, ScriptTag)> {
        match self {
            Transaction::Simple(tx) => vec![(tx.sender, tx.script_tag())],
            Transaction::Zether(tx) => tx
                .payloads
                .iter()
                .filter_map(|p| match &p.extra {
                    zether::ZetherPayloadExtra::Transfer => None,
                    zether::ZetherPayloadExtra::ClaimStake { claimer, .. } => {
                        Some((*claimer, ScriptTag::ZetherClaimStake))
                    }
                })
                .collect(),
        }
    }

    /// Stage 1: structural checks that need no state.
    pub fn verify_structural(&self, bloom: &TxBloom) -> Result<(), TxError> {
        let size = bloom.serialized.len();
        if size > MAX_TX_SIZE {
            return Err(TxError::TooLarge {
                size,
                max: MAX_TX_SIZE,
            });
        }
        let min_fee = (size as u64).saturating_mul(FEE_PER_BYTE);
        if self.fee() < min_fee {
            return Err(TxError::FeeTooLow {
                fee: self.fee(),
                min: min_fee,
            });
        }
        match self {
            Transaction::Simple(tx) => tx.verify_structural(),
            Transaction::Zether(tx) => tx.verify_structural(),
        }
    }

    /// CPU-bound, state-independent checks: signatures and zero-knowledge
    /// proofs. Safe to run in parallel across transactions.
    pub fn verify_proofs(&self, network: Network) -> Result<(), TxError> {
        match self {
            Transaction::Simple(tx) => tx.verify_proofs(network),
            Transaction::Zether(tx) => tx.verify_proofs(network),
        }
    }

    /// State-dependent checks against a snapshot at `head_height`: account
    /// existence, balances, nonces, chain references. Never mutates state.
    pub fn verify_state<R: KvRead + ?Sized>(
        &self,
        store: &R,
        network: Network,
        head_height: u64,
    ) -> Result<(), TxError> {
        match self {
            Transaction::Simple(tx) => tx.verify_state(store, head_height),
            Transaction::Zether(tx) => tx.verify_state(store, network, head_height),
        }
    }

    /// Stage 3: full semantic verification (proofs + state) against a
    /// snapshot at `head_height`. Never mutates state.
    pub fn verify_semantic<R: KvRead + ?Sized>(
        &self,
        store: &R,
        network: Network,
        head_height: u64,
    ) -> Result<(), TxError> {
        self.verify_proofs(network)?;
        self.verify_state(store, network, head_height)
    }

    /// Full verification: structural, then semantic.
    pub fn verify<R: KvRead + ?Sized>(
        &self,
        bloom: &TxBloom,
        store: &R,
        network: Network,
        head_height: u64,
    ) -> Result<(), TxError> {
        self.verify_structural(bloom)?;
        self.verify_semantic(store, network, head_height)
    }
}

impl Serializable for Transaction {
    fn write_to(&self, w: &mut BufferWriter) {
        match self {
            Transaction::Simple(tx) => {
                w.write_byte(TAG_SIMPLE);
                tx.write_to(w);
            }
            Transaction::Zether(tx) => {
                w.write_byte(TAG_ZETHER);
                tx.write_to(w);
            }
        }
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        match r.read_byte()? {
            TAG_SIMPLE => Ok(Transaction::Simple(SimpleTx::read_from(r)?)),
            TAG_ZETHER => Ok(Transaction::Zether(ZetherTx::read_from(r)?)),
            other => Err(CodecError::LengthOutOfRange {
                got: other as usize,
                max: TAG_ZETHER as usize,
            }),
        }
    }
}

/// Parse a transaction, rejecting unknown versions with `InvalidVersion`.
pub fn parse(bytes: &[u8]) -> Result<Transaction, TxError> {
    if bytes.len() > MAX_TX_SIZE {
        return Err(TxError::TooLarge {
            size: bytes.len(),
            max: MAX_TX_SIZE,
        });
    }
    match bytes.first() {
        Some(&TAG_SIMPLE) | Some(&TAG_ZETHER) => {}
        Some(_) => return Err(TxError::InvalidVersion),
        None => {
            return Err(TxError::Malformed(CodecError::Truncated { needed: 1 }));
        }
    }
    Ok(Transaction::from_bytes(bytes)?)
}
