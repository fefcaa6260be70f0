//! Block model.
//!
//! A block is identified by `(height, hash)`: height is dense and monotonic
//! on the canonical chain, the hash also identifies orphans. The header
//! carries the proof-of-stake kernel chain (`prev_kernel_hash` → kernel
//! hash) the forger used to win the slot; checking the kernel against the
//! stake distribution is the forger's concern, not the core's.

use serde::{Deserialize, Serialize};

use crate::crypto::keys::PublicKey;
use crate::serialize::{BufferReader, BufferWriter, CodecError, Serializable};
use crate::transaction::Transaction;
use crate::Hash;

/// Block header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u64,
    pub height: u64,
    pub prev_hash: Hash,
    pub prev_kernel_hash: Hash,
    pub timestamp: u64,
    /// Proof-of-stake difficulty target; smaller is harder.
    pub target: u64,
    /// Merkle-free commitment to the block body: the hash of the ordered
    /// transaction fingerprints.
    pub tx_root: Hash,
    pub forger: PublicKey,
}

impl BlockHeader {
    /// The block hash: domain-separated hash of the canonical header bytes.
    pub fn hash(&self) -> Hash {
        crate::hash_domain(b"caligo.block", &self.to_bytes())
    }

    /// The kernel hash this block contributes to the proof-of-stake chain.
    pub fn kernel_hash(&self) -> Hash {
        let mut w = BufferWriter::new();
        w.write_bytes(&self.prev_kernel_hash);
        w.write_uvarint(self.timestamp);
        w.write_bytes(self.forger.as_bytes());
        crate::hash_domain(b"caligo.kernel", w.as_slice())
    }

    /// Work contributed by this block toward total difficulty.
    pub fn difficulty(&self) -> u128 {
        (u64::MAX as u128) / (self.target.max(1) as u128)
    }
}

impl Serializable for BlockHeader {
    fn write_to(&self, w: &mut BufferWriter) {
        w.write_uvarint(self.version);
        w.write_uvarint(self.height);
        w.write_bytes(&self.prev_hash);
        w.write_bytes(&self.prev_kernel_hash);
        w.write_uvarint(self.timestamp);
        w.write_uvarint(self.target);
        w.write_bytes(&self.tx_root);
        w.write_bytes(self.forger.as_bytes());
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(BlockHeader {
            version: r.read_uvarint()?,
            height: r.read_uvarint()?,
            prev_hash: r.read_array()?,
            prev_kernel_hash: r.read_array()?,
            timestamp: r.read_uvarint()?,
            target: r.read_uvarint()?,
            tx_root: r.read_array()?,
            forger: PublicKey(r.read_array()?),
        })
    }
}

/// A block with its full transactions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockComplete {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl BlockComplete {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Hash of the ordered transaction fingerprints.
    pub fn compute_tx_root(transactions: &[Transaction]) -> Hash {
        let mut w = BufferWriter::new();
        w.write_uvarint(transactions.len() as u64);
        for tx in transactions {
            w.write_bytes(&tx.hash());
        }
        crate::hash_domain(b"caligo.tx_root", w.as_slice())
    }

    /// Whether the header's tx_root matches the body.
    pub fn tx_root_valid(&self) -> bool {
        crate::constant_time_eq(
            &self.header.tx_root,
            &Self::compute_tx_root(&self.transactions),
        )
    }
}

impl Serializable for BlockComplete {
    fn write_to(&self, w: &mut BufferWriter) {
        self.header.write_to(w);
        w.write_uvarint(self.transactions.len() as u64);
        for tx in &self.transactions {
            let bytes = tx.to_bytes();
            w.write_var_bytes(&bytes);
        }
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        let header = BlockHeader::read_from(r)?;
        let count = r.read_uvarint()? as usize;
        if count > 100_000 {
            return Err(CodecError::LengthOutOfRange {
                got: count,
                max: 100_000,
            });
        }
        let mut transactions = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let bytes = r.read_var_bytes(crate::constants::MAX_TX_SIZE)?;
            transactions.push(Transaction::from_bytes(bytes)?);
        }
        Ok(BlockComplete {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::crypto::keys::Keypair;
    use crate::transaction::simple::{SimplePayload, SimpleTx};

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 0,
            height: 5,
            prev_hash: [1u8; 32],
            prev_kernel_hash: [2u8; 32],
            timestamp: 1000,
            target: crate::constants::GENESIS_TARGET,
            tx_root: [0u8; 32],
            forger: Keypair::from_seed(b"forger").public,
        }
    }

    #[test]
    fn header_hash_changes_with_fields() {
        let header = sample_header();
        let base = header.hash();
        let mut modified = header.clone();
        modified.height = 6;
        assert_ne!(base, modified.hash());
        let mut modified = header.clone();
        modified.timestamp = 1001;
        assert_ne!(base, modified.hash());
    }

    #[test]
    fn kernel_hash_depends_on_forger_and_time() {
        let header = sample_header();
        let base = header.kernel_hash();
        let mut other = header.clone();
        other.forger = Keypair::from_seed(b"other-forger").public;
        assert_ne!(base, other.kernel_hash());
        let mut other = header.clone();
        other.timestamp += 1;
        assert_ne!(base, other.kernel_hash());
        // kernel hash is independent of the tx body
        let mut other = header.clone();
        other.tx_root = [9u8; 32];
        assert_eq!(base, other.kernel_hash());
    }

    #[test]
    fn header_codec_roundtrip() {
        let header = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(BlockHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn block_codec_roundtrip() {
        let kp = Keypair::from_seed(b"block-tx");
        let tx = Transaction::Simple(SimpleTx::sign(
            SimplePayload::Normal,
            0,
            10_000,
            &kp,
            Network::Devnet,
        ));
        let mut header = sample_header();
        header.tx_root = BlockComplete::compute_tx_root(std::slice::from_ref(&tx));
        let block = BlockComplete {
            header,
            transactions: vec![tx],
        };
        assert!(block.tx_root_valid());
        let bytes = block.to_bytes();
        assert_eq!(BlockComplete::from_bytes(&bytes).unwrap(), block);
    }

    #[test]
    fn tx_root_detects_reordering() {
        let kp = Keypair::from_seed(b"reorder");
        let tx1 = Transaction::Simple(SimpleTx::sign(
            SimplePayload::Normal,
            0,
            10_000,
            &kp,
            Network::Devnet,
        ));
        let tx2 = Transaction::Simple(SimpleTx::sign(
            SimplePayload::Normal,
            1,
            10_000,
            &kp,
            Network::Devnet,
        ));
        let forward = BlockComplete::compute_tx_root(&[tx1.clone(), tx2.clone()]);
        let reversed = BlockComplete::compute_tx_root(&[tx2, tx1]);
        assert_ne!(forward, reversed);
    }

    #[test]
    fn difficulty_monotonic_in_target() {
        let mut easy = sample_header();
        easy.target = u64::MAX;
        let mut hard = sample_header();
        hard.target = u64::MAX / 1000;
        assert!(hard.difficulty() > easy.difficulty());
    }
}
