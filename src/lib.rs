//! # Caligo
//!
//! A privacy-preserving proof-of-stake cryptocurrency node core:
//! - **Confidential balances** — per-(asset, key) ElGamal ciphertexts over
//!   Ristretto; transfers mutate balances only by homomorphic addition
//! - **Ring-hidden transfers** — a σ-protocol proves balance conservation
//!   over an anonymity ring, bulletproofs prove amount ranges
//! - **Delegated staking** — plain accounts carry stake, pending unstakes
//!   and unclaimed rewards; claims mint confidential balance in zero knowledge
//! - **Fork-capable chain pipeline** — single-writer block apply/rewind with
//!   exact before-image undo and coalescing head-update fan-out
//!
//! The HTTP/WebSocket surface, peer discovery, CLI and the forging loop are
//! external collaborators; the core exposes in-process handles (see `node`).

pub mod accounts;
pub mod address;
pub mod block;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod mempool;
pub mod node;
pub mod serialize;
pub mod store;
pub mod transaction;
pub mod wallet;

/// Protocol constants
pub mod constants {
    /// Length of the human-readable network prefix on encoded addresses
    pub const NETWORK_PREFIX_LENGTH: usize = 3;
    /// Compressed Ristretto point size; public keys are exactly this long
    pub const PUBLIC_KEY_SIZE: usize = 32;
    /// Schnorr signature size (R ∥ s)
    pub const SIGNATURE_SIZE: usize = 64;
    /// Address checksum size in bytes
    pub const CHECKSUM_SIZE: usize = 4;
    /// Payment id length carried by integrated addresses
    pub const PAYMENT_ID_SIZE: usize = 8;
    /// Asset identifier length
    pub const ASSET_LENGTH: usize = 20;
    /// The native coin of the chain
    pub const NATIVE_ASSET: crate::Asset = [0u8; ASSET_LENGTH];

    /// Maximum serialized transaction size (64 KiB)
    pub const MAX_TX_SIZE: usize = 64 * 1024;
    /// Minimum fee per serialized byte
    pub const FEE_PER_BYTE: u64 = 10;
    /// Maximum confidential payloads per zether transaction
    pub const MAX_ZETHER_PAYLOADS: usize = 4;
    /// Minimum anonymity ring size
    pub const MIN_RING_SIZE: usize = 2;
    /// Maximum anonymity ring size (must be a power of two)
    pub const MAX_RING_SIZE: usize = 64;
    /// How far behind the head a zether chain reference may lag
    pub const ZETHER_REF_WINDOW: u64 = 32;

    /// Blocks between an unstake and its activation
    pub const UNSTAKE_WINDOW: u64 = 64;
    /// Maximum queued pending unstakes per account
    pub const MAX_PENDING_UNSTAKES: usize = 32;
    /// Flat reward credited to the forger of each block
    pub const BLOCK_REWARD: u64 = 5_000;

    /// Proof-of-stake target for the genesis block
    pub const GENESIS_TARGET: u64 = u64::MAX / 1_000;

    /// Maximum number of transactions held in the mempool
    pub const MEMPOOL_MAX_TXS: usize = 10_000;
    /// Maximum total serialized size of pooled transactions (32 MiB)
    pub const MEMPOOL_MAX_BYTES: usize = 32 * 1024 * 1024;

    /// Largest balance recoverable by the wallet's DLP brute force (2^40)
    pub const DLP_MAX_BALANCE_BITS: u32 = 40;
}

/// 32-byte hash used throughout the protocol
pub type Hash = [u8; 32];

/// 20-byte asset identifier
pub type Asset = [u8; constants::ASSET_LENGTH];

/// Compute a domain-separated BLAKE3 hash.
///
/// The domain must be valid UTF-8 (all Caligo domains are ASCII); passing a
/// non-UTF-8 domain is a programming error and panics.
pub fn hash_domain(domain: &[u8], data: &[u8]) -> Hash {
    let domain_str = std::str::from_utf8(domain).expect("hash_domain: domain must be valid UTF-8");
    let mut hasher = blake3::Hasher::new_derive_key(domain_str);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Constant-time comparison of two byte slices.
///
/// Returns true only if the slices have equal length and identical contents.
/// The length comparison itself is not constant-time; all Caligo uses compare
/// fixed-size hashes and checksums.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_domain_separates() {
        let a = hash_domain(b"caligo.test.a", b"data");
        let b = hash_domain(b"caligo.test.b", b"data");
        assert_ne!(a, b);
    }

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn max_ring_size_is_power_of_two() {
        assert!(constants::MAX_RING_SIZE.is_power_of_two());
    }
}
