//! Cryptographic primitives: Ristretto keys and Schnorr signatures,
//! homomorphic ElGamal ciphertexts, the address checksum, and the
//! discrete-log table used for balance recovery.

pub mod checksum;
pub mod dlp;
pub mod elgamal;
pub mod keys;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::RngCore;

/// Generate a random scalar with full 256-bit entropy.
///
/// `Scalar::from(rng.next_u64())` would only provide 64 bits; wide reduction
/// uses the full field capacity.
pub fn random_scalar<R: RngCore>(rng: &mut R) -> Scalar {
    let mut bytes = [0u8; 64];
    rng.fill_bytes(&mut bytes);
    Scalar::from_bytes_mod_order_wide(&bytes)
}

/// Derive a scalar from a domain-separated 64-byte BLAKE3 XOF expansion.
pub fn scalar_from_hash(domain: &str, data: &[u8]) -> Scalar {
    let mut hasher = blake3::Hasher::new_derive_key(domain);
    hasher.update(data);
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// The secondary Pedersen generator `H`, derived so that nobody knows
/// `log_G(H)`.
pub fn pedersen_h_generator() -> RistrettoPoint {
    RistrettoPoint::hash_from_bytes::<sha2::Sha512>(b"Caligo/PedersenH")
}
