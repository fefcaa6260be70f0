//! Homomorphic ElGamal ciphertexts over Ristretto.
//!
//! A balance `b` encrypted to public key `P` is the pair
//! `(C, D) = (b·G + r·P, r·G)`. Adding two ciphertexts componentwise adds
//! the underlying balances, so account balances are only ever mutated by
//! homomorphic addition of transfer deltas. The zero element is the identity
//! pair `(∞, ∞)`: any account starts from it and `zero + ct = ct`.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT as G;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use serde::{Deserialize, Serialize};

use crate::serialize::{BufferReader, BufferWriter, CodecError, Serializable};

/// Serialized size of a ciphertext (two compressed points).
pub const CIPHERTEXT_SIZE: usize = 64;

/// An ElGamal ciphertext `(C, D)` hiding a balance.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ElGamalCiphertext {
    pub c: RistrettoPoint,
    pub d: RistrettoPoint,
}

impl ElGamalCiphertext {
    /// The ciphertext of zero under any key: `(∞, ∞)`.
    pub fn zero() -> Self {
        ElGamalCiphertext {
            c: RistrettoPoint::identity(),
            d: RistrettoPoint::identity(),
        }
    }

    /// Encrypt `amount` to `public_key` with randomness `r`:
    /// `C = amount·G + r·P`, `D = r·G`.
    pub fn encrypt(amount: u64, public_key: &RistrettoPoint, r: &Scalar) -> Self {
        ElGamalCiphertext {
            c: Scalar::from(amount) * G + r * public_key,
            d: r * G,
        }
    }

    /// Homomorphic addition.
    pub fn add(&self, other: &ElGamalCiphertext) -> Self {
        ElGamalCiphertext {
            c: self.c + other.c,
            d: self.d + other.d,
        }
    }

    /// Homomorphic subtraction.
    pub fn sub(&self, other: &ElGamalCiphertext) -> Self {
        ElGamalCiphertext {
            c: self.c - other.c,
            d: self.d - other.d,
        }
    }

    /// Strip the blinding with the account's secret key, leaving `b·G`.
    ///
    /// `C - x·D = b·G + r·(x·G)·1 - x·(r·G) = b·G`. Recovering `b` from
    /// `b·G` is the wallet's bounded discrete-log search (see `dlp`).
    pub fn decrypt_point(&self, secret: &super::keys::SecretKey) -> RistrettoPoint {
        self.c - secret.scalar() * self.d
    }

    pub fn to_bytes(&self) -> [u8; CIPHERTEXT_SIZE] {
        let mut out = [0u8; CIPHERTEXT_SIZE];
        out[..32].copy_from_slice(self.c.compress().as_bytes());
        out[32..].copy_from_slice(self.d.compress().as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CIPHERTEXT_SIZE {
            return None;
        }
        let c = CompressedRistretto::from_slice(&bytes[..32]).ok()?.decompress()?;
        let d = CompressedRistretto::from_slice(&bytes[32..]).ok()?.decompress()?;
        Some(ElGamalCiphertext { c, d })
    }
}

impl Default for ElGamalCiphertext {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Debug for ElGamalCiphertext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ElGamalCiphertext(C={}, D={})",
            hex::encode(&self.c.compress().to_bytes()[..8]),
            hex::encode(&self.d.compress().to_bytes()[..8])
        )
    }
}

impl Serializable for ElGamalCiphertext {
    fn write_to(&self, w: &mut BufferWriter) {
        w.write_bytes(&self.to_bytes());
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        let bytes: [u8; CIPHERTEXT_SIZE] = r.read_array()?;
        ElGamalCiphertext::from_bytes(&bytes).ok_or(CodecError::LengthOutOfRange {
            got: CIPHERTEXT_SIZE,
            max: CIPHERTEXT_SIZE,
        })
    }
}

impl Serialize for ElGamalCiphertext {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.to_bytes().to_vec(), s)
    }
}

impl<'de> Deserialize<'de> for ElGamalCiphertext {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(d)?;
        ElGamalCiphertext::from_bytes(&bytes)
            .ok_or_else(|| serde::de::Error::custom("invalid ElGamal ciphertext encoding"))
    }
}
