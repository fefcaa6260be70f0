//! Key management: Ristretto scalar secret keys, 32-byte compressed public
//! keys, and Schnorr signatures over merlin transcripts.
//!
//! Public keys double as account identifiers: the confidential account store
//! is keyed by `(asset, public_key)` and the plain store by `public_key`.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT as G;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use merlin::Transcript;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::constants::{PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

/// A compressed Ristretto public key (32 bytes).
///
/// Stored compressed so it can be used directly as a map/store key; callers
/// that need curve arithmetic decompress on demand.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_point(point: &RistrettoPoint) -> Self {
        PublicKey(point.compress().to_bytes())
    }

    /// Decompress to a curve point. Returns `None` for invalid encodings.
    pub fn decompress(&self) -> Option<RistrettoPoint> {
        CompressedRistretto(self.0).decompress()
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Verify a Schnorr signature over `message` in the given domain.
    pub fn verify(&self, domain: &'static [u8], message: &[u8], signature: &Signature) -> bool {
        let Some(point) = self.decompress() else {
            return false;
        };
        let Some(r_point) = CompressedRistretto(signature.r).decompress() else {
            return false;
        };
        let Some(s) = Option::<Scalar>::from(Scalar::from_canonical_bytes(signature.s)) else {
            return false;
        };
        let c = challenge(domain, &self.0, &signature.r, message);
        // s·G == R + c·P
        s * G == r_point + c * point
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

/// A Ristretto scalar secret key. Zeroized on drop; Debug output is redacted.
#[derive(Clone)]
pub struct SecretKey(pub(crate) Scalar);

impl SecretKey {
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_point(&(self.0 * G))
    }

    pub(crate) fn scalar(&self) -> &Scalar {
        &self.0
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// A Schnorr signature `(R, s)`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        let mut out = [0u8; SIGNATURE_SIZE];
        out[..32].copy_from_slice(&self.r);
        out[32..].copy_from_slice(&self.s);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return None;
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Some(Signature { r, s })
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}…)", hex::encode(&self.r[..8]))
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.to_bytes().to_vec(), s)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(d)?;
        Signature::from_bytes(&bytes).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid signature: expected {} bytes, got {}",
                SIGNATURE_SIZE,
                bytes.len()
            ))
        })
    }
}

/// A keypair for signing plain transactions and decrypting balances.
#[derive(Clone, Debug)]
pub struct Keypair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let secret = SecretKey(super::random_scalar(&mut rng));
        Keypair {
            public: secret.public_key(),
            secret,
        }
    }

    /// Derive a keypair deterministically from seed material.
    pub fn from_seed(seed: &[u8]) -> Self {
        let secret = SecretKey(super::scalar_from_hash("caligo.key.derive", seed));
        Keypair {
            public: secret.public_key(),
            secret,
        }
    }

    /// Produce a Schnorr signature over `message` in the given domain.
    pub fn sign(&self, domain: &'static [u8], message: &[u8]) -> Signature {
        let mut rng = rand::thread_rng();
        let k = super::random_scalar(&mut rng);
        let r_point = k * G;
        let r = r_point.compress().to_bytes();
        let c = challenge(domain, &self.public.0, &r, message);
        let s = k + c * self.secret.0;
        Signature {
            r,
            s: s.to_bytes(),
        }
    }

    /// Sign the registration statement proving ownership of this key, so an
    /// address or ring member not yet present in the account store can be
    /// created on first use.
    pub fn sign_registration(&self) -> Signature {
        self.sign(b"caligo.registration", &self.public.0)
    }
}

/// Verify a registration signature for a public key.
pub fn verify_registration(public_key: &PublicKey, signature: &Signature) -> bool {
    public_key.verify(b"caligo.registration", &public_key.0, signature)
}

/// Fiat–Shamir challenge for Schnorr signatures.
fn challenge(domain: &'static [u8], pk: &[u8; 32], r: &[u8; 32], message: &[u8]) -> Scalar {
    let mut t = Transcript::new(b"caligo.schnorr");
    t.append_message(b"domain", domain);
    t.append_message(b"pk", pk);
    t.append_message(b"R", r);
    t.append_message(b"msg", message);
    let mut wide = [0u8; 64];
    t.challenge_bytes(b"c", &mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"caligo.test", b"message");
        assert!(kp.public.verify(b"caligo.test", b"message", &sig));
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"caligo.test", b"message");
        assert!(!kp.public.verify(b"caligo.test", b"other", &sig));
    }

    #[test]
    fn verify_rejects_wrong_domain() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"caligo.test", b"message");
        assert!(!kp.public.verify(b"caligo.other", b"message", &sig));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let sig = kp.sign(b"caligo.test", b"message");
        assert!(!other.public.verify(b"caligo.test", b"message", &sig));
    }

    #[test]
    fn verify_rejects_tampered_signature() {
        let kp = Keypair::generate();
        let mut sig = kp.sign(b"caligo.test", b"message");
        sig.s[0] ^= 1;
        assert!(!kp.public.verify(b"caligo.test", b"message", &sig));
    }

    #[test]
    fn registration_roundtrip() {
        let kp = Keypair::generate();
        let reg = kp.sign_registration();
        assert!(verify_registration(&kp.public, &reg));
        let other = Keypair::generate();
        assert!(!verify_registration(&other.public, &reg));
    }

    #[test]
    fn from_seed_deterministic() {
        let a = Keypair::from_seed(b"seed");
        let b = Keypair::from_seed(b"seed");
        let c = Keypair::from_seed(b"other");
        assert_eq!(a.public, b.public);
        assert_ne!(a.public, c.public);
    }

    #[test]
    fn secret_key_debug_redacted() {
        let kp = Keypair::generate();
        let dbg = format!("{:?}", kp.secret);
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn signature_bytes_roundtrip() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"caligo.test", b"m");
        let bytes = sig.to_bytes();
        assert_eq!(Signature::from_bytes(&bytes), Some(sig));
        assert!(Signature::from_bytes(&bytes[..63]).is_none());
    }
}
