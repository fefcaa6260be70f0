//! Confidential ring transactions.
//!
//! A zether payload moves value between the members of an anonymity ring
//! without revealing sender, receiver, or amounts. The statement publishes
//! one ElGamal delta ciphertext per ring member, all sharing the randomness
//! `r` (`C_i = b_i·G + r·P_i`, `D = r·G`), where the hidden deltas satisfy
//! `Σ b_i = minted − fee` (`minted` is zero for a transfer and the claimed
//! amount for a claim-stake).
//!
//! Two proofs accompany the statement:
//! - a Chaum–Pedersen DLEQ over the aggregated statement proving knowledge
//!   of `r` with `D = r·G` and `ΣC_i + (fee − minted)·G = r·ΣP_i`, which is
//!   exactly the homomorphic conservation `sender_input = Σ outputs + fee`
//! - an aggregated bulletproof proving every transferred amount lies in
//!   `[0, 2^64)`, bound to the same transcript context
//!
//! Replay protection: the transcript binds a recent `(height, hash)` chain
//! reference, so a payload is only valid near the chain state it was built
//! against.

use std::collections::HashSet;

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT as G;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use merlin::Transcript;
use rand::RngCore;

use crate::accounts::{AccountsReader, PlainAccountsReader};
use crate::config::Network;
use crate::constants::{
    MAX_RING_SIZE, MAX_ZETHER_PAYLOADS, MIN_RING_SIZE, SIGNATURE_SIZE, ZETHER_REF_WINDOW,
};
use crate::crypto::elgamal::ElGamalCiphertext;
use crate::crypto::keys::{verify_registration, Keypair, PublicKey, Signature};
use crate::serialize::{BufferReader, BufferWriter, CodecError, Serializable};
use crate::store::{self, KvRead};
use crate::{Asset, Hash};

use super::TxError;

const EXTRA_TRANSFER: u8 = 0;
const EXTRA_CLAIM_STAKE: u8 = 1;

/// Upper bound on a serialized aggregated range proof.
const MAX_RANGE_PROOF_BYTES: usize = 16 * 1024;

/// One member of the anonymity ring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingMember {
    pub public_key: PublicKey,
    /// Compressed `C_i`, this member's balance delta under the shared `D`.
    pub delta: [u8; 32],
    /// Proof of key ownership for members not yet in the account store.
    pub registration: Option<Signature>,
}

impl RingMember {
    /// The ElGamal delta applied to this member's balance at block apply.
    pub fn ciphertext(&self, d: &RistrettoPoint) -> Option<ElGamalCiphertext> {
        let c = CompressedRistretto(self.delta).decompress()?;
        Some(ElGamalCiphertext { c, d: *d })
    }
}

/// The public statement of one confidential payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZetherStatement {
    pub ring: Vec<RingMember>,
    /// Compressed shared `D = r·G`.
    pub d: [u8; 32],
    pub fee: u64,
}

impl ZetherStatement {
    /// Fingerprint of the statement, signed by claim authorizations.
    pub fn hash(&self) -> Hash {
        crate::hash_domain(b"caligo.zether.statement", &self.to_bytes())
    }
}

/// Chaum–Pedersen DLEQ proof of the shared randomness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DleqProof {
    pub a_g: [u8; 32],
    pub a_y: [u8; 32],
    pub z: [u8; 32],
}

/// The σ-protocol and range proofs of one payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZetherProof {
    pub sigma: DleqProof,
    /// Pedersen commitments to the transferred amounts (padded to a power
    /// of two for aggregation).
    pub range_commitments: Vec<[u8; 32]>,
    pub range_proof: Vec<u8>,
}

/// Payload-extra variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZetherPayloadExtra {
    /// Plain confidential transfer (default).
    Transfer,
    /// Consume `amount` of the claimer's unclaimed rewards and mint it
    /// (minus the fee) as confidential balance to the ring's recipients.
    /// Authorized by the delegate key registered on the claimer's account.
    ClaimStake {
        claimer: PublicKey,
        nonce: u64,
        amount: u64,
        delegate_signature: Signature,
    },
}

/// One confidential payload: asset, extra, statement, proofs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZetherPayload {
    pub asset: Asset,
    pub extra: ZetherPayloadExtra,
    pub statement: ZetherStatement,
    pub proof: ZetherProof,
}

impl ZetherPayload {
    /// Amount minted into the ring by this payload (zero for transfers).
    pub fn minted(&self) -> u64 {
        match &self.extra {
            ZetherPayloadExtra::Transfer => 0,
            ZetherPayloadExtra::ClaimStake { amount, .. } => *amount,
        }
    }
}

/// A confidential transaction: a chain reference plus one or more payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZetherTx {
    /// Height of the referenced block; payloads are bound to its hash.
    pub height_ref: u64,
    pub block_hash_ref: Hash,
    pub payloads: Vec<ZetherPayload>,
}

impl ZetherTx {
    pub fn fee(&self) -> u64 {
        self.payloads
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(p.statement.fee))
    }

    pub(super) fn verify_structural(&self) -> Result<(), TxError> {
        if self.payloads.is_empty() || self.payloads.len() > MAX_ZETHER_PAYLOADS {
            return Err(TxError::TooManyPayloads);
        }
        for payload in &self.payloads {
            let ring_len = payload.statement.ring.len();
            if !ring_len.is_power_of_two()
                || ring_len < MIN_RING_SIZE
                || ring_len > MAX_RING_SIZE
            {
                return Err(TxError::InvalidRingSize {
                    got: ring_len,
                    min: MIN_RING_SIZE,
                    max: MAX_RING_SIZE,
                });
            }
            let commitments = payload.proof.range_commitments.len();
            if commitments == 0
                || !commitments.is_power_of_two()
                || commitments > MAX_RING_SIZE
            {
                return Err(TxError::InvalidProof("range commitment count"));
            }
            if payload.proof.range_proof.is_empty() {
                return Err(TxError::InvalidProof("empty range proof"));
            }
            if let ZetherPayloadExtra::ClaimStake { amount, .. } = &payload.extra {
                if *amount == 0 {
                    return Err(TxError::ZeroAmount);
                }
                if *amount < payload.statement.fee {
                    return Err(TxError::FeeTooLow {
                        fee: payload.statement.fee,
                        min: *amount,
                    });
                }
            }
        }
        Ok(())
    }

    /// CPU-bound stateless verification: the σ-protocol and range proofs
    /// of every payload.
    pub(super) fn verify_proofs(&self, network: Network) -> Result<(), TxError> {
        for payload in &self.payloads {
            payload.verify_crypto(network, self.height_ref, &self.block_hash_ref)?;
        }
        Ok(())
    }

    /// State-dependent verification against a snapshot at `head_height`:
    /// the chain reference is recent and canonical, every ring member is a
    /// known account or a valid fresh registration, and claim extras match
    /// the claimer's plain account.
    pub(super) fn verify_state<R: KvRead + ?Sized>(
        &self,
        store: &R,
        network: Network,
        head_height: u64,
    ) -> Result<(), TxError> {
        if self.height_ref > head_height
            || head_height - self.height_ref > ZETHER_REF_WINDOW
        {
            return Err(TxError::StaleReference);
        }
        match store.get_raw(&store::keys::block_by_height(self.height_ref))? {
            Some(stored) if stored == self.block_hash_ref => {}
            _ => return Err(TxError::StaleReference),
        }

        for payload in &self.payloads {
            let accounts = AccountsReader::new(store, payload.asset);
            for member in &payload.statement.ring {
                if !accounts.exists(&member.public_key)? {
                    let valid = member
                        .registration
                        .as_ref()
                        .is_some_and(|reg| verify_registration(&member.public_key, reg));
                    if !valid {
                        return Err(TxError::UnregisteredRingMember);
                    }
                }
            }

            if let ZetherPayloadExtra::ClaimStake {
                claimer,
                nonce,
                amount,
                delegate_signature,
            } = &payload.extra
            {
                let plain = PlainAccountsReader::new(store)
                    .get(claimer, head_height)?
                    .ok_or(TxError::SenderNotFound)?;
                if plain.nonce != *nonce {
                    return Err(TxError::NonceMismatch {
                        expected: plain.nonce,
                        got: *nonce,
                    });
                }
                if plain.unclaimed_rewards < *amount {
                    return Err(TxError::Funds(
                        crate::accounts::AccountError::InsufficientFunds {
                            needed: *amount,
                            available: plain.unclaimed_rewards,
                        },
                    ));
                }
                let delegate = plain
                    .delegated_stake
                    .delegate
                    .ok_or(TxError::Funds(crate::accounts::AccountError::NoDelegate))?;
                let message = claim_signing_message(
                    network,
                    &payload.asset,
                    &payload.statement,
                    claimer,
                    *nonce,
                    *amount,
                );
                if !delegate.verify(b"caligo.tx.claim", &message, delegate_signature) {
                    return Err(TxError::InvalidSignature);
                }
            }
        }
        Ok(())
    }
}

impl ZetherPayload {
    /// Verify the σ-protocol and the range proofs against the statement.
    pub fn verify_crypto(
        &self,
        network: Network,
        height_ref: u64,
        block_hash_ref: &Hash,
    ) -> Result<(), TxError> {
        let statement = &self.statement;

        let mut seen = HashSet::with_capacity(statement.ring.len());
        for member in &statement.ring {
            if !seen.insert(member.public_key) {
                return Err(TxError::DuplicateRingMember);
            }
        }

        let d = CompressedRistretto(statement.d)
            .decompress()
            .ok_or(TxError::InvalidProof("bad point: D"))?;
        let mut y = RistrettoPoint::identity();
        let mut c_sum = RistrettoPoint::identity();
        for member in &statement.ring {
            let pk = member
                .public_key
                .decompress()
                .ok_or(TxError::InvalidProof("bad point: ring key"))?;
            let delta = CompressedRistretto(member.delta)
                .decompress()
                .ok_or(TxError::InvalidProof("bad point: delta"))?;
            y += pk;
            c_sum += delta;
        }

        // S = ΣC_i + (fee − minted)·G must equal r·Y.
        let adjust = Scalar::from(statement.fee) - Scalar::from(self.minted());
        let s_point = c_sum + adjust * G;

        let mut t = statement_transcript(
            network,
            &self.asset,
            height_ref,
            block_hash_ref,
            &self.extra,
            statement,
            &self.proof.range_commitments,
        );

        let a_g = CompressedRistretto(self.proof.sigma.a_g)
            .decompress()
            .ok_or(TxError::InvalidProof("bad point: A_g"))?;
        let a_y = CompressedRistretto(self.proof.sigma.a_y)
            .decompress()
            .ok_or(TxError::InvalidProof("bad point: A_y"))?;
        let z = Option::<Scalar>::from(Scalar::from_canonical_bytes(self.proof.sigma.z))
            .ok_or(TxError::InvalidProof("non-canonical response"))?;

        t.append_message(b"A_g", &self.proof.sigma.a_g);
        t.append_message(b"A_y", &self.proof.sigma.a_y);
        let c = challenge_scalar(&mut t);

        if z * G != a_g + c * d {
            return Err(TxError::InvalidProof("conservation: D leg"));
        }
        if z * y != a_y + c * s_point {
            return Err(TxError::InvalidProof("conservation: statement leg"));
        }

        let ctx = transcript_context(&mut t);
        verify_amount_ranges(&ctx, &self.proof.range_commitments, &self.proof.range_proof)
    }
}

/// Build the merlin transcript binding every public input of a payload.
fn statement_transcript(
    network: Network,
    asset: &Asset,
    height_ref: u64,
    block_hash_ref: &Hash,
    extra: &ZetherPayloadExtra,
    statement: &ZetherStatement,
    range_commitments: &[[u8; 32]],
) -> Transcript {
    let mut t = Transcript::new(b"caligo.zether");
    t.append_message(b"chain_id", &network.chain_id());
    t.append_message(b"asset", asset);
    t.append_u64(b"height_ref", height_ref);
    t.append_message(b"block_hash_ref", block_hash_ref);
    match extra {
        ZetherPayloadExtra::Transfer => t.append_message(b"extra", &[EXTRA_TRANSFER]),
        ZetherPayloadExtra::ClaimStake {
            claimer,
            nonce,
            amount,
            ..
        } => {
            // The delegate signature is over the statement and therefore
            // not part of the transcript.
            t.append_message(b"extra", &[EXTRA_CLAIM_STAKE]);
            t.append_message(b"claimer", claimer.as_bytes());
            t.append_u64(b"claim_nonce", *nonce);
            t.append_u64(b"claim_amount", *amount);
        }
    }
    t.append_u64(b"fee", statement.fee);
    t.append_u64(b"ring_len", statement.ring.len() as u64);
    for member in &statement.ring {
        t.append_message(b"ring_pk", member.public_key.as_bytes());
        t.append_message(b"ring_delta", &member.delta);
    }
    t.append_message(b"D", &statement.d);
    t.append_u64(b"range_count", range_commitments.len() as u64);
    for commitment in range_commitments {
        t.append_message(b"range_commitment", commitment);
    }
    t
}

fn challenge_scalar(t: &mut Transcript) -> Scalar {
    let mut wide = [0u8; 64];
    t.challenge_bytes(b"c", &mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn transcript_context(t: &mut Transcript) -> [u8; 32] {
    let mut out = [0u8; 32];
    t.challenge_bytes(b"ctx", &mut out);
    out
}

/// The message a claim's delegate signature covers.
pub fn claim_signing_message(
    network: Network,
    asset: &Asset,
    statement: &ZetherStatement,
    claimer: &PublicKey,
    nonce: u64,
    amount: u64,
) -> Vec<u8> {
    let mut w = BufferWriter::new();
    w.write_bytes(&network.chain_id());
    w.write_bytes(asset);
    w.write_bytes(claimer.as_bytes());
    w.write_uvarint(nonce);
    w.write_uvarint(amount);
    w.write_bytes(&statement.hash());
    w.into_bytes()
}

/// Sign a claim with the delegate key.
pub fn sign_claim(
    delegate: &Keypair,
    network: Network,
    asset: &Asset,
    statement: &ZetherStatement,
    claimer: &PublicKey,
    nonce: u64,
    amount: u64,
) -> Signature {
    let message = claim_signing_message(network, asset, statement, claimer, nonce, amount);
    delegate.sign(b"caligo.tx.claim", &message)
}

// ── Prover ──────────────────────────────────────────────────────────────

/// Extra fields known at proving time (the claim's delegate signature is
/// attached after the statement exists).
pub enum ProveExtra {
    Transfer,
    ClaimStake {
        claimer: PublicKey,
        nonce: u64,
        amount: u64,
    },
}

impl ProveExtra {
    fn minted(&self) -> u64 {
        match self {
            ProveExtra::Transfer => 0,
            ProveExtra::ClaimStake { amount, .. } => *amount,
        }
    }

    fn to_extra_without_signature(&self) -> ZetherPayloadExtra {
        match self {
            ProveExtra::Transfer => ZetherPayloadExtra::Transfer,
            ProveExtra::ClaimStake {
                claimer,
                nonce,
                amount,
            } => ZetherPayloadExtra::ClaimStake {
                claimer: *claimer,
                nonce: *nonce,
                amount: *amount,
                delegate_signature: Signature {
                    r: [0; 32],
                    s: [0; 32],
                },
            },
        }
    }
}

/// Prove one confidential payload.
///
/// `amounts[i]` is ring member `i`'s balance delta: negative for the
/// sender, positive for recipients, zero for decoys. The deltas must sum
/// to `minted − fee`. Registrations for fresh ring members are the
/// caller's responsibility (see [`RingMember::registration`]).
pub fn prove_payload<R: RngCore>(
    network: Network,
    asset: Asset,
    height_ref: u64,
    block_hash_ref: &Hash,
    ring: &[PublicKey],
    amounts: &[i64],
    fee: u64,
    extra: &ProveExtra,
    registrations: &[Option<Signature>],
    rng: &mut R,
) -> Result<(ZetherStatement, ZetherProof), TxError> {
    if ring.len() != amounts.len() || ring.len() != registrations.len() {
        return Err(TxError::InvalidProof("ring/amounts length mismatch"));
    }
    if !ring.len().is_power_of_two() || ring.len() < MIN_RING_SIZE || ring.len() > MAX_RING_SIZE {
        return Err(TxError::InvalidRingSize {
            got: ring.len(),
            min: MIN_RING_SIZE,
            max: MAX_RING_SIZE,
        });
    }
    let minted = extra.minted();
    let net: i128 = amounts.iter().map(|&a| a as i128).sum();
    if net != minted as i128 - fee as i128 {
        return Err(TxError::InvalidProof("deltas do not conserve"));
    }

    let r = crate::crypto::random_scalar(rng);
    let d_point = r * G;

    let mut ring_members = Vec::with_capacity(ring.len());
    for ((pk, &amount), registration) in ring.iter().zip(amounts).zip(registrations) {
        let point = pk
            .decompress()
            .ok_or(TxError::InvalidProof("bad point: ring key"))?;
        let b = if amount >= 0 {
            Scalar::from(amount as u64)
        } else {
            -Scalar::from(amount.unsigned_abs())
        };
        let c_i = b * G + r * point;
        ring_members.push(RingMember {
            public_key: *pk,
            delta: c_i.compress().to_bytes(),
            registration: *registration,
        });
    }

    let statement = ZetherStatement {
        ring: ring_members,
        d: d_point.compress().to_bytes(),
        fee,
    };

    // Range proofs cover the positive (received) amounts. The transcript
    // binds the commitments, so they are produced before the challenge;
    // the proof itself is finalized against the transcript context.
    let received: Vec<u64> = amounts
        .iter()
        .filter(|&&a| a > 0)
        .map(|&a| a as u64)
        .collect();
    let values = pad_to_power_of_two(&received);
    let (range_commitments, witness) = prove_amount_ranges_deferred(&values, rng)?;

    // σ-protocol over the aggregated statement.
    let y: RistrettoPoint = {
        let mut acc = RistrettoPoint::identity();
        for pk in ring {
            acc += pk.decompress().ok_or(TxError::InvalidProof("bad point"))?;
        }
        acc
    };
    let k = crate::crypto::random_scalar(rng);
    let a_g = (k * G).compress().to_bytes();
    let a_y = (k * y).compress().to_bytes();

    let mut t = statement_transcript(
        network,
        &asset,
        height_ref,
        block_hash_ref,
        &extra.to_extra_without_signature(),
        &statement,
        &range_commitments,
    );
    t.append_message(b"A_g", &a_g);
    t.append_message(b"A_y", &a_y);
    let c = challenge_scalar(&mut t);
    let z = k + c * r;

    let ctx = transcript_context(&mut t);
    let range_proof = finalize_range_proof(&ctx, witness)?;

    Ok((
        statement,
        ZetherProof {
            sigma: DleqProof {
                a_g,
                a_y,
                z: z.to_bytes(),
            },
            range_commitments,
            range_proof,
        },
    ))
}

fn pad_to_power_of_two(values: &[u64]) -> Vec<u64> {
    let mut padded = values.to_vec();
    let target = padded.len().next_power_of_two().max(1);
    padded.resize(target, 0);
    padded
}

/// Witness carried between commitment generation and proof finalization.
struct RangeWitness {
    values: Vec<u64>,
    blinds: Vec<[u8; 32]>,
}

/// Commit to the amounts. The proof itself is produced once the transcript
/// context exists (`finalize_range_proof`), because the context includes
/// these commitments.
fn prove_amount_ranges_deferred<R: RngCore>(
    values: &[u64],
    rng: &mut R,
) -> Result<(Vec<[u8; 32]>, RangeWitness), TxError> {
    use curve25519_dalek_ng as ng;

    let pc_gens = pedersen_gens_ng();
    let mut commitments = Vec::with_capacity(values.len());
    let mut blinds = Vec::with_capacity(values.len());
    for &value in values {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        let blind = ng::scalar::Scalar::from_bytes_mod_order_wide(&wide);
        let commitment = pc_gens.commit(ng::scalar::Scalar::from(value), blind);
        commitments.push(commitment.compress().to_bytes());
        blinds.push(blind.to_bytes());
    }
    Ok((
        commitments,
        RangeWitness {
            values: values.to_vec(),
            blinds,
        },
    ))
}

/// Produce the aggregated bulletproof bound to the transcript context.
fn finalize_range_proof(ctx: &[u8; 32], witness: RangeWitness) -> Result<Vec<u8>, TxError> {
    use bulletproofs::{BulletproofGens, RangeProof};
    use curve25519_dalek_ng as ng;

    let pc_gens = pedersen_gens_ng();
    let bp_gens = BulletproofGens::new(64, MAX_RING_SIZE);

    let blinds: Vec<ng::scalar::Scalar> = witness
        .blinds
        .iter()
        .map(|b| ng::scalar::Scalar::from_bytes_mod_order(*b))
        .collect();

    let mut t = Transcript::new(b"caligo.zether.range");
    t.append_message(b"ctx", ctx);
    let (proof, _commitments) = RangeProof::prove_multiple(
        &bp_gens,
        &pc_gens,
        &mut t,
        &witness.values,
        &blinds,
        64,
    )
    .map_err(|_| TxError::InvalidProof("range proof generation"))?;
    Ok(proof.to_bytes())
}

/// Verify an aggregated range proof over the given commitments.
fn verify_amount_ranges(
    ctx: &[u8; 32],
    commitments: &[[u8; 32]],
    proof_bytes: &[u8],
) -> Result<(), TxError> {
    use bulletproofs::{BulletproofGens, RangeProof};
    use curve25519_dalek_ng as ng;

    if proof_bytes.len() > MAX_RANGE_PROOF_BYTES {
        return Err(TxError::InvalidProof("range proof too large"));
    }
    let proof =
        RangeProof::from_bytes(proof_bytes).map_err(|_| TxError::InvalidProof("range proof"))?;
    let pc_gens = pedersen_gens_ng();
    let bp_gens = BulletproofGens::new(64, MAX_RING_SIZE);
    let compressed: Vec<ng::ristretto::CompressedRistretto> = commitments
        .iter()
        .map(|bytes| ng::ristretto::CompressedRistretto(*bytes))
        .collect();

    let mut t = Transcript::new(b"caligo.zether.range");
    t.append_message(b"ctx", ctx);
    proof
        .verify_multiple(&bp_gens, &pc_gens, &mut t, &compressed, 64)
        .map_err(|_| TxError::InvalidProof("range proof verification"))
}

/// Pedersen generators in the bulletproofs crate's curve types. `H` is the
/// same point as [`crate::crypto::pedersen_h_generator`], bridged by
/// compressed bytes.
fn pedersen_gens_ng() -> bulletproofs::PedersenGens {
    use curve25519_dalek_ng as ng;
    let h_bytes = crate::crypto::pedersen_h_generator().compress().to_bytes();
    let h = ng::ristretto::CompressedRistretto(h_bytes)
        .decompress()
        .expect("H is a valid point");
    bulletproofs::PedersenGens {
        B: ng::constants::RISTRETTO_BASEPOINT_POINT,
        B_blinding: h,
    }
}

// ── Serialization ───────────────────────────────────────────────────────

impl Serializable for ZetherStatement {
    fn write_to(&self, w: &mut BufferWriter) {
        w.write_uvarint(self.ring.len() as u64);
        for member in &self.ring {
            w.write_bytes(member.public_key.as_bytes());
            w.write_bytes(&member.delta);
            match &member.registration {
                Some(registration) => {
                    w.write_byte(1);
                    w.write_bytes(&registration.to_bytes());
                }
                None => w.write_byte(0),
            }
        }
        w.write_bytes(&self.d);
        w.write_uvarint(self.fee);
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        let ring_len = r.read_uvarint()? as usize;
        if ring_len > MAX_RING_SIZE {
            return Err(CodecError::LengthOutOfRange {
                got: ring_len,
                max: MAX_RING_SIZE,
            });
        }
        let mut ring = Vec::with_capacity(ring_len);
        for _ in 0..ring_len {
            let public_key = PublicKey(r.read_array()?);
            let delta = r.read_array()?;
            let registration = match r.read_byte()? {
                0 => None,
                _ => {
                    let bytes = r.read_bytes(SIGNATURE_SIZE)?;
                    Some(Signature::from_bytes(bytes).ok_or(CodecError::Truncated { needed: 0 })?)
                }
            };
            ring.push(RingMember {
                public_key,
                delta,
                registration,
            });
        }
        let d = r.read_array()?;
        let fee = r.read_uvarint()?;
        Ok(ZetherStatement { ring, d, fee })
    }
}

impl Serializable for ZetherPayload {
    fn write_to(&self, w: &mut BufferWriter) {
        w.write_bytes(&self.asset);
        match &self.extra {
            ZetherPayloadExtra::Transfer => w.write_byte(EXTRA_TRANSFER),
            ZetherPayloadExtra::ClaimStake {
                claimer,
                nonce,
                amount,
                delegate_signature,
            } => {
                w.write_byte(EXTRA_CLAIM_STAKE);
                w.write_bytes(claimer.as_bytes());
                w.write_uvarint(*nonce);
                w.write_uvarint(*amount);
                w.write_bytes(&delegate_signature.to_bytes());
            }
        }
        self.statement.write_to(w);
        w.write_bytes(&self.proof.sigma.a_g);
        w.write_bytes(&self.proof.sigma.a_y);
        w.write_bytes(&self.proof.sigma.z);
        w.write_uvarint(self.proof.range_commitments.len() as u64);
        for commitment in &self.proof.range_commitments {
            w.write_bytes(commitment);
        }
        w.write_var_bytes(&self.proof.range_proof);
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        let asset: Asset = r.read_array()?;
        let extra = match r.read_byte()? {
            EXTRA_TRANSFER => ZetherPayloadExtra::Transfer,
            EXTRA_CLAIM_STAKE => {
                let claimer = PublicKey(r.read_array()?);
                let nonce = r.read_uvarint()?;
                let amount = r.read_uvarint()?;
                let sig_bytes = r.read_bytes(SIGNATURE_SIZE)?;
                let delegate_signature = Signature::from_bytes(sig_bytes)
                    .ok_or(CodecError::Truncated { needed: 0 })?;
                ZetherPayloadExtra::ClaimStake {
                    claimer,
                    nonce,
                    amount,
                    delegate_signature,
                }
            }
            other => {
                return Err(CodecError::LengthOutOfRange {
                    got: other as usize,
                    max: EXTRA_CLAIM_STAKE as usize,
                })
            }
        };
        let statement = ZetherStatement::read_from(r)?;
        let sigma = DleqProof {
            a_g: r.read_array()?,
            a_y: r.read_array()?,
            z: r.read_array()?,
        };
        let commitment_count = r.read_uvarint()? as usize;
        if commitment_count > MAX_RING_SIZE {
            return Err(CodecError::LengthOutOfRange {
                got: commitment_count,
                max: MAX_RING_SIZE,
            });
        }
        let mut range_commitments = Vec::with_capacity(commitment_count);
        for _ in 0..commitment_count {
            range_commitments.push(r.read_array()?);
        }
        let range_proof = r.read_var_bytes(MAX_RANGE_PROOF_BYTES)?.to_vec();
        Ok(ZetherPayload {
            asset,
            extra,
            statement,
            proof: ZetherProof {
                sigma,
                range_commitments,
                range_proof,
            },
        })
    }
}

impl Serializable for ZetherTx {
    fn write_to(&self, w: &mut BufferWriter) {
        w.write_uvarint(self.height_ref);
        w.write_bytes(&self.block_hash_ref);
        w.write_uvarint(self.payloads.len() as u64);
        for payload in &self.payloads {
            payload.write_to(w);
        }
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        let height_ref = r.read_uvarint()?;
        let block_hash_ref = r.read_array()?;
        let count = r.read_uvarint()? as usize;
        if count > MAX_ZETHER_PAYLOADS {
            return Err(CodecError::LengthOutOfRange {
                got: count,
                max: MAX_ZETHER_PAYLOADS,
            });
        }
        let mut payloads = Vec::with_capacity(count);
        for _ in 0..count {
            payloads.push(ZetherPayload::read_from(r)?);
        }
        Ok(ZetherTx {
            height_ref,
            block_hash_ref,
            payloads,
        })
    }
}
