//! Wallet: seed-derived keys, balance recovery, transaction building.
//!
//! The wallet owns an address book of deterministically derived keypairs.
//! Balance recovery strips the ElGamal blinding with the account secret and
//! runs the bounded discrete-log search (cancellable; a cold wallet may
//! scan many ciphertexts). Transfer and claim builders assemble valid
//! zether payloads over a caller-chosen anonymity ring.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use zeroize::Zeroize;

use crate::address::Address;
use crate::config::Network;
use crate::crypto::dlp::{DlpError, DlpTable};
use crate::crypto::elgamal::ElGamalCiphertext;
use crate::crypto::keys::{Keypair, PublicKey, Signature};
use crate::transaction::zether::{
    prove_payload, sign_claim, ProveExtra, ZetherPayload, ZetherPayloadExtra, ZetherTx,
};
use crate::transaction::{Transaction, TxError};
use crate::{Asset, Hash};

/// Errors from wallet operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum WalletError {
    #[error("public key does not belong to this wallet")]
    UnknownAddress,
    #[error("ring does not contain the expected members")]
    InvalidRing,
    #[error(transparent)]
    Dlp(#[from] DlpError),
    #[error(transparent)]
    Tx(#[from] TxError),
}

/// One derived address with its keys.
#[derive(Clone, Debug)]
pub struct WalletAddress {
    pub name: String,
    pub seed_index: u32,
    pub keypair: Keypair,
}

impl WalletAddress {
    pub fn address(&self, network: Network) -> Address {
        Address::from_public_key(network, self.keypair.public)
    }

    /// An address carrying a registration signature, for receiving into an
    /// account that does not exist yet.
    pub fn registration_address(&self, network: Network) -> Address {
        let mut address = self.address(network);
        address.registration = Some(self.keypair.sign_registration());
        address
    }
}

/// A deterministic wallet over one seed.
pub struct Wallet {
    seed: [u8; 32],
    next_index: u32,
    addresses: Vec<WalletAddress>,
    by_public_key: HashMap<PublicKey, usize>,
}

impl Drop for Wallet {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl Wallet {
    pub fn new(seed: [u8; 32]) -> Self {
        Wallet {
            seed,
            next_index: 0,
            addresses: Vec::new(),
            by_public_key: HashMap::new(),
        }
    }

    /// A wallet over a fresh random seed.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut seed);
        Self::new(seed)
    }

    /// Derive the next address.
    pub fn derive_next(&mut self, name: &str) -> &WalletAddress {
        let index = self.next_index;
        self.next_index += 1;
        let mut material = Vec::with_capacity(36);
        material.extend_from_slice(&self.seed);
        material.extend_from_slice(&index.to_le_bytes());
        let keypair = Keypair::from_seed(&material);
        material.zeroize();
        self.by_public_key.insert(keypair.public, self.addresses.len());
        self.addresses.push(WalletAddress {
            name: name.to_string(),
            seed_index: index,
            keypair,
        });
        self.addresses.last().expect("just pushed")
    }

    pub fn get(&self, pk: &PublicKey) -> Option<&WalletAddress> {
        self.by_public_key.get(pk).map(|&i| &self.addresses[i])
    }

    pub fn addresses(&self) -> &[WalletAddress] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Recover the plaintext balance of one of our accounts from its
    /// ElGamal ciphertext. Bounded brute force over the DLP table;
    /// cancellable through `ctx`.
    pub fn decrypt_balance(
        &self,
        pk: &PublicKey,
        ciphertext: &ElGamalCiphertext,
        table: &DlpTable,
        ctx: &CancellationToken,
    ) -> Result<u64, WalletError> {
        let entry = self.get(pk).ok_or(WalletError::UnknownAddress)?;
        let point = ciphertext.decrypt_point(&entry.keypair.secret);
        Ok(table.solve(&point, ctx)?)
    }

    /// Build a confidential transfer hidden in `ring`.
    ///
    /// `sender_index` addresses our own key inside the ring; `outputs`
    /// lists `(ring index, amount)` recipients; every other member is a
    /// decoy. `registrations[i]` must carry a registration signature for
    /// ring members that do not exist in the account store yet.
    #[allow(clippy::too_many_arguments)]
    pub fn build_transfer(
        &self,
        network: Network,
        asset: Asset,
        chain_ref: (u64, Hash),
        ring: &[PublicKey],
        sender_index: usize,
        outputs: &[(usize, u64)],
        fee: u64,
        registrations: &[Option<Signature>],
    ) -> Result<Transaction, WalletError> {
        if sender_index >= ring.len() {
            return Err(WalletError::InvalidRing);
        }
        if self.get(&ring[sender_index]).is_none() {
            return Err(WalletError::UnknownAddress);
        }
        let mut amounts = vec![0i64; ring.len()];
        let mut total: u64 = 0;
        for &(index, amount) in outputs {
            if index >= ring.len() || index == sender_index {
                return Err(WalletError::InvalidRing);
            }
            amounts[index] += amount as i64;
            total = total.saturating_add(amount);
        }
        amounts[sender_index] = -((total.saturating_add(fee)) as i64);

        let mut rng = rand::thread_rng();
        let (statement, proof) = prove_payload(
            network,
            asset,
            chain_ref.0,
            &chain_ref.1,
            ring,
            &amounts,
            fee,
            &ProveExtra::Transfer,
            registrations,
            &mut rng,
        )?;
        Ok(Transaction::Zether(ZetherTx {
            height_ref: chain_ref.0,
            block_hash_ref: chain_ref.1,
            payloads: vec![ZetherPayload {
                asset,
                extra: ZetherPayloadExtra::Transfer,
                statement,
                proof,
            }],
        }))
    }

    /// Build a claim-stake transaction: consume `amount` of the claimer's
    /// unclaimed rewards and mint `amount − fee` confidentially to the
    /// ring recipients. Authorized with the delegate keypair registered on
    /// the claimer's plain account.
    #[allow(clippy::too_many_arguments)]
    pub fn build_claim(
        &self,
        network: Network,
        asset: Asset,
        chain_ref: (u64, Hash),
        ring: &[PublicKey],
        outputs: &[(usize, u64)],
        fee: u64,
        claimer: PublicKey,
        claimer_nonce: u64,
        amount: u64,
        delegate: &Keypair,
        registrations: &[Option<Signature>],
    ) -> Result<Transaction, WalletError> {
        let mut amounts = vec![0i64; ring.len()];
        let mut total: u64 = 0;
        for &(index, out_amount) in outputs {
            if index >= ring.len() {
                return Err(WalletError::InvalidRing);
            }
            amounts[index] += out_amount as i64;
            total = total.saturating_add(out_amount);
        }
        if total != amount.saturating_sub(fee) {
            return Err(WalletError::InvalidRing);
        }

        let extra = ProveExtra::ClaimStake {
            claimer,
            nonce: claimer_nonce,
            amount,
        };
        let mut rng = rand::thread_rng();
        let (statement, proof) = prove_payload(
            network,
            asset,
            chain_ref.0,
            &chain_ref.1,
            ring,
            &amounts,
            fee,
            &extra,
            registrations,
            &mut rng,
        )?;
        let delegate_signature = sign_claim(
            delegate,
            network,
            &asset,
            &statement,
            &claimer,
            claimer_nonce,
            amount,
        );
        Ok(Transaction::Zether(ZetherTx {
            height_ref: chain_ref.0,
            block_hash_ref: chain_ref.1,
            payloads: vec![ZetherPayload {
                asset,
                extra: ZetherPayloadExtra::ClaimStake {
                    claimer,
                    nonce: claimer_nonce,
                    amount,
                    delegate_signature,
                },
                statement,
                proof,
            }],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random_scalar;

    #[test]
    fn derivation_is_deterministic() {
        let mut a = Wallet::new([7u8; 32]);
        let mut b = Wallet::new([7u8; 32]);
        let pk_a = a.derive_next("first").keypair.public;
        let pk_b = b.derive_next("anything").keypair.public;
        assert_eq!(pk_a, pk_b);
        // different indices derive different keys
        assert_ne!(pk_a, a.derive_next("second").keypair.public);
    }

    #[test]
    fn lookup_by_public_key() {
        let mut wallet = Wallet::new([1u8; 32]);
        let pk = wallet.derive_next("main").keypair.public;
        assert_eq!(wallet.get(&pk).unwrap().name, "main");
        let other = Keypair::generate().public;
        assert!(wallet.get(&other).is_none());
    }

    #[test]
    fn registration_address_carries_valid_registration() {
        use crate::crypto::keys::verify_registration;
        let mut wallet = Wallet::new([9u8; 32]);
        let entry = wallet.derive_next("main");
        let address = entry.registration_address(Network::Devnet);
        let registration = address.registration.expect("registration present");
        assert!(verify_registration(&address.public_key, &registration));
        // a plain address carries none
        assert!(entry.address(Network::Devnet).registration.is_none());
    }

    #[test]
    fn decrypt_balance_roundtrip() {
        let mut wallet = Wallet::new([2u8; 32]);
        let pk = wallet.derive_next("main").keypair.public;
        let point = pk.decompress().unwrap();
        let mut rng = rand::thread_rng();
        let ciphertext = ElGamalCiphertext::encrypt(4_321, &point, &random_scalar(&mut rng));

        let table = DlpTable::new(16);
        let ctx = CancellationToken::new();
        assert_eq!(
            wallet.decrypt_balance(&pk, &ciphertext, &table, &ctx).unwrap(),
            4_321
        );
    }

    #[test]
    fn decrypt_balance_unknown_key() {
        let wallet = Wallet::new([3u8; 32]);
        let table = DlpTable::new(16);
        let ctx = CancellationToken::new();
        let other = Keypair::generate().public;
        assert!(matches!(
            wallet.decrypt_balance(&other, &ElGamalCiphertext::zero(), &table, &ctx),
            Err(WalletError::UnknownAddress)
        ));
    }

    #[test]
    fn decrypt_balance_cancellable() {
        let mut wallet = Wallet::new([4u8; 32]);
        let pk = wallet.derive_next("main").keypair.public;
        let point = pk.decompress().unwrap();
        let mut rng = rand::thread_rng();
        let ciphertext = ElGamalCiphertext::encrypt(1, &point, &random_scalar(&mut rng));
        let table = DlpTable::new(16);
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(matches!(
            wallet.decrypt_balance(&pk, &ciphertext, &table, &ctx),
            Err(WalletError::Dlp(DlpError::Cancelled))
        ));
    }

    #[test]
    fn build_transfer_produces_verifiable_payload() {
        let mut wallet = Wallet::new([5u8; 32]);
        let sender = wallet.derive_next("sender").keypair.public;
        let mut ring: Vec<PublicKey> = (0..7)
            .map(|i| Keypair::from_seed(format!("decoy-{i}").as_bytes()).public)
            .collect();
        ring.insert(2, sender);
        let registrations = vec![None; ring.len()];

        let tx = wallet
            .build_transfer(
                Network::Devnet,
                crate::constants::NATIVE_ASSET,
                (0, [1u8; 32]),
                &ring,
                2,
                &[(5, 40)],
                10,
                &registrations,
            )
            .unwrap();
        let Transaction::Zether(ztx) = &tx else {
            panic!("expected zether transaction");
        };
        assert_eq!(ztx.payloads.len(), 1);
        assert!(ztx.payloads[0]
            .verify_crypto(Network::Devnet, 0, &[1u8; 32])
            .is_ok());
        assert_eq!(tx.fee(), 10);
    }

    #[test]
    fn build_transfer_rejects_foreign_sender() {
        let wallet = Wallet::new([6u8; 32]);
        let ring: Vec<PublicKey> = (0..4)
            .map(|i| Keypair::from_seed(format!("r-{i}").as_bytes()).public)
            .collect();
        let registrations = vec![None; 4];
        assert!(matches!(
            wallet.build_transfer(
                Network::Devnet,
                crate::constants::NATIVE_ASSET,
                (0, [1u8; 32]),
                &ring,
                0,
                &[(1, 5)],
                1,
                &registrations,
            ),
            Err(WalletError::UnknownAddress)
        ));
    }

    #[test]
    fn build_claim_balances_amounts() {
        let wallet = Wallet::new([8u8; 32]);
        let ring: Vec<PublicKey> = (0..4)
            .map(|i| Keypair::from_seed(format!("cr-{i}").as_bytes()).public)
            .collect();
        let registrations = vec![None; 4];
        let claimer = Keypair::from_seed(b"claimer-pk").public;
        let delegate = Keypair::from_seed(b"claim-delegate");
        // amount 50, fee 10: outputs must sum to 40
        let err = wallet.build_claim(
            Network::Devnet,
            crate::constants::NATIVE_ASSET,
            (0, [2u8; 32]),
            &ring,
            &[(0, 30)],
            10,
            claimer,
            0,
            50,
            &delegate,
            &registrations,
        );
        assert!(matches!(err, Err(WalletError::InvalidRing)));

        let tx = wallet
            .build_claim(
                Network::Devnet,
                crate::constants::NATIVE_ASSET,
                (0, [2u8; 32]),
                &ring,
                &[(0, 25), (3, 15)],
                10,
                claimer,
                0,
                50,
                &delegate,
                &registrations,
            )
            .unwrap();
        let Transaction::Zether(ztx) = &tx else {
            panic!("expected zether transaction");
        };
        assert!(ztx.payloads[0]
            .verify_crypto(Network::Devnet, 0, &[2u8; 32])
            .is_ok());
    }
}
