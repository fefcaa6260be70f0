//! Plaintext stake-related transactions.
//!
//! Simple transactions carry a visible sender, a nonce against the sender's
//! plain account, and a Schnorr signature over the canonical header. Fees
//! are debited from the sender's forging stake.

use crate::accounts::PlainAccountsReader;
use crate::config::Network;
use crate::crypto::keys::{Keypair, PublicKey, Signature};
use crate::serialize::{BufferReader, BufferWriter, CodecError, Serializable};
use crate::store::KvRead;

use super::{ScriptTag, TxError};

const PAYLOAD_NORMAL: u8 = 0;
const PAYLOAD_UNSTAKE: u8 = 1;
const PAYLOAD_UPDATE_DELEGATE: u8 = 2;

/// What a simple transaction does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimplePayload {
    /// Fee-only transaction (keeps the nonce moving, carries no operation).
    Normal,
    /// Move `amount` from available stake into the pending-unstake queue.
    Unstake { amount: u64 },
    /// Register or replace the delegate key authorized to forge and claim.
    UpdateDelegate { delegate: PublicKey },
}

impl SimplePayload {
    fn tag(&self) -> u8 {
        match self {
            SimplePayload::Normal => PAYLOAD_NORMAL,
            SimplePayload::Unstake { .. } => PAYLOAD_UNSTAKE,
            SimplePayload::UpdateDelegate { .. } => PAYLOAD_UPDATE_DELEGATE,
        }
    }
}

/// A plaintext transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleTx {
    pub nonce: u64,
    pub fee: u64,
    pub payload: SimplePayload,
    pub sender: PublicKey,
    pub signature: Signature,
}

impl SimpleTx {
    /// Build and sign a simple transaction.
    pub fn sign(
        payload: SimplePayload,
        nonce: u64,
        fee: u64,
        keypair: &Keypair,
        network: Network,
    ) -> Self {
        let mut tx = SimpleTx {
            nonce,
            fee,
            payload,
            sender: keypair.public,
            signature: Signature { r: [0; 32], s: [0; 32] },
        };
        tx.signature = keypair.sign(b"caligo.tx.simple", &tx.signing_message(network));
        tx
    }

    /// The canonical header the sender signs: every field except the
    /// signature, plus the chain id so transactions never replay across
    /// networks.
    pub fn signing_message(&self, network: Network) -> Vec<u8> {
        let mut w = BufferWriter::new();
        w.write_bytes(&network.chain_id());
        w.write_uvarint(self.nonce);
        w.write_uvarint(self.fee);
        self.write_payload(&mut w);
        w.write_bytes(self.sender.as_bytes());
        w.into_bytes()
    }

    pub fn verify_signature(&self, network: Network) -> bool {
        self.sender.verify(
            b"caligo.tx.simple",
            &self.signing_message(network),
            &self.signature,
        )
    }

    pub fn script_tag(&self) -> ScriptTag {
        match self.payload {
            SimplePayload::Normal => ScriptTag::SimpleNormal,
            SimplePayload::Unstake { .. } => ScriptTag::SimpleUnstake,
            SimplePayload::UpdateDelegate { .. } => ScriptTag::SimpleUpdateDelegate,
        }
    }

    pub(super) fn verify_structural(&self) -> Result<(), TxError> {
        if let SimplePayload::Unstake { amount } = self.payload {
            if amount == 0 {
                return Err(TxError::ZeroAmount);
            }
        }
        Ok(())
    }

    /// Stateless check: the header signature.
    pub(super) fn verify_proofs(&self, network: Network) -> Result<(), TxError> {
        if self.verify_signature(network) {
            Ok(())
        } else {
            Err(TxError::InvalidSignature)
        }
    }

    /// State-dependent verification against a snapshot at `head_height`.
    pub(super) fn verify_state<R: KvRead + ?Sized>(
        &self,
        store: &R,
        head_height: u64,
    ) -> Result<(), TxError> {
        let account = PlainAccountsReader::new(store)
            .get(&self.sender, head_height)?
            .ok_or(TxError::SenderNotFound)?;
        if account.nonce != self.nonce {
            return Err(TxError::NonceMismatch {
                expected: account.nonce,
                got: self.nonce,
            });
        }
        // Fee (and any unstaked amount) must be coverable from available
        // stake; the real debit happens at block application.
        let needed = match self.payload {
            SimplePayload::Unstake { amount } => amount.saturating_add(self.fee),
            _ => self.fee,
        };
        if account.delegated_stake.available < needed {
            return Err(TxError::Funds(
                crate::accounts::AccountError::InsufficientFunds {
                    needed,
                    available: account.delegated_stake.available,
                },
            ));
        }
        Ok(())
    }

    fn write_payload(&self, w: &mut BufferWriter) {
        w.write_byte(self.payload.tag());
        match &self.payload {
            SimplePayload::Normal => {}
            SimplePayload::Unstake { amount } => w.write_uvarint(*amount),
            SimplePayload::UpdateDelegate { delegate } => w.write_bytes(delegate.as_bytes()),
        }
    }
}

impl Serializable for SimpleTx {
    fn write_to(&self, w: &mut BufferWriter) {
        w.write_uvarint(self.nonce);
        w.write_uvarint(self.fee);
        self.write_payload(w);
        w.write_bytes(self.sender.as_bytes());
        w.write_bytes(&self.signature.to_bytes());
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        let nonce = r.read_uvarint()?;
        let fee = r.read_uvarint()?;
        let payload = match r.read_byte()? {
            PAYLOAD_NORMAL => SimplePayload::Normal,
            PAYLOAD_UNSTAKE => SimplePayload::Unstake {
                amount: r.read_uvarint()?,
            },
            PAYLOAD_UPDATE_DELEGATE => SimplePayload::UpdateDelegate {
                delegate: PublicKey(r.read_array()?),
            },
            other => {
                return Err(CodecError::LengthOutOfRange {
                    got: other as usize,
                    max: PAYLOAD_UPDATE_DELEGATE as usize,
                })
            }
        };
        let sender = PublicKey(r.read_array()?);
        let sig_bytes = r.read_bytes(crate::constants::SIGNATURE_SIZE)?;
        let signature =
            Signature::from_bytes(sig_bytes).ok_or(CodecError::Truncated { needed: 0 })?;
        Ok(SimpleTx {
            nonce,
            fee,
            payload,
            sender,
            signature,
        })
    }
}
