//! Plain accounts: nonces, unclaimed rewards, and the delegated-stake
//! lifecycle.
//!
//! Stake moves through three buckets that always conserve their sum:
//! `available` (eligible to forge) → `pending_unstakes` (waiting out the
//! unstake window) → `unclaimed_rewards` (spendable, consumed by a claim
//! that mints confidential balance). No operation may leave any bucket
//! negative.

use serde::{Deserialize, Serialize};

use super::AccountError;
use crate::constants::{MAX_PENDING_UNSTAKES, UNSTAKE_WINDOW};
use crate::crypto::keys::PublicKey;
use crate::serialize::{BufferReader, BufferWriter, CodecError, Serializable};

/// An amount waiting out the unstake window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUnstake {
    pub amount: u64,
    pub activation_height: u64,
}

/// Delegated-stake state of a plain account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedStake {
    /// The delegate key authorized to forge with (and claim for) this stake.
    pub delegate: Option<PublicKey>,
    /// Stake currently eligible to forge.
    pub available: u64,
    /// Queue of unstakes ordered by insertion; drained as the head height
    /// passes each entry's activation height.
    pub pending_unstakes: Vec<PendingUnstake>,
}

/// A plain (non-confidential) account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainAccount {
    pub nonce: u64,
    pub unclaimed_rewards: u64,
    pub delegated_stake: DelegatedStake,
}

impl PlainAccount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total value held across all stake buckets.
    pub fn total_stake(&self) -> u64 {
        let pending: u64 = self
            .delegated_stake
            .pending_unstakes
            .iter()
            .map(|p| p.amount)
            .sum();
        self.delegated_stake
            .available
            .saturating_add(pending)
            .saturating_add(self.unclaimed_rewards)
    }

    /// Register (or replace) the delegate key.
    pub fn set_delegate(&mut self, delegate: PublicKey) {
        self.delegated_stake.delegate = Some(delegate);
    }

    /// Credit forged rewards and fees to the forging stake.
    pub fn credit_stake(&mut self, amount: u64) {
        self.delegated_stake.available = self.delegated_stake.available.saturating_add(amount);
    }

    /// Debit from the forging stake (transaction fees).
    pub fn debit_available(&mut self, amount: u64) -> Result<(), AccountError> {
        if self.delegated_stake.available < amount {
            return Err(AccountError::InsufficientFunds {
                needed: amount,
                available: self.delegated_stake.available,
            });
        }
        self.delegated_stake.available -= amount;
        Ok(())
    }

    /// Begin unstaking `amount` at `head_height`: the amount leaves
    /// `available` immediately and activates `UNSTAKE_WINDOW` blocks later.
    pub fn unstake(&mut self, amount: u64, head_height: u64) -> Result<(), AccountError> {
        if self.delegated_stake.pending_unstakes.len() >= MAX_PENDING_UNSTAKES {
            return Err(AccountError::PendingQueueFull);
        }
        self.debit_available(amount)?;
        self.delegated_stake.pending_unstakes.push(PendingUnstake {
            amount,
            activation_height: head_height + UNSTAKE_WINDOW,
        });
        Ok(())
    }

    /// Drain pending unstakes whose activation height has been reached into
    /// unclaimed rewards. Total stake is unchanged.
    pub fn materialize(&mut self, at_height: u64) {
        let mut drained = 0u64;
        self.delegated_stake.pending_unstakes.retain(|pending| {
            if pending.activation_height <= at_height {
                drained = drained.saturating_add(pending.amount);
                false
            } else {
                true
            }
        });
        self.unclaimed_rewards = self.unclaimed_rewards.saturating_add(drained);
    }

    /// Consume unclaimed rewards for a claim-stake mint.
    pub fn claim_rewards(&mut self, amount: u64) -> Result<(), AccountError> {
        if self.unclaimed_rewards < amount {
            return Err(AccountError::InsufficientFunds {
                needed: amount,
                available: self.unclaimed_rewards,
            });
        }
        self.unclaimed_rewards -= amount;
        Ok(())
    }
}

impl Serializable for PlainAccount {
    fn write_to(&self, w: &mut BufferWriter) {
        w.write_uvarint(self.nonce);
        w.write_uvarint(self.unclaimed_rewards);
        match &self.delegated_stake.delegate {
            Some(delegate) => {
                w.write_byte(1);
                w.write_bytes(delegate.as_bytes());
            }
            None => w.write_byte(0),
        }
        w.write_uvarint(self.delegated_stake.available);
        w.write_uvarint(self.delegated_stake.pending_unstakes.len() as u64);
        for pending in &self.delegated_stake.pending_unstakes {
            w.write_uvarint(pending.amount);
            w.write_uvarint(pending.activation_height);
        }
    }

    fn read_from(r: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        let nonce = r.read_uvarint()?;
        let unclaimed_rewards = r.read_uvarint()?;
        let delegate = match r.read_byte()? {
            0 => None,
            _ => Some(PublicKey(r.read_array()?)),
        };
        let available = r.read_uvarint()?;
        let count = r.read_uvarint()? as usize;
        if count > MAX_PENDING_UNSTAKES {
            return Err(CodecError::LengthOutOfRange {
                got: count,
                max: MAX_PENDING_UNSTAKES,
            });
        }
        let mut pending_unstakes = Vec::with_capacity(count);
        for _ in 0..count {
            pending_unstakes.push(PendingUnstake {
                amount: r.read_uvarint()?,
                activation_height: r.read_uvarint()?,
            });
        }
        Ok(PlainAccount {
            nonce,
            unclaimed_rewards,
            delegated_stake: DelegatedStake {
                delegate,
                available,
                pending_unstakes,
            },
        })
    }
}
