//! Bounded discrete-log recovery for balance decryption.
//!
//! Decrypting an ElGamal balance leaves the point `b·G`; the wallet recovers
//! `b` with a baby-step/giant-step search over `[0, 2^bits)`. The baby-step
//! table costs `2^(bits/2)` entries built once; each lookup costs at most
//! `2^(bits/2)` giant steps. The search is cancellable: balance recovery for
//! a cold wallet can take a while and callers may abort it.

use std::collections::HashMap;

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT as G;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use tokio_util::sync::CancellationToken;

/// How many giant steps between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Errors from the discrete-log search.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DlpError {
    #[error("value outside the decodable range")]
    OutOfRange,
    #[error("search cancelled")]
    Cancelled,
}

/// Precomputed baby-step table for values in `[0, 2^bits)`.
pub struct DlpTable {
    /// compressed(i·G) -> i, for i in [0, stride)
    baby_steps: HashMap<[u8; 32], u64>,
    /// Number of baby steps (the giant-step stride).
    stride: u64,
    /// Exclusive upper bound of recoverable values.
    max: u64,
    /// -stride·G, added once per giant step.
    giant_step: RistrettoPoint,
}

impl DlpTable {
    /// Build a table covering `[0, 2^bits)`. `bits` must be even, in `2..=62`.
    pub fn new(bits: u32) -> Self {
        assert!(bits % 2 == 0 && bits > 0 && bits <= 62, "bits must be even, in 2..=62");
        let stride = 1u64 << (bits / 2);
        let mut baby_steps = HashMap::with_capacity(stride as usize);
        let mut acc = RistrettoPoint::identity();
        for i in 0..stride {
            baby_steps.insert(acc.compress().to_bytes(), i);
            acc += G;
        }
        DlpTable {
            baby_steps,
            stride,
            max: 1u64 << bits,
            giant_step: -(Scalar::from(stride) * G),
        }
    }

    /// Exclusive upper bound of recoverable values.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Recover `b` from `b·G`, or fail with `OutOfRange`/`Cancelled`.
    pub fn solve(
        &self,
        point: &RistrettoPoint,
        cancel: &CancellationToken,
    ) -> Result<u64, DlpError> {
        let mut current = *point;
        for j in 0..self.stride {
            if j % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(DlpError::Cancelled);
            }
            if let Some(&i) = self.baby_steps.get(&current.compress().to_bytes()) {
                return Ok(j * self.stride + i);
            }
            current += self.giant_step;
        }
        Err(DlpError::OutOfRange)
    }
}
