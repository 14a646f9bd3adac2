//! # Shamir's Secret Sharing over GF(256)
//!
//! Splits a secret into `n` shares with a reconstruction threshold of `t`.
//! Any `t` shares recover the secret; `t - 1` shares reveal nothing about it.
//!
//! Each byte of the secret is the constant term of its own random polynomial
//! of degree `t - 1`. Share `x` holds that polynomial evaluated at `x` for
//! every byte, so all shares are exactly as long as the secret.
//!
//! ## Security model
//!
//! - Coefficients come from the OS CSPRNG. Nothing else is acceptable here.
//! - `x = 0` is the secret itself and is never handed out; share indices run
//!   `1..=n`.
//! - [`combine`] cannot tell a below-threshold share set from a valid one. It
//!   returns *some* bytes either way. Callers that need to know compare the
//!   result against a stored key check (see [`crate::crypto::key_check`]).
//!
//! ## Usage
//!
//! ```
//! use keyward_custody::sharing::{combine, split, SharingPolicy};
//!
//! let secret = b"this is a 32-byte master key!!!!";
//! let policy = SharingPolicy::new(3, 5).unwrap();
//! let shares = split(secret, &policy).unwrap();
//!
//! let recovered = combine(&shares[..3]).unwrap();
//! assert_eq!(secret.as_slice(), recovered.as_slice());
//! ```

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::gf256::{self, DomainError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while splitting or combining.
#[derive(Debug, Error)]
pub enum ShamirError {
    /// A 1-of-n scheme is just copies of the secret.
    #[error("threshold must be >= 2, got {0}")]
    ThresholdTooLow(u8),

    #[error("threshold ({threshold}) exceeds total shares ({total})")]
    ThresholdExceedsShares {
        /// The requested threshold.
        threshold: u8,
        /// The requested total.
        total: u8,
    },

    #[error("secret must not be empty")]
    EmptySecret,

    #[error("need at least 2 shares to combine, got {0}")]
    InsufficientShares(usize),

    #[error("share lengths differ: expected {expected}, got {got}")]
    LengthMismatch {
        /// Length of the first share.
        expected: usize,
        /// Length of the offending share.
        got: usize,
    },

    #[error("duplicate share x-coordinate: {0}")]
    DuplicateX(u8),

    #[error("share x-coordinate 0 is reserved for the secret")]
    ZeroX,

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ShamirError {
    /// Whether the shares themselves look corrupted, as opposed to the
    /// caller passing bad parameters.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::LengthMismatch { .. } | Self::Domain(_))
    }
}

// ---------------------------------------------------------------------------
// Public Types
// ---------------------------------------------------------------------------

/// How many shares to produce and how many it takes to recover.
///
/// Always satisfies `2 <= threshold <= total_shares <= 255`. The upper bound
/// falls out of the `u8` type: x-coordinates are non-zero field elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyFields")]
pub struct SharingPolicy {
    threshold: u8,
    total_shares: u8,
}

/// Unvalidated wire form of [`SharingPolicy`].
#[derive(Deserialize)]
struct PolicyFields {
    threshold: u8,
    total_shares: u8,
}

impl TryFrom<PolicyFields> for SharingPolicy {
    type Error = ShamirError;

    fn try_from(fields: PolicyFields) -> Result<Self, Self::Error> {
        Self::new(fields.threshold, fields.total_shares)
    }
}

impl SharingPolicy {
    /// Validate and build a policy.
    pub fn new(threshold: u8, total_shares: u8) -> Result<Self, ShamirError> {
        if threshold < 2 {
            return Err(ShamirError::ThresholdTooLow(threshold));
        }
        if total_shares < threshold {
            return Err(ShamirError::ThresholdExceedsShares {
                threshold,
                total: total_shares,
            });
        }
        Ok(Self {
            threshold,
            total_shares,
        })
    }

    /// Minimum number of shares needed to reconstruct.
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Number of shares produced by [`split`].
    pub fn total_shares(&self) -> u8 {
        self.total_shares
    }
}

/// One share of a split secret.
///
/// The `y` bytes are wiped when the share is dropped and never printed by
/// `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Stable identifier, used to reserve and assign the share.
    pub id: Uuid,
    /// Evaluation point, `1..=255`.
    pub x: u8,
    /// One evaluated byte per byte of the secret.
    #[serde(with = "hex::serde")]
    pub y: Vec<u8>,
}

impl Share {
    /// Build a share with a fresh id.
    pub fn new(x: u8, y: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            x,
            y,
        }
    }

    /// Serialize for wrapping to a guardian.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Vec::with_capacity(1 + 16 + self.y.len());
        bytes.extend_from_slice(self.id.as_bytes());
        bytes.push(self.x);
        bytes.extend_from_slice(&self.y);
        Zeroizing::new(bytes)
    }

    /// Parse bytes produced by [`Share::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 17 {
            return None;
        }
        let id = Uuid::from_slice(&bytes[..16]).ok()?;
        Some(Self {
            id,
            x: bytes[16],
            y: bytes[17..].to_vec(),
        })
    }
}

impl Drop for Share {
    fn drop(&mut self) {
        self.y.zeroize();
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("id", &self.id)
            .field("x", &self.x)
            .field("y", &format_args!("<{} bytes redacted>", self.y.len()))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Split and Combine
// ---------------------------------------------------------------------------

/// Split `secret` into `policy.total_shares()` shares.
pub fn split(secret: &[u8], policy: &SharingPolicy) -> Result<Vec<Share>, ShamirError> {
    if secret.is_empty() {
        return Err(ShamirError::EmptySecret);
    }

    let threshold = policy.threshold as usize;
    let mut shares: Vec<Share> = (1..=policy.total_shares)
        .map(|x| Share::new(x, Vec::with_capacity(secret.len())))
        .collect();

    let mut rng = rand::rngs::OsRng;
    let mut coefficients = Zeroizing::new(vec![0u8; threshold]);

    for &secret_byte in secret {
        // [a_0 = secret byte, a_1 .. a_{t-1} random]
        coefficients[0] = secret_byte;
        rng.fill_bytes(&mut coefficients[1..]);

        for share in shares.iter_mut() {
            share.y.push(gf256::eval_polynomial(&coefficients, share.x));
        }
    }

    Ok(shares)
}

/// Reconstruct the secret from a set of shares.
///
/// Accepts anything that iterates over share references, so both
/// `combine(&shares[..3])` and `combine(map.values())` work.
pub fn combine<'a, I>(shares: I) -> Result<Zeroizing<Vec<u8>>, ShamirError>
where
    I: IntoIterator<Item = &'a Share>,
{
    let shares: Vec<&Share> = shares.into_iter().collect();
    if shares.len() < 2 {
        return Err(ShamirError::InsufficientShares(shares.len()));
    }

    let expected = shares[0].y.len();
    let mut seen = HashSet::with_capacity(shares.len());
    for share in &shares {
        if share.x == 0 {
            return Err(ShamirError::ZeroX);
        }
        if !seen.insert(share.x) {
            return Err(ShamirError::DuplicateX(share.x));
        }
        if share.y.len() != expected {
            return Err(ShamirError::LengthMismatch {
                expected,
                got: share.y.len(),
            });
        }
    }

    let xs: Vec<u8> = shares.iter().map(|s| s.x).collect();
    let mut ys = Zeroizing::new(vec![0u8; shares.len()]);
    let mut secret = Zeroizing::new(Vec::with_capacity(expected));

    for i in 0..expected {
        for (slot, share) in ys.iter_mut().zip(&shares) {
            *slot = share.y[i];
        }
        secret.push(gf256::interpolate_at_zero(&xs, &ys)?);
    }

    Ok(secret)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
