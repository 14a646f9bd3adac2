//! # Guardian-Approved Recovery
//!
//! Gets the master key back after every device is lost. The subject opens a
//! session, guardians approve it and submit their unwrapped shares, and once
//! `t` shares are in, the key is reconstructed, checked against the stored
//! key check, and returned with a single-use temporary access key for
//! enrolling a new device.
//!
//! - [`session`]: the pure state machine.
//! - [`machine`]: the service that drives it against storage.
//! - [`held`]: where submitted share bytes wait, outside the store.

pub mod held;
pub mod machine;
pub mod session;

pub use held::HeldShares;
pub use machine::{RecoveryOutcome, RecoveryService, SubmitOutcome};
pub use session::{RecoverySession, RecoveryStatus, TempAccessKey, TransitionError};

use thiserror::Error;

use crate::identity::Principal;
use crate::sharing::ShamirError;
use crate::storage::StoreError;

/// Errors from the recovery service.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("subject {0} has no shares provisioned")]
    NotProvisioned(Principal),

    #[error("a recovery session is already active for {0}")]
    SessionAlreadyActive(Principal),

    #[error("no active recovery session for {0}")]
    NoActiveSession(Principal),

    #[error("{0} is not a guardian for this subject")]
    NotAGuardian(Principal),

    #[error("{0} must approve the session before submitting a share")]
    ApprovalRequired(Principal),

    #[error("submitted share is not the one assigned to {0}")]
    ShareMismatch(Principal),

    #[error("reconstructed key does not match the stored key check")]
    KeyCheckMismatch,

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Sharing(#[from] ShamirError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RecoveryError {
    /// Whether this is a tamper or authentication failure.
    pub fn is_integrity_failure(&self) -> bool {
        match self {
            Self::KeyCheckMismatch | Self::ShareMismatch(_) => true,
            Self::Sharing(e) => e.is_integrity_failure(),
            _ => false,
        }
    }
}
