//! # Guardian Invitations
//!
//! Hands the subject's unassigned shares out to guardians, one share per
//! invitation, under concurrency and expiry.
//!
//! ## Lifecycle
//!
//! ```text
//!            accept                decline / revoke
//! Pending ─────────► Accepted     Pending ─────────► Declined / Revoked
//!    │
//!    │ expires_at <= now (sweep, accept, or the next issue)
//!    ▼
//! Expired
//! ```
//!
//! A `Pending` invitation exclusively reserves its share. Every way out of
//! `Pending` other than acceptance puts the share back in the pool.
//!
//! ## Share custody
//!
//! Unassigned shares sit in the pool sealed under a key derived from the
//! master key. Issuing an invitation opens the reserved share and reseals a
//! copy under a key derived from a secret that only the token carries. The
//! store keeps that sealed copy and a digest of the token, never the token
//! itself, so reading the store yields no share. The copy is dropped as soon
//! as the invitation leaves `Pending`.
//!
//! [`lifecycle`] holds the service; [`sweeper`] is the recurring task that
//! expires overdue invitations.

pub mod lifecycle;
pub mod sweeper;

pub use lifecycle::{InvitationService, IssuedInvitation};
pub use sweeper::InvitationSweeper;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::encryption::EncryptionError;
use crate::crypto::wrap::WrapError;
use crate::identity::Principal;
use crate::sharing::{SealedShare, ShamirError};
use crate::storage::StoreError;
use crate::token::TokenError;

/// Errors from the invitation lifecycle.
#[derive(Debug, Error)]
pub enum InvitationError {
    #[error("subject {0} already has shares provisioned")]
    AlreadyProvisioned(Principal),

    #[error("master key does not match the key on record for {0}")]
    MasterKeyMismatch(Principal),

    #[error("share {0} is not in the unassigned pool")]
    UnknownShare(Uuid),

    #[error("share {0} is already reserved by a pending invitation")]
    ShareAlreadyReserved(Uuid),

    #[error("invitation {0} not found")]
    InvitationNotFound(Uuid),

    #[error("token does not match the issued invitation")]
    TokenMismatch,

    #[error("invitation {0} has expired")]
    InvitationExpired(Uuid),

    #[error("invitation {id} is {status}, not pending")]
    InvitationNotPending { id: Uuid, status: InvitationStatus },

    #[error("{0} is already a guardian for this subject")]
    GuardianAlreadyAssigned(Principal),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Sharing(#[from] ShamirError),

    #[error(transparent)]
    Wrap(#[from] WrapError),

    #[error("sealed share does not open: {0}")]
    Seal(#[from] EncryptionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InvitationError {
    /// Whether this is a tamper or authentication failure.
    pub fn is_integrity_failure(&self) -> bool {
        match self {
            Self::TokenMismatch | Self::MasterKeyMismatch(_) => true,
            Self::Wrap(e) => e.is_integrity_failure(),
            Self::Seal(e) => e.is_integrity_failure(),
            Self::Sharing(e) => e.is_integrity_failure(),
            _ => false,
        }
    }
}

/// Where an invitation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
    /// The invited guardian turned it down.
    Declined,
    /// The inviter withdrew it.
    Revoked,
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Expired => "expired",
            Self::Declined => "declined",
            Self::Revoked => "revoked",
        };
        f.write_str(label)
    }
}

/// An offer of one share to a prospective guardian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: Uuid,
    pub share_id: Uuid,
    pub inviter_id: Principal,
    pub recipient_hint: Option<String>,
    /// BLAKE3 digest of the bearer token handed to the guardian.
    pub token_digest: [u8; 32],
    /// The reserved share, sealed under the token's key. Present only while
    /// the invitation is pending.
    pub sealed_share: Option<SealedShare>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: InvitationStatus,
    /// Set once the invitation leaves `Pending`.
    pub resolved_at: Option<DateTime<Utc>>,
    pub accepted_by: Option<Principal>,
}

impl Invitation {
    pub fn is_pending(&self) -> bool {
        self.status == InvitationStatus::Pending
    }

    /// `expires_at <= now`: an invitation is dead at its expiry instant.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether this invitation currently holds the reservation on `share_id`.
    pub fn reserves(&self, share_id: Uuid) -> bool {
        self.is_pending() && self.share_id == share_id
    }

    /// Whether `digest` is the digest of the token issued for this invitation.
    pub fn issued_with(&self, digest: &blake3::Hash) -> bool {
        blake3::Hash::from(self.token_digest) == *digest
    }

    /// Move out of `Pending`, dropping the sealed share copy. Callers check
    /// the status first.
    pub(crate) fn resolve(&mut self, status: InvitationStatus, at: DateTime<Utc>) {
        debug_assert!(self.is_pending());
        self.status = status;
        self.resolved_at = Some(at);
        self.sealed_share = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(expires_at: DateTime<Utc>) -> Invitation {
        Invitation {
            id: Uuid::new_v4(),
            share_id: Uuid::new_v4(),
            inviter_id: Principal::parse("alice").unwrap(),
            recipient_hint: None,
            token_digest: [0u8; 32],
            sealed_share: None,
            issued_at: Utc::now(),
            expires_at,
            status: InvitationStatus::Pending,
            resolved_at: None,
            accepted_by: None,
        }
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let invitation = pending(now);
        assert!(invitation.is_overdue(now));
        assert!(!invitation.is_overdue(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn only_pending_invitations_reserve() {
        let now = Utc::now();
        let mut invitation = pending(now);
        let share = invitation.share_id;
        assert!(invitation.reserves(share));
        assert!(!invitation.reserves(Uuid::new_v4()));

        invitation.resolve(InvitationStatus::Expired, now);
        assert!(!invitation.reserves(share));
        assert_eq!(invitation.resolved_at, Some(now));
    }

    #[test]
    fn token_digest_comparison() {
        let mut invitation = pending(Utc::now());
        let digest = blake3::hash(b"token bytes");
        invitation.token_digest = *digest.as_bytes();
        assert!(invitation.issued_with(&digest));
        assert!(!invitation.issued_with(&blake3::hash(b"other bytes")));
    }

    #[test]
    fn resolving_drops_the_sealed_copy() {
        use crate::crypto::encryption::random_key;
        use crate::sharing::Share;

        let now = Utc::now();
        let mut invitation = pending(now);
        let share = Share::new(1, vec![1, 2, 3]);
        invitation.sealed_share = Some(SealedShare::seal(&share, &random_key()).unwrap());
        invitation.resolve(InvitationStatus::Declined, now);
        assert!(invitation.sealed_share.is_none());
    }

    #[test]
    fn status_display() {
        assert_eq!(InvitationStatus::Revoked.to_string(), "revoked");
    }
}
