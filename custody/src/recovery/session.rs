//! # Recovery Session State
//!
//! The pure state machine behind [`RecoveryService`](super::RecoveryService).
//! Nothing in here talks to storage or does crypto; every transition is a
//! method on [`RecoverySession`] that either moves the status forward or
//! refuses with a [`TransitionError`].
//!
//! ```text
//! Requested ─first approval─► InProgress ─approvals >= t─► ApprovalComplete
//!                                                               │
//!                                                   collected >= t
//!                                                               ▼
//!                    Completed ◄─combine ok, access key─ SharesCollected
//!
//! any active state ──fail──► Failed
//! ```
//!
//! Thresholds are "at least": reaching `t` is what triggers a transition,
//! and later approvals or duplicate submissions never move the status back.
//!
//! The session persists only the ids of collected shares. Share bytes never
//! reach the store; the service keeps them in memory until the session ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::access_key_digest;
use crate::identity::Principal;

/// Status of a recovery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryStatus {
    Requested,
    InProgress,
    ApprovalComplete,
    SharesCollected,
    Completed,
    Failed,
}

impl RecoveryStatus {
    /// Completed and Failed are terminal; everything else is active.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Requested => "requested",
            Self::InProgress => "in-progress",
            Self::ApprovalComplete => "approval-complete",
            Self::SharesCollected => "shares-collected",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A transition the current status does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move recovery session from {from} to {to}")]
pub struct TransitionError {
    pub from: RecoveryStatus,
    pub to: RecoveryStatus,
}

/// The single-use key handed out when a recovery completes. Only its digest
/// is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempAccessKey {
    digest: [u8; 32],
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

/// One recovery attempt for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySession {
    id: Uuid,
    subject_id: Principal,
    requested_at: DateTime<Utc>,
    status: RecoveryStatus,
    threshold: u8,
    approved_guardians: BTreeSet<Principal>,
    collected_shares: BTreeSet<Uuid>,
    temp_access_key: Option<TempAccessKey>,
    failure_reason: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

impl RecoverySession {
    /// Open a new session in `Requested`.
    pub fn new(subject_id: Principal, threshold: u8, requested_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            requested_at,
            status: RecoveryStatus::Requested,
            threshold,
            approved_guardians: BTreeSet::new(),
            collected_shares: BTreeSet::new(),
            temp_access_key: None,
            failure_reason: None,
            completed_at: None,
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subject_id(&self) -> &Principal {
        &self.subject_id
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn status(&self) -> RecoveryStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn approved_guardians(&self) -> &BTreeSet<Principal> {
        &self.approved_guardians
    }

    pub fn has_approved(&self, guardian: &Principal) -> bool {
        self.approved_guardians.contains(guardian)
    }

    /// Ids of every share submitted so far.
    pub fn collected_shares(&self) -> &BTreeSet<Uuid> {
        &self.collected_shares
    }

    /// Forget a collected id whose share bytes are no longer available.
    /// Only moves the status back from `SharesCollected`.
    pub fn forget_share(&mut self, share_id: Uuid) -> bool {
        let removed = self.collected_shares.remove(&share_id);
        if removed
            && self.status == RecoveryStatus::SharesCollected
            && self.collected_shares.len() < self.threshold as usize
        {
            self.status = RecoveryStatus::ApprovalComplete;
        }
        removed
    }

    pub fn temp_access_key(&self) -> Option<&TempAccessKey> {
        self.temp_access_key.as_ref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    // -- Transitions --------------------------------------------------------

    /// Record an approval. Returns `false` if the guardian had already
    /// approved.
    pub fn record_approval(&mut self, guardian: Principal) -> Result<bool, TransitionError> {
        self.require_active(RecoveryStatus::InProgress)?;

        let added = self.approved_guardians.insert(guardian);
        if self.status == RecoveryStatus::Requested {
            self.status = RecoveryStatus::InProgress;
        }
        if self.status == RecoveryStatus::InProgress
            && self.approved_guardians.len() >= self.threshold as usize
        {
            self.status = RecoveryStatus::ApprovalComplete;
        }
        Ok(added)
    }

    /// Note a submitted share. Returns `false` if the id was already
    /// collected.
    pub fn record_share(&mut self, share_id: Uuid) -> Result<bool, TransitionError> {
        self.require_active(RecoveryStatus::SharesCollected)?;

        let added = self.collected_shares.insert(share_id);
        if self.status == RecoveryStatus::ApprovalComplete
            && self.collected_shares.len() >= self.threshold as usize
        {
            self.status = RecoveryStatus::SharesCollected;
        }
        Ok(added)
    }

    /// Finish the session and store the digest of the issued access key.
    pub fn complete(
        &mut self,
        access_key: &[u8],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != RecoveryStatus::SharesCollected {
            return Err(TransitionError {
                from: self.status,
                to: RecoveryStatus::Completed,
            });
        }
        self.status = RecoveryStatus::Completed;
        self.completed_at = Some(now);
        self.temp_access_key = Some(TempAccessKey {
            digest: *access_key_digest(access_key).as_bytes(),
            expires_at,
            consumed: false,
        });
        Ok(())
    }

    /// Abort from any active state.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require_active(RecoveryStatus::Failed)?;
        self.status = RecoveryStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// Spend the temporary access key. Succeeds at most once, before expiry,
    /// and only for the key that was issued.
    pub fn consume_access_key(&mut self, presented: &[u8], now: DateTime<Utc>) -> bool {
        let Some(key) = self.temp_access_key.as_mut() else {
            return false;
        };
        if key.consumed || key.expires_at <= now {
            return false;
        }
        if blake3::Hash::from(key.digest) != access_key_digest(presented) {
            return false;
        }
        key.consumed = true;
        true
    }

    fn require_active(&self, to: RecoveryStatus) -> Result<(), TransitionError> {
        if self.status.is_active() {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }
}
