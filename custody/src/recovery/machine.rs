//! Recovery service: drives [`RecoverySession`] transitions against storage.
//!
//! Every call takes the subject's lock, loads the record, applies one
//! transition and writes the record back. Submitted shares go to the
//! context's [`HeldShares`](super::HeldShares), never to the store. Crypto
//! failures during reconstruction are terminal: the session is marked
//! `Failed`, persisted, and the error is returned. Nothing is retried.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::session::{RecoverySession, RecoveryStatus};
use super::RecoveryError;
use crate::clock::deadline;
use crate::config::ACCESS_KEY_LENGTH;
use crate::crypto::{encryption, key_check};
use crate::custody::CustodyContext;
use crate::identity::Principal;
use crate::sharing::{combine, Share};

/// What a completed recovery hands back.
pub struct RecoveryOutcome {
    pub master_key: Zeroizing<Vec<u8>>,
    /// Single-use key for [`DevicePairing::enroll_recovered`](crate::device::DevicePairing::enroll_recovered).
    pub access_key: Zeroizing<[u8; ACCESS_KEY_LENGTH]>,
    pub access_key_expires_at: DateTime<Utc>,
    pub session: RecoverySession,
}

impl fmt::Debug for RecoveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryOutcome")
            .field("master_key", &"<redacted>")
            .field("access_key", &"<redacted>")
            .field("access_key_expires_at", &self.access_key_expires_at)
            .field("session", &self.session.id())
            .finish()
    }
}

/// Result of a share submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Still waiting for more shares.
    Pending { collected: usize, threshold: u8 },
    /// The threshold was reached and the key reconstructed.
    Completed(Box<RecoveryOutcome>),
}

/// Drives recovery sessions.
#[derive(Debug, Clone)]
pub struct RecoveryService {
    ctx: Arc<CustodyContext>,
}

impl RecoveryService {
    pub fn new(ctx: Arc<CustodyContext>) -> Self {
        Self { ctx }
    }

    /// Open a recovery session for `subject`.
    pub async fn initiate(&self, subject: &Principal) -> Result<RecoverySession, RecoveryError> {
        let _guard = self.ctx.locks.lock(subject).await;
        let mut record = self
            .ctx
            .store
            .get(subject)
            .await?
            .ok_or_else(|| RecoveryError::NotProvisioned(subject.clone()))?;

        let policy = record
            .policy
            .ok_or_else(|| RecoveryError::NotProvisioned(subject.clone()))?;
        if record.active_recovery().is_some() {
            return Err(RecoveryError::SessionAlreadyActive(subject.clone()));
        }

        let session = RecoverySession::new(subject.clone(), policy.threshold(), self.ctx.now());
        record.recovery = Some(session.clone());
        self.ctx.store.put(&record).await?;

        info!(
            subject = %subject,
            session = %session.id(),
            threshold = policy.threshold(),
            "recovery session initiated"
        );
        Ok(session)
    }

    /// Record `guardian`'s approval. Approving twice is a no-op.
    pub async fn approve(
        &self,
        subject: &Principal,
        guardian: &Principal,
    ) -> Result<RecoverySession, RecoveryError> {
        let _guard = self.ctx.locks.lock(subject).await;
        let mut record = self
            .ctx
            .store
            .get(subject)
            .await?
            .ok_or_else(|| RecoveryError::NoActiveSession(subject.clone()))?;

        if record.active_recovery().is_none() {
            return Err(RecoveryError::NoActiveSession(subject.clone()));
        }
        if record.guardian(guardian).is_none() {
            return Err(RecoveryError::NotAGuardian(guardian.clone()));
        }

        let session = record
            .active_recovery_mut()
            .ok_or_else(|| RecoveryError::NoActiveSession(subject.clone()))?;
        let before = session.status();
        let added = session.record_approval(guardian.clone())?;
        let snapshot = session.clone();

        if added {
            self.ctx.store.put(&record).await?;
            info!(
                subject = %subject,
                guardian = %guardian,
                approvals = snapshot.approved_guardians().len(),
                status = %snapshot.status(),
                "recovery approval recorded"
            );
        } else {
            debug!(subject = %subject, guardian = %guardian, "duplicate approval ignored");
        }
        if before != snapshot.status() && snapshot.status() == RecoveryStatus::ApprovalComplete {
            info!(subject = %subject, "recovery approval threshold reached");
        }
        Ok(snapshot)
    }

    /// Accept `guardian`'s unwrapped share. Reaching the threshold combines
    /// the shares and completes the session.
    pub async fn submit_share(
        &self,
        subject: &Principal,
        guardian: &Principal,
        share: Share,
    ) -> Result<SubmitOutcome, RecoveryError> {
        let _guard = self.ctx.locks.lock(subject).await;
        let mut record = self
            .ctx
            .store
            .get(subject)
            .await?
            .ok_or_else(|| RecoveryError::NoActiveSession(subject.clone()))?;

        let session = record
            .active_recovery()
            .ok_or_else(|| RecoveryError::NoActiveSession(subject.clone()))?;
        let assignment = record
            .guardian(guardian)
            .ok_or_else(|| RecoveryError::NotAGuardian(guardian.clone()))?;
        if !session.has_approved(guardian) {
            return Err(RecoveryError::ApprovalRequired(guardian.clone()));
        }
        if !assignment.matches(&share) {
            warn!(subject = %subject, guardian = %guardian, "submitted share does not match assignment");
            return Err(RecoveryError::ShareMismatch(guardian.clone()));
        }

        let key_check_on_record = record.key_check;
        let now = self.ctx.now();
        let session = record
            .active_recovery_mut()
            .ok_or_else(|| RecoveryError::NoActiveSession(subject.clone()))?;
        let session_id = session.id();

        // Ids collected before a restart have no bytes behind them any more.
        for lost in self.ctx.held.missing(session_id, session.collected_shares()) {
            session.forget_share(lost);
            warn!(subject = %subject, share = %lost, "collected share no longer held; resubmission needed");
        }
        session.record_share(share.id)?;
        self.ctx.held.hold(session_id, share);

        if session.status() != RecoveryStatus::SharesCollected {
            let pending = SubmitOutcome::Pending {
                collected: session.collected_shares().len(),
                threshold: session.threshold(),
            };
            self.ctx.store.put(&record).await?;
            info!(subject = %subject, guardian = %guardian, "recovery share collected");
            return Ok(pending);
        }

        // Threshold reached: reconstruct and verify.
        let shares = self.ctx.held.collect(session_id, session.collected_shares());
        let reconstructed = combine(&shares);
        drop(shares);
        self.ctx.held.discard(session_id);
        let verdict = match reconstructed {
            Ok(master_key) => {
                let verified = key_check_on_record.map_or(true, |expected| {
                    blake3::Hash::from(expected) == key_check(&master_key)
                });
                if verified {
                    Ok(master_key)
                } else {
                    Err(RecoveryError::KeyCheckMismatch)
                }
            }
            Err(e) => Err(RecoveryError::from(e)),
        };

        match verdict {
            Ok(master_key) => {
                let access_key = encryption::random_key();
                let expires_at = deadline(now, self.ctx.config.access_key_ttl);
                session.complete(access_key.as_slice(), expires_at, now)?;
                let snapshot = session.clone();
                self.ctx.store.put(&record).await?;

                info!(subject = %subject, session = %snapshot.id(), "recovery completed");
                Ok(SubmitOutcome::Completed(Box::new(RecoveryOutcome {
                    master_key,
                    access_key,
                    access_key_expires_at: expires_at,
                    session: snapshot,
                })))
            }
            Err(err) => {
                session.fail(err.to_string(), now)?;
                self.ctx.store.put(&record).await?;
                warn!(subject = %subject, error = %err, "recovery failed during reconstruction");
                Err(err)
            }
        }
    }

    /// The subject's latest session, active or not.
    pub async fn status(&self, subject: &Principal) -> Result<RecoverySession, RecoveryError> {
        let record = self.ctx.store.get(subject).await?;
        record
            .and_then(|r| r.recovery)
            .ok_or_else(|| RecoveryError::NoActiveSession(subject.clone()))
    }

    /// Abort the active session.
    pub async fn fail(
        &self,
        subject: &Principal,
        reason: &str,
    ) -> Result<RecoverySession, RecoveryError> {
        let _guard = self.ctx.locks.lock(subject).await;
        let mut record = self
            .ctx
            .store
            .get(subject)
            .await?
            .ok_or_else(|| RecoveryError::NoActiveSession(subject.clone()))?;

        let now = self.ctx.now();
        let session = record
            .active_recovery_mut()
            .ok_or_else(|| RecoveryError::NoActiveSession(subject.clone()))?;
        session.fail(reason, now)?;
        let snapshot = session.clone();
        self.ctx.store.put(&record).await?;
        self.ctx.held.discard(snapshot.id());

        info!(subject = %subject, reason, "recovery session failed");
        Ok(snapshot)
    }
}
