//! Invitation service: provisioning, reservation, acceptance, expiry.
//!
//! All mutations run under the inviter's subject lock, so two `issue` calls
//! for the same share cannot both see it free, and an `accept` racing a
//! sweep sees either `Pending` or `Expired`, never both.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{Invitation, InvitationError, InvitationStatus};
use crate::clock::deadline;
use crate::crypto::key_check;
use crate::crypto::keys::RecipientPublicKey;
use crate::custody::CustodyContext;
use crate::guardian::GuardianRecord;
use crate::identity::Principal;
use crate::sharing::{pool_key, split, SealedShare, SharingPolicy};
use crate::storage::SubjectRecord;
use crate::token::InvitationToken;

/// A freshly issued invitation and the bearer token for it.
///
/// The token text exists only here; the stored invitation keeps its digest.
pub struct IssuedInvitation {
    pub invitation: Invitation,
    pub token: Zeroizing<String>,
}

impl fmt::Debug for IssuedInvitation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedInvitation")
            .field("invitation", &self.invitation.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Hands shares out to guardians.
#[derive(Debug, Clone)]
pub struct InvitationService {
    ctx: Arc<CustodyContext>,
}

impl InvitationService {
    pub fn new(ctx: Arc<CustodyContext>) -> Self {
        Self { ctx }
    }

    /// Split `master_key` under `policy` into the owner's unassigned pool,
    /// sealed under a key derived from `master_key`.
    ///
    /// Returns the ids of the new shares.
    pub async fn provision(
        &self,
        owner: &Principal,
        master_key: &[u8],
        policy: SharingPolicy,
    ) -> Result<Vec<Uuid>, InvitationError> {
        let _guard = self.ctx.locks.lock(owner).await;
        let mut record = self.ctx.load_or_new(owner).await?;

        if record.is_provisioned() {
            return Err(InvitationError::AlreadyProvisioned(owner.clone()));
        }
        let check = key_check(master_key);
        if let Some(existing) = record.key_check {
            if blake3::Hash::from(existing) != check {
                return Err(InvitationError::MasterKeyMismatch(owner.clone()));
            }
        }

        let key = pool_key(master_key);
        let sealed = split(master_key, &policy)?
            .iter()
            .map(|share| SealedShare::seal(share, &key))
            .collect::<Result<Vec<_>, _>>()?;
        let ids = sealed.iter().map(|s| s.id).collect();
        record.policy = Some(policy);
        record.key_check = Some(*check.as_bytes());
        record.unassigned_shares = sealed;
        self.ctx.store.put(&record).await?;

        info!(
            subject = %owner,
            threshold = policy.threshold(),
            total = policy.total_shares(),
            "master key split into unassigned shares"
        );
        Ok(ids)
    }

    /// Reserve `share_id` and issue an invitation for it.
    ///
    /// `master_key` opens the pooled share so it can be resealed for the
    /// invitation. `ttl` defaults to the configured invitation lifetime.
    pub async fn issue(
        &self,
        inviter: &Principal,
        master_key: &[u8],
        share_id: Uuid,
        ttl: Option<Duration>,
        recipient_hint: Option<String>,
    ) -> Result<IssuedInvitation, InvitationError> {
        let _guard = self.ctx.locks.lock(inviter).await;
        let mut record = self
            .ctx
            .store
            .get(inviter)
            .await?
            .ok_or(InvitationError::UnknownShare(share_id))?;

        let now = self.ctx.now();
        let released = expire_overdue(&mut record, now);

        let outcome = self.reserve(&mut record, inviter, master_key, share_id, ttl, recipient_hint);

        if outcome.is_ok() || !released.is_empty() {
            self.ctx.store.put(&record).await?;
        }
        if let Ok(issued) = &outcome {
            info!(
                subject = %inviter,
                invitation = %issued.invitation.id,
                share = %share_id,
                expires_at = %issued.invitation.expires_at,
                "guardian invitation issued"
            );
        }
        outcome
    }

    /// Redeem an invitation token: open the share it carries the key for,
    /// wrap it to the guardian and record the assignment.
    pub async fn accept(
        &self,
        token_text: &str,
        guardian: &Principal,
        guardian_public_key: RecipientPublicKey,
        contact_info: Option<String>,
    ) -> Result<GuardianRecord, InvitationError> {
        let token = InvitationToken::from_text(token_text)?;
        let inviter = token.inviter_id.clone();

        let _guard = self.ctx.locks.lock(&inviter).await;
        let mut record = self.load_for_token(&token).await?;
        let index = self.pending_index(&mut record, &token).await?;

        if record.guardian(guardian).is_some() {
            return Err(InvitationError::GuardianAlreadyAssigned(guardian.clone()));
        }
        if record.unassigned_share(token.share_id).is_none() {
            return Err(InvitationError::UnknownShare(token.share_id));
        }
        let share = record.invitations[index]
            .sealed_share
            .as_ref()
            .filter(|sealed| sealed.id == token.share_id)
            .ok_or(InvitationError::UnknownShare(token.share_id))?
            .open(&token.share_key())?;

        let now = self.ctx.now();
        let assignment =
            GuardianRecord::assign(guardian.clone(), guardian_public_key, &share, contact_info, now)?;

        let invitation = &mut record.invitations[index];
        invitation.resolve(InvitationStatus::Accepted, now);
        invitation.accepted_by = Some(guardian.clone());
        record.take_unassigned_share(token.share_id);
        record.guardians.push(assignment.clone());
        self.ctx.store.put(&record).await?;

        info!(
            subject = %inviter,
            guardian = %guardian,
            invitation = %token.invitation_id,
            share = %token.share_id,
            "guardian invitation accepted"
        );
        Ok(assignment)
    }

    /// The invited guardian turns the invitation down. Releases the share.
    pub async fn decline(&self, token_text: &str) -> Result<Invitation, InvitationError> {
        let token = InvitationToken::from_text(token_text)?;
        let inviter = token.inviter_id.clone();

        let _guard = self.ctx.locks.lock(&inviter).await;
        let mut record = self.load_for_token(&token).await?;
        let index = self.pending_index(&mut record, &token).await?;

        let invitation = &mut record.invitations[index];
        invitation.resolve(InvitationStatus::Declined, self.ctx.now());
        let snapshot = invitation.clone();
        self.ctx.store.put(&record).await?;

        info!(subject = %inviter, invitation = %snapshot.id, "guardian invitation declined");
        Ok(snapshot)
    }

    /// The inviter withdraws a pending invitation. Releases the share.
    pub async fn revoke(
        &self,
        inviter: &Principal,
        invitation_id: Uuid,
    ) -> Result<Invitation, InvitationError> {
        let _guard = self.ctx.locks.lock(inviter).await;
        let mut record = self
            .ctx
            .store
            .get(inviter)
            .await?
            .ok_or(InvitationError::InvitationNotFound(invitation_id))?;

        let now = self.ctx.now();
        let invitation = record
            .invitation_mut(invitation_id)
            .ok_or(InvitationError::InvitationNotFound(invitation_id))?;
        if !invitation.is_pending() {
            return Err(InvitationError::InvitationNotPending {
                id: invitation_id,
                status: invitation.status,
            });
        }
        invitation.resolve(InvitationStatus::Revoked, now);
        let snapshot = invitation.clone();
        self.ctx.store.put(&record).await?;

        info!(subject = %inviter, invitation = %invitation_id, "guardian invitation revoked");
        Ok(snapshot)
    }

    /// Every invitation the inviter has issued.
    pub async fn list(&self, inviter: &Principal) -> Result<Vec<Invitation>, InvitationError> {
        let record = self.ctx.store.get(inviter).await?;
        Ok(record.map(|r| r.invitations).unwrap_or_default())
    }

    /// Expire every overdue pending invitation across all subjects.
    ///
    /// Returns the ids of the shares released. Running it twice in a row
    /// releases nothing the second time.
    pub async fn sweep_expired(&self) -> Result<Vec<Uuid>, InvitationError> {
        let mut released = Vec::new();

        for subject in self.ctx.store.subjects().await? {
            let _guard = self.ctx.locks.lock(&subject).await;
            let Some(mut record) = self.ctx.store.get(&subject).await? else {
                continue;
            };
            let freed = expire_overdue(&mut record, self.ctx.now());
            if !freed.is_empty() {
                self.ctx.store.put(&record).await?;
                released.extend(freed);
            }
        }

        if released.is_empty() {
            debug!("invitation sweep found nothing overdue");
        } else {
            info!(released = released.len(), "expired overdue guardian invitations");
        }
        Ok(released)
    }

    // -- Internals ----------------------------------------------------------

    fn reserve(
        &self,
        record: &mut SubjectRecord,
        inviter: &Principal,
        master_key: &[u8],
        share_id: Uuid,
        ttl: Option<Duration>,
        recipient_hint: Option<String>,
    ) -> Result<IssuedInvitation, InvitationError> {
        let pooled = record
            .unassigned_share(share_id)
            .ok_or(InvitationError::UnknownShare(share_id))?;
        if record.is_reserved(share_id) {
            return Err(InvitationError::ShareAlreadyReserved(share_id));
        }
        let on_record = record.key_check.map(blake3::Hash::from);
        if on_record != Some(key_check(master_key)) {
            return Err(InvitationError::MasterKeyMismatch(inviter.clone()));
        }
        let share = pooled.open(&pool_key(master_key))?;

        let now = self.ctx.now();
        let expires_at = deadline(now, ttl.unwrap_or(self.ctx.config.invitation_ttl));
        let id = Uuid::new_v4();
        let token = InvitationToken::new(id, inviter.clone(), share_id, expires_at);
        let invitation = Invitation {
            id,
            share_id,
            inviter_id: inviter.clone(),
            recipient_hint,
            token_digest: *token.digest()?.as_bytes(),
            sealed_share: Some(SealedShare::seal(&share, &token.share_key())?),
            issued_at: now,
            expires_at,
            status: InvitationStatus::Pending,
            resolved_at: None,
            accepted_by: None,
        };
        record.invitations.push(invitation.clone());
        Ok(IssuedInvitation {
            invitation,
            token: token.to_text()?,
        })
    }

    async fn load_for_token(&self, token: &InvitationToken) -> Result<SubjectRecord, InvitationError> {
        self.ctx
            .store
            .get(&token.inviter_id)
            .await?
            .ok_or(InvitationError::InvitationNotFound(token.invitation_id))
    }

    /// Find the invitation a token refers to and check it is still pending.
    ///
    /// An overdue pending invitation is expired and persisted on the spot,
    /// releasing its share, before `InvitationExpired` is returned.
    async fn pending_index(
        &self,
        record: &mut SubjectRecord,
        token: &InvitationToken,
    ) -> Result<usize, InvitationError> {
        let index = record
            .invitations
            .iter()
            .position(|i| i.id == token.invitation_id)
            .ok_or(InvitationError::InvitationNotFound(token.invitation_id))?;

        let invitation = &record.invitations[index];
        if !invitation.issued_with(&token.digest()?) {
            warn!(invitation = %token.invitation_id, "invitation token does not match the issued one");
            return Err(InvitationError::TokenMismatch);
        }

        let now = self.ctx.now();
        if invitation.is_overdue(now) {
            if invitation.is_pending() {
                record.invitations[index].resolve(InvitationStatus::Expired, now);
                self.ctx.store.put(record).await?;
                info!(invitation = %token.invitation_id, "invitation expired on redemption");
            }
            return Err(InvitationError::InvitationExpired(token.invitation_id));
        }
        if !invitation.is_pending() {
            return Err(InvitationError::InvitationNotPending {
                id: invitation.id,
                status: invitation.status,
            });
        }
        Ok(index)
    }
}

/// Mark every overdue pending invitation in `record` as expired.
fn expire_overdue(record: &mut SubjectRecord, now: DateTime<Utc>) -> Vec<Uuid> {
    record
        .invitations
        .iter_mut()
        .filter(|i| i.is_pending() && i.is_overdue(now))
        .map(|i| {
            i.resolve(InvitationStatus::Expired, now);
            debug!(invitation = %i.id, share = %i.share_id, "invitation expired");
            i.share_id
        })
        .collect()
}
