//! # Device Pairing Protocol
//!
//! Gets the master key onto a new device without it ever existing in the
//! clear outside a device.
//!
//! ## Pairing from an existing device
//!
//! ```text
//!  existing device (has master key)                 new device
//!  ────────────────────────────────                 ──────────
//!  issue(subject, master_key)
//!    ├─ generate device keypair
//!    ├─ wrap master key → DeviceRecord (stored)
//!    └─ PairingToken{subject, device, sk, exp} ──QR/paste──►  redeem(token)
//!                                                              ├─ now > exp → TokenExpired
//!                                                              ├─ load DeviceRecord
//!                                                              └─ unwrap → master key
//! ```
//!
//! The token carries the device's private key and is never persisted; it is
//! consumed (and its key wiped) by [`DevicePairing::redeem`].
//!
//! ## Other ways in
//!
//! - [`DevicePairing::register`]: the device generated its own keypair and
//!   only hands over the public half (first device on an account).
//! - [`DevicePairing::enroll_recovered`]: after a guardian recovery, the
//!   single-use access key authorizes issuing a pairing token for the
//!   reconstructed master key.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::{DeviceRecord, PairingError};
use crate::clock::deadline;
use crate::crypto::keys::{RecipientKeypair, RecipientPublicKey};
use crate::crypto::wrap;
use crate::crypto::key_check;
use crate::custody::CustodyContext;
use crate::identity::Principal;
use crate::storage::SubjectRecord;
use crate::token::PairingToken;

/// Issues, redeems and manages device registrations.
#[derive(Debug, Clone)]
pub struct DevicePairing {
    ctx: Arc<CustodyContext>,
}

impl DevicePairing {
    pub fn new(ctx: Arc<CustodyContext>) -> Self {
        Self { ctx }
    }

    /// Provision a new device for `subject` and return its pairing token.
    pub async fn issue(
        &self,
        subject: &Principal,
        master_key: &[u8],
        label: Option<String>,
    ) -> Result<PairingToken, PairingError> {
        let _guard = self.ctx.locks.lock(subject).await;
        let mut record = self.ctx.load_or_new(subject).await?;

        let token = self.issue_into(&mut record, master_key, label)?;
        self.ctx.store.put(&record).await?;

        info!(
            subject = %subject,
            device = %token.device_id,
            expires_at = %token.expires_at,
            "pairing token issued"
        );
        Ok(token)
    }

    /// Unwrap the master key with a pairing token. Consumes the token.
    pub async fn redeem(&self, token: PairingToken) -> Result<Zeroizing<Vec<u8>>, PairingError> {
        let now = self.ctx.now();
        if now > token.expires_at {
            warn!(device = %token.device_id, "expired pairing token presented");
            return Err(PairingError::TokenExpired);
        }

        let keypair = token.keypair();
        let master_key = self
            .unlock(&token.subject_id, token.device_id, &keypair)
            .await?;
        info!(subject = %token.subject_id, device = %token.device_id, "pairing token redeemed");
        Ok(master_key)
    }

    /// Register a device that brings its own keypair.
    pub async fn register(
        &self,
        subject: &Principal,
        public_key: RecipientPublicKey,
        master_key: &[u8],
        label: Option<String>,
    ) -> Result<DeviceRecord, PairingError> {
        let _guard = self.ctx.locks.lock(subject).await;
        let mut record = self.ctx.load_or_new(subject).await?;

        let device = self.register_into(&mut record, Uuid::new_v4(), public_key, master_key, label)?;
        self.ctx.store.put(&record).await?;

        info!(subject = %subject, device = %device.device_id, "device registered");
        Ok(device)
    }

    /// Unwrap the master key on a registered device and note the access.
    pub async fn unlock(
        &self,
        subject: &Principal,
        device_id: Uuid,
        keypair: &RecipientKeypair,
    ) -> Result<Zeroizing<Vec<u8>>, PairingError> {
        let _guard = self.ctx.locks.lock(subject).await;
        let mut record = self
            .ctx
            .store
            .get(subject)
            .await?
            .ok_or(PairingError::DeviceNotFound(device_id))?;

        let now = self.ctx.now();
        let device = record
            .device_mut(device_id)
            .ok_or(PairingError::DeviceNotFound(device_id))?;
        let master_key = wrap::unwrap(&device.wrapped_master_key, keypair).map_err(|e| {
            warn!(device = %device_id, error = %e, "master key unwrap failed");
            PairingError::Unwrap
        })?;
        device.last_access_at = now;
        self.ctx.store.put(&record).await?;

        debug!(subject = %subject, device = %device_id, "device unlocked");
        Ok(master_key)
    }

    /// Remove a device. Its wrapped copy of the master key goes with it.
    pub async fn revoke(&self, subject: &Principal, device_id: Uuid) -> Result<DeviceRecord, PairingError> {
        let _guard = self.ctx.locks.lock(subject).await;
        let mut record = self
            .ctx
            .store
            .get(subject)
            .await?
            .ok_or(PairingError::DeviceNotFound(device_id))?;

        let index = record
            .devices
            .iter()
            .position(|d| d.device_id == device_id)
            .ok_or(PairingError::DeviceNotFound(device_id))?;
        let removed = record.devices.remove(index);
        self.ctx.store.put(&record).await?;

        info!(subject = %subject, device = %device_id, "device revoked");
        Ok(removed)
    }

    /// Every device registered for `subject`.
    pub async fn list(&self, subject: &Principal) -> Result<Vec<DeviceRecord>, PairingError> {
        let record = self.ctx.store.get(subject).await?;
        Ok(record.map(|r| r.devices).unwrap_or_default())
    }

    /// Spend the temporary access key from a completed recovery to provision
    /// a device for the reconstructed master key.
    pub async fn enroll_recovered(
        &self,
        subject: &Principal,
        access_key: &[u8],
        master_key: &[u8],
        label: Option<String>,
    ) -> Result<PairingToken, PairingError> {
        let _guard = self.ctx.locks.lock(subject).await;
        let mut record = self
            .ctx
            .store
            .get(subject)
            .await?
            .ok_or(PairingError::AccessKeyRejected)?;

        let now = self.ctx.now();
        let accepted = record
            .recovery
            .as_mut()
            .map_or(false, |session| session.consume_access_key(access_key, now));
        if !accepted {
            warn!(subject = %subject, "temporary access key rejected");
            return Err(PairingError::AccessKeyRejected);
        }

        let token = self.issue_into(&mut record, master_key, label)?;
        self.ctx.store.put(&record).await?;

        info!(
            subject = %subject,
            device = %token.device_id,
            "device enrolled after recovery"
        );
        Ok(token)
    }

    // -- Internals ----------------------------------------------------------

    fn issue_into(
        &self,
        record: &mut SubjectRecord,
        master_key: &[u8],
        label: Option<String>,
    ) -> Result<PairingToken, PairingError> {
        let keypair = RecipientKeypair::generate();
        let device_id = Uuid::new_v4();
        self.register_into(record, device_id, keypair.public_key(), master_key, label)?;

        let expires_at = deadline(self.ctx.now(), self.ctx.config.pairing_ttl);
        Ok(PairingToken::new(
            record.subject_id.clone(),
            device_id,
            &keypair,
            expires_at,
        ))
    }

    fn register_into(
        &self,
        record: &mut SubjectRecord,
        device_id: Uuid,
        public_key: RecipientPublicKey,
        master_key: &[u8],
        label: Option<String>,
    ) -> Result<DeviceRecord, PairingError> {
        let check = key_check(master_key);
        match record.key_check {
            Some(expected) if blake3::Hash::from(expected) != check => {
                return Err(PairingError::KeyCheckMismatch(record.subject_id.clone()));
            }
            Some(_) => {}
            None => record.key_check = Some(*check.as_bytes()),
        }
        if record.device(device_id).is_some() {
            return Err(PairingError::DeviceAlreadyRegistered(device_id));
        }

        let now = self.ctx.now();
        let device = DeviceRecord {
            device_id,
            public_key,
            wrapped_master_key: wrap::wrap(master_key, &public_key)?,
            label,
            registered_at: now,
            last_access_at: now,
        };
        record.devices.push(device.clone());
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::SubmitOutcome;
    use crate::testing::Fixture;
    use std::time::Duration;

    #[tokio::test]
    async fn issue_then_redeem_returns_the_master_key() {
        let fx = Fixture::new().await;
        let devices = fx.custody.devices();

        let token = devices
            .issue(&fx.owner, &fx.master_key, Some("laptop".into()))
            .await
            .unwrap();
        let device_id = token.device_id;
        let text = token.to_text().unwrap();

        let redeemed = PairingToken::from_text(&text).unwrap();
        let key = devices.redeem(redeemed).await.unwrap();
        assert_eq!(key.as_slice(), fx.master_key.as_slice());

        let listed = devices.list(&fx.owner).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].device_id, device_id);
        assert_eq!(listed[0].label.as_deref(), Some("laptop"));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let fx = Fixture::new().await;
        let devices = fx.custody.devices();
        let token = devices.issue(&fx.owner, &fx.master_key, None).await.unwrap();

        // Still valid exactly at expiry.
        fx.clock.advance(fx.custody.context().config().pairing_ttl);
        assert!(devices.redeem(token.clone()).await.is_ok());

        fx.clock.advance(Duration::from_secs(1));
        assert!(matches!(
            devices.redeem(token).await,
            Err(PairingError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn revoked_device_cannot_redeem() {
        let fx = Fixture::new().await;
        let devices = fx.custody.devices();
        let token = devices.issue(&fx.owner, &fx.master_key, None).await.unwrap();

        devices.revoke(&fx.owner, token.device_id).await.unwrap();
        assert!(matches!(
            devices.redeem(token).await,
            Err(PairingError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn wrong_keypair_is_an_unwrap_error() {
        let fx = Fixture::new().await;
        let devices = fx.custody.devices();
        let own = RecipientKeypair::generate();
        let device = devices
            .register(&fx.owner, own.public_key(), &fx.master_key, None)
            .await
            .unwrap();

        let err = devices
            .unlock(&fx.owner, device.device_id, &RecipientKeypair::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, PairingError::Unwrap));
        assert!(err.is_integrity_failure());

        let key = devices
            .unlock(&fx.owner, device.device_id, &own)
            .await
            .unwrap();
        assert_eq!(key.as_slice(), fx.master_key.as_slice());
    }

    #[tokio::test]
    async fn unlock_touches_last_access() {
        let fx = Fixture::new().await;
        let devices = fx.custody.devices();
        let own = RecipientKeypair::generate();
        let device = devices
            .register(&fx.owner, own.public_key(), &fx.master_key, None)
            .await
            .unwrap();

        fx.clock.advance(Duration::from_secs(300));
        devices.unlock(&fx.owner, device.device_id, &own).await.unwrap();

        let stored = &devices.list(&fx.owner).await.unwrap()[0];
        assert_eq!(
            stored.last_access_at - stored.registered_at,
            chrono::Duration::seconds(300)
        );
    }

    #[tokio::test]
    async fn each_device_gets_its_own_wrapped_copy() {
        let fx = Fixture::new().await;
        let devices = fx.custody.devices();
        devices.issue(&fx.owner, &fx.master_key, None).await.unwrap();
        devices.issue(&fx.owner, &fx.master_key, None).await.unwrap();

        let listed = devices.list(&fx.owner).await.unwrap();
        assert_ne!(listed[0].wrapped_master_key, listed[1].wrapped_master_key);
        assert_ne!(listed[0].public_key, listed[1].public_key);
    }

    #[tokio::test]
    async fn a_different_master_key_is_refused() {
        let fx = Fixture::new().await;
        let devices = fx.custody.devices();
        devices.issue(&fx.owner, &fx.master_key, None).await.unwrap();

        assert!(matches!(
            devices.issue(&fx.owner, &[0u8; 32], None).await,
            Err(PairingError::KeyCheckMismatch(_))
        ));
    }

    #[tokio::test]
    async fn enroll_recovered_consumes_the_access_key_once() {
        let fx = Fixture::with_guardians(3, 2).await;
        let recovery = fx.custody.recovery();
        recovery.initiate(&fx.owner).await.unwrap();
        for g in &fx.guardians[..2] {
            recovery.approve(&fx.owner, &g.id).await.unwrap();
        }
        recovery
            .submit_share(&fx.owner, &fx.guardians[0].id, fx.guardians[0].share())
            .await
            .unwrap();
        let SubmitOutcome::Completed(done) = recovery
            .submit_share(&fx.owner, &fx.guardians[1].id, fx.guardians[1].share())
            .await
            .unwrap()
        else {
            panic!("expected completion");
        };

        let devices = fx.custody.devices();
        assert!(matches!(
            devices
                .enroll_recovered(&fx.owner, b"guess", &done.master_key, None)
                .await,
            Err(PairingError::AccessKeyRejected)
        ));

        let token = devices
            .enroll_recovered(&fx.owner, &done.access_key[..], &done.master_key, Some("new phone".into()))
            .await
            .unwrap();
        let key = devices.redeem(token).await.unwrap();
        assert_eq!(key.as_slice(), fx.master_key.as_slice());

        assert!(matches!(
            devices
                .enroll_recovered(&fx.owner, &done.access_key[..], &done.master_key, None)
                .await,
            Err(PairingError::AccessKeyRejected)
        ));
    }
}
