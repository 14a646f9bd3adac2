//! Guardian records: who holds which share, and the share itself wrapped so
//! only that guardian can open it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::keys::{RecipientKeypair, RecipientPublicKey};
use crate::crypto::wrap::{self, WrapError, WrappedBlob};
use crate::identity::Principal;
use crate::sharing::Share;

/// A guardian's assignment for one subject.
///
/// `share_id` and `share_x` are not secret; they let a submitted share be
/// matched against the assignment without unwrapping anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianRecord {
    pub guardian_id: Principal,
    pub public_key: RecipientPublicKey,
    pub share_id: Uuid,
    pub share_x: u8,
    pub wrapped_share: WrappedBlob,
    pub contact_info: Option<String>,
    pub assigned_at: DateTime<Utc>,
}

impl GuardianRecord {
    /// Wrap `share` to the guardian's public key and build the record.
    pub fn assign(
        guardian_id: Principal,
        public_key: RecipientPublicKey,
        share: &Share,
        contact_info: Option<String>,
        assigned_at: DateTime<Utc>,
    ) -> Result<Self, WrapError> {
        let wrapped_share = wrap::wrap(&share.to_bytes(), &public_key)?;
        Ok(Self {
            guardian_id,
            public_key,
            share_id: share.id,
            share_x: share.x,
            wrapped_share,
            contact_info,
            assigned_at,
        })
    }

    /// Unwrap the guardian's share with their keypair.
    ///
    /// A blob that opens but does not hold the assigned share is treated the
    /// same as one that does not open.
    pub fn open_share(&self, keypair: &RecipientKeypair) -> Result<Share, WrapError> {
        let bytes = wrap::unwrap(&self.wrapped_share, keypair)?;
        let share = Share::from_bytes(&bytes).ok_or(WrapError::Unwrap)?;
        if !self.matches(&share) {
            return Err(WrapError::Unwrap);
        }
        Ok(share)
    }

    /// Whether `share` is the one assigned to this guardian.
    pub fn matches(&self, share: &Share) -> bool {
        share.id == self.share_id && share.x == self.share_x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guardian() -> Principal {
        Principal::parse("bob").unwrap()
    }

    #[test]
    fn assigned_share_opens_for_the_guardian_only() {
        let keys = RecipientKeypair::generate();
        let share = Share::new(3, vec![1, 2, 3, 4]);
        let record =
            GuardianRecord::assign(guardian(), keys.public_key(), &share, None, Utc::now()).unwrap();

        assert_eq!(record.share_id, share.id);
        assert_eq!(record.share_x, 3);
        assert_eq!(record.open_share(&keys).unwrap(), share);

        let stranger = RecipientKeypair::generate();
        assert!(matches!(
            record.open_share(&stranger),
            Err(WrapError::Unwrap)
        ));
    }

    #[test]
    fn matches_checks_id_and_x() {
        let keys = RecipientKeypair::generate();
        let share = Share::new(3, vec![9]);
        let record =
            GuardianRecord::assign(guardian(), keys.public_key(), &share, None, Utc::now()).unwrap();

        assert!(record.matches(&share));
        assert!(!record.matches(&Share::new(3, vec![9])));
        let mut moved = share.clone();
        moved.x = 4;
        assert!(!record.matches(&moved));
    }

    #[test]
    fn record_survives_bincode() {
        let keys = RecipientKeypair::generate();
        let share = Share::new(1, vec![5; 32]);
        let record = GuardianRecord::assign(
            guardian(),
            keys.public_key(),
            &share,
            Some("bob@example.org".into()),
            Utc::now(),
        )
        .unwrap();

        let bytes = bincode::serialize(&record).unwrap();
        let back: GuardianRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.open_share(&keys).unwrap(), share);
    }

    #[test]
    fn tampered_blob_version_is_an_unwrap_failure() {
        let keys = RecipientKeypair::generate();
        let share = Share::new(2, vec![7; 8]);
        let mut record =
            GuardianRecord::assign(guardian(), keys.public_key(), &share, None, Utc::now()).unwrap();
        record.wrapped_share.version = 0;

        let err = record.open_share(&keys).unwrap_err();
        assert!(matches!(err, WrapError::Unwrap));
        assert!(err.is_integrity_failure());
    }
}
