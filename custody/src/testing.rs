//! Shared fixtures for unit tests.

use std::sync::Arc;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::clock::ManualClock;
use crate::config::CustodyConfig;
use crate::crypto::generate_master_key;
use crate::crypto::keys::RecipientKeypair;
use crate::custody::KeyCustody;
use crate::guardian::GuardianRecord;
use crate::identity::Principal;
use crate::sharing::{Share, SharingPolicy};
use crate::storage::{CustodyStore, MemoryStore, SubjectRecord};

/// A guardian that has accepted an invitation.
pub struct TestGuardian {
    pub id: Principal,
    pub keys: RecipientKeypair,
    pub record: GuardianRecord,
}

impl TestGuardian {
    /// The guardian's share, unwrapped with its own key.
    pub fn share(&self) -> Share {
        self.record.open_share(&self.keys).unwrap()
    }
}

/// Custody over an in-memory store with a manual clock, owned by "alice".
pub struct Fixture {
    pub custody: KeyCustody,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub owner: Principal,
    pub master_key: Zeroizing<Vec<u8>>,
    pub share_ids: Vec<Uuid>,
    pub guardians: Vec<TestGuardian>,
}

impl Fixture {
    /// Nothing provisioned yet.
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let custody = KeyCustody::with_parts(store.clone(), clock.clone(), CustodyConfig::default());
        Self {
            custody,
            store,
            clock,
            owner: Principal::parse("alice").unwrap(),
            master_key: generate_master_key(),
            share_ids: Vec::new(),
            guardians: Vec::new(),
        }
    }

    /// Master key split into `total` unassigned shares.
    pub async fn provisioned(total: u8, threshold: u8) -> Self {
        let mut fx = Self::new().await;
        fx.share_ids = fx
            .custody
            .invitations()
            .provision(
                &fx.owner,
                &fx.master_key,
                SharingPolicy::new(threshold, total).unwrap(),
            )
            .await
            .unwrap();
        fx
    }

    /// Every share invited and accepted by guardian-0 .. guardian-(total-1).
    pub async fn with_guardians(total: u8, threshold: u8) -> Self {
        let mut fx = Self::provisioned(total, threshold).await;
        let invitations = fx.custody.invitations().clone();

        for (i, share_id) in fx.share_ids.clone().into_iter().enumerate() {
            let id = Principal::parse(format!("guardian-{i}")).unwrap();
            let keys = RecipientKeypair::generate();
            let issued = invitations
                .issue(&fx.owner, &fx.master_key, share_id, None, None)
                .await
                .unwrap();
            let record = invitations
                .accept(&issued.token, &id, keys.public_key(), None)
                .await
                .unwrap();
            fx.guardians.push(TestGuardian { id, keys, record });
        }
        fx
    }

    pub async fn record(&self) -> SubjectRecord {
        self.store.get(&self.owner).await.unwrap().unwrap()
    }

    /// Overwrite the stored key check so reconstruction verification fails.
    pub async fn corrupt_key_check(&self) {
        let mut record = self.record().await;
        record.key_check = Some([0u8; 32]);
        self.store.put(&record).await.unwrap();
    }
}
