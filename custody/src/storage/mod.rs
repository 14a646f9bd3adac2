//! # Storage Module
//!
//! The custody services persist everything about a subject as one
//! [`SubjectRecord`] behind the [`CustodyStore`] trait, a get/put actor keyed
//! by the owner's principal.
//!
//! ## Architecture
//!
//! ```text
//! mod.rs       : SubjectRecord, CustodyStore trait, StoreError
//! memory.rs    : MemoryStore: in-process HashMap, for tests and tooling
//! sled_store.rs: SledStore: embedded sled tree, bincode values
//! locks.rs     : SubjectLocks: one async mutex per subject
//! ```
//!
//! ## Consistency
//!
//! The store itself offers no transactions. Every mutating service call takes
//! the subject's lock from [`SubjectLocks`], reads the record, changes it, and
//! writes it back before releasing the lock. That is what makes share
//! reservation exclusive and keeps at most one recovery session per subject.
//!
//! Stored types stay within what bincode can round-trip: no flattened,
//! untagged, or internally tagged serde representations.

pub mod locks;
pub mod memory;
pub mod sled_store;

pub use locks::{SubjectGuard, SubjectLocks};
pub use memory::MemoryStore;
pub use sled_store::SledStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceRecord;
use crate::guardian::GuardianRecord;
use crate::identity::Principal;
use crate::invitation::Invitation;
use crate::recovery::RecoverySession;
use crate::sharing::{SealedShare, SharingPolicy};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur in a storage adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("record key is not a valid principal: {0}")]
    CorruptKey(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// SubjectRecord
// ---------------------------------------------------------------------------

/// Everything the custody subsystem knows about one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub subject_id: Principal,
    /// Set when the master key is split.
    pub policy: Option<SharingPolicy>,
    /// Domain-separated BLAKE3 digest of the master key.
    pub key_check: Option<[u8; 32]>,
    /// Shares not yet assigned to a guardian, sealed under the pool key.
    pub unassigned_shares: Vec<SealedShare>,
    pub guardians: Vec<GuardianRecord>,
    pub devices: Vec<DeviceRecord>,
    pub invitations: Vec<Invitation>,
    /// The latest recovery session, active or not.
    pub recovery: Option<RecoverySession>,
}

impl SubjectRecord {
    /// An empty record for a subject seen for the first time.
    pub fn new(subject_id: Principal) -> Self {
        Self {
            subject_id,
            policy: None,
            key_check: None,
            unassigned_shares: Vec::new(),
            guardians: Vec::new(),
            devices: Vec::new(),
            invitations: Vec::new(),
            recovery: None,
        }
    }

    /// Whether the master key has been split for this subject.
    pub fn is_provisioned(&self) -> bool {
        self.policy.is_some()
    }

    pub fn guardian(&self, guardian_id: &Principal) -> Option<&GuardianRecord> {
        self.guardians.iter().find(|g| &g.guardian_id == guardian_id)
    }

    pub fn device(&self, device_id: Uuid) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn device_mut(&mut self, device_id: Uuid) -> Option<&mut DeviceRecord> {
        self.devices.iter_mut().find(|d| d.device_id == device_id)
    }

    pub fn invitation(&self, invitation_id: Uuid) -> Option<&Invitation> {
        self.invitations.iter().find(|i| i.id == invitation_id)
    }

    pub fn invitation_mut(&mut self, invitation_id: Uuid) -> Option<&mut Invitation> {
        self.invitations.iter_mut().find(|i| i.id == invitation_id)
    }

    pub fn unassigned_share(&self, share_id: Uuid) -> Option<&SealedShare> {
        self.unassigned_shares.iter().find(|s| s.id == share_id)
    }

    /// Remove a share from the pool, handing it to the caller.
    pub fn take_unassigned_share(&mut self, share_id: Uuid) -> Option<SealedShare> {
        let index = self
            .unassigned_shares
            .iter()
            .position(|s| s.id == share_id)?;
        Some(self.unassigned_shares.remove(index))
    }

    /// Whether a pending invitation holds `share_id`.
    pub fn is_reserved(&self, share_id: Uuid) -> bool {
        self.invitations.iter().any(|i| i.reserves(share_id))
    }

    /// The recovery session if it is still active.
    pub fn active_recovery(&self) -> Option<&RecoverySession> {
        self.recovery.as_ref().filter(|s| s.is_active())
    }

    pub fn active_recovery_mut(&mut self) -> Option<&mut RecoverySession> {
        self.recovery.as_mut().filter(|s| s.is_active())
    }
}

// ---------------------------------------------------------------------------
// CustodyStore
// ---------------------------------------------------------------------------

/// The persistence actor: get and put subject records by owner identity.
#[async_trait]
pub trait CustodyStore: Send + Sync {
    async fn get(&self, subject: &Principal) -> StoreResult<Option<SubjectRecord>>;

    async fn put(&self, record: &SubjectRecord) -> StoreResult<()>;

    /// Every subject with a stored record. Used by the expiry sweep.
    async fn subjects(&self) -> StoreResult<Vec<Principal>>;
}
