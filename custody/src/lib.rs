// Copyright (c) 2026 Keyward Contributors. MIT License.
// See LICENSE for details.

//! # Keyward Custody
//!
//! Key custody for a password manager: the account master key never lives
//! in one place that can be lost. It is split with Shamir's scheme over
//! GF(256), each share is wrapped to a guardian's X25519 key, and any `t`
//! of `n` guardians can bring it back. New devices receive the master key
//! wrapped to a per-device key.
//!
//! ## Architecture
//!
//! - **crypto**: GF(256) arithmetic, AES-256-GCM, X25519 keys, and the
//!   hybrid wrap that seals a payload to a recipient public key.
//! - **sharing**: threshold split and combine, and shares sealed at rest.
//! - **token**: versioned, typed tokens for invitations and pairing.
//! - **invitation**: reserving a share for a guardian, accepting, expiring.
//! - **recovery**: the guardian-approved recovery state machine.
//! - **device**: pairing and unlocking devices.
//! - **storage**: the subject record, its stores, and per-subject locks.
//! - **custody**: the [`KeyCustody`] facade tying the services together.
//!
//! ## Rules we keep
//!
//! 1. No share or master key is written to a log or a `Debug` string.
//! 2. Every secret buffer is zeroized on drop.
//! 3. Every mutation of a subject happens under that subject's lock.
//! 4. The store never holds a share anyone could open without a key.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod custody;
pub mod device;
pub mod guardian;
pub mod identity;
pub mod invitation;
pub mod recovery;
pub mod sharing;
pub mod storage;
pub mod token;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CustodyConfig;
pub use custody::{CustodyContext, KeyCustody};
pub use device::{DevicePairing, DeviceRecord, PairingError};
pub use guardian::GuardianRecord;
pub use identity::{IdentityError, IdentityProvider, Principal, StaticIdentity};
pub use invitation::{
    Invitation, InvitationError, InvitationService, InvitationStatus, IssuedInvitation,
};
pub use recovery::{
    HeldShares, RecoveryError, RecoveryOutcome, RecoveryService, RecoveryStatus, SubmitOutcome,
};
pub use sharing::{SealedShare, Share, SharingPolicy};
pub use storage::{CustodyStore, MemoryStore, SledStore, SubjectRecord};
pub use token::{InvitationToken, PairingToken};
