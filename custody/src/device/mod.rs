//! # Devices
//!
//! Every device that can open the subject's notes holds its own copy of the
//! master key, wrapped to that device's X25519 public key. The server side
//! only ever sees the wrapped copy.
//!
//! [`pairing`] provisions new devices: from an existing one (pairing token),
//! from a device that brings its own keypair, or from a completed recovery.

pub mod pairing;

pub use pairing::DevicePairing;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::keys::RecipientPublicKey;
use crate::crypto::wrap::{WrapError, WrappedBlob};
use crate::identity::Principal;
use crate::storage::StoreError;
use crate::token::TokenError;

/// Errors from device pairing and unlocking.
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("pairing token expired")]
    TokenExpired,

    #[error("device {0} is not registered")]
    DeviceNotFound(Uuid),

    #[error("could not unwrap the master key for this device")]
    Unwrap,

    #[error("device {0} is already registered")]
    DeviceAlreadyRegistered(Uuid),

    #[error("master key does not match the key on record for {0}")]
    KeyCheckMismatch(Principal),

    #[error("temporary access key rejected")]
    AccessKeyRejected,

    #[error(transparent)]
    Wrap(#[from] WrapError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PairingError {
    /// Whether this is a tamper or authentication failure.
    pub fn is_integrity_failure(&self) -> bool {
        match self {
            Self::Unwrap | Self::KeyCheckMismatch(_) | Self::AccessKeyRejected => true,
            Self::Wrap(e) => e.is_integrity_failure(),
            _ => false,
        }
    }
}

/// A device registered for a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: Uuid,
    pub public_key: RecipientPublicKey,
    /// The master key, wrapped to `public_key`. Unique per device.
    pub wrapped_master_key: WrappedBlob,
    pub label: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
}
