//! Shares at rest under a symmetric key.
//!
//! A [`SealedShare`] keeps the share's id and evaluation point in the clear,
//! so the pool can be listed and reserved without any key, and seals the
//! share bytes with AES-256-GCM. The id and x are bound as associated data.
//!
//! Two keys are used:
//!
//! - the pool key, derived from the master key with [`pool_key`], seals the
//!   subject's unassigned shares;
//! - an invitation key, derived from the secret carried by an invitation
//!   token, seals the copy handed to that one invitation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::Share;
use crate::config::POOL_KDF_CONTEXT;
use crate::crypto::encryption::{self, EncryptionError, SealedBox, SymmetricKey};

/// A share whose bytes only open under the key it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedShare {
    pub id: Uuid,
    pub x: u8,
    sealed: SealedBox,
}

impl SealedShare {
    pub fn seal(share: &Share, key: &SymmetricKey) -> Result<Self, EncryptionError> {
        let sealed = encryption::seal(key, &share.to_bytes(), &associated_data(share.id, share.x))?;
        Ok(Self {
            id: share.id,
            x: share.x,
            sealed,
        })
    }

    /// Open the share. A payload that decrypts to a different id or x is
    /// treated as tampered.
    pub fn open(&self, key: &SymmetricKey) -> Result<Share, EncryptionError> {
        let bytes = encryption::open(key, &self.sealed, &associated_data(self.id, self.x))?;
        let share = Share::from_bytes(&bytes).ok_or(EncryptionError::TamperedOrWrongKey)?;
        if share.id != self.id || share.x != self.x {
            return Err(EncryptionError::TamperedOrWrongKey);
        }
        Ok(share)
    }
}

/// Key that seals a subject's unassigned shares.
pub fn pool_key(master_key: &[u8]) -> Zeroizing<SymmetricKey> {
    encryption::derive_key(POOL_KDF_CONTEXT, master_key)
}

fn associated_data(id: Uuid, x: u8) -> [u8; 17] {
    let mut aad = [0u8; 17];
    aad[..16].copy_from_slice(id.as_bytes());
    aad[16] = x;
    aad
}
