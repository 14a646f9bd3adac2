//! # AES-256-GCM Sealing
//!
//! Authenticated symmetric encryption for custody payloads. Everything the
//! subsystem encrypts, whether a wrapped content key or the payload of a
//! wrapped share, ends up in a [`SealedBox`] produced here.
//!
//! ## Nonce management
//!
//! Random 96-bit nonces from the OS CSPRNG. Keys in this subsystem are
//! almost always fresh per message (see [`crate::crypto::wrap`]), so the
//! birthday bound is never in play.
//!
//! ## Failure reporting
//!
//! A failed tag check is reported as [`EncryptionError::TamperedOrWrongKey`]
//! and nothing else. We do not tell the caller whether the key was wrong or
//! the ciphertext was modified, and we never hand back unauthenticated bytes.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// A 256-bit symmetric key.
pub type SymmetricKey = [u8; AES_KEY_LENGTH];

/// Errors that can occur during sealing and opening.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("authentication failed -- ciphertext tampered or wrong key")]
    TamperedOrWrongKey,

    #[error("sealed box too short: need at least {AES_TAG_LENGTH} bytes of ciphertext")]
    Truncated,
}

impl EncryptionError {
    /// Whether this failure means the data or key is not what it claims to be.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::TamperedOrWrongKey | Self::Truncated)
    }
}

/// Ciphertext plus the nonce it was sealed with.
///
/// The ciphertext includes the 16-byte GCM tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    /// The random 96-bit nonce (the "iv").
    #[serde(with = "hex::serde")]
    pub nonce: [u8; AES_NONCE_LENGTH],
    /// Ciphertext followed by the authentication tag.
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
}

/// Seal `plaintext` under `key` with a fresh random nonce.
///
/// # Example
///
/// ```
/// use keyward_custody::crypto::encryption::{open, seal};
///
/// let key = [0x42u8; 32];
/// let sealed = seal(&key, b"note index key", b"").unwrap();
/// assert_eq!(open(&key, &sealed, b"").unwrap().as_slice(), b"note index key");
/// ```
pub fn seal(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> Result<SealedBox, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::EncryptFailed)?;

    Ok(SealedBox { nonce, ciphertext })
}

/// Open a [`SealedBox`] produced by [`seal`] with the same key and AAD.
///
/// The plaintext comes back in a zeroizing buffer since most of what we
/// seal is key material.
pub fn open(
    key: &SymmetricKey,
    sealed: &SealedBox,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
    if sealed.ciphertext.len() < AES_TAG_LENGTH {
        return Err(EncryptionError::Truncated);
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::TamperedOrWrongKey)?;
    cipher
        .decrypt(
            Nonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| EncryptionError::TamperedOrWrongKey)
}

/// Derive a 256-bit key from input key material with BLAKE3's derive-key mode.
///
/// `context` must be a hard-coded, globally unique string (see the `*_CONTEXT`
/// constants in [`crate::config`]). Use this to encrypt arbitrary payloads
/// under a key derived from the master key or a DH output, never under the
/// raw material itself.
pub fn derive_key(context: &str, material: &[u8]) -> Zeroizing<SymmetricKey> {
    Zeroizing::new(blake3::derive_key(context, material))
}

/// Generate a fresh random symmetric key.
pub fn random_key() -> Zeroizing<SymmetricKey> {
    let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    rand::rngs::OsRng.fill_bytes(&mut key[..]);
    key
}
