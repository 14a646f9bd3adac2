//! # Hybrid Key Wrapping
//!
//! Wraps a payload (the master key, or a serialized share) so that only the
//! holder of a given X25519 secret can recover it.
//!
//! ## Construction
//!
//! 1. Draw a fresh random 256-bit content key and seal the payload under it.
//! 2. Generate an ephemeral X25519 keypair, run Diffie-Hellman against the
//!    recipient's public key, and derive a key-encryption key:
//!
//!    ```text
//!    kek = BLAKE3-derive-key(
//!        context = "keyward v1 wrap key-encryption key",
//!        input   = shared_secret || ephemeral_public || recipient_public
//!    )
//!    ```
//!
//! 3. Seal the content key under `kek`, authenticating both public keys.
//! 4. Bundle `{version, ephemeral_public, wrapped_key, payload}`.
//!
//! The raw DH output is never used as a key directly; it has algebraic
//! structure and has to go through the KDF. Low-order recipient keys (which
//! would force an all-zero shared secret) are rejected on both sides.
//!
//! Every unwrap failure, whether a bad DH, a failed tag on the key, or a
//! failed tag on the payload, is reported as [`WrapError::Unwrap`].

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};
use zeroize::Zeroizing;

use super::encryption::{self, EncryptionError, SealedBox, SymmetricKey};
use super::keys::{RecipientKeypair, RecipientPublicKey};
use crate::config::{AES_KEY_LENGTH, WRAP_FORMAT_VERSION, WRAP_KDF_CONTEXT, X25519_KEY_LENGTH};

/// Errors from wrapping and unwrapping.
#[derive(Debug, Error)]
pub enum WrapError {
    #[error("wrap failed: {0}")]
    Wrap(#[source] EncryptionError),

    #[error("recipient public key is a low-order point")]
    WeakRecipientKey,

    #[error("unwrap failed -- wrong recipient key or tampered blob")]
    Unwrap,
}

impl WrapError {
    /// Whether this failure is an authentication failure on the blob.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::Unwrap)
    }
}

/// A payload wrapped to a single recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedBlob {
    /// Layout version, currently [`WRAP_FORMAT_VERSION`].
    pub version: u8,
    /// Ephemeral X25519 public key used for this blob only.
    #[serde(with = "hex::serde")]
    pub ephemeral_public: [u8; X25519_KEY_LENGTH],
    /// The content key, sealed under the DH-derived key-encryption key.
    pub wrapped_key: SealedBox,
    /// The payload, sealed under the content key.
    pub payload: SealedBox,
}

/// Wrap `payload` so only the holder of `recipient`'s secret can open it.
///
/// # Example
///
/// ```
/// use keyward_custody::crypto::keys::RecipientKeypair;
/// use keyward_custody::crypto::wrap::{unwrap, wrap};
///
/// let device = RecipientKeypair::generate();
/// let blob = wrap(b"master key bytes", &device.public_key()).unwrap();
/// assert_eq!(unwrap(&blob, &device).unwrap().as_slice(), b"master key bytes");
/// ```
pub fn wrap(payload: &[u8], recipient: &RecipientPublicKey) -> Result<WrappedBlob, WrapError> {
    let content_key = encryption::random_key();
    let sealed_payload = encryption::seal(&content_key, payload, &[WRAP_FORMAT_VERSION])
        .map_err(WrapError::Wrap)?;

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral).to_bytes();
    let shared = ephemeral.diffie_hellman(&recipient.to_dalek());
    if !shared.was_contributory() {
        return Err(WrapError::WeakRecipientKey);
    }

    let kek = derive_kek(&shared, &ephemeral_public, recipient.as_bytes());
    let aad = key_aad(&ephemeral_public, recipient.as_bytes());
    let wrapped_key = encryption::seal(&kek, &content_key[..], &aad).map_err(WrapError::Wrap)?;

    Ok(WrappedBlob {
        version: WRAP_FORMAT_VERSION,
        ephemeral_public,
        wrapped_key,
        payload: sealed_payload,
    })
}

/// Recover the payload of a [`WrappedBlob`] with the recipient's keypair.
pub fn unwrap(blob: &WrappedBlob, recipient: &RecipientKeypair) -> Result<Zeroizing<Vec<u8>>, WrapError> {
    if blob.version != WRAP_FORMAT_VERSION {
        return Err(WrapError::Unwrap);
    }

    let recipient_public = recipient.public_key();
    let shared = recipient
        .secret()
        .diffie_hellman(&PublicKey::from(blob.ephemeral_public));
    if !shared.was_contributory() {
        return Err(WrapError::Unwrap);
    }

    let kek = derive_kek(&shared, &blob.ephemeral_public, recipient_public.as_bytes());
    let aad = key_aad(&blob.ephemeral_public, recipient_public.as_bytes());
    let key_bytes = encryption::open(&kek, &blob.wrapped_key, &aad).map_err(|_| WrapError::Unwrap)?;

    let content_key: Zeroizing<SymmetricKey> = Zeroizing::new(
        key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| WrapError::Unwrap)?,
    );

    encryption::open(&content_key, &blob.payload, &[blob.version]).map_err(|_| WrapError::Unwrap)
}

/// Derive the key-encryption key from the DH output and both public keys.
fn derive_kek(
    shared: &SharedSecret,
    ephemeral_public: &[u8; X25519_KEY_LENGTH],
    recipient_public: &[u8; X25519_KEY_LENGTH],
) -> Zeroizing<[u8; AES_KEY_LENGTH]> {
    let mut hasher = blake3::Hasher::new_derive_key(WRAP_KDF_CONTEXT);
    hasher.update(shared.as_bytes());
    hasher.update(ephemeral_public);
    hasher.update(recipient_public);

    let mut kek = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    hasher.finalize_xof().fill(&mut kek[..]);
    kek
}

fn key_aad(
    ephemeral_public: &[u8; X25519_KEY_LENGTH],
    recipient_public: &[u8; X25519_KEY_LENGTH],
) -> [u8; 2 * X25519_KEY_LENGTH] {
    let mut aad = [0u8; 2 * X25519_KEY_LENGTH];
    aad[..X25519_KEY_LENGTH].copy_from_slice(ephemeral_public);
    aad[X25519_KEY_LENGTH..].copy_from_slice(recipient_public);
    aad
}
