//! # Recipient Keys
//!
//! X25519 keypairs for the parties the master key or a share gets wrapped
//! to: devices and guardians. The public half is what an account stores; the
//! secret half never leaves the device (or the pairing token in transit).
//!
//! ## Security considerations
//!
//! - Secrets are `StaticSecret`s, zeroized on drop by x25519-dalek.
//! - Generation uses `OsRng`.
//! - Key bytes are never logged and [`RecipientKeypair`] has no `Serialize`
//!   impl. Moving a secret across a boundary goes through
//!   [`RecipientKeypair::secret_bytes`] on purpose.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::config::X25519_KEY_LENGTH;

/// Errors that can occur while parsing key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key encoding: expected {X25519_KEY_LENGTH} hex-encoded bytes")]
    InvalidEncoding,

    #[error("invalid key length: expected {X25519_KEY_LENGTH} bytes, got {0}")]
    InvalidLength(usize),
}

/// An X25519 keypair that payloads can be wrapped to.
#[derive(Clone)]
pub struct RecipientKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

/// The public half of a [`RecipientKeypair`], safe to store and share.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientPublicKey(#[serde(with = "hex::serde")] [u8; X25519_KEY_LENGTH]);

impl RecipientKeypair {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a keypair from its 32 secret bytes.
    pub fn from_secret_bytes(bytes: [u8; X25519_KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a keypair from a slice, checking the length.
    pub fn from_secret_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let array: [u8; X25519_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Self::from_secret_bytes(array))
    }

    /// Parse a hex-encoded secret key.
    pub fn from_secret_hex(encoded: &str) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(hex::decode(encoded.trim()).map_err(|_| KeyError::InvalidEncoding)?);
        Self::from_secret_slice(&bytes)
    }

    /// The public key to hand out.
    pub fn public_key(&self) -> RecipientPublicKey {
        RecipientPublicKey(self.public.to_bytes())
    }

    /// Raw secret bytes, in a zeroizing buffer.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; X25519_KEY_LENGTH]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Hex encoding of the secret, for writing a key file.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.secret_bytes()[..]))
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl fmt::Debug for RecipientKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecipientKeypair")
            .field("public", &self.public_key())
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl RecipientPublicKey {
    /// Wrap raw public key bytes.
    pub fn from_bytes(bytes: [u8; X25519_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded public key.
    pub fn from_hex(encoded: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(encoded.trim()).map_err(|_| KeyError::InvalidEncoding)?;
        let array: [u8; X25519_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; X25519_KEY_LENGTH] {
        &self.0
    }

    /// Hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub(crate) fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for RecipientPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecipientPublicKey({})", self.to_hex())
    }
}

impl fmt::Display for RecipientPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
