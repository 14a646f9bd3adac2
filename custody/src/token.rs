//! # Bearer Token Boundary
//!
//! Pairing tokens and guardian invitations leave the process as opaque
//! bearer strings (QR codes, links, copy-paste). This module is the only
//! place they are encoded and decoded.
//!
//! ## Wire format
//!
//! A token is a JSON object carrying a version and a type tag next to the
//! payload fields:
//!
//! ```text
//! {"v":1,"type":"guardian-invitation","invitation_id":"…","inviter_id":"…",…}
//! ```
//!
//! The text form is the base58 encoding of those bytes.
//!
//! Decoding checks the version and the type before touching the payload, so
//! a foreign or truncated token fails with a [`TokenError`] and never reaches
//! any cryptographic code.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::config::{
    INVITATION_KDF_CONTEXT, INVITATION_SECRET_LENGTH, INVITATION_TOKEN_TYPE, PAIRING_TOKEN_TYPE,
    TOKEN_VERSION, X25519_KEY_LENGTH,
};
use crate::crypto::encryption::{derive_key, SymmetricKey};
use crate::crypto::keys::RecipientKeypair;
use crate::identity::Principal;

/// Errors at the token boundary.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unsupported token version {0}")]
    UnsupportedVersion(u8),

    #[error("wrong token type: expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: String,
    },
}

impl TokenError {
    /// Token errors are input errors, never authentication failures.
    pub fn is_integrity_failure(&self) -> bool {
        false
    }
}

/// A payload that travels as a bearer token.
pub trait TokenPayload: Serialize + DeserializeOwned {
    /// The `type` tag written into the envelope.
    const TYPE: &'static str;
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    v: u8,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    v: u8,
    #[serde(rename = "type")]
    kind: String,
}

/// Encode a payload to token bytes.
pub fn encode<T: TokenPayload>(payload: &T) -> Result<Zeroizing<Vec<u8>>, TokenError> {
    let envelope = EnvelopeOut {
        v: TOKEN_VERSION,
        kind: T::TYPE,
        body: payload,
    };
    serde_json::to_vec(&envelope)
        .map(Zeroizing::new)
        .map_err(|e| TokenError::Malformed(e.to_string()))
}

/// Decode token bytes, checking version and type first.
pub fn decode<T: TokenPayload>(bytes: &[u8]) -> Result<T, TokenError> {
    let header: EnvelopeHeader =
        serde_json::from_slice(bytes).map_err(|e| TokenError::Malformed(e.to_string()))?;
    if header.v != TOKEN_VERSION {
        return Err(TokenError::UnsupportedVersion(header.v));
    }
    if header.kind != T::TYPE {
        return Err(TokenError::WrongType {
            expected: T::TYPE,
            found: header.kind,
        });
    }
    serde_json::from_slice(bytes).map_err(|e| TokenError::Malformed(e.to_string()))
}

/// Encode a payload as base58 text.
pub fn to_text<T: TokenPayload>(payload: &T) -> Result<Zeroizing<String>, TokenError> {
    let bytes = encode(payload)?;
    Ok(Zeroizing::new(bs58::encode(bytes.as_slice()).into_string()))
}

/// Decode base58 token text.
pub fn from_text<T: TokenPayload>(text: &str) -> Result<T, TokenError> {
    let bytes = Zeroizing::new(
        bs58::decode(text.trim())
            .into_vec()
            .map_err(|e| TokenError::Malformed(e.to_string()))?,
    );
    decode(&bytes)
}

// ---------------------------------------------------------------------------
// Pairing Token
// ---------------------------------------------------------------------------

/// Everything a new device needs to unwrap its copy of the master key.
///
/// Carries a private key, so it is never persisted, its `Debug` output is
/// redacted and the key bytes are wiped on drop.
#[derive(Clone, Serialize, Deserialize)]
pub struct PairingToken {
    pub subject_id: Principal,
    pub device_id: Uuid,
    #[serde(with = "hex::serde")]
    private_key: [u8; X25519_KEY_LENGTH],
    pub expires_at: DateTime<Utc>,
}

impl PairingToken {
    pub fn new(
        subject_id: Principal,
        device_id: Uuid,
        keypair: &RecipientKeypair,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_id,
            device_id,
            private_key: *keypair.secret_bytes(),
            expires_at,
        }
    }

    /// Rebuild the device keypair carried by the token.
    pub fn keypair(&self) -> RecipientKeypair {
        RecipientKeypair::from_secret_bytes(self.private_key)
    }

    pub fn to_text(&self) -> Result<Zeroizing<String>, TokenError> {
        to_text(self)
    }

    pub fn from_text(text: &str) -> Result<Self, TokenError> {
        from_text(text)
    }
}

impl TokenPayload for PairingToken {
    const TYPE: &'static str = PAIRING_TOKEN_TYPE;
}

impl Drop for PairingToken {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl fmt::Debug for PairingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingToken")
            .field("subject_id", &self.subject_id)
            .field("device_id", &self.device_id)
            .field("private_key", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Invitation Token
// ---------------------------------------------------------------------------

/// The bearer payload of a guardian invitation.
///
/// `secret` derives the key that seals the invited share, so like a pairing
/// token it is never persisted: the store keeps only [`digest`](Self::digest).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationToken {
    pub invitation_id: Uuid,
    pub inviter_id: Principal,
    pub share_id: Uuid,
    pub expires_at: DateTime<Utc>,
    #[serde(with = "hex::serde")]
    secret: [u8; INVITATION_SECRET_LENGTH],
}

impl InvitationToken {
    /// Build a token with a fresh random secret.
    pub fn new(
        invitation_id: Uuid,
        inviter_id: Principal,
        share_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let mut secret = [0u8; INVITATION_SECRET_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        Self {
            invitation_id,
            inviter_id,
            share_id,
            expires_at,
            secret,
        }
    }

    /// Key sealing the share offered by this invitation.
    pub fn share_key(&self) -> Zeroizing<SymmetricKey> {
        derive_key(INVITATION_KDF_CONTEXT, &self.secret)
    }

    /// Digest of the encoded token, the only part of it that is stored.
    pub fn digest(&self) -> Result<blake3::Hash, TokenError> {
        Ok(blake3::hash(&encode(self)?))
    }

    pub fn to_text(&self) -> Result<Zeroizing<String>, TokenError> {
        to_text(self)
    }

    pub fn from_text(text: &str) -> Result<Self, TokenError> {
        from_text(text)
    }
}

impl Drop for InvitationToken {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl fmt::Debug for InvitationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvitationToken")
            .field("invitation_id", &self.invitation_id)
            .field("inviter_id", &self.inviter_id)
            .field("share_id", &self.share_id)
            .field("expires_at", &self.expires_at)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TokenPayload for InvitationToken {
    const TYPE: &'static str = INVITATION_TOKEN_TYPE;
}
