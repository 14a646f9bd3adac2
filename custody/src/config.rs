//! # Custody Configuration & Constants
//!
//! Every magic number in Keyward lives here. Cryptographic lengths are fixed
//! by the algorithms; the durations are defaults that [`CustodyConfig`] lets
//! the surrounding application override.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 96 bits, the only length GCM is
/// specified for without extra hashing.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// X25519 public and secret key length in bytes.
pub const X25519_KEY_LENGTH: usize = 32;

/// Length of a freshly generated master key.
pub const MASTER_KEY_LENGTH: usize = 32;

/// Reduction polynomial for GF(2^8): x^8 + x^4 + x^3 + x + 1.
pub const GF256_POLYNOMIAL: u16 = 0x11B;

// ---------------------------------------------------------------------------
// Key Derivation Contexts
// ---------------------------------------------------------------------------
//
// BLAKE3 derive-key contexts. Changing any of these invalidates every blob
// produced under the old string, so treat them as part of the wire format.

/// Context for the key that encrypts a wrapped content key.
pub const WRAP_KDF_CONTEXT: &str = "keyward v1 wrap key-encryption key";

/// Context for the master-key check digest stored next to the shares.
pub const KEY_CHECK_CONTEXT: &str = "keyward v1 master key check";

/// Context for hashing temporary access keys before they are persisted.
pub const ACCESS_KEY_CONTEXT: &str = "keyward v1 recovery access key";

/// Context for the key that seals a subject's unassigned shares, derived
/// from the master key.
pub const POOL_KDF_CONTEXT: &str = "keyward v1 unassigned share pool";

/// Context for the key that seals an invited share, derived from the secret
/// in the invitation token.
pub const INVITATION_KDF_CONTEXT: &str = "keyward v1 invitation share key";

// ---------------------------------------------------------------------------
// Wire Format Versions
// ---------------------------------------------------------------------------

/// Version of the [`WrappedBlob`](crate::crypto::wrap::WrappedBlob) layout.
pub const WRAP_FORMAT_VERSION: u8 = 1;

/// Version tag carried by every bearer token (pairing, invitation).
pub const TOKEN_VERSION: u8 = 1;

/// Token type tag for pairing tokens.
pub const PAIRING_TOKEN_TYPE: &str = "device-pairing";

/// Token type tag for guardian invitations.
pub const INVITATION_TOKEN_TYPE: &str = "guardian-invitation";

/// Length of the random secret embedded in invitation tokens.
pub const INVITATION_SECRET_LENGTH: usize = 32;

/// Length of a temporary access key issued on successful recovery.
pub const ACCESS_KEY_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Timing Defaults
// ---------------------------------------------------------------------------

/// How long a guardian invitation stays redeemable.
pub const DEFAULT_INVITATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How long a pairing token stays redeemable. Short on purpose: the token
/// carries a private key.
pub const DEFAULT_PAIRING_TTL: Duration = Duration::from_secs(10 * 60);

/// How long the temporary access key from a completed recovery stays valid.
pub const DEFAULT_ACCESS_KEY_TTL: Duration = Duration::from_secs(15 * 60);

/// How often the invitation sweeper runs.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Tunable parameters for the custody services.
///
/// Defaults mirror the constants above. The operator tool fills this from
/// command-line flags and `KEYWARD_*` environment variables.
#[derive(Debug, Clone)]
pub struct CustodyConfig {
    /// Lifetime of a guardian invitation when the caller does not pass one.
    pub invitation_ttl: Duration,
    /// Lifetime of a pairing token.
    pub pairing_ttl: Duration,
    /// Lifetime of the temporary access key issued by recovery.
    pub access_key_ttl: Duration,
    /// Period of the background invitation sweep.
    pub sweep_interval: Duration,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            invitation_ttl: DEFAULT_INVITATION_TTL,
            pairing_ttl: DEFAULT_PAIRING_TTL,
            access_key_ttl: DEFAULT_ACCESS_KEY_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl CustodyConfig {
    /// Override the invitation lifetime.
    pub fn with_invitation_ttl(mut self, ttl: Duration) -> Self {
        self.invitation_ttl = ttl;
        self
    }

    /// Override the pairing token lifetime.
    pub fn with_pairing_ttl(mut self, ttl: Duration) -> Self {
        self.pairing_ttl = ttl;
        self
    }

    /// Override the temporary access key lifetime.
    pub fn with_access_key_ttl(mut self, ttl: Duration) -> Self {
        self.access_key_ttl = ttl;
        self
    }

    /// Override the sweep period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
