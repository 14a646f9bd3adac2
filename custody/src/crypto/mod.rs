//! # Cryptographic Primitives for Keyward
//!
//! Everything that touches key material flows through here:
//!
//! - **GF(2^8)** arithmetic for the secret-sharing engine.
//! - **AES-256-GCM** for every symmetric seal.
//! - **X25519** recipient keys for devices and guardians.
//! - **Hybrid wrapping** (ephemeral X25519 + BLAKE3 KDF + AES-GCM) to hand a
//!   payload to exactly one recipient.
//!
//! Nothing here is novel. Each function is a thin, typed wrapper around an
//! audited implementation. The only arithmetic we do ourselves is in
//! [`gf256`].

pub mod encryption;
pub mod gf256;
pub mod keys;
pub mod wrap;

pub use encryption::{open, seal, SealedBox, SymmetricKey};
pub use keys::{RecipientKeypair, RecipientPublicKey};
pub use wrap::{unwrap, wrap, WrappedBlob};

use zeroize::Zeroizing;

use crate::config::{ACCESS_KEY_CONTEXT, KEY_CHECK_CONTEXT, MASTER_KEY_LENGTH};

/// Generate a fresh random master key.
pub fn generate_master_key() -> Zeroizing<Vec<u8>> {
    let key = encryption::random_key();
    debug_assert_eq!(key.len(), MASTER_KEY_LENGTH);
    Zeroizing::new(key.to_vec())
}

/// Digest of the master key, stored at provisioning time so a recovery can
/// tell a correctly reconstructed key from garbage.
///
/// Compare the result against a stored digest with `==` on [`blake3::Hash`],
/// which is constant-time.
pub fn key_check(master_key: &[u8]) -> blake3::Hash {
    blake3::Hash::from(blake3::derive_key(KEY_CHECK_CONTEXT, master_key))
}

/// Digest under which a temporary access key is persisted.
pub fn access_key_digest(access_key: &[u8]) -> blake3::Hash {
    blake3::Hash::from(blake3::derive_key(ACCESS_KEY_CONTEXT, access_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_keys_are_random_and_full_length() {
        let a = generate_master_key();
        let b = generate_master_key();
        assert_eq!(a.len(), MASTER_KEY_LENGTH);
        assert_ne!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn key_check_and_access_digest_use_separate_contexts() {
        let key = [9u8; 32];
        assert_ne!(key_check(&key), access_key_digest(&key));
        assert_eq!(key_check(&key), key_check(&key));
    }

    #[test]
    fn stored_digests_compare_as_hashes() {
        let stored: [u8; 32] = *key_check(b"one").as_bytes();
        assert_eq!(blake3::Hash::from(stored), key_check(b"one"));
        assert_ne!(blake3::Hash::from(stored), key_check(b"two"));
    }
}
