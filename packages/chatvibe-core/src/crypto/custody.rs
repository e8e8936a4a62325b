//! # Key Custody
//!
//! Protects an identity's private key at rest. The relay stores only the
//! opaque blob produced here; recovering the key requires the account
//! password.
//!
//! ## Blob Layout
//!
//! ```text
//! ┌────────┬──────────┬───────────┬────────────────────────────┐
//! │ "CVK1" │ salt(16) │ nonce(12) │ AES-256-GCM ct (32 + tag)  │
//! └────────┴──────────┴───────────┴────────────────────────────┘
//! ```
//!
//! Salt and nonce are fresh per call, so protecting the same key twice
//! yields unrelated blobs. The KEK comes from
//! [`crate::crypto::kdf::derive_protection_key`].
//!
//! ## Fail-closed guarantee
//!
//! A wrong password changes the KEK, which makes AEAD tag verification
//! fail — [`unprotect`] returns [`Error::DecryptionFailed`] and never
//! hands back garbage key bytes.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::kdf::{self, SALT_SIZE};
use crate::crypto::keys::PRIVATE_KEY_SIZE;
use crate::error::{Error, Result};

/// Format marker at the head of every custody blob
const MAGIC: &[u8; 4] = b"CVK1";

/// Size of the AES-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Minimum plausible blob length: header + ciphertext + tag
const MIN_BLOB_SIZE: usize = MAGIC.len() + SALT_SIZE + NONCE_SIZE + PRIVATE_KEY_SIZE + 16;

/// Encrypt a private key under a password-derived key.
///
/// Returns the self-describing custody blob. Fails with
/// [`Error::KeyProtection`] if the key material has the wrong length.
pub fn protect(private_key: &[u8], password: &str) -> Result<Vec<u8>> {
    if private_key.len() != PRIVATE_KEY_SIZE {
        return Err(Error::KeyProtection(format!(
            "private key must be {} bytes, got {}",
            PRIVATE_KEY_SIZE,
            private_key.len()
        )));
    }

    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let kek = kdf::derive_protection_key(password, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&*kek)
        .map_err(|e| Error::KeyProtection(format!("cipher init failed: {}", e)))?;

    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce), private_key)
        .map_err(|_| Error::KeyProtection("private key encryption failed".into()))?;

    let mut blob = Vec::with_capacity(MIN_BLOB_SIZE);
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a custody blob back into the raw private key.
///
/// Wrong password, truncated blob, or tampered ciphertext all yield
/// [`Error::DecryptionFailed`]. The returned bytes are zeroized on drop;
/// callers should feed them straight into
/// [`crate::IdentityKeyPair::from_bytes`] and let them go.
pub fn unprotect(blob: &[u8], password: &str) -> Result<Zeroizing<[u8; PRIVATE_KEY_SIZE]>> {
    if blob.len() < MIN_BLOB_SIZE || &blob[..MAGIC.len()] != MAGIC {
        return Err(Error::DecryptionFailed);
    }

    let salt_end = MAGIC.len() + SALT_SIZE;
    let nonce_end = salt_end + NONCE_SIZE;

    let salt: [u8; SALT_SIZE] = blob[MAGIC.len()..salt_end]
        .try_into()
        .map_err(|_| Error::DecryptionFailed)?;
    let nonce = &blob[salt_end..nonce_end];
    let ciphertext = &blob[nonce_end..];

    let kek = kdf::derive_protection_key(password, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&*kek).map_err(|_| Error::DecryptionFailed)?;

    let plaintext = cipher
        .decrypt(AesNonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::DecryptionFailed)?;
    let plaintext = Zeroizing::new(plaintext);

    if plaintext.len() != PRIVATE_KEY_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let mut key = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
    key.copy_from_slice(&plaintext);
    Ok(key)
}

// ============================================================================
// TESTS
// ============================================================================
