//! # Key Derivation Functions
//!
//! The same account password feeds two unrelated flows, and they must stay
//! cryptographically independent:
//!
//! ```text
//! password ──┬──► Argon2id(random salt A) ──► PHC string   (login verifier)
//!            │
//!            └──► Argon2id(random salt B) ──► HKDF-SHA256
//!                        info = "chatvibe-key-protection-v1"
//!                                          ──► 32-byte custody KEK
//! ```
//!
//! Each flow carries its own random salt and its own label, so replacing
//! the stored login verifier can never silently invalidate the private-key
//! protection, and vice versa.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Size of the password-stretching salt in bytes
pub const SALT_SIZE: usize = 16;

/// Domain separation labels for HKDF
///
/// These ensure that keys derived for different purposes are
/// cryptographically independent. The `-v1` suffix leaves room for future
/// algorithm upgrades.
pub mod domain {
    /// Custody KEK — protects the private key at rest
    pub const KEY_PROTECTION: &[u8] = b"chatvibe-key-protection-v1";

    /// Per-message session-key wrapping
    pub const KEY_WRAP: &[u8] = b"chatvibe-key-wrap-v1";
}

/// Argon2id parameters — tuned for interactive use.
fn argon2_params() -> Params {
    Params::new(
        64 * 1024, // m_cost: 64 MiB
        3,         // t_cost: 3 iterations
        1,         // p_cost: 1 thread
        Some(32),  // output len
    )
    .expect("static Argon2 params are always valid")
}

fn argon2() -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params())
}

/// Derive the 32-byte custody key-encryption-key from a password and salt.
///
/// Argon2id stretches the password, then HKDF-SHA256 expands the result
/// under the [`domain::KEY_PROTECTION`] label. The salt is stored in the
/// custody blob (it is not secret).
pub fn derive_protection_key(
    password: &str,
    salt: &[u8; SALT_SIZE],
) -> Result<Zeroizing<[u8; 32]>> {
    let mut stretched = Zeroizing::new([0u8; 32]);
    argon2()
        .hash_password_into(password.as_bytes(), salt, &mut *stretched)
        .map_err(|e| Error::KeyDerivationFailed(e.to_string()))?;

    let hkdf = Hkdf::<Sha256>::new(None, &*stretched);
    let mut kek = Zeroizing::new([0u8; 32]);
    hkdf.expand(domain::KEY_PROTECTION, &mut *kek)
        .map_err(|_| Error::KeyDerivationFailed("HKDF expansion failed".into()))?;

    Ok(kek)
}

/// Hash a password into a self-describing PHC verifier string for login.
///
/// The verifier is opaque to the rest of the system; it is stored and
/// compared, never derived from.
pub fn hash_password_verifier(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::KeyDerivationFailed(e.to_string()))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC verifier string.
///
/// A malformed verifier counts as a mismatch — login must fail closed.
pub fn verify_password_verifier(password: &str, verifier: &str) -> bool {
    match PasswordHash::new(verifier) {
        Ok(parsed) => argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Generate a fresh random salt for password stretching.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_key_deterministic() {
        let salt = [7u8; SALT_SIZE];

        let k1 = derive_protection_key("hunter2", &salt).unwrap();
        let k2 = derive_protection_key("hunter2", &salt).unwrap();

        assert_eq!(*k1, *k2);
    }

    #[test]
    fn test_protection_key_varies_with_password_and_salt() {
        let salt_a = [1u8; SALT_SIZE];
        let salt_b = [2u8; SALT_SIZE];

        let base = derive_protection_key("hunter2", &salt_a).unwrap();
        let other_password = derive_protection_key("hunter3", &salt_a).unwrap();
        let other_salt = derive_protection_key("hunter2", &salt_b).unwrap();

        assert_ne!(*base, *other_password);
        assert_ne!(*base, *other_salt);
    }

    #[test]
    fn test_verifier_roundtrip() {
        let verifier = hash_password_verifier("correct horse").unwrap();

        assert!(verify_password_verifier("correct horse", &verifier));
        assert!(!verify_password_verifier("wrong horse", &verifier));
    }

    #[test]
    fn test_verifier_malformed_fails_closed() {
        assert!(!verify_password_verifier("anything", "not-a-phc-string"));
        assert!(!verify_password_verifier("anything", ""));
    }

    #[test]
    fn test_verifier_salted_per_call() {
        // Each verifier carries its own random salt, so the same password
        // never produces the same stored string twice.
        let v1 = hash_password_verifier("hunter2").unwrap();
        let v2 = hash_password_verifier("hunter2").unwrap();

        assert_ne!(v1, v2);
        assert!(verify_password_verifier("hunter2", &v1));
        assert!(verify_password_verifier("hunter2", &v2));
    }
}
