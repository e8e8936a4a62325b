//! # Key Management
//!
//! X25519 identity keypairs. Each account gets exactly one keypair at
//! registration; there is no rotation. X25519 provides ~128-bit security,
//! comfortably above the RSA-2048 floor the protocol requires.
//!
//! The private key is zeroized on drop and must never be persisted or
//! transmitted in the clear — at rest it only exists inside a custody blob
//! (see [`crate::crypto::custody`]).

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// Size of an X25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an X25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;

/// An identity's X25519 keypair
///
/// ## Security
///
/// - The private key is zeroized when this struct is dropped
/// - The public key can be safely shared with anyone
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    /// Private key (secret)
    #[zeroize(skip)] // x25519_dalek handles its own zeroization
    secret: StaticSecret,
    /// Public key (derived from secret)
    public: X25519PublicKey,
}

impl IdentityKeyPair {
    /// Generate a new random keypair from the OS secure random source.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Reconstruct a keypair from raw private-key bytes
    /// (the output of [`crate::crypto::custody::unprotect`]).
    pub fn from_bytes(bytes: &[u8; PRIVATE_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(*bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the raw private-key bytes.
    ///
    /// ## Security Warning
    ///
    /// Only use this to feed [`crate::crypto::custody::protect`].
    /// Never log or transmit these bytes.
    pub fn secret_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// Get the shareable public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.public.to_bytes())
    }

    /// Perform Diffie-Hellman key exchange with another party's public key.
    pub(crate) fn diffie_hellman(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let their_public = X25519PublicKey::from(*their_public);
        self.secret.diffie_hellman(&their_public).to_bytes()
    }
}

/// A public key that can be safely shared, stored, and transmitted
///
/// Serializes as base64, matching the wire and storage format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "b64_bytes")] pub(crate) [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Encode as base64 (storage / wire form)
    pub fn to_base64(&self) -> String {
        B64.encode(self.0)
    }

    /// Decode from base64
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = B64
            .decode(encoded)
            .map_err(|e| Error::InvalidKey(format!("invalid base64: {}", e)))?;
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey("public key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }
}

/// Serde helper for serializing key bytes as base64
mod b64_bytes {
    use base64::{engine::general_purpose::STANDARD as B64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = B64.decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid key length"))
    }
}

// ============================================================================
// TESTS
// ============================================================================
