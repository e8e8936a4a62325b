//! # Error Handling
//!
//! Error types for the ChatVibe core library.
//!
//! Every decrypt path degrades to a typed failure value — a malformed or
//! tampered envelope must never take down history loading for a whole room.
//! Error messages never carry plaintext, key material, or passwords;
//! `DecryptionFailed` is deliberately detail-free.

use thiserror::Error;

/// Result type alias for ChatVibe core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the ChatVibe core library
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Envelope Errors
    // ========================================================================

    /// Envelope failed structural validation (rejected before persistence)
    #[error("invalid envelope: {0}")]
    Validation(String),

    /// No wrapped key material usable by this reader
    #[error("no wrapped session key present for this reader")]
    MissingKeyMaterial,

    // ========================================================================
    // Crypto Errors
    // ========================================================================

    /// Encryption failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed — wrong key, wrong password, or tampered data.
    /// Intentionally carries no further detail.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Private key protection (wrap for storage at rest) failed
    #[error("key protection failed: {0}")]
    KeyProtection(String),

    /// Key derivation failed
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// Invalid key format or length
    #[error("invalid key: {0}")]
    InvalidKey(String),

    // ========================================================================
    // Addressing Errors
    // ========================================================================

    /// Malformed identity identifier (empty, or contains the room separator)
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}
