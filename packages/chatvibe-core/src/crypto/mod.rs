//! # Cryptography
//!
//! All cryptographic operations for ChatVibe. No other module performs raw
//! crypto directly.
//!
//! - [`keys`] — X25519 identity keypair generation and public-key handling
//! - [`kdf`] — labeled key derivation (Argon2id password stretching,
//!   HKDF-SHA256 expansion, login verifier hashing)
//! - [`custody`] — password-protection of the private key at rest
//! - [`hybrid`] — per-message hybrid encryption with dual key wrapping

pub mod custody;
pub mod hybrid;
pub mod kdf;
pub mod keys;

pub use keys::{IdentityKeyPair, PublicKey};
