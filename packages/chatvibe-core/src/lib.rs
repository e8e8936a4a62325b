//! # ChatVibe Core
//!
//! Client-side end-to-end encryption core for the ChatVibe messaging
//! system. The relay server never sees plaintext — everything
//! confidentiality-relevant lives in this crate.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CHATVIBE CORE MODULES                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │   Crypto    │  │  Envelope   │  │    Room     │  │    Error     │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - Keypairs  │  │ - KeyWrap   │  │ - Sorted-   │  │ - Typed      │   │
//! │  │ - Custody   │  │ - Assemble  │  │   pair ids  │  │   failures   │   │
//! │  │ - Hybrid    │  │ - Validate  │  │             │  │              │   │
//! │  │   cipher    │  │ - Wire form │  │             │  │              │   │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └──────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - **Hybrid encryption**: every message gets a fresh 16-byte session key
//!   and a fresh nonce; the payload is AES-128-GCM, and the session key is
//!   wrapped twice — once for the recipient, once for the sender — with a
//!   randomized ephemeral-X25519 sealed box, so either party can later
//!   decrypt using only their own private key.
//! - **Key custody**: private keys are stored only as password-protected
//!   blobs (Argon2id → HKDF → AES-256-GCM). The plaintext private key
//!   exists only transiently in the caller's memory and is zeroized on drop.
//! - **Fail closed**: a wrong password or tampered ciphertext is an AEAD
//!   authentication failure surfaced as [`Error::DecryptionFailed`] — never
//!   silently-wrong key material.
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`crypto`] - Keypairs, password-based key custody, hybrid cipher
//! - [`envelope`] - The persisted/broadcast message envelope and wire form
//! - [`room`] - Order-independent two-party room addressing

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod room;

pub use crypto::custody;
pub use crypto::hybrid::{self, CipherOutput};
pub use crypto::keys::{IdentityKeyPair, PublicKey};
pub use envelope::{KeyWrap, MessageEnvelope, ReaderRole, WirePayload};
pub use error::{Error, Result};
pub use room::room_id;
