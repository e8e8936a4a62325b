//! # Hybrid Cipher
//!
//! Per-message hybrid encryption: a fast symmetric cipher for the payload,
//! with the symmetric key wrapped asymmetrically for each reader.
//!
//! ## Encryption Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MESSAGE ENCRYPTION FLOW                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Step 1: Fresh material (per message, never reused)                    │
//! │     session key K  = 16 random bytes                                   │
//! │     iv             = 12 random bytes                                   │
//! │                                                                         │
//! │  Step 2: Encrypt payload                                               │
//! │     ciphertext = AES-128-GCM(K, iv, plaintext)                         │
//! │                                                                         │
//! │  Step 3: Wrap K twice (sealed box per reader)                          │
//! │     for each target public key:                                        │
//! │       ephemeral X25519 keypair (fresh per wrap)                        │
//! │       shared    = DH(ephemeral_secret, target_public)                  │
//! │       wrap_key  = HKDF-SHA256(salt=ephemeral_pub, ikm=shared,          │
//! │                              info="chatvibe-key-wrap-v1" || target)    │
//! │       wrapped   = ephemeral_pub ‖ nonce ‖ AES-256-GCM(wrap_key, K)     │
//! │                                                                         │
//! │  Output: { ciphertext, iv, wrappedKeyForRecipient, wrappedKeyForSender }│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The two wraps are independent randomized encryptions of the same key —
//! unlinkable ciphertexts. Either party later recovers `K` using only their
//! own private key and decrypts the payload.
//!
//! ## Legacy format
//!
//! Early envelopes carried a single wrap (`wrappedKeyLegacy`), produced for
//! one reader only. Both parties attempt to unwrap it with their own key;
//! it succeeds only for the identity it was wrapped for, and the other side
//! gets a clean [`Error::DecryptionFailed`] — a placeholder in the UI, not
//! a crash.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Aes256Gcm, Nonce as AesNonce,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::Zeroizing;

use crate::crypto::kdf::domain;
use crate::crypto::keys::{IdentityKeyPair, PublicKey, PUBLIC_KEY_SIZE};
use crate::envelope::{KeyWrap, MessageEnvelope, ReaderRole, WirePayload};
use crate::error::{Error, Result};

/// Size of the per-message symmetric session key in bytes (AES-128)
pub const SESSION_KEY_SIZE: usize = 16;

/// Size of the per-message initialization vector (AES-GCM nonce) in bytes
pub const IV_SIZE: usize = 12;

/// Nonce size inside a key wrap
const WRAP_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size
const TAG_SIZE: usize = 16;

/// Total size of one wrapped session key:
/// ephemeral public key ‖ nonce ‖ ciphertext(session key) ‖ tag
pub const WRAPPED_KEY_SIZE: usize =
    PUBLIC_KEY_SIZE + WRAP_NONCE_SIZE + SESSION_KEY_SIZE + TAG_SIZE;

/// Output of one [`encrypt`] call — everything the envelope needs.
///
/// The session key itself is not part of the output; it is zeroized before
/// `encrypt` returns.
#[derive(Debug, Clone)]
pub struct CipherOutput {
    /// AES-128-GCM ciphertext (includes the auth tag)
    pub ciphertext: Vec<u8>,
    /// Per-message nonce
    pub iv: [u8; IV_SIZE],
    /// Session key sealed for the recipient
    pub wrapped_key_for_recipient: Vec<u8>,
    /// Session key sealed for the sender (so they can re-read history)
    pub wrapped_key_for_sender: Vec<u8>,
}

/// Encrypt a message payload for two readers.
///
/// Generates a fresh session key and IV per call; encrypting the same
/// plaintext twice yields unrelated ciphertexts.
pub fn encrypt(
    plaintext: &[u8],
    recipient_public: &PublicKey,
    sender_public: &PublicKey,
) -> Result<CipherOutput> {
    let mut session_key = Zeroizing::new([0u8; SESSION_KEY_SIZE]);
    OsRng.fill_bytes(&mut *session_key);

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes128Gcm::new_from_slice(&*session_key)
        .map_err(|e| Error::EncryptionFailed(format!("cipher init failed: {}", e)))?;
    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&iv), plaintext)
        .map_err(|e| Error::EncryptionFailed(format!("payload encryption failed: {}", e)))?;

    let wrapped_key_for_recipient = wrap_session_key(&session_key, recipient_public)?;
    let wrapped_key_for_sender = wrap_session_key(&session_key, sender_public)?;

    Ok(CipherOutput {
        ciphertext,
        iv,
        wrapped_key_for_recipient,
        wrapped_key_for_sender,
    })
}

/// Decrypt an envelope as one of its two readers.
///
/// Selects the wrap matching `role` (or the single legacy wrap), unwraps
/// the session key with the caller's private key, and opens the payload.
/// Any unwrap or integrity failure is [`Error::DecryptionFailed`].
pub fn decrypt(
    envelope: &MessageEnvelope,
    keys: &IdentityKeyPair,
    role: ReaderRole,
) -> Result<Vec<u8>> {
    let wrapped = match (&envelope.wrap, role) {
        (KeyWrap::Dual { for_sender, .. }, ReaderRole::Sender) => for_sender,
        (KeyWrap::Dual { for_recipient, .. }, ReaderRole::Recipient) => for_recipient,
        // Legacy envelopes were single-reader: try the one wrap we have.
        (KeyWrap::Legacy { wrapped }, _) => wrapped,
    };

    let session_key = unwrap_session_key(wrapped, keys)?;
    open_payload(&session_key, &envelope.iv, &envelope.ciphertext)
}

/// Decrypt a raw wire payload (live broadcast path).
///
/// Picks the wrap matching `role`, falling back to the legacy field.
/// A payload with no wrap usable by this reader at all fails with
/// [`Error::MissingKeyMaterial`]; undecodable base64 is treated as
/// corruption ([`Error::DecryptionFailed`]).
pub fn decrypt_wire(
    payload: &WirePayload,
    keys: &IdentityKeyPair,
    role: ReaderRole,
) -> Result<Vec<u8>> {
    use base64::{engine::general_purpose::STANDARD as B64, Engine};

    let wrapped_b64 = match role {
        ReaderRole::Sender => payload.wrapped_key_for_sender.as_ref(),
        ReaderRole::Recipient => payload.wrapped_key_for_recipient.as_ref(),
    }
    .or(payload.wrapped_key_legacy.as_ref())
    .ok_or(Error::MissingKeyMaterial)?;

    let wrapped = B64.decode(wrapped_b64).map_err(|_| Error::DecryptionFailed)?;
    let iv = B64.decode(&payload.iv).map_err(|_| Error::DecryptionFailed)?;
    let ciphertext = B64
        .decode(&payload.ciphertext)
        .map_err(|_| Error::DecryptionFailed)?;

    let session_key = unwrap_session_key(&wrapped, keys)?;
    open_payload(&session_key, &iv, &ciphertext)
}

/// Seal a session key for one target public key.
///
/// Each call uses a fresh ephemeral X25519 keypair, so two wraps of the
/// same session key share no bytes.
pub fn wrap_session_key(
    session_key: &[u8; SESSION_KEY_SIZE],
    target: &PublicKey,
) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = X25519PublicKey::from(&ephemeral);

    let shared = Zeroizing::new(
        ephemeral
            .diffie_hellman(&X25519PublicKey::from(*target.as_bytes()))
            .to_bytes(),
    );
    let wrap_key = derive_wrap_key(&shared, ephemeral_pub.as_bytes(), target.as_bytes())?;

    let mut nonce = [0u8; WRAP_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(&*wrap_key)
        .map_err(|e| Error::EncryptionFailed(format!("wrap cipher init failed: {}", e)))?;
    let sealed = cipher
        .encrypt(AesNonce::from_slice(&nonce), session_key.as_slice())
        .map_err(|e| Error::EncryptionFailed(format!("key wrap failed: {}", e)))?;

    let mut wrapped = Vec::with_capacity(WRAPPED_KEY_SIZE);
    wrapped.extend_from_slice(ephemeral_pub.as_bytes());
    wrapped.extend_from_slice(&nonce);
    wrapped.extend_from_slice(&sealed);
    Ok(wrapped)
}

/// Recover a session key from a wrap using the caller's private key.
///
/// Succeeds only if the wrap was sealed for this keypair's public key.
pub fn unwrap_session_key(
    wrapped: &[u8],
    keys: &IdentityKeyPair,
) -> Result<Zeroizing<[u8; SESSION_KEY_SIZE]>> {
    if wrapped.len() != WRAPPED_KEY_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let ephemeral_pub: [u8; PUBLIC_KEY_SIZE] = wrapped[..PUBLIC_KEY_SIZE]
        .try_into()
        .map_err(|_| Error::DecryptionFailed)?;
    let nonce = &wrapped[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + WRAP_NONCE_SIZE];
    let sealed = &wrapped[PUBLIC_KEY_SIZE + WRAP_NONCE_SIZE..];

    let shared = Zeroizing::new(keys.diffie_hellman(&ephemeral_pub));
    let my_public = keys.public_key();
    let wrap_key = derive_wrap_key(&shared, &ephemeral_pub, my_public.as_bytes())?;

    let cipher =
        Aes256Gcm::new_from_slice(&*wrap_key).map_err(|_| Error::DecryptionFailed)?;
    let plaintext = cipher
        .decrypt(AesNonce::from_slice(nonce), sealed)
        .map_err(|_| Error::DecryptionFailed)?;
    let plaintext = Zeroizing::new(plaintext);

    if plaintext.len() != SESSION_KEY_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let mut key = Zeroizing::new([0u8; SESSION_KEY_SIZE]);
    key.copy_from_slice(&plaintext);
    Ok(key)
}

/// Open a payload ciphertext with a recovered session key.
fn open_payload(
    session_key: &[u8; SESSION_KEY_SIZE],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if iv.len() != IV_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let cipher =
        Aes128Gcm::new_from_slice(session_key).map_err(|_| Error::DecryptionFailed)?;
    cipher
        .decrypt(AesNonce::from_slice(iv), ciphertext)
        .map_err(|_| Error::DecryptionFailed)
}

/// Derive the AEAD key protecting one wrap.
///
/// Binding the target public key into `info` ties each wrap to its reader.
fn derive_wrap_key(
    shared: &[u8; 32],
    ephemeral_pub: &[u8; PUBLIC_KEY_SIZE],
    target_pub: &[u8; PUBLIC_KEY_SIZE],
) -> Result<Zeroizing<[u8; 32]>> {
    let mut info = Vec::with_capacity(domain::KEY_WRAP.len() + PUBLIC_KEY_SIZE);
    info.extend_from_slice(domain::KEY_WRAP);
    info.extend_from_slice(target_pub);

    let hkdf = Hkdf::<Sha256>::new(Some(ephemeral_pub), shared);
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(&info, &mut *key)
        .map_err(|_| Error::KeyDerivationFailed("wrap key expansion failed".into()))?;
    Ok(key)
}

// ============================================================================
// TESTS
// ============================================================================
