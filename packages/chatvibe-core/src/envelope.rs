//! # Message Envelope
//!
//! The canonical representation of one encrypted message exchange — the
//! immutable record the relay persists and broadcasts.
//!
//! The key-wrap material is a tagged variant rather than a bag of optional
//! fields, so "exactly one wrap format populated" is enforced by the type:
//!
//! ```text
//! KeyWrap::Dual   { for_recipient, for_sender }   current format
//! KeyWrap::Legacy { wrapped }                     single-reader, old wire
//! ```
//!
//! [`WirePayload`] is the JSON shape that actually travels (and is handed
//! to the relay's broadcast primitive): base64 fields, camelCase names,
//! with the legacy field kept for backward compatibility. Conversion to an
//! envelope is the validation boundary — a payload populating both formats,
//! or neither, is rejected there and never persisted.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::hybrid::CipherOutput;
use crate::error::{Error, Result};
use crate::room::room_id;

/// Which of the two readers is decrypting an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderRole {
    Sender,
    Recipient,
}

/// Session-key wrap material — exactly one format per envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyWrap {
    /// Current format: the session key sealed independently for each reader.
    Dual {
        for_recipient: Vec<u8>,
        for_sender: Vec<u8>,
    },
    /// Old single-reader format, kept readable for historical messages.
    Legacy { wrapped: Vec<u8> },
}

/// One encrypted message exchange, immutable once created.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    /// Unique envelope id
    pub id: String,
    /// Sending identity id
    pub sender_id: String,
    /// Receiving identity id
    pub recipient_id: String,
    /// Room this envelope belongs to — always `room_id(sender, recipient)`
    pub room: String,
    /// Encrypted payload (opaque to the relay)
    pub ciphertext: Vec<u8>,
    /// Per-message initialization vector
    pub iv: Vec<u8>,
    /// Session-key wrap material
    pub wrap: KeyWrap,
    /// Whether real-time delivery reached the recipient
    pub delivered: bool,
    /// Persistence timestamp — orders history replay within a room
    pub created_at: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Assemble a current-format envelope from a cipher output.
    ///
    /// Rejects a `room` that does not match the sender/recipient pair.
    pub fn assemble(
        sender_id: &str,
        recipient_id: &str,
        room: &str,
        output: CipherOutput,
    ) -> Result<Self> {
        let envelope = Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            room: room.to_string(),
            ciphertext: output.ciphertext,
            iv: output.iv.to_vec(),
            wrap: KeyWrap::Dual {
                for_recipient: output.wrapped_key_for_recipient,
                for_sender: output.wrapped_key_for_sender,
            },
            delivered: false,
            created_at: Utc::now(),
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Build a legacy-format envelope (single wrap). Only historical data
    /// and old clients produce these; new sends always use [`assemble`].
    pub fn legacy(
        sender_id: &str,
        recipient_id: &str,
        room: &str,
        ciphertext: Vec<u8>,
        iv: Vec<u8>,
        wrapped: Vec<u8>,
    ) -> Result<Self> {
        let envelope = Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            room: room.to_string(),
            ciphertext,
            iv,
            wrap: KeyWrap::Legacy { wrapped },
            delivered: false,
            created_at: Utc::now(),
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Structural validation, run before an envelope is accepted for
    /// persistence. Never partially written: a failing envelope is
    /// rejected whole.
    pub fn validate(&self) -> Result<()> {
        if self.sender_id.is_empty() || self.recipient_id.is_empty() {
            return Err(Error::Validation("missing sender or recipient id".into()));
        }
        if self.room != room_id(&self.sender_id, &self.recipient_id)? {
            return Err(Error::Validation(
                "room does not match sender/recipient pair".into(),
            ));
        }
        if self.ciphertext.is_empty() {
            return Err(Error::Validation("empty ciphertext".into()));
        }
        if self.iv.is_empty() {
            return Err(Error::Validation("empty iv".into()));
        }
        match &self.wrap {
            KeyWrap::Dual {
                for_recipient,
                for_sender,
            } => {
                if for_recipient.is_empty() || for_sender.is_empty() {
                    return Err(Error::Validation("empty key wrap in dual format".into()));
                }
            }
            KeyWrap::Legacy { wrapped } => {
                if wrapped.is_empty() {
                    return Err(Error::Validation("empty legacy key wrap".into()));
                }
            }
        }
        Ok(())
    }

    /// The denormalized JSON shape handed to the broadcast primitive.
    pub fn to_wire(&self) -> WirePayload {
        let (for_recipient, for_sender, legacy) = match &self.wrap {
            KeyWrap::Dual {
                for_recipient,
                for_sender,
            } => (
                Some(B64.encode(for_recipient)),
                Some(B64.encode(for_sender)),
                None,
            ),
            KeyWrap::Legacy { wrapped } => (None, None, Some(B64.encode(wrapped))),
        };

        WirePayload {
            sender_id: self.sender_id.clone(),
            recipient_id: self.recipient_id.clone(),
            room: self.room.clone(),
            ciphertext: B64.encode(&self.ciphertext),
            iv: B64.encode(&self.iv),
            wrapped_key_for_recipient: for_recipient,
            wrapped_key_for_sender: for_sender,
            wrapped_key_legacy: legacy,
        }
    }
}

/// The wire/broadcast form of an envelope — what clients send over the
/// WebSocket and what the relay fans out to a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload {
    pub sender_id: String,
    pub recipient_id: String,
    pub room: String,
    /// Base64 ciphertext
    pub ciphertext: String,
    /// Base64 iv
    pub iv: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped_key_for_recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped_key_for_sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped_key_legacy: Option<String>,
}

impl WirePayload {
    /// Validate and convert into an envelope for persistence.
    ///
    /// This is where the "exactly one wrap format" invariant is enforced
    /// for data arriving off the wire.
    pub fn to_envelope(&self) -> Result<MessageEnvelope> {
        let decode = |label: &str, value: &str| {
            B64.decode(value)
                .map_err(|_| Error::Validation(format!("invalid base64 in {}", label)))
        };

        let wrap = match (
            &self.wrapped_key_for_recipient,
            &self.wrapped_key_for_sender,
            &self.wrapped_key_legacy,
        ) {
            (Some(recipient), Some(sender), None) => KeyWrap::Dual {
                for_recipient: decode("wrappedKeyForRecipient", recipient)?,
                for_sender: decode("wrappedKeyForSender", sender)?,
            },
            (None, None, Some(legacy)) => KeyWrap::Legacy {
                wrapped: decode("wrappedKeyLegacy", legacy)?,
            },
            (None, None, None) => {
                return Err(Error::Validation("no key wrap material present".into()))
            }
            // Half a dual wrap, or a mix of the two formats
            _ => {
                return Err(Error::Validation(
                    "malformed key wrap fields on payload".into(),
                ))
            }
        };

        let envelope = MessageEnvelope {
            id: Uuid::new_v4().to_string(),
            sender_id: self.sender_id.clone(),
            recipient_id: self.recipient_id.clone(),
            room: self.room.clone(),
            ciphertext: decode("ciphertext", &self.ciphertext)?,
            iv: decode("iv", &self.iv)?,
            wrap,
            delivered: false,
            created_at: Utc::now(),
        };
        envelope.validate()?;
        Ok(envelope)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hybrid::encrypt;
    use crate::crypto::keys::IdentityKeyPair;

    fn sample_output() -> CipherOutput {
        let sender = IdentityKeyPair::generate();
        let recipient = IdentityKeyPair::generate();
        encrypt(b"hi", &recipient.public_key(), &sender.public_key()).unwrap()
    }

    #[test]
    fn test_assemble_populates_dual_format() {
        let room = room_id("a", "b").unwrap();
        let envelope = MessageEnvelope::assemble("a", "b", &room, sample_output()).unwrap();

        assert!(matches!(envelope.wrap, KeyWrap::Dual { .. }));
        assert!(!envelope.delivered);
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn test_assemble_rejects_mismatched_room() {
        let wrong_room = room_id("a", "c").unwrap();
        assert!(matches!(
            MessageEnvelope::assemble("a", "b", &wrong_room, sample_output()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_wire_roundtrip_dual() {
        let room = room_id("a", "b").unwrap();
        let envelope = MessageEnvelope::assemble("a", "b", &room, sample_output()).unwrap();

        let wire = envelope.to_wire();
        assert!(wire.wrapped_key_for_recipient.is_some());
        assert!(wire.wrapped_key_for_sender.is_some());
        assert!(wire.wrapped_key_legacy.is_none());

        let back = wire.to_envelope().unwrap();
        assert_eq!(back.wrap, envelope.wrap);
        assert_eq!(back.ciphertext, envelope.ciphertext);
        assert_eq!(back.iv, envelope.iv);
    }

    #[test]
    fn test_wire_rejects_conflicting_formats() {
        let room = room_id("a", "b").unwrap();
        let envelope = MessageEnvelope::assemble("a", "b", &room, sample_output()).unwrap();

        let mut wire = envelope.to_wire();
        wire.wrapped_key_legacy = Some(B64.encode(b"stale"));

        assert!(matches!(wire.to_envelope(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_wire_rejects_missing_wrap() {
        let room = room_id("a", "b").unwrap();
        let envelope = MessageEnvelope::assemble("a", "b", &room, sample_output()).unwrap();

        let mut wire = envelope.to_wire();
        wire.wrapped_key_for_recipient = None;
        wire.wrapped_key_for_sender = None;

        assert!(matches!(wire.to_envelope(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_wire_rejects_bad_base64() {
        let room = room_id("a", "b").unwrap();
        let envelope = MessageEnvelope::assemble("a", "b", &room, sample_output()).unwrap();

        let mut wire = envelope.to_wire();
        wire.ciphertext = "!!! not base64 !!!".into();

        assert!(matches!(wire.to_envelope(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_legacy_envelope_validates() {
        let room = room_id("a", "b").unwrap();
        let envelope = MessageEnvelope::legacy(
            "a",
            "b",
            &room,
            vec![1, 2, 3],
            vec![0; 12],
            vec![9; 76],
        )
        .unwrap();

        assert!(matches!(envelope.wrap, KeyWrap::Legacy { .. }));

        let wire = envelope.to_wire();
        assert!(wire.wrapped_key_legacy.is_some());
        assert!(wire.wrapped_key_for_recipient.is_none());

        let back = wire.to_envelope().unwrap();
        assert_eq!(back.wrap, envelope.wrap);
    }

    #[test]
    fn test_empty_wrap_material_rejected() {
        let room = room_id("a", "b").unwrap();
        assert!(matches!(
            MessageEnvelope::legacy("a", "b", &room, vec![1], vec![0; 12], vec![]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_wire_json_field_names() {
        let room = room_id("a", "b").unwrap();
        let wire = MessageEnvelope::assemble("a", "b", &room, sample_output())
            .unwrap()
            .to_wire();

        let json = serde_json::to_value(&wire).unwrap();
        assert!(json.get("senderId").is_some());
        assert!(json.get("recipientId").is_some());
        assert!(json.get("wrappedKeyForRecipient").is_some());
        assert!(json.get("wrappedKeyForSender").is_some());
        assert!(json.get("wrappedKeyLegacy").is_none());
    }
}
