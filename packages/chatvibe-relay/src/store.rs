//! SQLite-backed identity and envelope stores.
//!
//! The relay owns envelopes for persistence; identities are written once
//! at registration (only the password verifier is ever updated). History
//! replay must reproduce persistence order exactly: ascending `created_at`
//! with rowid as the insertion-order tiebreak.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use chatvibe_core::{KeyWrap, MessageEnvelope};

use crate::error::{RelayError, Result};

/// A registered account.
///
/// `public_key` and `protected_private_key` are set together at creation
/// and never updated — there is no key rotation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_verifier: String,
    #[serde(skip_serializing)]
    pub public_key: String,
    #[serde(skip_serializing)]
    pub protected_private_key: String,
}

/// SQLite store behind a mutex — the relay's write volume is one row per
/// message, well within a single connection's capacity.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id                    TEXT PRIMARY KEY,
                    display_name          TEXT NOT NULL,
                    email                 TEXT NOT NULL UNIQUE,
                    password_verifier     TEXT NOT NULL,
                    public_key            TEXT NOT NULL,
                    protected_private_key TEXT NOT NULL,
                    created_at            INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS messages (
                    id                        TEXT NOT NULL UNIQUE,
                    sender_id                 TEXT NOT NULL,
                    recipient_id              TEXT NOT NULL,
                    room                      TEXT NOT NULL,
                    ciphertext                TEXT NOT NULL,
                    iv                        TEXT NOT NULL,
                    wrapped_key_for_recipient TEXT,
                    wrapped_key_for_sender    TEXT,
                    wrapped_key_legacy        TEXT,
                    delivered                 INTEGER NOT NULL DEFAULT 0,
                    created_at                INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_messages_room
                    ON messages(room, created_at);",
            )
            .map_err(storage_err)
    }

    // ── Identity Store ────────────────────────────────────────────────────

    pub fn create_identity(&self, identity: &Identity) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO users
                    (id, display_name, email, password_verifier,
                     public_key, protected_private_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    identity.id,
                    identity.display_name,
                    identity.email,
                    identity.password_verifier,
                    identity.public_key,
                    identity.protected_private_key,
                    Utc::now().timestamp_millis(),
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, display_name, email, password_verifier,
                        public_key, protected_private_key
                 FROM users WHERE email = ?1",
                params![email],
                identity_from_row,
            )
            .optional()
            .map_err(storage_err)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Identity>> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, display_name, email, password_verifier,
                        public_key, protected_private_key
                 FROM users WHERE id = ?1",
                params![id],
                identity_from_row,
            )
            .optional()
            .map_err(storage_err)
    }

    pub fn update_password_verifier(&self, id: &str, verifier: &str) -> Result<()> {
        let updated = self
            .conn
            .lock()
            .execute(
                "UPDATE users SET password_verifier = ?1 WHERE id = ?2",
                params![verifier, id],
            )
            .map_err(storage_err)?;
        if updated == 0 {
            return Err(RelayError::UserNotFound);
        }
        Ok(())
    }

    pub fn list_identities(&self) -> Result<Vec<Identity>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, display_name, email, password_verifier,
                        public_key, protected_private_key
                 FROM users ORDER BY created_at ASC",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], identity_from_row)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok(rows)
    }

    // ── Envelope Store ────────────────────────────────────────────────────

    /// Append a validated envelope. Nothing is written if validation fails.
    pub fn append_envelope(&self, envelope: &MessageEnvelope) -> Result<String> {
        envelope.validate()?;

        let wire = envelope.to_wire();
        self.conn
            .lock()
            .execute(
                "INSERT INTO messages
                    (id, sender_id, recipient_id, room, ciphertext, iv,
                     wrapped_key_for_recipient, wrapped_key_for_sender,
                     wrapped_key_legacy, delivered, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    envelope.id,
                    envelope.sender_id,
                    envelope.recipient_id,
                    envelope.room,
                    wire.ciphertext,
                    wire.iv,
                    wire.wrapped_key_for_recipient,
                    wire.wrapped_key_for_sender,
                    wire.wrapped_key_legacy,
                    envelope.delivered as i64,
                    envelope.created_at.timestamp_millis(),
                ],
            )
            .map_err(storage_err)?;
        Ok(envelope.id.clone())
    }

    /// All envelopes for a room in persistence order.
    ///
    /// A corrupted row is skipped with a warning rather than failing the
    /// whole replay — one bad historical message must not block a room.
    pub fn list_by_room(&self, room: &str) -> Result<Vec<MessageEnvelope>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, sender_id, recipient_id, room, ciphertext, iv,
                        wrapped_key_for_recipient, wrapped_key_for_sender,
                        wrapped_key_legacy, delivered, created_at
                 FROM messages WHERE room = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(storage_err)?;

        let rows = stmt
            .query_map(params![room], envelope_from_row)
            .map_err(storage_err)?;

        let mut envelopes = Vec::new();
        for row in rows {
            match row.map_err(storage_err)? {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => {
                    tracing::warn!(room = room, error = %e, "skipping malformed stored envelope");
                }
            }
        }
        Ok(envelopes)
    }
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        id: row.get(0)?,
        display_name: row.get(1)?,
        email: row.get(2)?,
        password_verifier: row.get(3)?,
        public_key: row.get(4)?,
        protected_private_key: row.get(5)?,
    })
}

/// Decode one message row. The outer Result is a SQL error; the inner one
/// is a malformed envelope (skippable).
fn envelope_from_row(
    row: &Row<'_>,
) -> rusqlite::Result<std::result::Result<MessageEnvelope, chatvibe_core::Error>> {
    use base64::{engine::general_purpose::STANDARD as B64, Engine};

    let id: String = row.get(0)?;
    let sender_id: String = row.get(1)?;
    let recipient_id: String = row.get(2)?;
    let room: String = row.get(3)?;
    let ciphertext_b64: String = row.get(4)?;
    let iv_b64: String = row.get(5)?;
    let for_recipient: Option<String> = row.get(6)?;
    let for_sender: Option<String> = row.get(7)?;
    let legacy: Option<String> = row.get(8)?;
    let delivered: i64 = row.get(9)?;
    let created_at_ms: i64 = row.get(10)?;

    let decode = |label: &str, value: &str| {
        B64.decode(value)
            .map_err(|_| chatvibe_core::Error::Validation(format!("invalid base64 in {}", label)))
    };

    let build = || -> std::result::Result<MessageEnvelope, chatvibe_core::Error> {
        let wrap = match (&for_recipient, &for_sender, &legacy) {
            (Some(r), Some(s), None) => KeyWrap::Dual {
                for_recipient: decode("wrapped_key_for_recipient", r)?,
                for_sender: decode("wrapped_key_for_sender", s)?,
            },
            (None, None, Some(l)) => KeyWrap::Legacy {
                wrapped: decode("wrapped_key_legacy", l)?,
            },
            _ => {
                return Err(chatvibe_core::Error::Validation(
                    "stored row violates key-wrap invariant".into(),
                ))
            }
        };

        Ok(MessageEnvelope {
            id,
            sender_id,
            recipient_id,
            room,
            ciphertext: decode("ciphertext", &ciphertext_b64)?,
            iv: decode("iv", &iv_b64)?,
            wrap,
            delivered: delivered != 0,
            created_at: timestamp_from_millis(created_at_ms),
        })
    };

    Ok(build())
}

fn timestamp_from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn storage_err(e: rusqlite::Error) -> RelayError {
    RelayError::Storage(e.to_string())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chatvibe_core::{hybrid, room_id, IdentityKeyPair, MessageEnvelope};

    fn sample_identity(email: &str) -> Identity {
        Identity {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: "Alice".into(),
            email: email.into(),
            password_verifier: "$argon2id$fake".into(),
            public_key: "cHVibGljLWtleQ==".into(),
            protected_private_key: "YmxvYg==".into(),
        }
    }

    fn sample_envelope(sender: &str, recipient: &str, body: &[u8]) -> MessageEnvelope {
        let s = IdentityKeyPair::generate();
        let r = IdentityKeyPair::generate();
        let output = hybrid::encrypt(body, &r.public_key(), &s.public_key()).unwrap();
        let room = room_id(sender, recipient).unwrap();
        MessageEnvelope::assemble(sender, recipient, &room, output).unwrap()
    }

    #[test]
    fn test_identity_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let identity = sample_identity("alice@example.com");
        store.create_identity(&identity).unwrap();

        let by_email = store.find_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, identity.id);
        assert_eq!(by_email.public_key, identity.public_key);

        let by_id = store.find_by_id(&identity.id).unwrap().unwrap();
        assert_eq!(by_id.email, identity.email);

        assert!(store.find_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_identity(&sample_identity("alice@example.com"))
            .unwrap();

        assert!(store
            .create_identity(&sample_identity("alice@example.com"))
            .is_err());
    }

    #[test]
    fn test_update_password_verifier_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        let identity = sample_identity("alice@example.com");
        store.create_identity(&identity).unwrap();

        store
            .update_password_verifier(&identity.id, "$argon2id$new")
            .unwrap();

        let reloaded = store.find_by_id(&identity.id).unwrap().unwrap();
        assert_eq!(reloaded.password_verifier, "$argon2id$new");
        // Key material is untouched by a verifier update
        assert_eq!(reloaded.public_key, identity.public_key);
        assert_eq!(
            reloaded.protected_private_key,
            identity.protected_private_key
        );
    }

    #[test]
    fn test_update_verifier_unknown_user() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.update_password_verifier("missing", "x"),
            Err(RelayError::UserNotFound)
        ));
    }

    #[test]
    fn test_envelope_roundtrip_and_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let room = room_id("a", "b").unwrap();

        let first = sample_envelope("a", "b", b"one");
        let second = sample_envelope("b", "a", b"two");
        store.append_envelope(&first).unwrap();
        store.append_envelope(&second).unwrap();

        let replay = store.list_by_room(&room).unwrap();
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].id, first.id);
        assert_eq!(replay[1].id, second.id);
        assert_eq!(replay[0].ciphertext, first.ciphertext);
        assert_eq!(replay[0].wrap, first.wrap);
    }

    #[test]
    fn test_rooms_are_isolated() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .append_envelope(&sample_envelope("a", "b", b"ab"))
            .unwrap();
        store
            .append_envelope(&sample_envelope("a", "c", b"ac"))
            .unwrap();

        assert_eq!(store.list_by_room(&room_id("a", "b").unwrap()).unwrap().len(), 1);
        assert_eq!(store.list_by_room(&room_id("a", "c").unwrap()).unwrap().len(), 1);
        assert!(store.list_by_room("x_y").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_envelope_never_written() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut envelope = sample_envelope("a", "b", b"hi");
        envelope.room = "wrong_room".into();

        assert!(store.append_envelope(&envelope).is_err());
        assert!(store.list_by_room("wrong_room").unwrap().is_empty());
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        let path = path.to_str().unwrap();

        let identity = sample_identity("alice@example.com");
        {
            let store = SqliteStore::open(path).unwrap();
            store.create_identity(&identity).unwrap();
            store
                .append_envelope(&sample_envelope("a", "b", b"persisted"))
                .unwrap();
        }

        let reopened = SqliteStore::open(path).unwrap();
        assert!(reopened.find_by_id(&identity.id).unwrap().is_some());
        assert_eq!(
            reopened.list_by_room(&room_id("a", "b").unwrap()).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_corrupt_row_skipped_not_fatal() {
        let store = SqliteStore::open_in_memory().unwrap();
        let room = room_id("a", "b").unwrap();
        store
            .append_envelope(&sample_envelope("a", "b", b"good"))
            .unwrap();

        // Inject a row violating the wrap invariant (all wrap columns NULL)
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO messages
                    (id, sender_id, recipient_id, room, ciphertext, iv,
                     delivered, created_at)
                 VALUES ('bad', 'a', 'b', ?1, 'AAAA', 'AAAA', 0, 0)",
                params![room],
            )
            .unwrap();

        let replay = store.list_by_room(&room).unwrap();
        assert_eq!(replay.len(), 1);
    }
}
