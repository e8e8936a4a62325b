//! One-time passcode store for credential recovery.
//!
//! Process-local transient state keyed by email, not durable storage.
//! A record moves through `issued → verified → consumed`; expiry or a
//! failed dispatch drops it. At most one live code per email — issuing
//! again overwrites (last write wins, so only the newest code is valid).
//!
//! Expired records are removed lazily whenever they are touched, plus by
//! the periodic [`PasscodeStore::sweep_expired`] task the binary spawns.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;

use crate::error::{RelayError, Result};

/// Default passcode validity window in seconds (5 minutes).
pub const DEFAULT_CODE_TTL_SECS: i64 = 300;

/// A pending recovery code for one email.
#[derive(Debug, Clone)]
pub struct PasscodeRecord {
    code: String,
    expires_at: DateTime<Utc>,
    verified: bool,
}

/// Delivery channel for recovery codes — an external collaborator.
///
/// Failure is surfaced to the caller as a recoverable error; the store
/// does not retry.
pub trait Notifier: Send + Sync {
    fn send(&self, email: &str, code: &str) -> std::result::Result<(), String>;
}

/// Development notifier: records the dispatch in the logs.
/// The code itself is never logged.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, email: &str, _code: &str) -> std::result::Result<(), String> {
        tracing::info!(email = email, "recovery passcode dispatched");
        Ok(())
    }
}

/// Keyed passcode store with TTL semantics.
pub struct PasscodeStore {
    records: DashMap<String, PasscodeRecord>,
    ttl: Duration,
}

impl PasscodeStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            records: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Issue a fresh 4-digit code for an email, overwriting any pending
    /// record. Returns the code so the caller can hand it to the notifier.
    pub fn issue(&self, email: &str) -> String {
        let code = format!("{}", rand::thread_rng().gen_range(1000..10000));
        self.records.insert(
            email.to_string(),
            PasscodeRecord {
                code: code.clone(),
                expires_at: Utc::now() + self.ttl,
                verified: false,
            },
        );
        code
    }

    /// Drop the pending record for an email (e.g. when dispatch failed,
    /// so a code the user never received cannot linger as a live gate).
    pub fn revoke(&self, email: &str) {
        self.records.remove(email);
    }

    /// Check a submitted code.
    ///
    /// - expired → [`RelayError::CodeExpired`], record removed: the caller
    ///   must restart from a fresh request;
    /// - mismatch → [`RelayError::InvalidCode`], record kept: retryable;
    /// - match within the window → record marked verified.
    pub fn verify(&self, email: &str, code: &str) -> Result<()> {
        let mut record = self
            .records
            .get_mut(email)
            .ok_or(RelayError::NoPendingCode)?;

        if Utc::now() > record.expires_at {
            drop(record);
            self.records.remove(email);
            return Err(RelayError::CodeExpired);
        }

        if record.code != code {
            return Err(RelayError::InvalidCode);
        }

        record.verified = true;
        Ok(())
    }

    /// Consume a verified record to gate one password replacement.
    ///
    /// The record is removed on success so the same code can never gate a
    /// second replacement.
    pub fn consume_verified(&self, email: &str) -> Result<()> {
        let record = self.records.get(email).ok_or(RelayError::NoPendingCode)?;

        if Utc::now() > record.expires_at {
            drop(record);
            self.records.remove(email);
            return Err(RelayError::CodeExpired);
        }

        if !record.verified {
            return Err(RelayError::NotVerified);
        }

        drop(record);
        self.records.remove(email);
        Ok(())
    }

    /// Remove all expired records. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at >= now);
        before - self.records.len()
    }

    /// Number of pending records (expired-but-unswept included).
    pub fn pending_count(&self) -> usize {
        self.records.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
