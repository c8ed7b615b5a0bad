//! Credential hashing and the authenticated-hello handshake.
//!
//! Stored password hashes are `hex(SHA-256(name ‖ pw ‖ name ‖ pw))`. A
//! client proves knowledge of the hash by sending
//!
//! ```text
//! hex(SHA-256(name ‖ hash ‖ t ‖ name ‖ hash))
//! ```
//!
//! where `t` is the big-endian 32-bit Unix time of the hello timestamp. The
//! session key minted on success mixes the authenticator back in, so it is
//! never sent on the wire.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Consecutive bad passwords that trigger a suspension.
pub const MAX_BAD_PASSWORDS: u32 = 5;

/// Minutes of suspension imposed after too many bad passwords.
pub const BAD_PASSWORD_SUSPENSION_MINUTES: i64 = 5;

/// Layout of the hello timestamp: two-digit year, day of year, time.
const TIME_STR_FORMAT: &str = "%y%j%H%M%S";

pub(crate) mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn decode(text: &str) -> Option<Vec<u8>> {
        if text.len() % 2 != 0 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        (0..text.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
            .collect()
    }
}

/// Hashes a clear-text password for storage.
pub fn password_hash(username: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Computes the authenticator a client sends in an authenticated hello.
pub fn authenticator(username: &str, password_hash: &str, time: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(password_hash.as_bytes());
    hasher.update(time.to_be_bytes());
    hasher.update(username.as_bytes());
    hasher.update(password_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derives the per-session key from a verified authenticator.
pub fn session_key(authenticator: &str, password_hash: &str, time: u32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(authenticator.as_bytes());
    hasher.update(password_hash.as_bytes());
    hasher.update(time.to_be_bytes());
    hasher.update(authenticator.as_bytes());
    hasher.update(password_hash.as_bytes());
    hasher.finalize().to_vec()
}

/// Compares authenticators in constant time, ignoring hex case.
pub fn verify_authenticator(expected: &str, given: &str) -> bool {
    let given = given.to_ascii_lowercase();
    expected.as_bytes().ct_eq(given.as_bytes()).into()
}

/// Parses a `YYDDDHHMMSS` hello timestamp as UTC.
pub fn parse_time_str(text: &str) -> Option<DateTime<Utc>> {
    if text.len() != 11 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(text, TIME_STR_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

/// Formats a hello timestamp.
pub fn format_time_str(time: DateTime<Utc>) -> String {
    time.format(TIME_STR_FORMAT).to_string()
}

/// XORs `data` with the repeating session key.
fn xor_with_key(data: &[u8], key: &[u8]) -> Vec<u8> {
    data.iter()
        .zip(key.iter().cycle())
        .map(|(d, k)| d ^ k)
        .collect()
}

/// Hides a new password for transmission under the session key.
pub fn obfuscate_password(password: &str, key: &[u8]) -> String {
    hex::encode(xor_with_key(password.as_bytes(), key))
}

/// Recovers a password hidden by [`obfuscate_password`].
pub fn reveal_password(hex_text: &str, key: &[u8]) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    let bytes = hex::decode(hex_text)?;
    String::from_utf8(xor_with_key(&bytes, key)).ok()
}

/// Counts consecutive bad passwords per user.
#[derive(Debug, Default)]
pub struct LoginAttempts {
    failures: Mutex<HashMap<String, u32>>,
}

impl LoginAttempts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a bad password and returns the consecutive count.
    pub fn record_failure(&self, username: &str) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(username.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Clears the count after a good password or a suspension.
    pub fn reset(&self, username: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(username);
    }
}
