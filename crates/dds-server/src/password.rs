//! Password complexity and reuse policy.
//!
//! Checks run in a fixed order and stop at the first violation:
//!
//! 1. at least [`MIN_LENGTH`] non-whitespace characters
//! 2. characters from at least three of lowercase, uppercase, digit and
//!    [`SPECIAL_CHARS`]
//! 3. the username does not appear in the password (case-insensitive)
//! 4. no dictionary word appears in the password (case-insensitive)
//! 5. the [`PasswordHistory`] collaborator accepts the new hash

use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::{debug, warn};

/// Minimum number of non-whitespace characters.
pub const MIN_LENGTH: usize = 12;

/// Character classes a password must draw from.
pub const MIN_CHAR_CLASSES: usize = 3;

/// Characters counted in the "special" class.
pub const SPECIAL_CHARS: &str = "!@#$%^&*()-_=+[]{};:'\",.<>/?\\|`~";

/// Dictionary words shorter than this are ignored.
const MIN_DICTIONARY_WORD: usize = 4;

/// Reason a candidate password was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("password must contain at least {min} non-whitespace characters")]
    TooShort { min: usize },

    #[error(
        "password must contain at least {required} of: lowercase, uppercase, digit, special character"
    )]
    TooFewClasses { required: usize },

    #[error("password may not contain the username")]
    ContainsUsername,

    #[error("password contains the dictionary word '{0}'")]
    DictionaryWord(String),

    #[error("password was used recently: {0}")]
    Reused(String),
}

/// Record of past password hashes per user.
///
/// Implementations are shared across connections. The store that saves a
/// new password is responsible for remembering the one it replaces.
pub trait PasswordHistory: Send + Sync {
    /// Rejects `hash` if it may not be reused by `username`.
    fn check_historical_password(&self, username: &str, hash: &str)
    -> Result<(), PolicyViolation>;
}

/// Applies the password policy.
pub struct PasswordChecker {
    dictionary: Vec<String>,
    history: Arc<dyn PasswordHistory>,
}

impl PasswordChecker {
    /// Creates a checker with no dictionary.
    pub fn new(history: Arc<dyn PasswordHistory>) -> Self {
        Self {
            dictionary: Vec::new(),
            history,
        }
    }

    /// Loads a word list, one word per line.
    ///
    /// A list that cannot be read disables the dictionary check with a
    /// warning rather than failing.
    #[must_use]
    pub fn with_dictionary_file(mut self, path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                self.dictionary = text
                    .lines()
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| w.chars().count() >= MIN_DICTIONARY_WORD)
                    .collect();
                debug!(
                    path = %path.display(),
                    words = self.dictionary.len(),
                    "loaded password dictionary"
                );
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "cannot load password dictionary, dictionary check disabled"
                );
                self.dictionary.clear();
            }
        }
        self
    }

    /// Uses an in-memory word list.
    #[must_use]
    pub fn with_dictionary<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.dictionary = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| w.chars().count() >= MIN_DICTIONARY_WORD)
            .collect();
        self
    }

    pub fn history(&self) -> &Arc<dyn PasswordHistory> {
        &self.history
    }

    /// Runs every check against a candidate password.
    pub fn check(
        &self,
        username: &str,
        password: &str,
        password_hash: &str,
    ) -> Result<(), PolicyViolation> {
        let length = password.chars().filter(|c| !c.is_whitespace()).count();
        if length < MIN_LENGTH {
            return Err(PolicyViolation::TooShort { min: MIN_LENGTH });
        }

        if char_classes(password) < MIN_CHAR_CLASSES {
            return Err(PolicyViolation::TooFewClasses {
                required: MIN_CHAR_CLASSES,
            });
        }

        let lowered = password.to_lowercase();
        let lowered_name = username.trim().to_lowercase();
        if !lowered_name.is_empty() && lowered.contains(&lowered_name) {
            return Err(PolicyViolation::ContainsUsername);
        }

        if let Some(word) = self.dictionary.iter().find(|w| lowered.contains(w.as_str())) {
            return Err(PolicyViolation::DictionaryWord(word.clone()));
        }

        self.history.check_historical_password(username, password_hash)
    }
}

fn char_classes(password: &str) -> usize {
    let lower = password.chars().any(|c| c.is_ascii_lowercase());
    let upper = password.chars().any(|c| c.is_ascii_uppercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());
    let special = password.chars().any(|c| SPECIAL_CHARS.contains(c));
    [lower, upper, digit, special].into_iter().filter(|&b| b).count()
}

/// Generates a temporary password shaped `abcd-ABCD-12`.
pub fn generate_random_password() -> String {
    let mut rng = OsRng;
    let mut out = String::with_capacity(12);
    for _ in 0..4 {
        out.push(char::from(rng.gen_range(b'a'..=b'z')));
    }
    out.push('-');
    for _ in 0..4 {
        out.push(char::from(rng.gen_range(b'A'..=b'Z')));
    }
    out.push('-');
    for _ in 0..2 {
        out.push(char::from(rng.gen_range(b'0'..=b'9')));
    }
    out
}
