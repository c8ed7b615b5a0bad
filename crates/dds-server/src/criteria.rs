//! Search criteria held by a session.
//!
//! Criteria travel as text, one `KEY: value` line per setting:
//!
//! ```text
//! # last hour, two platforms
//! DAPS_SINCE: now - 1 hour
//! DCP_ADDRESS: CE1234AB
//! DCP_ADDRESS: CE5678CD
//! ```
//!
//! The server does not interpret most keys; it validates the line shape,
//! counts platform addresses for the per-user DCP limit, and hands the
//! criteria to the archive.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Width of the fixed name field that precedes criteria text on the wire.
pub const CRITERIA_HEADER_LEN: usize = 50;

/// File name used for criteria, both in the header field and in the
/// user's sandbox.
pub const CRITERIA_FILE_NAME: &str = "searchcrit";

/// Key naming one platform address.
pub const DCP_ADDRESS_KEY: &str = "DCP_ADDRESS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriteriaError {
    #[error("line {line}: expected 'KEY: value', got {text:?}")]
    MissingSeparator { line: usize, text: String },

    #[error("line {line}: empty key")]
    EmptyKey { line: usize },

    #[error("criteria names {count} platforms, limit is {limit}")]
    TooManyPlatforms { count: usize, limit: usize },
}

/// Validated criteria text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    text: String,
}

impl SearchCriteria {
    /// Validates criteria text.
    pub fn parse(text: &str) -> Result<Self, CriteriaError> {
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, _)) = line.split_once(':') else {
                return Err(CriteriaError::MissingSeparator {
                    line: idx + 1,
                    text: line.to_string(),
                });
            };
            if key.trim().is_empty() {
                return Err(CriteriaError::EmptyKey { line: idx + 1 });
            }
        }
        Ok(Self {
            text: text.to_string(),
        })
    }

    /// Returns the criteria text as received.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Iterates `(KEY, value)` pairs, keys upper-cased.
    pub fn entries(&self) -> impl Iterator<Item = (String, &str)> {
        self.text.lines().filter_map(|line| {
            let line = line.trim();
            if line.starts_with('#') {
                return None;
            }
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_ascii_uppercase(), value.trim()))
        })
    }

    /// Returns every value for `key`.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Platform addresses named by `DCP_ADDRESS` lines.
    pub fn dcp_addresses(&self) -> Vec<&str> {
        self.values(DCP_ADDRESS_KEY)
            .flat_map(str::split_whitespace)
            .collect()
    }

    /// Rejects criteria naming more platforms than `limit`. A negative
    /// limit means unlimited.
    pub fn check_dcp_limit(&self, limit: i32) -> Result<(), CriteriaError> {
        let Ok(limit) = usize::try_from(limit) else {
            return Ok(());
        };
        let count = self.dcp_addresses().len();
        if count > limit {
            return Err(CriteriaError::TooManyPlatforms { count, limit });
        }
        Ok(())
    }

    /// Splits an inbound criteria body into its header name and text.
    ///
    /// Bodies shorter than the header carry no criteria text.
    pub fn from_body(body: &[u8]) -> Result<Self, CriteriaError> {
        let text = body.get(CRITERIA_HEADER_LEN..).unwrap_or_default();
        let text = text.strip_suffix(&[0u8]).unwrap_or(text);
        Self::parse(&String::from_utf8_lossy(text))
    }

    /// Builds the outbound body: the fixed header then the text.
    pub fn to_body(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CRITERIA_HEADER_LEN + self.text.len());
        buf.put_slice(&header_field());
        buf.put_slice(self.text.as_bytes());
        buf.freeze()
    }
}

/// The fixed-width header naming the criteria file, NUL padded.
pub fn header_field() -> [u8; CRITERIA_HEADER_LEN] {
    let mut field = [0u8; CRITERIA_HEADER_LEN];
    field[..CRITERIA_FILE_NAME.len()].copy_from_slice(CRITERIA_FILE_NAME.as_bytes());
    field
}
