//! Per-user sandbox directories and suspension markers.
//!
//! A username is known to the server exactly when a directory of that name
//! exists under the user root (or the local-user root). The directory holds
//! the user's network lists, saved search criteria and the `suspended`
//! marker.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::AuthFailed;
use crate::passwd_file::write_atomic;

/// Name of the suspension marker inside a sandbox.
pub const SUSPENSION_MARKER: &str = "suspended";

/// Returns the sentinel used for permanent suspension.
pub fn permanent_suspension() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Error)]
pub enum SuspensionError {
    #[error("failed to update suspension marker {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Maps usernames to sandbox directories.
///
/// Shared across connections.
pub trait SandboxResolver: Send + Sync {
    /// Finds the sandbox for `username`, failing for unknown users.
    fn resolve(&self, username: &str) -> Result<Sandbox, AuthFailed>;
}

/// Resolves users against two directory trees on disk.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
    local_root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            local_root: local_root.into(),
        }
    }

    /// Creates the sandbox directory for a new user.
    pub fn create(&self, username: &str, local: bool) -> io::Result<Sandbox> {
        if !is_valid_username(username) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid username '{username}'"),
            ));
        }
        let base = if local { &self.local_root } else { &self.root };
        let dir = base.join(username);
        fs::create_dir_all(&dir)?;
        info!(user = %username, dir = %dir.display(), "created sandbox");
        Ok(Sandbox {
            username: username.to_string(),
            dir,
            local,
        })
    }
}

impl SandboxResolver for DirectoryResolver {
    fn resolve(&self, username: &str) -> Result<Sandbox, AuthFailed> {
        if !is_valid_username(username) {
            return Err(AuthFailed::new(format!("invalid username '{username}'")));
        }

        for (base, local) in [(&self.local_root, true), (&self.root, false)] {
            let dir = base.join(username);
            if dir.is_dir() {
                return Ok(Sandbox {
                    username: username.to_string(),
                    dir,
                    local,
                });
            }
        }

        Err(AuthFailed::new(format!("unknown user '{username}'")))
    }
}

/// Usernames become path components, so separators and dot names are out.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control())
}

/// A user's directory on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    username: String,
    dir: PathBuf,
    local: bool,
}

impl Sandbox {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True if the directory was found under the local-user root.
    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Path of a file inside the sandbox.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Returns the suspension end, clearing a marker that has expired.
    ///
    /// A marker that exists but cannot be parsed counts as permanent until
    /// an administrator clears it.
    pub fn suspended_until(&self) -> Option<DateTime<Utc>> {
        let marker = self.file(SUSPENSION_MARKER);
        let text = match fs::read_to_string(&marker) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(user = %self.username, error = %e, "cannot read suspension marker");
                return Some(permanent_suspension());
            }
        };

        let until = match DateTime::parse_from_rfc3339(text.trim()) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                warn!(user = %self.username, error = %e, "unparsable suspension marker");
                return Some(permanent_suspension());
            }
        };

        if until <= Utc::now() {
            debug!(user = %self.username, "suspension expired, removing marker");
            if let Err(e) = fs::remove_file(&marker) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(user = %self.username, error = %e, "cannot remove expired suspension marker");
                }
            }
            return None;
        }
        Some(until)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended_until().is_some()
    }

    /// Suspends the user until `until`, or lifts the suspension for `None`.
    pub fn suspend_until(&self, until: Option<DateTime<Utc>>) -> Result<(), SuspensionError> {
        let marker = self.file(SUSPENSION_MARKER);
        let result = match until {
            Some(t) => {
                info!(user = %self.username, until = %t, "suspending user");
                write_atomic(&marker, t.to_rfc3339().as_bytes())
            }
            None => {
                info!(user = %self.username, "clearing suspension");
                match fs::remove_file(&marker) {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                }
            }
        };
        result.map_err(|source| SuspensionError::Io {
            path: marker,
            source,
        })
    }
}
