//! TOML credential store.
//!
//! ```toml
//! [[user]]
//! name = "alice"
//! roles = ["dds", "admin"]
//! password_hash = "3f1c..."
//! local = true
//! max_dcps = 500
//! ip_addresses = ["10.1.", "192.168.4.17"]
//! ```
//!
//! Every mutation rewrites the file through a temporary sibling and a
//! rename, so readers never see a half-written store.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::password::{PasswordHistory, PolicyViolation};

/// Role required to use the DDS service at all.
pub const ROLE_DDS: &str = "dds";

/// Role granting administrative commands.
pub const ROLE_ADMIN: &str = "admin";

#[derive(Debug, Error)]
pub enum PasswordFileError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize password file: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("no such user '{0}'")]
    UnknownUser(String),
}

/// One `[[user]]` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub local: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_dcps: Option<i32>,
    /// Address prefixes the user may connect from; `*` matches anything.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub disable_back_link_search: bool,
    #[serde(default)]
    pub good_only: bool,
    /// Previous password hashes, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<String>,
}

impl UserEntry {
    /// Creates an entry holding only the `dds` role.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: vec![ROLE_DDS.to_string()],
            password_hash: String::new(),
            local: false,
            max_dcps: None,
            ip_addresses: Vec::new(),
            disable_back_link_search: false,
            good_only: false,
            history: Vec::new(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN)
    }

    /// Returns true if a client at `addr` may log in as this user.
    pub fn allows_address(&self, addr: &str) -> bool {
        self.ip_addresses.is_empty()
            || self
                .ip_addresses
                .iter()
                .any(|prefix| prefix == "*" || addr.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileContents {
    #[serde(default, rename = "user")]
    users: Vec<UserEntry>,
}

/// Shared, internally synchronized credential store.
#[derive(Debug)]
pub struct PasswordFile {
    path: PathBuf,
    history_depth: usize,
    users: RwLock<BTreeMap<String, UserEntry>>,
}

impl PasswordFile {
    /// Opens the store, treating a missing file as empty.
    pub fn open(path: impl Into<PathBuf>, history_depth: usize) -> Result<Self, PasswordFileError> {
        let path = path.into();
        let contents = match fs::read_to_string(&path) {
            Ok(text) => toml::from_str::<FileContents>(&text).map_err(|source| {
                PasswordFileError::Parse {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "password file not found, starting empty");
                FileContents::default()
            }
            Err(source) => return Err(PasswordFileError::Read { path, source }),
        };

        let users = contents
            .users
            .into_iter()
            .map(|u| (u.name.clone(), u))
            .collect();

        Ok(Self {
            path,
            history_depth,
            users: RwLock::new(users),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the named user's entry.
    pub fn get(&self, name: &str) -> Option<UserEntry> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Returns every entry, sorted by name.
    pub fn list(&self) -> Vec<UserEntry> {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Adds or replaces an entry and saves.
    pub fn upsert(&self, entry: UserEntry) -> Result<(), PasswordFileError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        info!(user = %entry.name, "storing user entry");
        users.insert(entry.name.clone(), entry);
        self.save_locked(&users)
    }

    /// Replaces a user's password hash, pushing the old hash into history.
    pub fn set_password(&self, name: &str, hash: &str) -> Result<(), PasswordFileError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let entry = users
            .get_mut(name)
            .ok_or_else(|| PasswordFileError::UnknownUser(name.to_string()))?;
        let old = std::mem::replace(&mut entry.password_hash, hash.to_string());
        if !old.is_empty() {
            push_history(&mut entry.history, old, self.history_depth);
        }
        info!(user = %name, "password changed");
        self.save_locked(&users)
    }

    /// Removes a user. Returns false if there was no such user.
    pub fn remove(&self, name: &str) -> Result<bool, PasswordFileError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if users.remove(name).is_none() {
            return Ok(false);
        }
        info!(user = %name, "user removed");
        self.save_locked(&users)?;
        Ok(true)
    }

    fn save_locked(&self, users: &BTreeMap<String, UserEntry>) -> Result<(), PasswordFileError> {
        let contents = FileContents {
            users: users.values().cloned().collect(),
        };
        let text = toml::to_string_pretty(&contents)?;
        write_atomic(&self.path, text.as_bytes()).map_err(|source| PasswordFileError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl PasswordHistory for PasswordFile {
    fn check_historical_password(
        &self,
        username: &str,
        hash: &str,
    ) -> Result<(), PolicyViolation> {
        let Some(entry) = self.get(username) else {
            return Ok(());
        };
        if entry.password_hash == hash {
            return Err(PolicyViolation::Reused(
                "same as the current password".to_string(),
            ));
        }
        if entry.history.iter().any(|h| h == hash) {
            return Err(PolicyViolation::Reused(format!(
                "matches one of the last {} passwords",
                self.history_depth
            )));
        }
        Ok(())
    }
}

fn push_history(history: &mut Vec<String>, hash: String, depth: usize) {
    history.push(hash);
    if history.len() > depth {
        let excess = history.len() - depth;
        history.drain(..excess);
    }
}

/// Writes `data` to a sibling temporary file, then renames it over `path`.
/// Suffix of the sibling file [`write_atomic`] writes before renaming.
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TEMP_SUFFIX);
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password_hash;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let file = PasswordFile::open(dir.path().join("passwd.toml"), 3).unwrap();
        assert!(file.list().is_empty());
        assert!(file.get("alice").is_none());
    }

    #[test]
    fn upsert_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("passwd.toml");

        let file = PasswordFile::open(&path, 3).unwrap();
        let mut entry = UserEntry::new("alice");
        entry.roles.push(ROLE_ADMIN.to_string());
        entry.password_hash = password_hash("alice", "pw");
        entry.max_dcps = Some(10);
        file.upsert(entry.clone()).unwrap();

        let reopened = PasswordFile::open(&path, 3).unwrap();
        assert_eq!(reopened.get("alice"), Some(entry));
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn parses_hand_written_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("passwd.toml");
        fs::write(
            &path,
            r#"
[[user]]
name = "ops"
roles = ["dds", "ADMIN"]
password_hash = "abc"
ip_addresses = ["10.1."]

[[user]]
name = "guest"
"#,
        )
        .unwrap();

        let file = PasswordFile::open(&path, 3).unwrap();
        let ops = file.get("ops").unwrap();
        assert!(ops.is_admin());
        assert!(ops.has_role(ROLE_DDS));
        assert!(ops.allows_address("10.1.2.3"));
        assert!(!ops.allows_address("10.2.2.3"));

        let guest = file.get("guest").unwrap();
        assert!(!guest.has_role(ROLE_DDS));
        assert!(guest.allows_address("1.2.3.4"));
    }

    #[test]
    fn parse_error_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("passwd.toml");
        fs::write(&path, "[[user]\n").unwrap();
        assert!(matches!(
            PasswordFile::open(&path, 3),
            Err(PasswordFileError::Parse { .. })
        ));
    }

    #[test]
    fn wildcard_address() {
        let mut entry = UserEntry::new("x");
        entry.ip_addresses = vec!["192.168.".to_string(), "*".to_string()];
        assert!(entry.allows_address("8.8.8.8"));
    }

    #[test]
    fn set_password_keeps_bounded_history() {
        let dir = tempdir().unwrap();
        let file = PasswordFile::open(dir.path().join("passwd.toml"), 2).unwrap();
        let mut entry = UserEntry::new("bob");
        entry.password_hash = "h0".to_string();
        file.upsert(entry).unwrap();

        file.set_password("bob", "h1").unwrap();
        file.set_password("bob", "h2").unwrap();
        file.set_password("bob", "h3").unwrap();

        let bob = file.get("bob").unwrap();
        assert_eq!(bob.password_hash, "h3");
        assert_eq!(bob.history, vec!["h1".to_string(), "h2".to_string()]);

        assert!(file.check_historical_password("bob", "h3").is_err());
        assert!(file.check_historical_password("bob", "h2").is_err());
        assert!(file.check_historical_password("bob", "h0").is_ok());
        assert!(file.check_historical_password("nobody", "h3").is_ok());
    }

    #[test]
    fn set_password_unknown_user() {
        let dir = tempdir().unwrap();
        let file = PasswordFile::open(dir.path().join("passwd.toml"), 2).unwrap();
        assert!(matches!(
            file.set_password("ghost", "h"),
            Err(PasswordFileError::UnknownUser(_))
        ));
    }

    #[test]
    fn remove_user() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("passwd.toml");
        let file = PasswordFile::open(&path, 2).unwrap();
        file.upsert(UserEntry::new("a")).unwrap();
        file.upsert(UserEntry::new("b")).unwrap();

        assert!(file.remove("a").unwrap());
        assert!(!file.remove("a").unwrap());

        let names: Vec<String> = PasswordFile::open(&path, 2)
            .unwrap()
            .list()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, vec!["b".to_string()]);
    }
}
