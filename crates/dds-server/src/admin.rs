//! Remote configuration files and network lists.
//!
//! Administrative config requests name a logical file rather than a path.
//! The closed set of names maps onto paths from [`AdminConfig`]; anything
//! else is rejected before the filesystem is touched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use dds_config::AdminConfig;
use tracing::info;

use crate::criteria::CRITERIA_FILE_NAME;
use crate::error::{ErrorCode, RequestError};
use crate::passwd_file::{TEMP_SUFFIX, write_atomic};
use crate::sandbox::SUSPENSION_MARKER;

/// Width of the NUL-padded name field in config and netlist bodies.
pub const NAME_FIELD_LEN: usize = 64;

/// A logical configuration name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigName {
    Lrgs,
    DdsRecv,
    Drgs,
    NetworkDcp,
    /// Names of the shared network lists, one per line.
    NetlistList,
    Netlist(String),
    /// Install only.
    NetlistDelete(String),
}

impl ConfigName {
    /// Parses a name, case-insensitively.
    pub fn parse(name: &str) -> Result<Self, RequestError> {
        let lowered = name.trim().to_ascii_lowercase();
        let parsed = match lowered.as_str() {
            "lrgs" => Self::Lrgs,
            "ddsrecv" => Self::DdsRecv,
            "drgs" => Self::Drgs,
            "networkdcp" => Self::NetworkDcp,
            "netlist-list" => Self::NetlistList,
            _ => {
                // The list name keeps its case
                let trimmed = name.trim();
                if let Some(list) = strip_prefix_ignore_case(trimmed, "netlist-delete:") {
                    Self::NetlistDelete(validate_netlist_name(list)?.to_string())
                } else if let Some(list) = strip_prefix_ignore_case(trimmed, "netlist:") {
                    Self::Netlist(validate_netlist_name(list)?.to_string())
                } else {
                    return Err(RequestError::new(
                        ErrorCode::BadKeyword,
                        format!("invalid configuration name '{name}'"),
                    ));
                }
            }
        };
        Ok(parsed)
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

/// Files the server keeps in a sandbox beside the user's network lists.
const SANDBOX_CONTROL_FILES: [&str; 2] = [SUSPENSION_MARKER, CRITERIA_FILE_NAME];

/// Rejects list names that are not a single plain file name, or that name
/// one of the server's own sandbox files.
pub fn validate_netlist_name(name: &str) -> Result<&str, RequestError> {
    let name = name.trim();
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || SANDBOX_CONTROL_FILES
            .iter()
            .any(|f| name.eq_ignore_ascii_case(f))
        || name.to_ascii_lowercase().ends_with(TEMP_SUFFIX);
    if bad {
        return Err(RequestError::new(
            ErrorCode::BadNetlist,
            format!("invalid network list name '{name}'"),
        ));
    }
    Ok(name)
}

/// Encodes a NUL-padded name field.
///
/// Names longer than the field are truncated, leaving room for one NUL.
pub fn encode_name_field(name: &str) -> [u8; NAME_FIELD_LEN] {
    let mut field = [0u8; NAME_FIELD_LEN];
    let len = name.len().min(NAME_FIELD_LEN - 1);
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    field
}

/// Splits a body into its name field and the bytes after it.
pub fn decode_name_field(body: &[u8]) -> (String, &[u8]) {
    let field = &body[..body.len().min(NAME_FIELD_LEN)];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let name = String::from_utf8_lossy(&field[..end]).trim().to_string();
    let rest = body.get(NAME_FIELD_LEN..).unwrap_or_default();
    (name, rest)
}

/// Builds a body of a name field followed by `contents`.
pub fn named_body(name: &str, contents: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(NAME_FIELD_LEN + contents.len());
    buf.put_slice(&encode_name_field(name));
    buf.put_slice(contents);
    buf.freeze()
}

fn no_such_file(path: &Path, err: &io::Error) -> RequestError {
    RequestError::new(
        ErrorCode::NoSuchFile,
        format!("cannot access '{}': {err}", path.display()),
    )
}

/// Maps names onto files for administrative requests.
#[derive(Debug, Clone)]
pub struct AdminFiles {
    config: AdminConfig,
}

impl AdminFiles {
    pub fn new(config: AdminConfig) -> Self {
        Self { config }
    }

    pub fn netlist_dir(&self) -> &Path {
        &self.config.netlist_dir
    }

    fn path_for(&self, name: &ConfigName) -> Option<PathBuf> {
        match name {
            ConfigName::Lrgs => Some(self.config.lrgs_config.clone()),
            ConfigName::DdsRecv => Some(self.config.ddsrecv_config.clone()),
            ConfigName::Drgs => Some(self.config.drgs_config.clone()),
            ConfigName::NetworkDcp => Some(self.config.network_dcp_config.clone()),
            ConfigName::Netlist(list) | ConfigName::NetlistDelete(list) => {
                Some(self.config.netlist_dir.join(list))
            }
            ConfigName::NetlistList => None,
        }
    }

    /// Reads a configuration file.
    pub fn read(&self, name: &ConfigName) -> Result<Vec<u8>, RequestError> {
        match name {
            ConfigName::NetlistList => self.list_netlists().map(|names| {
                let mut text = names.join("\n");
                if !text.is_empty() {
                    text.push('\n');
                }
                text.into_bytes()
            }),
            ConfigName::NetlistDelete(_) => Err(RequestError::new(
                ErrorCode::BadKeyword,
                "netlist-delete is only valid for install",
            )),
            other => {
                let path = self.path_for(other).unwrap_or_default();
                fs::read(&path).map_err(|e| no_such_file(&path, &e))
            }
        }
    }

    /// Writes a configuration file, or deletes a network list.
    pub fn install(&self, name: &ConfigName, contents: &[u8]) -> Result<(), RequestError> {
        match name {
            ConfigName::NetlistList => Err(RequestError::new(
                ErrorCode::BadKeyword,
                "netlist-list cannot be installed",
            )),
            ConfigName::NetlistDelete(list) => {
                let path = self.config.netlist_dir.join(list);
                fs::remove_file(&path).map_err(|e| no_such_file(&path, &e))?;
                info!(netlist = %list, "deleted network list");
                Ok(())
            }
            other => {
                let path = self.path_for(other).unwrap_or_default();
                write_atomic(&path, contents).map_err(|e| no_such_file(&path, &e))?;
                info!(path = %path.display(), bytes = contents.len(), "installed configuration");
                Ok(())
            }
        }
    }

    /// Returns the shared network list names, sorted.
    pub fn list_netlists(&self) -> Result<Vec<String>, RequestError> {
        let dir = &self.config.netlist_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(no_such_file(dir, &e)),
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| !n.ends_with(".tmp"))
            .collect();
        names.sort();
        Ok(names)
    }
}
