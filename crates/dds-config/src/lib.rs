//! Configuration for the LRGS DDS server.
//!
//! Sources, highest precedence first:
//! 1. Explicit overrides, e.g. `lrgs-dds start --address`
//! 2. `DDS_*` environment variables, `__` between section and key
//! 3. `lrgs-dds.local.toml` next to the project file
//! 4. `lrgs-dds.toml` in the project directory
//! 5. the per-user `config.toml`
//! 6. [`DdsConfig::default`]
//!
//! Relative paths are resolved against the project directory once every
//! layer is merged.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod ip_mask;
mod loader;
pub mod paths;

pub use error::ConfigError;
pub use ip_mask::{IpMask, IpMaskError};
pub use loader::ConfigLoader;
pub use paths::{ConfigLayer, LayerKind};

/// Main DDS server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DdsConfig {
    pub server: ServerConfig,
    pub users: UsersConfig,
    pub password: PasswordConfig,
    pub hostname: HostnameConfig,
    pub admin: AdminConfig,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub max_connections: usize,
    /// Seconds a connection may sit without sending a request.
    pub idle_timeout_secs: u64,
    /// Refuse unauthenticated Hello.
    pub require_auth: bool,
    /// Only local users may hold the admin role.
    pub local_admin_only: bool,
    /// Largest tolerated difference between the client and server clocks
    /// in an authenticated hello.
    pub max_clock_diff_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:16003".to_string(),
            max_connections: 250,
            idle_timeout_secs: 3600,
            require_auth: false,
            local_admin_only: false,
            max_clock_diff_secs: 1200,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersConfig {
    /// Directory holding one sandbox directory per shared user.
    pub root_dir: PathBuf,
    /// Directory holding one sandbox directory per local user.
    pub local_root_dir: PathBuf,
    pub password_file: PathBuf,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("users"),
            local_root_dir: PathBuf::from("users.local"),
            password_file: PathBuf::from("passwd.toml"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// Word list for the dictionary check. The check is skipped when unset.
    pub dictionary_file: Option<PathBuf>,
    /// Number of previous password hashes remembered per user.
    pub history_depth: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            dictionary_file: None,
            history_depth: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostnameConfig {
    /// Addresses inside this `a.b.c.d/len` block skip reverse DNS.
    pub local_ip_mask: Option<String>,
    pub queue_capacity: usize,
}

impl Default for HostnameConfig {
    fn default() -> Self {
        Self {
            local_ip_mask: None,
            queue_capacity: 20,
        }
    }
}

impl HostnameConfig {
    /// The parsed local mask, if one is configured.
    pub fn local_mask(&self) -> Result<Option<IpMask>, IpMaskError> {
        self.local_ip_mask.as_deref().map(str::parse).transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub lrgs_config: PathBuf,
    pub ddsrecv_config: PathBuf,
    pub drgs_config: PathBuf,
    pub network_dcp_config: PathBuf,
    /// Shared network lists, visible to every user.
    pub netlist_dir: PathBuf,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            lrgs_config: PathBuf::from("lrgs.conf"),
            ddsrecv_config: PathBuf::from("ddsrecv.conf"),
            drgs_config: PathBuf::from("drgsconf.xml"),
            network_dcp_config: PathBuf::from("network_dcp.conf"),
            netlist_dir: PathBuf::from("netlist"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Append a NUL byte to text replies, counted in the length field.
    pub nul_terminate_text: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            nul_terminate_text: true,
        }
    }
}

impl DdsConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Read a single TOML file without any layering.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_connections == 0 {
            return Err(ConfigError::invalid(
                "server.max_connections",
                "must be positive",
            ));
        }
        if self.hostname.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "hostname.queue_capacity",
                "must be positive",
            ));
        }
        if let Err(e) = self.hostname.local_mask() {
            return Err(ConfigError::invalid("hostname.local_ip_mask", e.to_string()));
        }
        Ok(())
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        resolve(&mut self.users.root_dir);
        resolve(&mut self.users.local_root_dir);
        resolve(&mut self.users.password_file);
        if let Some(dict) = self.password.dictionary_file.as_mut() {
            resolve(dict);
        }
        resolve(&mut self.admin.lrgs_config);
        resolve(&mut self.admin.ddsrecv_config);
        resolve(&mut self.admin.drgs_config);
        resolve(&mut self.admin.network_dcp_config);
        resolve(&mut self.admin.netlist_dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = DdsConfig::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:16003");
        assert_eq!(config.server.max_connections, 250);
        assert_eq!(config.server.max_clock_diff_secs, 1200);
        assert_eq!(config.hostname.queue_capacity, 20);
        assert_eq!(config.password.history_depth, 6);
        assert!(config.protocol.nul_terminate_text);
        assert!(!config.server.require_auth);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_path_resolution() {
        let mut config = DdsConfig::default();
        config.password.dictionary_file = Some(PathBuf::from("words.txt"));
        config.resolve_paths("/srv/lrgs");

        assert_eq!(config.users.root_dir, PathBuf::from("/srv/lrgs/users"));
        assert_eq!(
            config.users.password_file,
            PathBuf::from("/srv/lrgs/passwd.toml")
        );
        assert_eq!(
            config.password.dictionary_file,
            Some(PathBuf::from("/srv/lrgs/words.txt"))
        );
        assert_eq!(config.admin.netlist_dir, PathBuf::from("/srv/lrgs/netlist"));
    }

    #[test]
    fn test_absolute_paths_untouched() {
        let mut config = DdsConfig::default();
        config.admin.lrgs_config = PathBuf::from("/etc/lrgs/lrgs.conf");
        config.resolve_paths("/srv/lrgs");
        assert_eq!(config.admin.lrgs_config, PathBuf::from("/etc/lrgs/lrgs.conf"));
    }

    #[test]
    fn test_validation() {
        let mut config = DdsConfig::default();
        config.hostname.local_ip_mask = Some("192.168.1.0/24".to_string());
        assert!(config.validate().is_ok());

        config.hostname.local_ip_mask = Some("192.168.1.0".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "hostname.local_ip_mask",
                ..
            })
        ));

        config.hostname.local_ip_mask = Some("192.168.1.0/33".to_string());
        assert!(config.validate().is_err());

        config.hostname.local_ip_mask = None;
        config.server.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn local_mask_shares_the_validation_parse() {
        let mut hostname = HostnameConfig::default();
        assert_eq!(hostname.local_mask(), Ok(None));

        hostname.local_ip_mask = Some("10.1.0.0/16".to_string());
        let mask = hostname.local_mask().unwrap().unwrap();
        assert_eq!(mask.to_string(), "10.1.0.0/16");

        hostname.local_ip_mask = Some("10.1.0.0/40".to_string());
        assert!(hostname.local_mask().is_err());
    }

    #[test]
    fn test_from_toml_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("dds.toml");
        std::fs::write(
            &path,
            "[server]\nrequire_auth = true\n\n[protocol]\nnul_terminate_text = false\n",
        )
        .unwrap();

        let config = DdsConfig::from_toml_file(&path).unwrap();
        assert!(config.server.require_auth);
        assert!(!config.protocol.nul_terminate_text);
        assert_eq!(config.server.max_connections, 250);

        std::fs::write(&path, "[server\n").unwrap();
        assert!(matches!(
            DdsConfig::from_toml_file(&path),
            Err(ConfigError::Parse { .. })
        ));

        assert!(matches!(
            DdsConfig::from_toml_file(temp_dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
