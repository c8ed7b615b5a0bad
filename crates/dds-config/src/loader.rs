//! Layered loading: defaults, files, environment, then explicit overrides.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

use crate::DdsConfig;
use crate::paths;

/// Environment variables start with this prefix, e.g. `DDS_SERVER__BIND_ADDRESS`.
pub const DEFAULT_ENV_PREFIX: &str = "DDS";

/// Builds a [`DdsConfig`] from every source that applies to one project.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    overrides: Vec<(String, String)>,
}

impl ConfigLoader {
    /// Loads relative to the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            overrides: Vec::new(),
        }
    }

    /// Directory holding `lrgs-dds.toml`. Relative paths in the result are
    /// resolved against it.
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Sets a dotted key (`server.bind_address`) above every other source.
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    pub fn load(self) -> Result<DdsConfig> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&DdsConfig::default()).context("cannot serialize defaults")?,
        );

        for layer in paths::layers(&self.project_dir) {
            builder = builder.add_source(File::from(layer.path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in &self.overrides {
            builder = builder
                .set_override(key.as_str(), value.as_str())
                .with_context(|| format!("invalid override for {key}"))?;
        }

        let mut loaded: DdsConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| {
                format!(
                    "cannot load configuration for {}",
                    self.project_dir.display()
                )
            })?;

        loaded.validate()?;
        loaded.resolve_paths(&self.project_dir);
        Ok(loaded)
    }

    /// Falls back to defaults, still resolved against the project directory.
    pub fn load_or_default(self) -> DdsConfig {
        let project_dir = self.project_dir.clone();
        self.load().unwrap_or_else(|_| {
            let mut fallback = DdsConfig::default();
            fallback.resolve_paths(project_dir);
            fallback
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::{LOCAL_FILE, PROJECT_FILE};
    use std::fs;
    use tempfile::{TempDir, tempdir};

    /// A project directory with the given files, loaded under a prefix no
    /// real environment sets.
    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = tempdir().unwrap();
        for (name, text) in files {
            fs::write(dir.path().join(name), text).unwrap();
        }
        dir
    }

    fn loader(dir: &TempDir, prefix: &str) -> ConfigLoader {
        ConfigLoader::new()
            .with_project_dir(dir.path())
            .with_env_prefix(prefix)
    }

    #[test]
    fn empty_project_gets_defaults() {
        let dir = project(&[]);
        let config = loader(&dir, "DDS_T_EMPTY").load().unwrap();

        assert_eq!(config.server.bind_address, "0.0.0.0:16003");
        assert_eq!(config.hostname.queue_capacity, 20);
        assert!(config.users.root_dir.starts_with(dir.path()));
        assert!(config.users.password_file.is_absolute());
        assert!(config.admin.netlist_dir.is_absolute());
    }

    #[test]
    fn project_file_sets_sections() {
        let dir = project(&[(
            PROJECT_FILE,
            r#"
[server]
bind_address = "127.0.0.1:17000"
max_connections = 16
require_auth = true

[hostname]
local_ip_mask = "10.0.0.0/8"
queue_capacity = 5
"#,
        )]);
        let config = loader(&dir, "DDS_T_PROJECT").load().unwrap();

        assert_eq!(config.server.bind_address, "127.0.0.1:17000");
        assert_eq!(config.server.max_connections, 16);
        assert!(config.server.require_auth);
        assert_eq!(config.hostname.local_ip_mask.as_deref(), Some("10.0.0.0/8"));
        assert_eq!(config.hostname.queue_capacity, 5);
        assert_eq!(config.server.idle_timeout_secs, 3600);
    }

    #[test]
    fn local_file_beats_project_file() {
        let dir = project(&[
            (PROJECT_FILE, "[server]\nmax_connections = 8\nrequire_auth = true\n"),
            (LOCAL_FILE, "[server]\nmax_connections = 2\n"),
        ]);
        let config = loader(&dir, "DDS_T_LOCAL").load().unwrap();

        assert_eq!(config.server.max_connections, 2);
        assert!(config.server.require_auth);
    }

    #[test]
    fn override_beats_files() {
        let dir = project(&[(PROJECT_FILE, "[server]\nbind_address = \"127.0.0.1:1\"\n")]);
        let config = loader(&dir, "DDS_T_OVERRIDE")
            .with_override("server.bind_address", "127.0.0.1:2")
            .load()
            .unwrap();

        assert_eq!(config.server.bind_address, "127.0.0.1:2");
    }

    #[test]
    fn invalid_mask_fails_to_load() {
        let dir = project(&[(PROJECT_FILE, "[hostname]\nlocal_ip_mask = \"not-a-mask\"\n")]);
        assert!(loader(&dir, "DDS_T_INVALID").load().is_err());
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = project(&[(PROJECT_FILE, "[server\n")]);
        assert!(loader(&dir, "DDS_T_BROKEN").load().is_err());

        let config = loader(&dir, "DDS_T_BROKEN").load_or_default();
        assert_eq!(config.server.max_connections, 250);
        assert!(config.users.root_dir.starts_with(dir.path()));
    }
}
