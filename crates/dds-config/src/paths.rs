//! Where configuration files live.
//!
//! Files are layered in increasing precedence: the per-user file, the
//! project file, then the host-local override next to it.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

pub const PROJECT_FILE: &str = "lrgs-dds.toml";
pub const LOCAL_FILE: &str = "lrgs-dds.local.toml";
const USER_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// `~/.config/lrgs-dds/config.toml` or the platform equivalent.
    User,
    Project,
    /// Host-specific overrides, not checked in.
    Local,
}

/// One configuration file that exists on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayer {
    pub kind: LayerKind,
    pub path: PathBuf,
}

pub fn user_config_dir() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("org", "lrgs", "lrgs-dds")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(ConfigError::NoConfigDir)
}

/// Lists the files to merge, lowest precedence first. Missing files are
/// left out, as is the user layer on platforms without a home directory.
pub fn layers(project_dir: &Path) -> Vec<ConfigLayer> {
    let user = user_config_dir().ok().map(|dir| ConfigLayer {
        kind: LayerKind::User,
        path: dir.join(USER_FILE),
    });
    let project = [
        ConfigLayer {
            kind: LayerKind::Project,
            path: project_dir.join(PROJECT_FILE),
        },
        ConfigLayer {
            kind: LayerKind::Local,
            path: project_dir.join(LOCAL_FILE),
        },
    ];
    user.into_iter()
        .chain(project)
        .filter(|layer| layer.path.is_file())
        .collect()
}

/// A directory is a project once it holds `lrgs-dds.toml`.
pub fn is_initialized(project_dir: impl AsRef<Path>) -> bool {
    project_dir.as_ref().join(PROJECT_FILE).is_file()
}
