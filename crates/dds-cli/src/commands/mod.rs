//! CLI command implementations.

pub mod passwd;
pub mod start;
pub mod user;
pub mod version;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dds_config::DdsConfig;
use dds_server::password::PasswordHistory;
use dds_server::{PasswordChecker, PasswordFile};

fn load_config(project: &Path) -> Result<DdsConfig> {
    DdsConfig::load_from_dir(project)
        .with_context(|| format!("Failed to load configuration from {}", project.display()))
}

/// Opens the password file and a checker that consults its history.
fn open_passwords(config: &DdsConfig) -> Result<(Arc<PasswordFile>, PasswordChecker)> {
    let passwords = Arc::new(
        PasswordFile::open(&config.users.password_file, config.password.history_depth)
            .context("Failed to open password file")?,
    );
    let history: Arc<dyn PasswordHistory> = passwords.clone();
    let mut checker = PasswordChecker::new(history);
    if let Some(dict) = &config.password.dictionary_file {
        checker = checker.with_dictionary_file(dict);
    }
    Ok((passwords, checker))
}

fn prompt_password() -> Result<String> {
    dialoguer::Password::new()
        .with_prompt("Password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()
        .context("Failed to read password")
}
