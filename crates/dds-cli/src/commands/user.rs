//! User administration commands.

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use dds_server::auth::password_hash;
use dds_server::passwd_file::ROLE_ADMIN;
use dds_server::sandbox::{is_valid_username, permanent_suspension};
use dds_server::{DirectoryResolver, SandboxResolver, UserEntry};
use tracing::info;

/// Creates the sandbox, then writes the password entry.
pub fn add(project: &Path, name: &str, admin: bool, local: bool) -> Result<()> {
    if !is_valid_username(name) {
        bail!("Invalid username '{name}'");
    }
    let config = super::load_config(project)?;
    let (passwords, checker) = super::open_passwords(&config)?;
    if passwords.get(name).is_some() {
        bail!("User '{name}' already exists");
    }

    let password = super::prompt_password()?;
    let hash = password_hash(name, &password);
    if let Err(violation) = checker.check(name, &password, &hash) {
        bail!("Password rejected: {violation}");
    }

    let resolver = DirectoryResolver::new(&config.users.root_dir, &config.users.local_root_dir);
    let sandbox = resolver
        .create(name, local)
        .with_context(|| format!("Failed to create sandbox for '{name}'"))?;

    let mut entry = UserEntry::new(name);
    if admin {
        entry.roles.push(ROLE_ADMIN.to_string());
    }
    entry.local = local;
    entry.password_hash = hash;
    passwords
        .upsert(entry)
        .context("Failed to write password file")?;

    info!(user = name, admin, local, "user added");
    println!("Created user '{name}' in {}", sandbox.dir().display());
    Ok(())
}

/// What `user suspend` does to the marker file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendAction {
    Until(DateTime<Utc>),
    Forever,
    Clear,
}

impl SuspendAction {
    pub fn from_flags(until: Option<&str>, forever: bool, clear: bool) -> Result<Self> {
        match (until, forever, clear) {
            (Some(t), false, false) => {
                let t = DateTime::parse_from_rfc3339(t)
                    .with_context(|| format!("Invalid time '{t}', expected RFC 3339"))?;
                Ok(Self::Until(t.with_timezone(&Utc)))
            }
            (None, true, false) => Ok(Self::Forever),
            (None, false, true) => Ok(Self::Clear),
            _ => bail!("Give exactly one of --until, --forever or --clear"),
        }
    }
}

pub fn suspend(project: &Path, name: &str, action: SuspendAction) -> Result<()> {
    let config = super::load_config(project)?;
    let resolver = DirectoryResolver::new(&config.users.root_dir, &config.users.local_root_dir);
    let sandbox = resolver
        .resolve(name)
        .with_context(|| format!("No sandbox for user '{name}'"))?;

    let until = match action {
        SuspendAction::Until(t) => Some(t),
        SuspendAction::Forever => Some(permanent_suspension()),
        SuspendAction::Clear => None,
    };
    sandbox
        .suspend_until(until)
        .context("Failed to update suspension")?;

    match until {
        Some(t) => println!("Suspended '{name}' until {t}"),
        None => println!("Lifted suspension for '{name}'"),
    }
    Ok(())
}
