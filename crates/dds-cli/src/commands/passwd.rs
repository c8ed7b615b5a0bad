//! Password policy commands.

use std::path::Path;

use anyhow::{Result, bail};
use dds_server::auth::password_hash;
use dds_server::generate_random_password;

/// Prompts twice and runs the full policy, history included.
pub fn check(project: &Path, user: &str) -> Result<()> {
    let config = super::load_config(project)?;
    let (_, checker) = super::open_passwords(&config)?;
    let password = super::prompt_password()?;

    if let Err(violation) = checker.check(user, &password, &password_hash(user, &password)) {
        bail!("Password rejected: {violation}");
    }
    println!("Password is acceptable for '{user}'.");
    Ok(())
}

pub fn generate() {
    println!("{}", generate_random_password());
}
