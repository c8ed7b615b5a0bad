//! Start command - runs the DDS server.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use dds_config::ConfigLoader;
use dds_server::{MemoryArchive, Server, ServerContext};
use tracing::info;

pub fn run(project: &Path, address: Option<&str>) -> Result<()> {
    if !project.is_dir() {
        bail!("Project directory '{}' does not exist.", project.display());
    }

    let mut loader = ConfigLoader::new().with_project_dir(project);
    if let Some(address) = address {
        loader = loader.with_override("server.bind_address", parse_address(address)?.to_string());
    }
    let config = loader
        .load()
        .with_context(|| format!("Failed to load configuration from {}", project.display()))?;

    info!("Starting DDS server...");
    println!();
    println!("LRGS DDS server");
    println!();
    println!(
        "  Project:        {}",
        project
            .canonicalize()
            .unwrap_or(project.to_path_buf())
            .display()
    );
    println!("  Users:          {}", config.users.root_dir.display());
    println!("  Bind address:   {}", config.server.bind_address);

    let ctx = ServerContext::from_config(&config, Arc::new(MemoryArchive::new()))
        .context("Failed to prepare server")?;
    let server = Server::bind(&config, ctx).context("Failed to bind server")?;

    println!();
    println!("Server is ready. Press Ctrl+C to stop.");
    println!();

    server.run().context("Server error during operation")?;

    println!();
    println!("Server stopped accepting connections.");

    Ok(())
}

/// Accepts a bare port or a full socket address.
fn parse_address(address: &str) -> Result<SocketAddr> {
    if let Ok(port) = address.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    address
        .parse()
        .with_context(|| format!("Invalid address '{address}'"))
}
