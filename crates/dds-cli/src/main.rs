//! LRGS DDS server command line.
//!
//! # Quick Start
//!
//! ```bash
//! # Create a user with a sandbox and a password
//! lrgs-dds user add alice --project ./lrgs
//!
//! # Start the server
//! lrgs-dds start --project ./lrgs --address 16003
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// LRGS DDS server: serves archived DCP messages to remote clients.
#[derive(Parser)]
#[command(name = "lrgs-dds")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Start the DDS server.
    Start {
        /// Directory holding lrgs-dds.toml and the user tree.
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Address to bind to (port only: 16003, or full: 127.0.0.1:16003).
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Password policy tools.
    #[command(subcommand)]
    Passwd(PasswdCommands),

    /// User administration.
    #[command(subcommand)]
    User(UserCommands),
}

#[derive(Subcommand)]
enum PasswdCommands {
    /// Prompt for a password and check it against the policy.
    Check {
        /// User the password is meant for.
        user: String,

        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },

    /// Print a random password that satisfies the policy.
    Generate,
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a sandbox and a password entry.
    Add {
        name: String,

        /// Grant the admin role.
        #[arg(long)]
        admin: bool,

        /// Create the sandbox under the local user tree.
        #[arg(long)]
        local: bool,

        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },

    /// Suspend a user, or lift a suspension.
    Suspend {
        name: String,

        /// Suspend until this RFC 3339 time.
        #[arg(long, conflicts_with_all = ["forever", "clear"])]
        until: Option<String>,

        /// Suspend with no end time.
        #[arg(long, conflicts_with = "clear")]
        forever: bool,

        /// Lift the suspension.
        #[arg(long)]
        clear: bool,

        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Start { project, address } => commands::start::run(&project, address.as_deref()),
        Commands::Passwd(cmd) => match cmd {
            PasswdCommands::Check { user, project } => commands::passwd::check(&project, &user),
            PasswdCommands::Generate => {
                commands::passwd::generate();
                Ok(())
            }
        },
        Commands::User(cmd) => match cmd {
            UserCommands::Add {
                name,
                admin,
                local,
                project,
            } => commands::user::add(&project, &name, admin, local),
            UserCommands::Suspend {
                name,
                until,
                forever,
                clear,
                project,
            } => {
                let action =
                    commands::user::SuspendAction::from_flags(until.as_deref(), forever, clear)?;
                commands::user::suspend(&project, &name, action)
            }
        },
    }
}
