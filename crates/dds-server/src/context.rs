//! State shared by every connection.

use std::sync::Arc;
use std::time::Duration;

use dds_config::DdsConfig;
use dds_wire::TextTerminator;
use tracing::info;

use crate::admin::AdminFiles;
use crate::archive::ArchiveBackend;
use crate::auth::LoginAttempts;
use crate::error::{ServerError, ServerResult};
use crate::passwd_file::PasswordFile;
use crate::password::{PasswordChecker, PasswordHistory};
use crate::sandbox::{DirectoryResolver, SandboxResolver};

/// Server-wide policy knobs read from configuration.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Refuse plain hellos.
    pub require_auth: bool,
    /// Grant admin only to users in the local sandbox tree.
    pub local_admin_only: bool,
    /// Largest accepted difference between client and server clocks.
    pub max_clock_diff: Duration,
    pub text_terminator: TextTerminator,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            require_auth: false,
            local_admin_only: false,
            max_clock_diff: Duration::from_secs(1200),
            text_terminator: TextTerminator::Nul,
        }
    }
}

/// Collaborators and settings handed to every command.
pub struct ServerContext {
    pub policy: Policy,
    pub sandboxes: Arc<dyn SandboxResolver>,
    pub passwords: Arc<PasswordFile>,
    pub checker: PasswordChecker,
    pub archive: Arc<dyn ArchiveBackend>,
    pub admin_files: AdminFiles,
    pub login_attempts: LoginAttempts,
}

impl ServerContext {
    /// Builds the context from loaded configuration.
    pub fn from_config(config: &DdsConfig, archive: Arc<dyn ArchiveBackend>) -> ServerResult<Self> {
        let passwords = Arc::new(PasswordFile::open(
            &config.users.password_file,
            config.password.history_depth,
        )?);

        let history: Arc<dyn PasswordHistory> = passwords.clone();
        let mut checker = PasswordChecker::new(history);
        if let Some(dict) = &config.password.dictionary_file {
            checker = checker.with_dictionary_file(dict);
        }

        let text_terminator = if config.protocol.nul_terminate_text {
            TextTerminator::Nul
        } else {
            TextTerminator::None
        };

        let max_clock_diff = Duration::from_secs(config.server.max_clock_diff_secs);
        if max_clock_diff.is_zero() {
            return Err(ServerError::Config(
                "server.max_clock_diff_secs must be positive".to_string(),
            ));
        }

        info!(
            users = passwords.list().len(),
            password_file = %config.users.password_file.display(),
            require_auth = config.server.require_auth,
            "server context ready"
        );

        Ok(Self {
            policy: Policy {
                require_auth: config.server.require_auth,
                local_admin_only: config.server.local_admin_only,
                max_clock_diff,
                text_terminator,
            },
            sandboxes: Arc::new(DirectoryResolver::new(
                &config.users.root_dir,
                &config.users.local_root_dir,
            )),
            passwords,
            checker,
            archive,
            admin_files: AdminFiles::new(config.admin.clone()),
            login_attempts: LoginAttempts::new(),
        })
    }
}
