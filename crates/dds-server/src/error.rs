//! Server error types.
//!
//! Two layers of failure exist. [`ServerError`] covers the process itself
//! (binding, configuration, the credential store). [`RequestError`] is the
//! per-request failure that travels back to the client as an error reply,
//! carrying the numeric code and the hangup decision made where it was
//! raised.

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

use crate::archive::RetrieveError;
use crate::passwd_file::PasswordFileError;
use crate::password::PolicyViolation;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur during server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential store error.
    #[error("password file error: {0}")]
    PasswordFile(#[from] PasswordFileError),

    /// Bind failed.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Configuration that parsed but cannot be used.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Numeric error codes sent in `?code,0,message` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoSuchFile,
    ArchiveError,
    BadSearchCriteria,
    MsgTimeout,
    UntilReached,
    BadKeyword,
    BadNetlist,
    DdsInternal,
    NotAdmin,
    AuthFailed,
    BadPassword,
    NotLoggedIn,
}

impl ErrorCode {
    /// Returns the wire value.
    pub fn code(self) -> u16 {
        match self {
            Self::NoSuchFile => 2,
            Self::ArchiveError => 4,
            Self::BadSearchCriteria => 8,
            Self::MsgTimeout => 11,
            Self::UntilReached => 25,
            Self::BadKeyword => 29,
            Self::BadNetlist => 30,
            Self::DdsInternal => 31,
            Self::NotAdmin => 34,
            Self::AuthFailed => 35,
            Self::BadPassword => 36,
            Self::NotLoggedIn => 37,
        }
    }

    /// Whether an error with this code closes the connection unless the
    /// raise site says otherwise.
    pub fn default_hangup(self) -> bool {
        matches!(
            self,
            Self::ArchiveError
                | Self::DdsInternal
                | Self::NotAdmin
                | Self::AuthFailed
                | Self::NotLoggedIn
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A well-formed request that could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct RequestError {
    code: ErrorCode,
    message: String,
    hangup: bool,
}

impl RequestError {
    /// Creates an error with the code's default hangup behavior.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            hangup: code.default_hangup(),
        }
    }

    /// Overrides the hangup decision. Authentication failures ignore this.
    #[must_use]
    pub fn with_hangup(mut self, hangup: bool) -> Self {
        self.hangup = hangup || self.is_auth_failed();
        self
    }

    /// Creates an authentication failure, which always hangs up.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthFailed, message)
    }

    /// Creates the error for a command sent before any hello.
    pub fn not_logged_in() -> Self {
        Self::new(ErrorCode::NotLoggedIn, "not logged in")
    }

    /// Creates the error for a privileged command from a non-admin user.
    pub fn not_admin() -> Self {
        Self::new(ErrorCode::NotAdmin, "administrative privileges required")
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the connection must close after the reply.
    pub fn hangup(&self) -> bool {
        self.hangup
    }

    /// Returns true for the authentication-failure class.
    pub fn is_auth_failed(&self) -> bool {
        matches!(self.code, ErrorCode::AuthFailed | ErrorCode::NotLoggedIn)
    }

    /// Formats the reply body: `?<code>,0,<message>`.
    pub fn reply_text(&self) -> String {
        format!("?{},0,{}", self.code.code(), self.message)
    }
}

/// Failure to establish who the client is.
///
/// Converts into a [`RequestError`] with the fixed authentication code and
/// hangup set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("authentication failed: {0}")]
pub struct AuthFailed(pub String);

impl AuthFailed {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<AuthFailed> for RequestError {
    fn from(err: AuthFailed) -> Self {
        Self::auth_failed(err.0)
    }
}

impl From<PolicyViolation> for RequestError {
    fn from(err: PolicyViolation) -> Self {
        Self::new(ErrorCode::BadPassword, err.to_string())
    }
}

impl From<RetrieveError> for RequestError {
    fn from(err: RetrieveError) -> Self {
        match err {
            RetrieveError::Timeout => Self::new(ErrorCode::MsgTimeout, err.to_string()),
            RetrieveError::UntilReached => Self::new(ErrorCode::UntilReached, err.to_string()),
            RetrieveError::Archive(_) => Self::new(ErrorCode::ArchiveError, err.to_string()),
            // Only one message is lost; the client keeps polling.
            RetrieveError::TooLarge { .. } => {
                Self::new(ErrorCode::ArchiveError, err.to_string()).with_hangup(false)
            }
        }
    }
}

impl From<PasswordFileError> for RequestError {
    fn from(err: PasswordFileError) -> Self {
        Self::new(ErrorCode::DdsInternal, err.to_string())
    }
}
