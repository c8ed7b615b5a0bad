//! # dds-server: LRGS DDS server
//!
//! Serves archived DCP messages to remote clients over the DDS wire
//! protocol defined in `dds-wire`.
//!
//! ## Architecture
//!
//! One `mio` poll drives the accept loop. Every accepted socket gets a
//! [`Session`] and its own thread, which reads a message, dispatches it to
//! a [`Command`], and writes at most one reply before reading again.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          dds-server                          │
//! │  ┌──────────┐   ┌─────────────┐   ┌───────────────────────┐  │
//! │  │ Listener │ → │ Connection  │ → │ dispatch → Command    │  │
//! │  │  (mio)   │   │ (thread)    │   │  (→ ServerContext)    │  │
//! │  └──────────┘   └─────────────┘   └───────────────────────┘  │
//! │        │                                                     │
//! │        └──→ HostnameResolver (bounded queue, one worker)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use dds_config::DdsConfig;
//! use dds_server::{MemoryArchive, Server, ServerContext};
//!
//! let config = DdsConfig::load()?;
//! let ctx = ServerContext::from_config(&config, Arc::new(MemoryArchive::new()))?;
//! Server::bind(&config, ctx)?.run()?;
//! ```

pub mod admin;
pub mod archive;
pub mod auth;
pub mod block;
pub mod command;
mod connection;
mod context;
pub mod criteria;
mod error;
pub mod hostname;
pub mod passwd_file;
pub mod password;
pub mod sandbox;
mod server;
pub mod session;

pub use archive::{ArchiveBackend, DcpMsg, MemoryArchive, MessageRetriever, RetrievalOptions};
pub use command::{Command, Outcome, SERVER_PROTOCOL_VERSION, dispatch};
pub use connection::{CloseReason, serve};
pub use context::{Policy, ServerContext};
pub use error::{AuthFailed, ErrorCode, RequestError, ServerError, ServerResult};
pub use hostname::{HostnameResolver, IpMask, ReverseLookup};
pub use passwd_file::{PasswordFile, PasswordFileError, UserEntry};
pub use password::{PasswordChecker, PolicyViolation, generate_random_password};
pub use sandbox::{DirectoryResolver, Sandbox, SandboxResolver};
pub use server::{Server, ShutdownHandle};
pub use session::{PeerInfo, Session, User};
