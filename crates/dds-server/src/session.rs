//! Per-connection session state.
//!
//! ```text
//!   Connected ──hello──▶ LoggedIn ──goodbye / fatal error──▶ Closed
//!       │                  │  ▲
//!       │                  └──┘ hello again (re-login)
//!       └──────────── fatal error ─────────────────────────▶ Closed
//! ```
//!
//! All transitions go through methods on [`Session`]. Command handlers get
//! the logged-in state through [`Session::require_login`],
//! [`Session::require_authenticated`] or [`Session::require_admin`], which
//! raise the matching [`RequestError`] instead of handing out state the
//! caller may not use.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use dds_wire::MAX_BODY_LEN;
use tracing::warn;

use crate::archive::{DcpMsg, MessageRetriever, RetrievalOptions, RetrieveError};
use crate::criteria::SearchCriteria;
use crate::error::{ErrorCode, RequestError};
use crate::sandbox::Sandbox;

/// Protocol version assumed when a client does not send one.
pub const DEFAULT_CLIENT_VERSION: u32 = 3;

/// Connection facts shared with the hostname worker.
#[derive(Debug)]
pub struct PeerInfo {
    id: u64,
    addr: SocketAddr,
    hostname: RwLock<Option<String>>,
}

impl PeerInfo {
    pub fn new(id: u64, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            hostname: RwLock::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Resolved hostname, if the worker has set one.
    pub fn hostname(&self) -> Option<String> {
        self.hostname
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_hostname(&self, hostname: impl Into<String>) {
        *self.hostname.write().unwrap_or_else(PoisonError::into_inner) = Some(hostname.into());
    }

    /// Hostname if resolved, otherwise the IP address.
    pub fn display_host(&self) -> String {
        self.hostname()
            .unwrap_or_else(|| self.addr.ip().to_string())
    }
}

/// Identity and retrieval settings established by a hello.
#[derive(Debug, Clone)]
pub struct User {
    sandbox: Sandbox,
    client_version: u32,
    authenticated: bool,
    admin: bool,
    local: bool,
    session_key: Option<Vec<u8>>,
    pub options: RetrievalOptions,
}

impl User {
    /// A user who gave a name but no credential.
    pub fn unauthenticated(sandbox: Sandbox, client_version: u32) -> Self {
        let local = sandbox.is_local();
        Self {
            sandbox,
            client_version,
            authenticated: false,
            admin: false,
            local,
            session_key: None,
            options: RetrievalOptions::default(),
        }
    }

    /// A user whose credential was verified.
    pub fn authenticated(
        sandbox: Sandbox,
        client_version: u32,
        session_key: Vec<u8>,
        admin: bool,
        local: bool,
    ) -> Self {
        Self {
            local: local || sandbox.is_local(),
            sandbox,
            client_version,
            authenticated: true,
            admin,
            session_key: Some(session_key),
            options: RetrievalOptions::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.sandbox.username()
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn client_version(&self) -> u32 {
        self.client_version
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Key minted by an authenticated hello; `None` otherwise.
    pub fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }
}

/// State of a logged-in connection.
pub struct LoggedIn {
    pub user: User,
    retriever: Box<dyn MessageRetriever>,
    /// Messages taken from the retriever that did not fit the last reply.
    held_back: VecDeque<DcpMsg>,
    criteria: SearchCriteria,
    pub event_cursor: usize,
}

impl LoggedIn {
    pub fn criteria(&self) -> &SearchCriteria {
        &self.criteria
    }

    /// Installs new criteria and hands them to the retriever.
    ///
    /// Held-back messages belong to the old criteria and are discarded.
    pub fn set_criteria(&mut self, criteria: SearchCriteria) -> Result<(), RequestError> {
        self.retriever
            .set_criteria(&criteria, self.user.options)
            .map_err(|e| RequestError::new(ErrorCode::ArchiveError, e.to_string()))?;
        self.held_back.clear();
        self.criteria = criteria;
        Ok(())
    }

    fn take(&mut self) -> Result<DcpMsg, RetrieveError> {
        match self.held_back.pop_front() {
            Some(msg) => Ok(msg),
            None => self.retriever.next_message(),
        }
    }

    /// Next message for a single-message reply.
    pub fn next_message(&mut self) -> Result<DcpMsg, RetrieveError> {
        let msg = self.take()?;
        check_fits(&msg, msg.data.len(), MAX_BODY_LEN)?;
        Ok(msg)
    }

    /// Collects messages while their combined `cost` stays within `budget`.
    ///
    /// Returns at least one message. The first message that does not fit is
    /// held back and starts the next reply.
    pub fn next_block(
        &mut self,
        budget: usize,
        cost: impl Fn(&DcpMsg) -> usize,
    ) -> Result<Vec<DcpMsg>, RetrieveError> {
        let first = self.take()?;
        let mut used = cost(&first);
        check_fits(&first, used, budget)?;

        let mut block = vec![first];
        loop {
            let msg = match self.take() {
                Ok(msg) => msg,
                Err(RetrieveError::Timeout | RetrieveError::UntilReached) => break,
                Err(e) => {
                    // The next request sees the failure again.
                    warn!(error = %e, sent = block.len(), "archive failed mid-block");
                    break;
                }
            };
            let size = cost(&msg);
            if used.saturating_add(size) > budget {
                self.held_back.push_front(msg);
                break;
            }
            used += size;
            block.push(msg);
        }
        Ok(block)
    }
}

fn check_fits(msg: &DcpMsg, size: usize, max: usize) -> Result<(), RetrieveError> {
    if size <= max {
        return Ok(());
    }
    warn!(platform = %msg.platform_id, size, max, "message too large for reply, skipped");
    Err(RetrieveError::TooLarge {
        platform_id: msg.platform_id.clone(),
        size,
        max,
    })
}

enum State {
    Connected,
    LoggedIn(Box<LoggedIn>),
    Closed,
}

/// One live connection.
pub struct Session {
    peer: Arc<PeerInfo>,
    state: State,
}

impl Session {
    /// Creates a session before any bytes are read.
    pub fn new(peer: Arc<PeerInfo>) -> Self {
        Self {
            peer,
            state: State::Connected,
        }
    }

    pub fn peer(&self) -> &Arc<PeerInfo> {
        &self.peer
    }

    /// Moves to the logged-in state, replacing any earlier login.
    pub fn login(&mut self, user: User, retriever: Box<dyn MessageRetriever>) {
        self.state = State::LoggedIn(Box::new(LoggedIn {
            user,
            retriever,
            held_back: VecDeque::new(),
            criteria: SearchCriteria::default(),
            event_cursor: 0,
        }));
    }

    /// Marks the session closed; every later request fails.
    pub fn close(&mut self) {
        self.state = State::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// The logged-in user, if any.
    pub fn user(&self) -> Option<&User> {
        match &self.state {
            State::LoggedIn(l) => Some(&l.user),
            _ => None,
        }
    }

    /// Any logged-in session.
    pub fn require_login(&mut self) -> Result<&mut LoggedIn, RequestError> {
        match &mut self.state {
            State::LoggedIn(l) => Ok(l.as_mut()),
            State::Connected => Err(RequestError::not_logged_in()),
            State::Closed => Err(RequestError::auth_failed("session closed")),
        }
    }

    /// A session logged in with a verified credential.
    pub fn require_authenticated(&mut self) -> Result<&mut LoggedIn, RequestError> {
        let l = self.require_login()?;
        if !l.user.is_authenticated() {
            return Err(RequestError::auth_failed(
                "an authenticated hello is required",
            ));
        }
        Ok(l)
    }

    /// A session with administrative rights.
    pub fn require_admin(&mut self) -> Result<&mut LoggedIn, RequestError> {
        let l = self.require_login()?;
        if !l.user.is_admin() {
            return Err(RequestError::not_admin());
        }
        Ok(l)
    }

    /// `user@host(id=N)` for log lines.
    pub fn client_name(&self) -> ClientName<'_> {
        ClientName(self)
    }
}

/// Display adapter for [`Session::client_name`].
pub struct ClientName<'a>(&'a Session);

impl fmt::Display for ClientName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = self.0.user().map_or("(unknown)", User::name);
        write!(
            f,
            "{user}@{}(id={})",
            self.0.peer.display_host(),
            self.0.peer.id
        )
    }
}
