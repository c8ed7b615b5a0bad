//! Message archive collaborator.
//!
//! The archive stores and searches DCP messages; the server only asks it for
//! the next message (or block of messages) matching a session's criteria,
//! plus a few status documents. [`MemoryArchive`] is a complete in-process
//! implementation used by tests and by standalone deployments fed from
//! elsewhere.

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::criteria::SearchCriteria;

/// One DCP message as the archive holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcpMsg {
    /// Eight-character platform address.
    pub platform_id: String,
    /// Archive flag word.
    pub flags: u32,
    /// When the local receiver took the message.
    pub local_recv_time: Option<DateTime<Utc>>,
    /// Raw message bytes: header then data.
    pub data: Bytes,
}

impl DcpMsg {
    /// Flag bit set on messages received with parity or other errors.
    pub const FLAG_ERROR: u32 = 0x0000_0001;

    pub fn new(platform_id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            platform_id: platform_id.into(),
            flags: 0,
            local_recv_time: None,
            data: data.into(),
        }
    }

    pub fn is_good(&self) -> bool {
        self.flags & Self::FLAG_ERROR == 0
    }
}

/// Per-session settings that shape retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalOptions {
    /// Maximum platforms in one criteria; negative means unlimited.
    pub dcp_limit: i32,
    pub good_only: bool,
    pub disable_back_link_search: bool,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            dcp_limit: -1,
            good_only: false,
            disable_back_link_search: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrieveError {
    /// Nothing matching is available yet. The client polls again.
    #[error("no message currently available")]
    Timeout,

    /// The criteria's end time has passed and every match was sent.
    #[error("specified until time reached")]
    UntilReached,

    #[error("archive error: {0}")]
    Archive(String),

    /// A message too large for any reply the client asked for. It has been
    /// taken from the archive and is skipped.
    #[error("message from {platform_id} needs {size} bytes, reply limit is {max}")]
    TooLarge {
        platform_id: String,
        size: usize,
        max: usize,
    },
}

/// Per-session cursor over the archive.
pub trait MessageRetriever: Send {
    /// Replaces the criteria and rewinds the cursor.
    fn set_criteria(
        &mut self,
        criteria: &SearchCriteria,
        options: RetrievalOptions,
    ) -> Result<(), RetrieveError>;

    /// Returns the next matching message.
    fn next_message(&mut self) -> Result<DcpMsg, RetrieveError>;
}

/// Archive and status services shared by every connection.
pub trait ArchiveBackend: Send + Sync {
    /// Opens a retriever for a newly logged-in user.
    fn open_retriever(&self, username: &str) -> Box<dyn MessageRetriever>;

    /// Returns the server status document.
    fn status(&self) -> String;

    /// Returns event lines after `cursor` and the new cursor.
    fn events_since(&self, cursor: usize) -> (Vec<String>, usize);

    /// Returns the outage document, optionally restricted to a range.
    fn outages(&self, range: Option<&str>) -> Result<String, RetrieveError>;

    /// Records outages asserted by an administrator.
    fn assert_outages(&self, document: &str) -> Result<(), RetrieveError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    messages: Vec<DcpMsg>,
    events: Vec<String>,
    outages: Vec<String>,
}

/// Archive held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message, visible to every open retriever.
    pub fn push_message(&self, msg: DcpMsg) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .push(msg);
    }

    /// Appends an event line.
    pub fn push_event(&self, event: impl Into<String>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .push(event.into());
    }

    pub fn message_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .len()
    }
}

impl ArchiveBackend for MemoryArchive {
    fn open_retriever(&self, _username: &str) -> Box<dyn MessageRetriever> {
        Box::new(MemoryRetriever {
            state: Arc::clone(&self.state),
            position: 0,
            platforms: Vec::new(),
            has_until: false,
            options: RetrievalOptions::default(),
        })
    }

    fn status(&self) -> String {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        format!(
            "<LrgsStatus>\n  <Archive messages=\"{}\" events=\"{}\" outages=\"{}\"/>\n</LrgsStatus>\n",
            state.messages.len(),
            state.events.len(),
            state.outages.len()
        )
    }

    fn events_since(&self, cursor: usize) -> (Vec<String>, usize) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let start = cursor.min(state.events.len());
        (state.events[start..].to_vec(), state.events.len())
    }

    fn outages(&self, range: Option<&str>) -> Result<String, RetrieveError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut doc = String::from("<outages>\n");
        for outage in &state.outages {
            if range.is_none_or(|r| outage.contains(r)) {
                doc.push_str(outage);
                doc.push('\n');
            }
        }
        doc.push_str("</outages>\n");
        Ok(doc)
    }

    fn assert_outages(&self, document: &str) -> Result<(), RetrieveError> {
        if document.trim().is_empty() {
            return Err(RetrieveError::Archive("empty outage document".to_string()));
        }
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .outages
            .push(document.trim().to_string());
        Ok(())
    }
}

struct MemoryRetriever {
    state: Arc<RwLock<MemoryState>>,
    position: usize,
    platforms: Vec<String>,
    has_until: bool,
    options: RetrievalOptions,
}

impl MemoryRetriever {
    fn matches(&self, msg: &DcpMsg) -> bool {
        if self.options.good_only && !msg.is_good() {
            return false;
        }
        self.platforms.is_empty()
            || self
                .platforms
                .iter()
                .any(|p| p.eq_ignore_ascii_case(&msg.platform_id))
    }
}

impl MessageRetriever for MemoryRetriever {
    fn set_criteria(
        &mut self,
        criteria: &SearchCriteria,
        options: RetrievalOptions,
    ) -> Result<(), RetrieveError> {
        self.platforms = criteria
            .dcp_addresses()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.has_until = criteria.values("DAPS_UNTIL").next().is_some();
        self.options = options;
        self.position = 0;
        Ok(())
    }

    fn next_message(&mut self) -> Result<DcpMsg, RetrieveError> {
        let state = Arc::clone(&self.state);
        let state = state.read().unwrap_or_else(PoisonError::into_inner);
        while let Some(msg) = state.messages.get(self.position) {
            self.position += 1;
            if self.matches(msg) {
                return Ok(msg.clone());
            }
        }
        if self.has_until {
            Err(RetrieveError::UntilReached)
        } else {
            Err(RetrieveError::Timeout)
        }
    }
}
