//! Background reverse-DNS for connected clients.
//!
//! Hostnames only decorate log lines, so resolution is best effort: peers
//! inside the local mask are named synchronously, everything else goes on a
//! bounded queue drained by one worker thread. A full queue drops its oldest
//! entry rather than blocking the accept path.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use tracing::{debug, warn};

use crate::session::PeerInfo;

pub use dds_config::{IpMask, IpMaskError};

/// How long the idle worker sleeps between queue checks.
const IDLE_PARK: Duration = Duration::from_millis(500);

/// Reverse lookup of an address.
pub trait ReverseLookup: Send + Sync + 'static {
    fn lookup(&self, ip: IpAddr) -> io::Result<String>;
}

/// Uses the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemReverseLookup;

impl ReverseLookup for SystemReverseLookup {
    fn lookup(&self, ip: IpAddr) -> io::Result<String> {
        dns_lookup::lookup_addr(&ip)
    }
}

/// What [`HostnameResolver::enqueue`] did with a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Named synchronously from the local mask.
    Local,
    Queued,
    /// Queued after dropping the oldest waiting peer.
    QueuedEvictedOldest,
}

struct Shared {
    queue: ArrayQueue<Arc<PeerInfo>>,
    shutdown: AtomicBool,
}

/// Owns the hostname queue and its worker thread.
///
/// Dropping the resolver stops and joins the worker.
pub struct HostnameResolver {
    shared: Arc<Shared>,
    local_mask: Option<IpMask>,
    worker: Option<JoinHandle<()>>,
}

impl HostnameResolver {
    /// Starts the worker.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0 or the worker thread cannot be spawned.
    pub fn new(capacity: usize, local_mask: Option<IpMask>, lookup: Arc<dyn ReverseLookup>) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(capacity),
            shutdown: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("dds-hostname".to_string())
            .spawn(move || run_worker(&worker_shared, lookup.as_ref()))
            .expect("failed to spawn hostname worker thread");

        Self {
            shared,
            local_mask,
            worker: Some(worker),
        }
    }

    /// Starts a worker using the system resolver.
    pub fn system(capacity: usize, local_mask: Option<IpMask>) -> Self {
        Self::new(capacity, local_mask, Arc::new(SystemReverseLookup))
    }

    /// Names a newly accepted peer, synchronously if it is local.
    pub fn enqueue(&self, peer: Arc<PeerInfo>) -> Enqueued {
        let ip = peer.addr().ip();
        if let Some(name) = self.local_mask.and_then(|m| m.local_name(ip)) {
            peer.set_hostname(name);
            return Enqueued::Local;
        }

        let outcome = match self.shared.queue.force_push(peer) {
            None => Enqueued::Queued,
            Some(dropped) => {
                debug!(
                    id = dropped.id(),
                    addr = %dropped.addr(),
                    "hostname queue full, dropped oldest entry"
                );
                Enqueued::QueuedEvictedOldest
            }
        };

        if let Some(worker) = &self.worker {
            worker.thread().unpark();
        }
        outcome
    }

    /// Number of peers waiting for a lookup.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }
}

impl Drop for HostnameResolver {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                warn!("hostname worker panicked");
            }
        }
    }
}

fn run_worker(shared: &Shared, lookup: &dyn ReverseLookup) {
    debug!("hostname worker started");
    while !shared.shutdown.load(Ordering::Acquire) {
        let Some(peer) = shared.queue.pop() else {
            // `enqueue` and `drop` unpark the worker, and an unpark that
            // lands before `park` is not lost. The timeout is a fallback.
            thread::park_timeout(IDLE_PARK);
            continue;
        };
        let ip = peer.addr().ip();
        match lookup.lookup(ip) {
            Ok(name) => {
                debug!(id = peer.id(), %ip, hostname = %name, "resolved client hostname");
                peer.set_hostname(name);
            }
            Err(e) => debug!(id = peer.id(), %ip, error = %e, "reverse lookup failed"),
        }
    }
    debug!("hostname worker stopped");
}
