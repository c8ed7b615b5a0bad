//! Accept loop.
//!
//! The listener, a shutdown waker and (on unix) a signal source share one
//! `mio` poll. Each accepted socket is switched back to blocking mode and
//! served on its own thread.

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use dds_config::DdsConfig;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use crate::connection::serve;
use crate::context::ServerContext;
use crate::error::{ServerError, ServerResult};
use crate::hostname::HostnameResolver;
use crate::session::{PeerInfo, Session};

const LISTENER_TOKEN: Token = Token(0);
#[cfg(unix)]
const SIGNAL_TOKEN: Token = Token(1);
const WAKER_TOKEN: Token = Token(2);

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Asks the accept loop to stop. Open connections finish on their own.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake accept loop");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Decrements the live connection count when a connection thread ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(count))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The DDS server.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    hostnames: HostnameResolver,
    shutdown: ShutdownHandle,
    active: Arc<AtomicUsize>,
    max_connections: usize,
    idle_timeout: Duration,
    next_id: u64,
}

impl Server {
    /// Binds the listener. Nothing is accepted until [`Server::run`].
    pub fn bind(config: &DdsConfig, ctx: ServerContext) -> ServerResult<Self> {
        let addr: SocketAddr = config.server.bind_address.parse().map_err(|e| {
            ServerError::Config(format!(
                "invalid bind address '{}': {e}",
                config.server.bind_address
            ))
        })?;
        let local_mask = config
            .hostname
            .local_mask()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let poll = Poll::new()?;
        let mut listener =
            TcpListener::bind(addr).map_err(|source| ServerError::BindFailed { addr, source })?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        info!(%addr, max_connections = config.server.max_connections, "DDS server listening");

        Ok(Self {
            poll,
            listener,
            ctx: Arc::new(ctx),
            hostnames: HostnameResolver::system(config.hostname.queue_capacity, local_mask),
            shutdown: ShutdownHandle {
                flag: Arc::new(AtomicBool::new(false)),
                waker,
            },
            active: Arc::new(AtomicUsize::new(0)),
            max_connections: config.server.max_connections,
            idle_timeout: config.server.idle_timeout(),
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Number of connection threads still running.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Accepts connections until shut down by a handle or a signal.
    pub fn run(mut self) -> ServerResult<()> {
        #[cfg(unix)]
        let mut signals = {
            use signal_hook::consts::{SIGINT, SIGTERM};
            let mut signals = signal_hook_mio::v1_0::Signals::new([SIGINT, SIGTERM])?;
            self.poll
                .registry()
                .register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)?;
            signals
        };

        #[cfg(windows)]
        {
            let handle = self.shutdown.clone();
            if let Err(e) = ctrlc::set_handler(move || handle.shutdown()) {
                warn!(error = %e, "cannot install Ctrl-C handler");
            }
        }

        let mut events = Events::with_capacity(128);
        while !self.shutdown.is_shutdown() {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in &events {
                match event.token() {
                    LISTENER_TOKEN => self.accept_pending(),
                    #[cfg(unix)]
                    SIGNAL_TOKEN => {
                        for signal in signals.pending() {
                            info!(signal, "shutdown signal received");
                        }
                        self.shutdown.shutdown();
                    }
                    _ => {}
                }
            }
        }

        info!(
            active = self.active_connections(),
            "server stopped accepting connections"
        );
        Ok(())
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.start_connection(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn start_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let active = self.active_connections();
        if active >= self.max_connections {
            warn!(%addr, active, "connection limit reached, refusing client");
            return;
        }

        let stream = match into_blocking(stream, self.idle_timeout) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%addr, error = %e, "cannot configure client socket");
                return;
            }
        };

        self.next_id += 1;
        let id = self.next_id;
        let peer = Arc::new(PeerInfo::new(id, addr));
        let mut session = Session::new(Arc::clone(&peer));
        self.hostnames.enqueue(peer);
        debug!(id, %addr, "accepted connection");

        let guard = ActiveGuard::new(&self.active);
        let ctx = Arc::clone(&self.ctx);
        let spawned = thread::Builder::new()
            .name(format!("dds-conn-{id}"))
            .spawn(move || {
                let _guard = guard;
                let mut stream = stream;
                serve(&mut stream, &mut session, &ctx);
                let _ = stream.shutdown(Shutdown::Both);
            });
        if let Err(e) = spawned {
            error!(%addr, error = %e, "cannot spawn connection thread");
        }
    }
}

fn into_blocking(stream: TcpStream, idle_timeout: Duration) -> io::Result<std::net::TcpStream> {
    #[cfg(unix)]
    let stream = std::net::TcpStream::from(std::os::fd::OwnedFd::from(stream));
    #[cfg(windows)]
    let stream = std::net::TcpStream::from(std::os::windows::io::OwnedSocket::from(stream));

    stream.set_nonblocking(false)?;
    stream.set_read_timeout((!idle_timeout.is_zero()).then_some(idle_timeout))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
