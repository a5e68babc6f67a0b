//! Server dengan accept loop berbasis mio
//!
//! The listening socket is driven by `mio::Poll` with a timeout, so the
//! loop wakes at least once per `accept_timeout` to look for a shutdown
//! request; `shutdown()` also pokes a `mio::Waker` to cut the wait short.
//! Each accepted connection gets its own thread running the dispatcher,
//! counted in a [`WaitGroup`] that shutdown drains.

use std::io;
use std::net::TcpStream;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use mio::net::TcpListener as MioTcpListener;
#[cfg(unix)]
use mio::net::UnixListener as MioUnixListener;
use mio::{Events, Interest, Poll, Token, Waker};

use super::dispatcher::Dispatcher;
use super::endpoint::{HandlerResult, Registry};
use super::tls::{TlsAcceptor, TlsConfig};
use super::transport::{self, Protocol, SocketOptions, Transport};
use super::Client;
use crate::core::{Backoff, WaitGroup};
use crate::error::{Error, Result};
use crate::protocol::Metadata;

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const EVENTS_CAPACITY: usize = 128;

/// Default number of consecutive transient accept errors tolerated.
pub const DEFAULT_MAX_RETRIES: usize = 10;

/// Default interval at which the accept loop re-checks for shutdown.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Socket family to listen on.
    pub protocol: Protocol,
    /// `host:port` for TCP, a filesystem path for Unix sockets.
    pub addr: String,
    /// Consecutive transient accept errors tolerated before giving up.
    pub max_retries: usize,
    /// Idle timeout per connection. `None` waits forever.
    pub max_timeout: Option<Duration>,
    /// Emit tracing events. Off by default.
    pub log: bool,
    /// How long one accept wait lasts before re-checking for shutdown.
    pub accept_timeout: Duration,
    /// Largest request body accepted. `None` means no limit.
    pub max_body_size: Option<u64>,
    /// TCP_NODELAY on accepted TCP sockets.
    pub nodelay: bool,
    /// SO_SNDBUF / SO_RCVBUF for accepted sockets (Unix only).
    pub socket_buffer_size: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Tcp,
            addr: "127.0.0.1:0".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_timeout: None,
            log: false,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            max_body_size: None,
            nodelay: true,
            socket_buffer_size: None,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn new(protocol: Protocol, addr: impl Into<String>) -> Self {
        Self {
            protocol,
            addr: addr.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub const fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    #[must_use]
    pub const fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_max_body_size(mut self, limit: u64) -> Self {
        self.max_body_size = Some(limit);
        self
    }

    #[must_use]
    pub const fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    #[must_use]
    pub const fn with_socket_buffer_size(mut self, size: usize) -> Self {
        self.socket_buffer_size = Some(size);
        self
    }

    fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            nodelay: self.nodelay,
            buffer_size: self.socket_buffer_size,
        }
    }
}

/// Bound, not yet serving, listening socket.
///
/// A Unix socket file is removed when the listener is dropped.
pub struct Listener {
    inner: ListenerKind,
    local_addr: String,
    socket_path: Option<PathBuf>,
}

enum ListenerKind {
    Tcp(MioTcpListener),
    #[cfg(unix)]
    Unix(MioUnixListener),
}

/// Stream fresh from `accept`, before tuning or TLS.
enum Accepted {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Listener {
    fn bind(protocol: Protocol, addr: &str) -> Result<Self> {
        match protocol {
            Protocol::Tcp => {
                let listener = std::net::TcpListener::bind(addr)?;
                listener.set_nonblocking(true)?;
                let local_addr = listener.local_addr()?.to_string();

                Ok(Self {
                    inner: ListenerKind::Tcp(MioTcpListener::from_std(listener)),
                    local_addr,
                    socket_path: None,
                })
            }
            #[cfg(unix)]
            Protocol::Unix => {
                let listener = std::os::unix::net::UnixListener::bind(addr)?;
                listener.set_nonblocking(true)?;

                Ok(Self {
                    inner: ListenerKind::Unix(MioUnixListener::from_std(listener)),
                    local_addr: addr.to_string(),
                    socket_path: Some(PathBuf::from(addr)),
                })
            }
            #[cfg(not(unix))]
            Protocol::Unix => Err(Error::InvalidProtocol(protocol.to_string())),
        }
    }

    /// Address actually bound; for TCP this resolves port 0.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    fn register(&mut self, poll: &Poll) -> io::Result<()> {
        match &mut self.inner {
            ListenerKind::Tcp(l) => poll
                .registry()
                .register(l, LISTENER_TOKEN, Interest::READABLE),
            #[cfg(unix)]
            ListenerKind::Unix(l) => poll
                .registry()
                .register(l, LISTENER_TOKEN, Interest::READABLE),
        }
    }

    fn accept(&self) -> io::Result<Accepted> {
        match &self.inner {
            ListenerKind::Tcp(l) => {
                let (stream, _) = l.accept()?;
                Ok(Accepted::Tcp(into_std_tcp(stream)))
            }
            #[cfg(unix)]
            ListenerKind::Unix(l) => {
                let (stream, _) = l.accept()?;
                Ok(Accepted::Unix(into_std_unix(stream)))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(path) = self.socket_path.take() {
            // Best-effort cleanup on drop
            let _ = std::fs::remove_file(path);
        }
    }
}

// Convert mio stream to std stream; into_raw_* hands over sole ownership.
#[cfg(unix)]
fn into_std_tcp(stream: mio::net::TcpStream) -> TcpStream {
    use std::os::unix::io::{FromRawFd, IntoRawFd};
    unsafe { TcpStream::from_raw_fd(stream.into_raw_fd()) }
}

#[cfg(windows)]
fn into_std_tcp(stream: mio::net::TcpStream) -> TcpStream {
    use std::os::windows::io::{FromRawSocket, IntoRawSocket};
    unsafe { TcpStream::from_raw_socket(stream.into_raw_socket()) }
}

#[cfg(unix)]
fn into_std_unix(stream: mio::net::UnixStream) -> UnixStream {
    use std::os::unix::io::{FromRawFd, IntoRawFd};
    unsafe { UnixStream::from_raw_fd(stream.into_raw_fd()) }
}

impl Accepted {
    fn into_transport(
        self,
        opts: SocketOptions,
        tls: Option<&dyn TlsAcceptor>,
    ) -> io::Result<Box<dyn Transport>> {
        match self {
            Self::Tcp(stream) => {
                transport::tune_tcp(&stream, opts)?;
                match tls {
                    Some(acceptor) => acceptor.accept(stream),
                    None => Ok(Box::new(stream)),
                }
            }
            #[cfg(unix)]
            Self::Unix(stream) => {
                transport::tune_unix(&stream, opts)?;
                Ok(Box::new(stream))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Serving,
    Stopped,
}

/// framerpc server
///
/// Register endpoints, then call [`listen`](Self::listen) (or
/// [`bind`](Self::bind) + [`serve`](Self::serve)) from a dedicated thread;
/// [`shutdown`](Self::shutdown) from any other thread stops it.
///
/// # Invariants
///
/// - Endpoints are frozen when serving starts.
/// - `shutdown()` returns only after the socket is closed and every
///   connection thread has finished.
pub struct Server {
    config: ServerConfig,
    registry: Registry,
    connections: WaitGroup,
    next_conn_id: AtomicU64,
    shutdown_requested: AtomicBool,
    phase: Mutex<Phase>,
    phase_changed: Condvar,
    waker: Mutex<Option<Waker>>,
}

impl Server {
    /// Server dengan konfigurasi default
    ///
    /// # Errors
    /// [`Error::InvalidProtocol`] unless `protocol` is `"tcp"` or `"unix"`.
    pub fn new(protocol: &str, addr: impl Into<String>) -> Result<Self> {
        let protocol: Protocol = protocol.parse()?;
        Ok(Self::with_config(ServerConfig::new(protocol, addr)))
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            connections: WaitGroup::new(),
            next_conn_id: AtomicU64::new(0),
            shutdown_requested: AtomicBool::new(false),
            phase: Mutex::new(Phase::Idle),
            phase_changed: Condvar::new(),
            waker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a request/response endpoint. Last registration wins.
    pub fn add_request_endpoint<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Metadata, &mut dyn io::Write, &mut dyn io::Read) -> HandlerResult
            + Send
            + Sync
            + 'static,
    {
        self.registry.register_request(name, handler);
    }

    /// Register a streaming endpoint. Last registration wins.
    pub fn add_stream_endpoint<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Metadata, Client) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.register_stream(name, handler);
    }

    /// Number of connections currently being serviced.
    pub fn active_connections(&self) -> usize {
        self.connections.count()
    }

    /// Resolve and bind the configured address without serving yet.
    pub fn bind(&self) -> Result<Listener> {
        Listener::bind(self.config.protocol, &self.config.addr)
    }

    /// Bind, then serve until shutdown or a fatal listener error.
    pub fn listen(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener)
    }

    /// Serve TLS over TCP.
    ///
    /// # Errors
    /// [`Error::InvalidProtocol`] for a Unix server, [`Error::Tls`] if a
    /// file named by `config` is missing.
    pub fn listen_tls(&self, config: &TlsConfig, acceptor: Arc<dyn TlsAcceptor>) -> Result<()> {
        if self.config.protocol != Protocol::Tcp {
            return Err(Error::InvalidProtocol(self.config.protocol.to_string()));
        }
        config.validate()?;

        let listener = self.bind()?;
        self.run(listener, Some(acceptor))
    }

    /// Run the accept loop on an already bound listener.
    ///
    /// Returns `Ok(())` after a completed shutdown, or the fatal error
    /// that stopped the listener.
    pub fn serve(&self, listener: Listener) -> Result<()> {
        self.run(listener, None)
    }

    fn run(&self, listener: Listener, tls: Option<Arc<dyn TlsAcceptor>>) -> Result<()> {
        {
            let mut phase = self.lock_phase();
            if *phase == Phase::Serving {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "server is already serving",
                )));
            }
            *phase = Phase::Serving;
        }

        let result = self.accept_loop(listener, tls);

        *lock(&self.waker) = None;
        *self.lock_phase() = Phase::Stopped;
        self.phase_changed.notify_all();

        if let Err(e) = &result {
            maybe_log!(self.config.log, warn, error = %e, "Listener stopped");
        }
        result
    }

    fn accept_loop(&self, mut listener: Listener, tls: Option<Arc<dyn TlsAcceptor>>) -> Result<()> {
        let mut poll = Poll::new()?;
        listener.register(&poll)?;
        *lock(&self.waker) = Some(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let dispatcher = Dispatcher {
            registry: Arc::new(self.registry.clone()),
            max_timeout: self.config.max_timeout,
            max_body_size: self.config.max_body_size,
            log: self.config.log,
        };

        maybe_log!(
            self.config.log,
            info,
            "Listening for requests on {}://{}",
            self.config.protocol,
            listener.local_addr()
        );

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut backoff = Backoff::new();

        loop {
            if self.shutdown_requested.load(Ordering::SeqCst) {
                return self.finish_shutdown(listener);
            }

            match poll.poll(&mut events, Some(self.config.accept_timeout)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            // Deadline passed with nothing to accept.
            if events.is_empty() {
                continue;
            }

            // Edge-triggered: drain the accept queue until WouldBlock.
            self.drain_accept_queue(
                || listener.accept(),
                |accepted| self.spawn_connection(accepted, &dispatcher, tls.clone()),
                &mut backoff,
            )?;
        }
    }

    /// Accept until the queue reports `WouldBlock` or shutdown is requested.
    ///
    /// A success resets `backoff`; a transient failure sleeps and retries;
    /// any other failure is returned.
    fn drain_accept_queue<T>(
        &self,
        mut accept: impl FnMut() -> io::Result<T>,
        mut on_accept: impl FnMut(T),
        backoff: &mut Backoff,
    ) -> Result<()> {
        while !self.shutdown_requested.load(Ordering::SeqCst) {
            match accept() {
                Ok(accepted) => {
                    *backoff = Backoff::new();
                    on_accept(accepted);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if transport::is_transient(&e) => {
                    maybe_log!(self.config.log, warn, error = %e, "Transient accept error");
                    let delay = retry_delay(backoff, self.config.max_retries, e)?;
                    maybe_log!(
                        self.config.log,
                        debug,
                        attempt = backoff.attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off before next accept"
                    );
                    thread::sleep(delay);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn spawn_connection(
        &self,
        accepted: Accepted,
        dispatcher: &Dispatcher,
        tls: Option<Arc<dyn TlsAcceptor>>,
    ) {
        let guard = self.connections.add();
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let dispatcher = dispatcher.clone();
        let opts = self.config.socket_options();

        let spawned = thread::Builder::new()
            .name(format!("framerpc-conn-{id}"))
            .spawn(move || {
                let _guard = guard;

                let transport = match accepted.into_transport(opts, tls.as_deref()) {
                    Ok(t) => t,
                    Err(e) => {
                        maybe_log!(dispatcher.log, warn, conn = id, error = %e, "Failed to set up connection");
                        return;
                    }
                };

                let client = Client::from_transport(transport);
                if panic::catch_unwind(AssertUnwindSafe(|| dispatcher.run(client))).is_err() {
                    maybe_log!(dispatcher.log, warn, conn = id, "Connection handler panicked");
                }
            });

        // The closure, and with it the guard and the socket, is dropped on failure.
        if let Err(e) = spawned {
            maybe_log!(self.config.log, warn, error = %e, "Failed to spawn connection thread");
        }
    }

    fn finish_shutdown(&self, listener: Listener) -> Result<()> {
        maybe_log!(
            self.config.log,
            info,
            active = self.connections.count(),
            "Shutting down, draining connections"
        );
        drop(listener);
        self.connections.wait();
        maybe_log!(self.config.log, info, "Shutdown complete");
        Ok(())
    }

    /// Stop accepting and wait for in-flight connections to finish.
    ///
    /// Blocks until the listening socket is closed and every connection
    /// thread has returned, including threads left behind by a listener
    /// that already stopped on a fatal error. With nothing serving and no
    /// connections it returns immediately; a later `serve` then stops
    /// straight away.
    pub fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        if let Some(waker) = lock(&self.waker).as_ref() {
            let _ = waker.wake();
        }

        let mut phase = self.lock_phase();
        while *phase == Phase::Serving {
            phase = self
                .phase_changed
                .wait(phase)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(phase);

        self.connections.wait();
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        lock(&self.phase)
    }
}

/// Record one transient accept failure; returns how long to sleep, or
/// [`Error::RetriesExhausted`] once more than `max_retries` failed in a row.
///
/// After `k` consecutive failures the sleep is the initial delay doubled
/// `k` times.
fn retry_delay(backoff: &mut Backoff, max_retries: usize, err: io::Error) -> Result<Duration> {
    *backoff = backoff.next();
    if backoff.exhausted(max_retries) {
        return Err(Error::RetriesExhausted {
            retries: max_retries,
            source: err,
        });
    }
    Ok(backoff.delay)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("active_connections", &self.connections.count())
            .finish_non_exhaustive()
    }
}
