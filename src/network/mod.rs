//! Network Layer: listener, connection wrapper, dispatch
//!
//! Blocking I/O, satu thread per koneksi. Only the listening socket is
//! non-blocking (driven by mio) so shutdown can interrupt the accept wait.
//!
//! - `server`: accept loop, retry/backoff, drain-on-shutdown
//! - `connection`: [`Client`], framed read/write on one transport
//! - `dispatcher`: per-connection header → endpoint routing
//! - `endpoint`: handler types and the name → handler registry
//! - `transport`: TCP / Unix stream abstraction
//! - `tls`: hook for wrapping accepted TCP streams

mod connection;
mod dispatcher;
mod endpoint;
mod server;
mod tls;
mod transport;

pub use connection::Client;
pub use endpoint::{HandlerResult, Registry, RequestHandler, StreamHandler};
pub use server::{Listener, Server, ServerConfig, DEFAULT_ACCEPT_TIMEOUT, DEFAULT_MAX_RETRIES};
pub use tls::{TlsAcceptor, TlsConfig};
pub use transport::{Protocol, Transport};
