//! framerpc - binary-framed RPC over TCP and Unix sockets
//!
//! Every message is a fixed 225-byte header ([`Metadata`]) followed by
//! `body_size` raw bytes. A [`Server`] routes each header to a named
//! request or stream endpoint; a [`Client`] speaks the same framing from
//! the other side.
//!
//! ```no_run
//! use framerpc::{Client, Server};
//!
//! let mut server = Server::new("tcp", "127.0.0.1:4000")?;
//! server.add_request_endpoint("echo", |_meta, w, r| {
//!     std::io::copy(r, w)?;
//!     Ok(())
//! });
//! std::thread::spawn(move || server.listen());
//!
//! let mut client = Client::connect("tcp", "127.0.0.1:4000")?;
//! client.write_framed_str("echo", "hello")?;
//! let (_meta, body) = client.read_framed_string()?;
//! assert_eq!(body, "hello");
//! # Ok::<(), framerpc::Error>(())
//! ```

/// `tracing` event gated on a runtime toggle.
macro_rules! maybe_log {
    ($enabled:expr, $level:ident, $($arg:tt)+) => {
        if $enabled {
            ::tracing::$level!($($arg)+);
        }
    };
}

pub mod core;
pub mod error;
pub mod network;
pub mod protocol;

pub use error::{BoxError, Error, Result};
pub use network::{
    Client, HandlerResult, Listener, Protocol, Server, ServerConfig, TlsAcceptor, TlsConfig,
    Transport,
};
pub use protocol::{EndpointType, Metadata, HEADER_SIZE};
