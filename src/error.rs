//! Error types shared by the codec, the connection wrapper and the server.

use std::io;

/// Boxed error returned by application handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by framerpc.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Protocol selector other than `tcp` or `unix`.
    #[error("invalid protocol specified: {0:?}")]
    InvalidProtocol(String),

    /// Operation attempted on a client after `close()`.
    #[error("connection already closed")]
    ConnectionClosed,

    /// Buffer handed to the decoder is shorter than a header.
    #[error("incomplete header: expected {expected} bytes, got {actual}")]
    IncompleteHeader { expected: usize, actual: usize },

    /// Peer closed the stream before a full header arrived.
    #[error("peer disconnected")]
    Disconnected,

    /// Peer closed the stream in the middle of a body.
    #[error("truncated body: expected {expected} bytes, received {received}")]
    TruncatedBody { expected: u64, received: u64 },

    /// Declared body size exceeds the configured limit.
    #[error("body of {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: u64, limit: u64 },

    /// No handler registered under the requested name.
    #[error("invalid endpoint specified: {0:?}")]
    InvalidEndpoint(String),

    /// Header carried an endpoint type tag the server cannot route.
    #[error("invalid endpoint type specified: {0}")]
    InvalidEndpointType(u8),

    /// Application handler reported a failure.
    #[error("handler failed: {0}")]
    Handler(BoxError),

    /// Too many consecutive transient accept errors.
    #[error("accept failed after {retries} retries: {source}")]
    RetriesExhausted {
        retries: usize,
        #[source]
        source: io::Error,
    },

    /// TLS hook misconfiguration.
    #[error("tls: {0}")]
    Tls(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for the normal "peer went away" outcomes of a read cycle.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// True when a read or write gave up because a deadline passed.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Io(e) => is_timeout_kind(e.kind()),
            _ => false,
        }
    }
}

/// Blocking std sockets report an expired read/write timeout as
/// `WouldBlock` on Unix and `TimedOut` on Windows.
pub(crate) fn is_timeout_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(Error::Disconnected.is_disconnect());
        assert!(Error::Io(io::Error::from(io::ErrorKind::ConnectionReset)).is_disconnect());
        assert!(!Error::TruncatedBody {
            expected: 5,
            received: 2
        }
        .is_disconnect());
        assert!(!Error::ConnectionClosed.is_disconnect());
    }

    #[test]
    fn test_timeout_classification() {
        assert!(Error::Io(io::Error::from(io::ErrorKind::WouldBlock)).is_timeout());
        assert!(Error::Io(io::Error::from(io::ErrorKind::TimedOut)).is_timeout());
        assert!(!Error::Disconnected.is_timeout());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::ConnectionClosed.to_string(),
            "connection already closed"
        );
        assert_eq!(
            Error::InvalidEndpoint("nope".into()).to_string(),
            "invalid endpoint specified: \"nope\""
        );
        assert_eq!(
            Error::IncompleteHeader {
                expected: 225,
                actual: 10
            }
            .to_string(),
            "incomplete header: expected 225 bytes, got 10"
        );
    }
}
