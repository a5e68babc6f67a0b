//! Byte-stream transports carried under the framing
//!
//! A [`Transport`] is any blocking bidirectional stream that can take an
//! I/O timeout. TCP and Unix sockets implement it here; a TLS acceptor
//! can supply its own.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::str::FromStr;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::error::{Error, Result};

/// Socket family a server listens on or a client dials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Unix,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Unix => "unix",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "unix" => Ok(Self::Unix),
            other => Err(Error::InvalidProtocol(other.to_string())),
        }
    }
}

/// Blocking stream the connection wrapper reads and writes.
pub trait Transport: Read + Write + Send {
    /// Apply `timeout` to subsequent blocking reads and writes. `None`
    /// blocks indefinitely.
    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Human-readable remote address, for logging.
    fn peer_addr(&self) -> String;

    /// Shut down both halves of the stream.
    fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn peer_addr(&self) -> String {
        TcpStream::peer_addr(self).map_or_else(|_| "tcp:(unknown)".to_string(), |a| a.to_string())
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl Transport for UnixStream {
    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn peer_addr(&self) -> String {
        match UnixStream::peer_addr(self) {
            Ok(addr) => addr.as_pathname().map_or_else(
                || "unix:(unnamed)".to_string(),
                |p| p.display().to_string(),
            ),
            Err(_) => "unix:(unknown)".to_string(),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// Dial `addr` over `protocol`.
pub(crate) fn dial(protocol: Protocol, addr: &str) -> Result<Box<dyn Transport>> {
    match protocol {
        Protocol::Tcp => {
            let stream = TcpStream::connect(addr)?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Protocol::Unix => Ok(Box::new(UnixStream::connect(addr)?)),
        #[cfg(not(unix))]
        Protocol::Unix => Err(Error::InvalidProtocol(protocol.to_string())),
    }
}

/// Per-socket tuning applied to accepted connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SocketOptions {
    pub nodelay: bool,
    pub buffer_size: Option<usize>,
}

pub(crate) fn tune_tcp(stream: &TcpStream, opts: SocketOptions) -> io::Result<()> {
    // Accepted sockets inherit O_NONBLOCK from the mio listener.
    stream.set_nonblocking(false)?;
    stream.set_nodelay(opts.nodelay)?;

    #[cfg(unix)]
    if let Some(size) = opts.buffer_size {
        use std::os::unix::io::AsRawFd;
        set_buffer_size(stream.as_raw_fd(), size)?;
    }
    Ok(())
}

#[cfg(unix)]
pub(crate) fn tune_unix(stream: &UnixStream, opts: SocketOptions) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    stream.set_nonblocking(false)?;
    if let Some(size) = opts.buffer_size {
        set_buffer_size(stream.as_raw_fd(), size)?;
    }
    Ok(())
}

/// SO_SNDBUF dan SO_RCVBUF untuk throughput
#[cfg(unix)]
fn set_buffer_size(fd: std::os::unix::io::RawFd, size: usize) -> io::Result<()> {
    let optval = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);

    for opt in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        // SAFETY: fd is a live socket owned by the caller and optval
        // outlives the call.
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Accept errors expected to clear up on their own.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
    ) {
        return true;
    }

    #[cfg(unix)]
    if let Some(code) = err.raw_os_error() {
        return matches!(
            code,
            libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM | libc::EPROTO
        );
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("unix".parse::<Protocol>().unwrap(), Protocol::Unix);
        assert!(matches!(
            "foo".parse::<Protocol>(),
            Err(Error::InvalidProtocol(p)) if p == "foo"
        ));
        assert_eq!(Protocol::Unix.to_string(), "unix");
    }

    #[test]
    fn test_transient_kinds() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::AddrInUse)));
    }

    #[cfg(unix)]
    #[test]
    fn test_transient_resource_exhaustion() {
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::ENFILE)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EBADF)));
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_transport_timeout() {
        let (a, mut b) = UnixStream::pair().unwrap();
        Transport::set_timeout(&a, Some(Duration::from_millis(20))).unwrap();

        let mut a: Box<dyn Transport> = Box::new(a);
        let mut buf = [0u8; 4];
        let err = a.read(&mut buf).unwrap_err();
        assert!(crate::error::is_timeout_kind(err.kind()));

        b.write_all(b"ping").unwrap();
        a.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }
}
