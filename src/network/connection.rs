//! Connection wrapper dengan framing metadata + body
//!
//! [`Client`] is used on both ends of a connection: dialled by a caller,
//! or wrapped around an accepted stream by the server. It implements
//! `Read` and `Write` so it can stand in for a raw socket, and layers the
//! header/body operations on top.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Instant;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use super::transport::{self, Protocol, Transport};
use crate::error::{Error, Result};
use crate::protocol::{Metadata, HEADER_SIZE};

/// Initial allocation for a body; the buffer grows as bytes arrive.
const BODY_CHUNK_SIZE: usize = 64 * 1024; // 64KB

/// Framed connection wrapper
///
/// Owns exactly one transport. Once closed, every operation fails with
/// [`Error::ConnectionClosed`] without touching the stream.
pub struct Client {
    stream: Box<dyn Transport>,
    protocol: Option<Protocol>,
    addr: Option<String>,
    closed: bool,
    max_body_size: Option<u64>,
    deadline: Option<Instant>,
}

impl Client {
    /// Dial server di `addr`
    ///
    /// # Errors
    /// [`Error::InvalidProtocol`] for an unknown selector, [`Error::Io`] if
    /// the dial fails.
    pub fn connect(protocol: &str, addr: &str) -> Result<Self> {
        let protocol: Protocol = protocol.parse()?;
        let stream = transport::dial(protocol, addr)?;

        Ok(Self {
            protocol: Some(protocol),
            addr: Some(addr.to_string()),
            ..Self::from_transport(stream)
        })
    }

    /// Wrap stream yang sudah terhubung (server side)
    pub fn from_transport(stream: Box<dyn Transport>) -> Self {
        Self {
            stream,
            protocol: None,
            addr: None,
            closed: false,
            max_body_size: None,
            deadline: None,
        }
    }

    /// Reject bodies declaring more than `limit` bytes.
    #[must_use]
    pub fn with_max_body_size(mut self, limit: Option<u64>) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Protocol used to dial, if this client dialled.
    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    /// Address used to dial, if this client dialled.
    pub fn addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    pub fn peer_addr(&self) -> String {
        self.stream.peer_addr()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stream view that enforces the current deadline on every call.
    #[inline]
    fn io(&mut self) -> DeadlineIo<'_> {
        DeadlineIo {
            stream: &mut self.stream,
            deadline: self.deadline,
        }
    }

    #[inline(always)]
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Write the encoded header only.
    pub fn write_metadata(&mut self, meta: &Metadata) -> Result<usize> {
        self.ensure_open()?;
        self.io().write_all(&meta.encode())?;
        Ok(HEADER_SIZE)
    }

    /// Kirim header + body sebagai satu pesan
    ///
    /// Header and body go out in a single buffer, so nothing can land
    /// between them. Returns the total number of bytes written.
    pub fn write_framed(&mut self, endpoint: &str, body: &[u8]) -> Result<usize> {
        self.ensure_open()?;

        let meta = Metadata::request(endpoint, body.len() as u64);
        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
        frame.extend_from_slice(&meta.encode());
        frame.extend_from_slice(body);

        self.io().write_all(&frame)?;
        Ok(frame.len())
    }

    pub fn write_framed_str(&mut self, endpoint: &str, body: &str) -> Result<usize> {
        self.write_framed(endpoint, body.as_bytes())
    }

    /// Buffer the whole of `body` in memory, then send it framed.
    ///
    /// # Errors
    /// [`Error::Io`] if the source cannot be drained; nothing is written
    /// in that case.
    pub fn write_framed_from_reader<R: Read>(&mut self, endpoint: &str, mut body: R) -> Result<usize> {
        self.ensure_open()?;

        let mut buf = Vec::new();
        body.read_to_end(&mut buf)?;
        self.write_framed(endpoint, &buf)
    }

    /// Baca header dari stream
    ///
    /// # Errors
    /// [`Error::Disconnected`] if the peer closes before a whole header
    /// arrives.
    pub fn read_metadata(&mut self) -> Result<Metadata> {
        self.ensure_open()?;

        let mut header = [0u8; HEADER_SIZE];
        self.io().read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::Disconnected
            } else {
                Error::Io(e)
            }
        })?;
        Metadata::decode(&header)
    }

    /// Baca body sebesar `meta.body_size`
    ///
    /// # Errors
    /// [`Error::TruncatedBody`] if the stream ends before the declared size,
    /// [`Error::BodyTooLarge`] if the size is over the configured limit.
    pub fn read_body(&mut self, meta: &Metadata) -> Result<Vec<u8>> {
        self.ensure_open()?;

        let expected = meta.body_size;
        if let Some(limit) = self.max_body_size {
            if expected > limit {
                return Err(Error::BodyTooLarge {
                    size: expected,
                    limit,
                });
            }
        }

        let initial = usize::try_from(expected).map_or(BODY_CHUNK_SIZE, |n| n.min(BODY_CHUNK_SIZE));
        let mut body = Vec::with_capacity(initial);
        let received = self.io().take(expected).read_to_end(&mut body)? as u64;

        if received < expected {
            return Err(Error::TruncatedBody { expected, received });
        }
        Ok(body)
    }

    /// Header lalu body; stops at the first failure.
    pub fn read_framed(&mut self) -> Result<(Metadata, Vec<u8>)> {
        let meta = self.read_metadata()?;
        let body = self.read_body(&meta)?;
        Ok((meta, body))
    }

    /// Like [`read_framed`](Self::read_framed), body decoded lossily as UTF-8.
    pub fn read_framed_string(&mut self) -> Result<(Metadata, String)> {
        let (meta, body) = self.read_framed()?;
        let body = String::from_utf8(body)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
        Ok((meta, body))
    }

    /// Tutup koneksi
    ///
    /// The closed flag is set even if shutting the stream down fails.
    pub fn close(&mut self) -> Result<()> {
        let already = self.closed;
        self.closed = true;
        if already {
            return Ok(());
        }

        match self.stream.shutdown() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Apply an absolute deadline to upcoming blocking reads and writes.
    ///
    /// The deadline covers every call until it is replaced or cleared, so
    /// a peer sending one byte at a time cannot stretch it. Once it has
    /// passed, I/O fails with `TimedOut` without touching the stream.
    pub fn set_deadline(&mut self, deadline: Instant) -> Result<()> {
        self.ensure_open()?;
        self.deadline = Some(deadline);
        Ok(())
    }

    /// Remove any deadline; I/O blocks indefinitely again.
    pub fn clear_deadline(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.deadline = None;
        self.stream.set_timeout(None)?;
        Ok(())
    }
}

impl Read for Client {
    /// Raw passthrough; knows nothing about framing.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(closed_error());
        }
        self.io().read(buf)
    }
}

impl Write for Client {
    /// Raw passthrough; knows nothing about framing.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(closed_error());
        }
        self.io().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(closed_error());
        }
        self.stream.flush()
    }
}

/// Borrowed transport that re-arms the socket timeout from an absolute
/// deadline before each read and write.
struct DeadlineIo<'a> {
    stream: &'a mut Box<dyn Transport>,
    deadline: Option<Instant>,
}

impl DeadlineIo<'_> {
    fn arm(&mut self) -> io::Result<()> {
        let Some(deadline) = self.deadline else {
            return Ok(());
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"));
        }
        self.stream.set_timeout(Some(remaining))
    }
}

impl Read for DeadlineIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.arm()?;
        self.stream.read(buf)
    }
}

impl Write for DeadlineIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.arm()?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, Error::ConnectionClosed)
}

impl From<TcpStream> for Client {
    fn from(stream: TcpStream) -> Self {
        Self::from_transport(Box::new(stream))
    }
}

#[cfg(unix)]
impl From<UnixStream> for Client {
    fn from(stream: UnixStream) -> Self {
        Self::from_transport(Box::new(stream))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.stream.peer_addr())
            .field("protocol", &self.protocol)
            .field("addr", &self.addr)
            .field("closed", &self.closed)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
