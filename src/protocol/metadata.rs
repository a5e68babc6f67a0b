//! Fixed-Size Metadata Header
//!
//! Layout (little-endian, 225 bytes total):
//! ┌────────┬──────┬──────────────────────────────────────┐
//! │ Offset │ Size │ Field                                │
//! ├────────┼──────┼──────────────────────────────────────┤
//! │      0 │    1 │ endpoint_type (0 = request, 1 = stream) │
//! │      1 │    8 │ user_id (i64)                        │
//! │      9 │    8 │ timeout in milliseconds (u64)        │
//! │     17 │    8 │ body_size (u64)                      │
//! │     25 │  100 │ content_type, NUL-padded             │
//! │    125 │  100 │ endpoint name, NUL-padded            │
//! └────────┴──────┴──────────────────────────────────────┘
//!
//! Body bytes follow the header verbatim. Both peers must agree on these
//! constants; there is no negotiation.

use std::io::{self, Read};
use std::time::Duration;

use crate::error::{Error, Result};

/// Total header size in bytes.
pub const HEADER_SIZE: usize = 225;
/// Width of the content type region.
pub const CONTENT_TYPE_SIZE: usize = 100;
/// Width of the endpoint name region.
pub const ENDPOINT_SIZE: usize = 100;

const USER_ID_OFFSET: usize = 1;
const TIMEOUT_OFFSET: usize = 9;
const BODY_SIZE_OFFSET: usize = 17;
const CONTENT_TYPE_OFFSET: usize = 25;
const ENDPOINT_OFFSET: usize = CONTENT_TYPE_OFFSET + CONTENT_TYPE_SIZE;

/// Tipe endpoint untuk routing request
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointType {
    /// One body in, one body out; the connection stays usable afterwards.
    Request = 0,
    /// The handler takes over the raw connection after the header.
    Stream = 1,
}

impl EndpointType {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Request),
            1 => Some(Self::Stream),
            _ => None,
        }
    }
}

impl From<EndpointType> for u8 {
    fn from(kind: EndpointType) -> Self {
        kind as u8
    }
}

/// Header metadata yang mendahului setiap pesan
///
/// `endpoint_type` is kept as the raw tag so a header with an unknown tag
/// still decodes; rejecting it is the dispatcher's call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Raw endpoint type tag, see [`EndpointType`].
    pub endpoint_type: u8,
    /// Opaque caller identifier. Not validated.
    pub user_id: i64,
    /// Deadline hint requested by the client. Zero means none.
    pub timeout: Duration,
    /// Length of the body that follows. Ignored for stream endpoints.
    pub body_size: u64,
    /// Informational content type, optional.
    pub content_type: String,
    /// Name of the handler that should process the message.
    pub endpoint: String,
}

impl Metadata {
    /// Header untuk request endpoint dengan body tertentu
    pub fn request(endpoint: impl Into<String>, body_size: u64) -> Self {
        Self {
            endpoint_type: EndpointType::Request.into(),
            body_size,
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Header untuk stream endpoint
    pub fn stream(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint_type: EndpointType::Stream.into(),
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Classify the raw tag. `None` for tags outside the known set.
    #[inline(always)]
    pub fn kind(&self) -> Option<EndpointType> {
        EndpointType::from_u8(self.endpoint_type)
    }

    /// Encode ke buffer berukuran tetap
    ///
    /// Never fails. Strings longer than their region are cut to the
    /// region width; shorter ones are padded with zero bytes.
    #[inline]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0] = self.endpoint_type;
        buf[USER_ID_OFFSET..TIMEOUT_OFFSET].copy_from_slice(&self.user_id.to_le_bytes());
        buf[TIMEOUT_OFFSET..BODY_SIZE_OFFSET].copy_from_slice(&timeout_millis(self.timeout).to_le_bytes());
        buf[BODY_SIZE_OFFSET..CONTENT_TYPE_OFFSET].copy_from_slice(&self.body_size.to_le_bytes());

        put_padded(
            &mut buf[CONTENT_TYPE_OFFSET..ENDPOINT_OFFSET],
            &self.content_type,
        );
        put_padded(&mut buf[ENDPOINT_OFFSET..HEADER_SIZE], &self.endpoint);

        buf
    }

    /// Decode dari byte slice
    ///
    /// Bytes past `HEADER_SIZE` are ignored.
    ///
    /// # Errors
    /// [`Error::IncompleteHeader`] when `bytes` is shorter than a header.
    #[inline]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::IncompleteHeader {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            endpoint_type: bytes[0],
            user_id: i64::from_le_bytes(le_word(&bytes[USER_ID_OFFSET..TIMEOUT_OFFSET])),
            timeout: Duration::from_millis(u64::from_le_bytes(le_word(
                &bytes[TIMEOUT_OFFSET..BODY_SIZE_OFFSET],
            ))),
            body_size: u64::from_le_bytes(le_word(&bytes[BODY_SIZE_OFFSET..CONTENT_TYPE_OFFSET])),
            content_type: trimmed(&bytes[CONTENT_TYPE_OFFSET..ENDPOINT_OFFSET]),
            endpoint: trimmed(&bytes[ENDPOINT_OFFSET..HEADER_SIZE]),
        })
    }

    /// Decode langsung dari stream, field per field
    ///
    /// Reads the tag, the three integers and the two string regions with
    /// one exact read each. Nothing is returned unless every read
    /// completes.
    ///
    /// # Errors
    /// [`Error::Disconnected`] if the stream ends early, [`Error::Io`] for
    /// any other read failure.
    pub fn decode_from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut tag = [0u8; 1];
        let mut word = [0u8; 8];
        let mut region = [0u8; ENDPOINT_SIZE];

        read_part(reader, &mut tag)?;
        let endpoint_type = tag[0];

        read_part(reader, &mut word)?;
        let user_id = i64::from_le_bytes(word);

        read_part(reader, &mut word)?;
        let timeout = Duration::from_millis(u64::from_le_bytes(word));

        read_part(reader, &mut word)?;
        let body_size = u64::from_le_bytes(word);

        read_part(reader, &mut region[..CONTENT_TYPE_SIZE])?;
        let content_type = trimmed(&region[..CONTENT_TYPE_SIZE]);

        region.fill(0);
        read_part(reader, &mut region[..ENDPOINT_SIZE])?;
        let endpoint = trimmed(&region[..ENDPOINT_SIZE]);

        Ok(Self {
            endpoint_type,
            user_id,
            timeout,
            body_size,
            content_type,
            endpoint,
        })
    }
}

/// Sub-millisecond precision is dropped; durations beyond u64 millis saturate.
#[inline(always)]
fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[inline(always)]
fn put_padded(dst: &mut [u8], value: &str) {
    let src = value.as_bytes();
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
}

#[inline(always)]
fn le_word(src: &[u8]) -> [u8; 8] {
    let mut word = [0u8; 8];
    word.copy_from_slice(src);
    word
}

fn trimmed(region: &[u8]) -> String {
    let end = region
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    String::from_utf8_lossy(&region[..end]).into_owned()
}

fn read_part<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Disconnected
        } else {
            Error::Io(e)
        }
    })
}
