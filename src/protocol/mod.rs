//! Protocol Layer: Fixed-Size Binary Header
//!
//! Prinsip desain:
//! - Fixed-size header: predictable layout, one read per header
//! - Little-endian integers, NUL-padded string regions
//! - Body length declared up front, body bytes follow verbatim

mod metadata;

pub use metadata::{EndpointType, Metadata, CONTENT_TYPE_SIZE, ENDPOINT_SIZE, HEADER_SIZE};
