//! Per-connection dispatch loop
//!
//! State machine per koneksi:
//! ```text
//! AwaitHeader ──► Route ──► Request ──► AwaitHeader (loop)
//!                   │
//!                   └─────► Stream  ──► handler owns the connection, loop ends
//! ```
//! A peer disconnect at `AwaitHeader` ends the loop quietly. Every other
//! failure ends only this connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::endpoint::Registry;
use super::Client;
use crate::error::{Error, Result};
use crate::protocol::{EndpointType, Metadata};

/// Everything a connection thread needs, shared read-only.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    pub registry: Arc<Registry>,
    pub max_timeout: Option<Duration>,
    pub max_body_size: Option<u64>,
    pub log: bool,
}

impl Dispatcher {
    /// Service `client` until it disconnects or fails.
    pub fn run(&self, client: Client) {
        let peer = client.peer_addr();
        maybe_log!(self.log, info, peer = %peer, "Client connected");

        match self.dispatch(client.with_max_body_size(self.max_body_size)) {
            Ok(()) => {}
            Err(e) => self.log_failure(&peer, &e),
        }

        maybe_log!(self.log, info, peer = %peer, "Client disconnected");
    }

    fn dispatch(&self, mut client: Client) -> Result<()> {
        loop {
            self.arm_deadline(&mut client)?;

            let meta = match client.read_metadata() {
                Ok(meta) => meta,
                Err(e) if e.is_disconnect() => return Ok(()),
                Err(e) => return Err(e),
            };

            match meta.kind() {
                Some(EndpointType::Request) => self.handle_request(&meta, &mut client)?,
                Some(EndpointType::Stream) => return self.handle_stream(meta, client),
                None => return Err(Error::InvalidEndpointType(meta.endpoint_type)),
            }
        }
    }

    fn handle_request(&self, meta: &Metadata, client: &mut Client) -> Result<()> {
        let handler = self
            .registry
            .lookup_request(&meta.endpoint)
            .ok_or_else(|| Error::InvalidEndpoint(meta.endpoint.clone()))?;

        let body = client.read_body(meta)?;
        let mut output = Vec::new();
        handler(meta, &mut output, &mut body.as_slice()).map_err(Error::Handler)?;

        client.write_framed(&meta.endpoint, &output)?;
        maybe_log!(
            self.log,
            debug,
            endpoint = %meta.endpoint,
            request_bytes = body.len(),
            response_bytes = output.len(),
            "Served request"
        );
        Ok(())
    }

    fn handle_stream(&self, meta: Metadata, client: Client) -> Result<()> {
        let handler = self
            .registry
            .lookup_stream(&meta.endpoint)
            .ok_or_else(|| Error::InvalidEndpoint(meta.endpoint.clone()))?;

        // The idle deadline stays armed; the handler may clear or replace it.
        maybe_log!(self.log, debug, endpoint = %meta.endpoint, "Handing connection to stream endpoint");
        handler(meta, client).map_err(Error::Handler)
    }

    /// Idle deadline, re-armed before every header read.
    fn arm_deadline(&self, client: &mut Client) -> Result<()> {
        match self.max_timeout {
            Some(timeout) if !timeout.is_zero() => client.set_deadline(Instant::now() + timeout),
            _ => Ok(()),
        }
    }

    fn log_failure(&self, peer: &str, err: &Error) {
        if !self.log {
            return;
        }
        match err {
            e if e.is_timeout() => tracing::info!(peer = %peer, "Idle timeout expired"),
            Error::InvalidEndpoint(name) => {
                tracing::warn!(peer = %peer, endpoint = %name, "Could not find requested endpoint")
            }
            Error::InvalidEndpointType(tag) => {
                tracing::warn!(peer = %peer, endpoint_type = tag, "Invalid endpoint type specified")
            }
            Error::Handler(e) => tracing::warn!(peer = %peer, error = %e, "Error serving endpoint"),
            Error::TruncatedBody { .. } | Error::BodyTooLarge { .. } => {
                tracing::warn!(peer = %peer, error = %err, "Unable to read body")
            }
            e => tracing::warn!(peer = %peer, error = %e, "Connection error"),
        }
    }
}
