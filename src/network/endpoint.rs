//! Endpoint registry: nama endpoint → handler

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use super::Client;
use crate::error::BoxError;
use crate::protocol::Metadata;

/// Outcome of an application handler.
pub type HandlerResult = Result<(), BoxError>;

/// Request/response handler.
///
/// Receives the parsed header, a sink for the response body and a reader
/// positioned at the start of the request body.
pub type RequestHandler =
    Arc<dyn Fn(&Metadata, &mut dyn Write, &mut dyn Read) -> HandlerResult + Send + Sync>;

/// Streaming handler.
///
/// Takes ownership of the connection for the rest of its lifetime and is
/// responsible for closing it.
pub type StreamHandler = Arc<dyn Fn(Metadata, Client) -> HandlerResult + Send + Sync>;

/// Two independent name → handler maps, one per endpoint type.
#[derive(Clone, Default)]
pub struct Registry {
    request: HashMap<String, RequestHandler>,
    stream: HashMap<String, StreamHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; the last registration for a name wins.
    pub fn register_request<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Metadata, &mut dyn Write, &mut dyn Read) -> HandlerResult + Send + Sync + 'static,
    {
        self.request.insert(name.into(), Arc::new(handler));
    }

    /// Insert or replace; the last registration for a name wins.
    pub fn register_stream<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Metadata, Client) -> HandlerResult + Send + Sync + 'static,
    {
        self.stream.insert(name.into(), Arc::new(handler));
    }

    #[inline]
    pub fn lookup_request(&self, name: &str) -> Option<&RequestHandler> {
        self.request.get(name)
    }

    #[inline]
    pub fn lookup_stream(&self, name: &str) -> Option<&StreamHandler> {
        self.stream.get(name)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut request: Vec<_> = self.request.keys().collect();
        let mut stream: Vec<_> = self.stream.keys().collect();
        request.sort();
        stream.sort();

        f.debug_struct("Registry")
            .field("request", &request)
            .field("stream", &stream)
            .finish()
    }
}
