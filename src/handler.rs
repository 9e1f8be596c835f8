//! Request handlers and the path routing table.
//!
//! A handler is a named function that builds the full response body into
//! the stream's [`StreamState`] and submits the response headers with
//! [`provide_response`] as the body source. The registry is built once at
//! startup and shared read-only by every connection.

use std::fmt;

use crate::error::HandlerError;
use crate::hpack::H2Header;
use crate::session::{DataProvider, Session};
use crate::stream::{provide_response, StreamState};

/// Signature every handler implements.
pub type HandlerFn = fn(&mut Session<StreamState>, u32, &mut StreamState) -> Result<(), HandlerError>;

/// A named, stateless response producer.
#[derive(Clone, Copy)]
pub struct Handler {
    pub name: &'static str,
    func: HandlerFn,
}

impl Handler {
    pub const fn new(name: &'static str, func: HandlerFn) -> Self {
        Self { name, func }
    }

    pub fn invoke(
        &self,
        session: &mut Session<StreamState>,
        stream_id: u32,
        state: &mut StreamState,
    ) -> Result<(), HandlerError> {
        (self.func)(session, stream_id, state)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.name).finish()
    }
}

/// How a route matches the `:path` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Exact(Vec<u8>),
    Prefix(Vec<u8>),
}

impl Route {
    pub fn exact(path: impl Into<Vec<u8>>) -> Self {
        Route::Exact(path.into())
    }

    pub fn prefix(path: impl Into<Vec<u8>>) -> Self {
        Route::Prefix(path.into())
    }

    pub fn matches(&self, path: &[u8]) -> bool {
        match self {
            Route::Exact(p) => path == p.as_slice(),
            Route::Prefix(p) => path.starts_with(p),
        }
    }
}

/// Ordered routes plus a fallback. The first matching route wins.
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    routes: Vec<(Route, Handler)>,
    fallback: Handler,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl HandlerRegistry {
    /// An empty table that sends everything to `fallback`.
    pub fn new(fallback: Handler) -> Self {
        Self { routes: Vec::new(), fallback }
    }

    /// `/` to the root page, `/api...` to the JSON endpoint, everything else
    /// to the echo handler.
    pub fn builtin() -> Self {
        Self::new(DEFAULT_HANDLER)
            .route(Route::exact("/"), ROOT_HANDLER)
            .route(Route::prefix("/api"), API_HANDLER)
    }

    pub fn route(mut self, route: Route, handler: Handler) -> Self {
        self.routes.push((route, handler));
        self
    }

    pub fn resolve(&self, path: &[u8]) -> Handler {
        self.lookup(path).unwrap_or(self.fallback)
    }

    /// The handler a route resolved to, if any route matched.
    pub fn lookup(&self, path: &[u8]) -> Option<Handler> {
        self.routes
            .iter()
            .find(|(route, _)| route.matches(path))
            .map(|(_, handler)| *handler)
    }

    pub fn default_handler(&self) -> Handler {
        self.fallback
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

pub const DEFAULT_HANDLER: Handler = Handler::new("default", echo_request);
pub const API_HANDLER: Handler = Handler::new("api", api_response);
pub const ROOT_HANDLER: Handler = Handler::new("root", root_page);

const API_BODY: &[u8] = br#"{"status":"success","message":"API response"}"#;
const ROOT_BODY: &[u8] = b"<html><body><h1>Welcome to Root</h1></body></html>";

fn respond(
    session: &mut Session<StreamState>,
    stream_id: u32,
    state: &mut StreamState,
    content_type: &str,
    body: Vec<u8>,
) -> Result<(), HandlerError> {
    state.set_response(body);
    let headers = [H2Header::new(":status", "200"), H2Header::new("content-type", content_type)];
    session.submit_response(stream_id, &headers, Some(provide_response as DataProvider<StreamState>))?;
    Ok(())
}

/// Echo the request back as text: every header line, then the body.
pub fn echo_request(
    session: &mut Session<StreamState>,
    stream_id: u32,
    state: &mut StreamState,
) -> Result<(), HandlerError> {
    let body = echo_body(state.headers(), state.body());
    respond(session, stream_id, state, "text/plain", body)
}

pub fn api_response(
    session: &mut Session<StreamState>,
    stream_id: u32,
    state: &mut StreamState,
) -> Result<(), HandlerError> {
    respond(session, stream_id, state, "application/json", API_BODY.to_vec())
}

pub fn root_page(
    session: &mut Session<StreamState>,
    stream_id: u32,
    state: &mut StreamState,
) -> Result<(), HandlerError> {
    respond(session, stream_id, state, "text/html", ROOT_BODY.to_vec())
}

/// `Headers:\n<header lines>\n\nBody:\n<body>`
pub fn echo_body(headers: &[u8], body: &[u8]) -> Vec<u8> {
    const PREFIX: &[u8] = b"Headers:\n";
    const SEPARATOR: &[u8] = b"\n\nBody:\n";

    let mut out = Vec::with_capacity(PREFIX.len() + headers.len() + SEPARATOR.len() + body.len());
    out.extend_from_slice(PREFIX);
    out.extend_from_slice(headers);
    out.extend_from_slice(SEPARATOR);
    out.extend_from_slice(body);
    out
}
