//! Per-stream request accumulation and response cursor.

use crate::handler::Handler;
use crate::session::DataFlags;

/// Everything the dispatcher keeps for one request stream.
///
/// Created on the first header of a stream, it collects the request headers
/// as `name: value\n` lines and the body as raw bytes, remembers which
/// handler is bound to the stream, and later serves the response body to the
/// engine in window-sized pieces.
#[derive(Debug, Default)]
pub struct StreamState {
    headers: Vec<u8>,
    header_count: usize,
    body: Vec<u8>,
    response: Vec<u8>,
    response_offset: usize,
    handler: Option<Handler>,
    dispatched: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a new stream, bound to the connection's default handler.
    pub fn with_handler(handler: Handler) -> Self {
        Self { handler: Some(handler), ..Self::default() }
    }

    /// Append one header line. Names and values are kept byte for byte.
    pub fn append_header(&mut self, name: &[u8], value: &[u8]) {
        self.headers.reserve(name.len() + value.len() + 3);
        self.headers.extend_from_slice(name);
        self.headers.extend_from_slice(b": ");
        self.headers.extend_from_slice(value);
        self.headers.push(b'\n');
        self.header_count += 1;
    }

    pub fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    pub fn headers(&self) -> &[u8] {
        &self.headers
    }

    pub fn header_count(&self) -> usize {
        self.header_count
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn handler(&self) -> Option<&Handler> {
        self.handler.as_ref()
    }

    /// Rebind the stream to `handler`. Ignored once the handler has run.
    pub fn set_handler(&mut self, handler: Handler) {
        if !self.dispatched {
            self.handler = Some(handler);
        }
    }

    /// Unbind the handler so it can run. Every later call returns `None`.
    pub fn take_handler(&mut self) -> Option<Handler> {
        self.dispatched = true;
        self.handler.take()
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    /// Install the full response body and rewind the read cursor.
    pub fn set_response(&mut self, body: Vec<u8>) {
        self.response = body;
        self.response_offset = 0;
    }

    pub fn response_len(&self) -> usize {
        self.response.len()
    }

    pub fn response_offset(&self) -> usize {
        self.response_offset
    }

    /// Response bytes not yet handed to the engine.
    pub fn remaining(&self) -> usize {
        self.response.len() - self.response_offset
    }

    /// Copy the next piece of the response into `buf`.
    ///
    /// Sets `eof` once the cursor reaches the end, including on the call that
    /// copies the last bytes. An empty `buf` copies nothing.
    pub fn read_response(&mut self, buf: &mut [u8], flags: &mut DataFlags) -> usize {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.response[self.response_offset..self.response_offset + n]);
        self.response_offset += n;
        if self.response_offset == self.response.len() {
            flags.eof = true;
        }
        n
    }
}

/// [`DataProvider`](crate::session::DataProvider) for responses held in a
/// [`StreamState`].
pub fn provide_response(state: &mut StreamState, buf: &mut [u8], flags: &mut DataFlags) -> usize {
    state.read_response(buf, flags)
}
