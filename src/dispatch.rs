//! Engine callbacks that turn HTTP/2 streams into handler invocations.
//!
//! [`DispatchPipeline`] is the callback table of every connection's session:
//! it accumulates each request into a [`StreamState`] stored in the engine's
//! per-stream slot, runs the bound handler once the request ends, and
//! releases the state when the engine closes the stream.

use std::io;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::connection::{ConnectionId, Transport};
use crate::error::CallbackError;
use crate::h2_codec::frame_type;
use crate::handler::HandlerRegistry;
use crate::session::{FrameInfo, HeadersCategory, Session, SessionCallbacks};
use crate::stream::StreamState;

pub struct DispatchPipeline<T> {
    id: ConnectionId,
    transport: T,
    handlers: Arc<HandlerRegistry>,
    streams_opened: u64,
    streams_released: u64,
    handlers_invoked: u64,
}

impl<T: Transport> DispatchPipeline<T> {
    pub fn new(id: ConnectionId, transport: T, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            id,
            transport,
            handlers,
            streams_opened: 0,
            streams_released: 0,
            handlers_invoked: 0,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// StreamStates created so far.
    pub fn streams_opened(&self) -> u64 {
        self.streams_opened
    }

    /// StreamStates released so far.
    pub fn streams_released(&self) -> u64 {
        self.streams_released
    }

    /// StreamStates currently held in stream slots.
    pub fn live_streams(&self) -> u64 {
        self.streams_opened - self.streams_released
    }

    pub fn handlers_invoked(&self) -> u64 {
        self.handlers_invoked
    }

    /// The stream's state, created with the default handler bound if the slot
    /// is empty. `None` when the engine has no such stream.
    fn state_for<'a>(&mut self, session: &'a mut Session<StreamState>, stream_id: u32) -> Option<&'a mut StreamState> {
        let default = self.handlers.default_handler();
        let mut created = false;
        let state = session.user_data_or_insert_with(stream_id, || {
            created = true;
            StreamState::with_handler(default)
        });
        if created {
            self.streams_opened += 1;
            trace!(conn = %self.id, stream_id, "stream state created");
        }
        state
    }
}

impl<T: Transport> SessionCallbacks for DispatchPipeline<T> {
    type StreamData = StreamState;

    fn send(&mut self, data: &[u8]) -> Result<usize, CallbackError> {
        match self.transport.send(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(CallbackError::Transport(e)),
        }
    }

    fn on_header(
        &mut self,
        session: &mut Session<StreamState>,
        frame: &FrameInfo,
        name: &[u8],
        value: &[u8],
    ) -> Result<(), CallbackError> {
        if frame.frame_type != frame_type::HEADERS || frame.category != Some(HeadersCategory::Request) {
            return Ok(());
        }

        let Some(state) = self.state_for(session, frame.stream_id) else {
            warn!(conn = %self.id, stream_id = frame.stream_id, "header for unknown stream");
            return Ok(());
        };

        if name == b":path" {
            if let Some(handler) = self.handlers.lookup(value) {
                state.set_handler(handler);
            }
        }
        state.append_header(name, value);
        Ok(())
    }

    fn on_data_chunk_recv(
        &mut self,
        session: &mut Session<StreamState>,
        stream_id: u32,
        data: &[u8],
    ) -> Result<(), CallbackError> {
        match self.state_for(session, stream_id) {
            Some(state) => state.append_body(data),
            None => warn!(conn = %self.id, stream_id, "data for unknown stream"),
        }
        Ok(())
    }

    fn on_frame_recv(&mut self, session: &mut Session<StreamState>, frame: &FrameInfo) -> Result<(), CallbackError> {
        if !frame.is_end_stream() {
            return Ok(());
        }
        let stream_id = frame.stream_id;

        // The handler needs the session and the state at once, so the state
        // leaves its slot for the duration of the call.
        let Some(mut state) = session.take_stream_user_data(stream_id) else {
            warn!(conn = %self.id, stream_id, "request ended on stream without state");
            return Ok(());
        };

        if let Some(handler) = state.take_handler() {
            debug!(conn = %self.id, stream_id, handler = handler.name, "dispatching request");
            self.handlers_invoked += 1;
            if let Err(e) = handler.invoke(session, stream_id, &mut state) {
                warn!(conn = %self.id, stream_id, handler = handler.name, error = %e, "handler failed");
            }
        }

        if session.set_stream_user_data(stream_id, Some(state)).is_err() {
            self.streams_released += 1;
            warn!(conn = %self.id, stream_id, "stream vanished during dispatch");
        }
        Ok(())
    }

    fn on_stream_close(
        &mut self,
        session: &mut Session<StreamState>,
        stream_id: u32,
        error_code: u32,
    ) -> Result<(), CallbackError> {
        if let Some(state) = session.take_stream_user_data(stream_id) {
            self.streams_released += 1;
            debug!(
                conn = %self.id,
                stream_id,
                error_code,
                headers = state.header_count(),
                body_len = state.body().len(),
                sent = state.response_offset(),
                "stream closed"
            );
        }
        Ok(())
    }
}
