//! Server-side HTTP/2 session driven through a callback table.
//!
//! [`H2Session`] couples the frame codec and HPACK state with a
//! [`SessionCallbacks`] implementation. Inbound bytes go in through
//! [`H2Session::mem_recv`], which invokes the callbacks synchronously in
//! framing order; [`H2Session::send`] serializes everything queued, pulls
//! response bodies from registered [`DataProvider`]s as flow control
//! allows, and hands the bytes to [`SessionCallbacks::send`].
//!
//! Callbacks receive a [`Session`], the part of the engine they may act on:
//! submitting responses and settings, and reading or replacing the opaque
//! per-stream user data slot.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::error::{CallbackError, SessionError};
use crate::flow_control::{FlowControl, DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE};
use crate::h2_codec::{
    error_code, flags, frame_type, settings_id, H2Codec, H2Event, DEFAULT_MAX_FRAME_SIZE,
};
use crate::hpack::{H2Header, HpackDecoder, HpackEncoder};

/// Largest value allowed for SETTINGS_MAX_FRAME_SIZE (2^24 - 1).
const MAX_ALLOWED_FRAME_SIZE: u32 = 0x00ff_ffff;

/// What a header block on a stream represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersCategory {
    /// The block that opened the stream.
    Request,
    /// A trailing block after the request body.
    Trailers,
}

/// Frame metadata handed to `on_header` and `on_frame_recv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
    /// Set for HEADERS frames only.
    pub category: Option<HeadersCategory>,
}

impl FrameInfo {
    fn new(frame_type: u8, flags: u8, stream_id: u32) -> Self {
        Self { frame_type, flags, stream_id, category: None }
    }

    /// True when the client will send nothing more on this stream.
    ///
    /// Only DATA and HEADERS carry END_STREAM; the same bit means ACK on
    /// SETTINGS and PING.
    pub fn is_end_stream(&self) -> bool {
        matches!(self.frame_type, frame_type::DATA | frame_type::HEADERS)
            && self.flags & flags::END_STREAM != 0
    }
}

/// Out-parameter of a [`DataProvider`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DataFlags {
    /// No more data: the frame carrying this chunk ends the stream.
    pub eof: bool,
}

/// Pull source for a response body.
///
/// Called with the stream's user data and a buffer whose length is the most
/// the engine can send right now; returns the number of bytes written.
/// Returning 0 without setting `eof` defers the stream until the next
/// [`H2Session::send`].
pub type DataProvider<S> = fn(source: &mut S, buf: &mut [u8], flags: &mut DataFlags) -> usize;

/// One SETTINGS parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsEntry {
    pub id: u16,
    pub value: u32,
}

impl SettingsEntry {
    pub fn new(id: u16, value: u32) -> Self {
        Self { id, value }
    }

    pub fn max_concurrent_streams(value: u32) -> Self {
        Self::new(settings_id::MAX_CONCURRENT_STREAMS, value)
    }

    pub fn initial_window_size(value: u32) -> Self {
        Self::new(settings_id::INITIAL_WINDOW_SIZE, value)
    }
}

/// The callback table an application registers with an [`H2Session`].
///
/// Every callback except `send` defaults to a no-op. Returning an error from
/// any of them is fatal to the session.
pub trait SessionCallbacks {
    /// Per-stream user data stored in the engine's stream slot.
    type StreamData;

    /// Write serialized frames to the transport. Returns the number of bytes
    /// accepted; `Ok(0)` means the transport cannot take more right now.
    fn send(&mut self, data: &[u8]) -> Result<usize, CallbackError>;

    /// One decoded header field of a header block.
    fn on_header(
        &mut self,
        _session: &mut Session<Self::StreamData>,
        _frame: &FrameInfo,
        _name: &[u8],
        _value: &[u8],
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    /// A non-empty chunk of request body.
    fn on_data_chunk_recv(
        &mut self,
        _session: &mut Session<Self::StreamData>,
        _stream_id: u32,
        _data: &[u8],
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    /// A frame was fully received and processed. For HEADERS this comes
    /// after every `on_header` of the block; for DATA after the chunk.
    fn on_frame_recv(
        &mut self,
        _session: &mut Session<Self::StreamData>,
        _frame: &FrameInfo,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    /// The stream is gone. Called exactly once per opened stream, whether it
    /// completed, was reset, or the session was terminated. The stream slot
    /// is erased right after this returns.
    fn on_stream_close(
        &mut self,
        _session: &mut Session<Self::StreamData>,
        _stream_id: u32,
        _error_code: u32,
    ) -> Result<(), CallbackError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamStatus {
    Open,
    HalfClosedRemote,
    HalfClosedLocal,
    Closed,
}

struct Stream<S> {
    status: StreamStatus,
    close_code: u32,
    user_data: Option<S>,
    provider: Option<DataProvider<S>>,
    responded: bool,
    send_window: FlowControl,
    recv_window: FlowControl,
}

impl<S> Stream<S> {
    fn new(send_window: i64, recv_window: i64) -> Self {
        Self {
            status: StreamStatus::Open,
            close_code: error_code::NO_ERROR,
            user_data: None,
            provider: None,
            responded: false,
            send_window: FlowControl::new(send_window),
            recv_window: FlowControl::new(recv_window),
        }
    }

    fn can_recv(&self) -> bool {
        matches!(self.status, StreamStatus::Open | StreamStatus::HalfClosedLocal)
    }

    fn close_remote(&mut self) {
        self.status = match self.status {
            StreamStatus::Open => StreamStatus::HalfClosedRemote,
            _ => StreamStatus::Closed,
        };
    }

    fn close_local(&mut self) {
        self.status = match self.status {
            StreamStatus::Open => StreamStatus::HalfClosedLocal,
            _ => StreamStatus::Closed,
        };
    }

    fn reset(&mut self, code: u32) {
        self.status = StreamStatus::Closed;
        self.close_code = code;
        self.provider = None;
    }
}

/// Engine state reachable from callbacks.
pub struct Session<S> {
    streams: BTreeMap<u32, Stream<S>>,
    encoder: HpackEncoder,
    /// Serialized frames waiting for the next `send`.
    pending: Vec<u8>,
    settings_sent: bool,
    local_max_concurrent_streams: Option<u32>,
    local_initial_window: i64,
    local_max_frame_size: u32,
    remote_initial_window: i64,
    remote_max_frame_size: u32,
    conn_send_window: FlowControl,
    conn_recv_window: FlowControl,
    last_stream_id: u32,
    goaway_received: bool,
    goaway_sent: bool,
}

impl<S> Session<S> {
    fn new() -> Self {
        Self {
            streams: BTreeMap::new(),
            encoder: HpackEncoder::new(),
            pending: Vec::new(),
            settings_sent: false,
            local_max_concurrent_streams: None,
            local_initial_window: DEFAULT_WINDOW_SIZE,
            local_max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            remote_initial_window: DEFAULT_WINDOW_SIZE,
            remote_max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            conn_send_window: FlowControl::default(),
            conn_recv_window: FlowControl::default(),
            last_stream_id: 0,
            goaway_received: false,
            goaway_sent: false,
        }
    }

    /// Queue a SETTINGS frame and apply our side of it.
    ///
    /// The values take effect immediately rather than on the peer's ACK.
    pub fn submit_settings(&mut self, entries: &[SettingsEntry]) -> Result<(), SessionError> {
        for entry in entries {
            match entry.id {
                settings_id::MAX_CONCURRENT_STREAMS => {
                    self.local_max_concurrent_streams = Some(entry.value);
                }
                settings_id::INITIAL_WINDOW_SIZE => {
                    let new = i64::from(entry.value);
                    if new > MAX_WINDOW_SIZE {
                        return Err(SessionError::FlowControl);
                    }
                    let delta = new - self.local_initial_window;
                    for stream in self.streams.values_mut() {
                        stream.recv_window.adjust(delta)?;
                    }
                    self.local_initial_window = new;
                }
                settings_id::MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&entry.value) {
                        return Err(SessionError::Protocol(format!(
                            "invalid SETTINGS_MAX_FRAME_SIZE {}",
                            entry.value
                        )));
                    }
                    self.local_max_frame_size = entry.value;
                }
                _ => {}
            }
        }

        let pairs: Vec<(u16, u32)> = entries.iter().map(|e| (e.id, e.value)).collect();
        self.queue_settings(H2Codec::create_settings(&pairs));
        Ok(())
    }

    /// Queue response headers for `stream_id`.
    ///
    /// With a provider, the body is pulled from the stream's user data on
    /// later [`H2Session::send`] calls; without one, the HEADERS frame ends
    /// the stream.
    pub fn submit_response(
        &mut self,
        stream_id: u32,
        headers: &[H2Header],
        provider: Option<DataProvider<S>>,
    ) -> Result<(), SessionError> {
        // Validate before encoding: the encoder's dynamic table must only see
        // blocks that are actually sent.
        match self.streams.get(&stream_id) {
            None => return Err(SessionError::StreamNotFound(stream_id)),
            Some(stream) if stream.responded || stream.status == StreamStatus::Closed => {
                return Err(SessionError::AlreadyResponded(stream_id));
            }
            Some(_) => {}
        }

        let block = self.encoder.encode(headers);
        let end_stream = provider.is_none();
        self.pending.extend_from_slice(&H2Codec::create_headers_frames(
            stream_id,
            &block,
            end_stream,
            self.remote_max_frame_size,
        ));

        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.responded = true;
            stream.provider = provider;
            if end_stream {
                stream.close_local();
            }
        }
        trace!(stream_id, end_stream, "response submitted");
        Ok(())
    }

    /// Queue RST_STREAM. A known stream is closed on the next sweep and its
    /// `on_stream_close` receives `code`.
    pub fn submit_rst_stream(&mut self, stream_id: u32, code: u32) {
        self.pending.extend_from_slice(&H2Codec::create_rst_stream(stream_id, code));
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.reset(code);
        }
    }

    /// Queue GOAWAY naming the last client stream we processed.
    pub fn submit_goaway(&mut self, code: u32) {
        self.pending.extend_from_slice(&H2Codec::create_goaway(self.last_stream_id, code));
        self.goaway_sent = true;
    }

    pub fn stream_user_data(&self, stream_id: u32) -> Option<&S> {
        self.streams.get(&stream_id)?.user_data.as_ref()
    }

    pub fn stream_user_data_mut(&mut self, stream_id: u32) -> Option<&mut S> {
        self.streams.get_mut(&stream_id)?.user_data.as_mut()
    }

    /// Replace the user data of a live stream, returning the previous value.
    pub fn set_stream_user_data(&mut self, stream_id: u32, data: Option<S>) -> Result<Option<S>, SessionError> {
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(SessionError::StreamNotFound(stream_id))?;
        Ok(std::mem::replace(&mut stream.user_data, data))
    }

    /// Move the user data out of a stream, leaving the slot empty.
    pub fn take_stream_user_data(&mut self, stream_id: u32) -> Option<S> {
        self.streams.get_mut(&stream_id)?.user_data.take()
    }

    /// The stream's user data, created with `init` if the slot is empty.
    /// `None` when the stream does not exist.
    pub fn user_data_or_insert_with(&mut self, stream_id: u32, init: impl FnOnce() -> S) -> Option<&mut S> {
        let stream = self.streams.get_mut(&stream_id)?;
        Some(stream.user_data.get_or_insert_with(init))
    }

    pub fn contains_stream(&self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id)
    }

    /// Streams not yet closed.
    pub fn open_streams(&self) -> usize {
        self.streams.values().filter(|s| s.status != StreamStatus::Closed).count()
    }

    pub fn last_stream_id(&self) -> u32 {
        self.last_stream_id
    }

    pub fn goaway_received(&self) -> bool {
        self.goaway_received
    }

    pub fn goaway_sent(&self) -> bool {
        self.goaway_sent
    }

    /// Queued frames or response bodies waiting to be pulled.
    pub fn want_write(&self) -> bool {
        !self.pending.is_empty()
            || !self.settings_sent
            || self.streams.values().any(|s| s.provider.is_some())
    }

    /// SETTINGS must be the first frame the server sends.
    fn queue_settings(&mut self, frame: Vec<u8>) {
        if self.settings_sent {
            self.pending.extend_from_slice(&frame);
        } else {
            let mut frame = frame;
            frame.append(&mut self.pending);
            self.pending = frame;
            self.settings_sent = true;
        }
    }

    fn ensure_settings_sent(&mut self) {
        if !self.settings_sent {
            self.queue_settings(H2Codec::create_settings(&[]));
        }
    }

    fn apply_remote_settings(&mut self, settings: &[(u16, u32)]) -> Result<(), SessionError> {
        for &(id, value) in settings {
            match id {
                settings_id::ENABLE_PUSH if value > 1 => {
                    return Err(SessionError::Protocol(format!("invalid SETTINGS_ENABLE_PUSH {}", value)));
                }
                settings_id::INITIAL_WINDOW_SIZE => {
                    let new = i64::from(value);
                    if new > MAX_WINDOW_SIZE {
                        return Err(SessionError::FlowControl);
                    }
                    // Adjust send windows on all open streams (RFC 7540 Section 6.9.2).
                    let delta = new - self.remote_initial_window;
                    for stream in self.streams.values_mut() {
                        stream.send_window.adjust(delta)?;
                    }
                    self.remote_initial_window = new;
                }
                settings_id::MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&value) {
                        return Err(SessionError::Protocol(format!("invalid SETTINGS_MAX_FRAME_SIZE {}", value)));
                    }
                    self.remote_max_frame_size = value;
                }
                _ => {}
            }
        }
        self.pending.extend_from_slice(&H2Codec::create_settings_ack());
        Ok(())
    }

    /// Send WINDOW_UPDATE once half of a receive window has been consumed.
    fn replenish_windows(&mut self, stream_id: u32, data_len: u32) {
        if data_len == 0 {
            return;
        }

        if self.conn_recv_window.window() < DEFAULT_WINDOW_SIZE / 2 {
            let increment = (DEFAULT_WINDOW_SIZE - self.conn_recv_window.window()) as u32;
            self.pending.extend_from_slice(&H2Codec::create_window_update(0, increment));
            let _ = self.conn_recv_window.increase(increment);
        }

        let threshold = self.local_initial_window / 2;
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if stream.can_recv() && stream.recv_window.window() < threshold {
                let increment = (self.local_initial_window - stream.recv_window.window()) as u32;
                self.pending
                    .extend_from_slice(&H2Codec::create_window_update(stream_id, increment));
                let _ = stream.recv_window.increase(increment);
            }
        }
    }
}

/// A server-role HTTP/2 session bound to a callback table.
pub struct H2Session<C: SessionCallbacks> {
    codec: H2Codec,
    decoder: HpackDecoder,
    callbacks: C,
    session: Session<C::StreamData>,
    /// Bytes the transport did not accept on the last `send`.
    unsent: Vec<u8>,
    scratch: Vec<u8>,
}

impl<C: SessionCallbacks> H2Session<C> {
    /// Create a server session. Nothing is written until [`H2Session::send`].
    pub fn server(callbacks: C) -> Self {
        Self {
            codec: H2Codec::new(),
            decoder: HpackDecoder::new(),
            callbacks,
            session: Session::new(),
            unsent: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session<C::StreamData> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<C::StreamData> {
        &mut self.session
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    pub fn submit_settings(&mut self, entries: &[SettingsEntry]) -> Result<(), SessionError> {
        self.session.submit_settings(entries)
    }

    pub fn want_write(&self) -> bool {
        !self.unsent.is_empty() || self.session.want_write()
    }

    /// Feed bytes received from the client.
    ///
    /// Callbacks run synchronously for every complete frame. All input is
    /// consumed (partial frames are buffered), so the return value is always
    /// `data.len()`. Any error is fatal to the session.
    pub fn mem_recv(&mut self, data: &[u8]) -> Result<usize, SessionError> {
        self.codec.set_max_frame_size(self.session.local_max_frame_size);
        let events = self.codec.process(data)?;
        for event in events {
            self.handle_event(event)?;
            self.sweep_closed()?;
        }
        Ok(data.len())
    }

    /// Serialize queued frames and available response data, then hand them
    /// to the `send` callback until everything is written or the transport
    /// stops accepting bytes.
    pub fn send(&mut self) -> Result<(), SessionError> {
        self.session.ensure_settings_sent();

        let mut out = std::mem::take(&mut self.unsent);
        out.append(&mut self.session.pending);
        self.produce_data(&mut out)?;
        self.sweep_closed()?;
        out.append(&mut self.session.pending);

        self.write_out(out)
    }

    /// Close every remaining stream with `code`, delivering `on_stream_close`
    /// for each. Returns how many streams were closed.
    pub fn terminate(&mut self, code: u32) -> usize {
        let ids: Vec<u32> = self.session.streams.keys().copied().collect();
        for &stream_id in &ids {
            if let Err(e) = self.close_stream(stream_id, code) {
                warn!(stream_id, error = %e, "stream close callback failed during teardown");
            }
        }
        ids.len()
    }

    fn handle_event(&mut self, event: H2Event) -> Result<(), SessionError> {
        match event {
            H2Event::Headers { stream_id, header_block, end_stream } => {
                self.handle_headers(stream_id, &header_block, end_stream)
            }
            H2Event::Data { stream_id, data, end_stream, flow_len } => {
                self.handle_data(stream_id, &data, end_stream, flow_len)
            }
            H2Event::StreamReset { stream_id, error_code: code } => {
                if stream_id == 0 {
                    return Err(SessionError::Protocol("RST_STREAM on stream 0".into()));
                }
                debug!(stream_id, error_code = code, "stream reset by peer");
                let frame = FrameInfo::new(frame_type::RST_STREAM, 0, stream_id);
                self.callbacks.on_frame_recv(&mut self.session, &frame)?;
                if let Some(stream) = self.session.streams.get_mut(&stream_id) {
                    stream.reset(code);
                }
                Ok(())
            }
            H2Event::Settings { ack, settings } => {
                if !ack {
                    self.session.apply_remote_settings(&settings)?;
                }
                let frame = FrameInfo::new(frame_type::SETTINGS, if ack { flags::ACK } else { 0 }, 0);
                self.callbacks.on_frame_recv(&mut self.session, &frame)?;
                Ok(())
            }
            H2Event::Ping { ack, data } => {
                if !ack {
                    self.session.pending.extend_from_slice(&H2Codec::create_ping_ack(data));
                }
                let frame = FrameInfo::new(frame_type::PING, if ack { flags::ACK } else { 0 }, 0);
                self.callbacks.on_frame_recv(&mut self.session, &frame)?;
                Ok(())
            }
            H2Event::GoAway { last_stream_id, error_code: code } => {
                debug!(last_stream_id, error_code = code, "GOAWAY received");
                self.session.goaway_received = true;
                let frame = FrameInfo::new(frame_type::GOAWAY, 0, 0);
                self.callbacks.on_frame_recv(&mut self.session, &frame)?;
                Ok(())
            }
            H2Event::WindowUpdate { stream_id, increment } => {
                self.handle_window_update(stream_id, increment)?;
                let frame = FrameInfo::new(frame_type::WINDOW_UPDATE, 0, stream_id);
                self.callbacks.on_frame_recv(&mut self.session, &frame)?;
                Ok(())
            }
        }
    }

    fn handle_headers(&mut self, stream_id: u32, block: &[u8], end_stream: bool) -> Result<(), SessionError> {
        if stream_id == 0 || stream_id % 2 == 0 {
            return Err(SessionError::Protocol(format!("HEADERS on invalid stream {}", stream_id)));
        }

        // Decode even for streams we refuse so the dynamic table stays in sync.
        let headers = self.decoder.decode(block)?;

        let category = match self.session.streams.get(&stream_id) {
            Some(stream) if !stream.can_recv() => {
                self.session.submit_rst_stream(stream_id, error_code::STREAM_CLOSED);
                return Ok(());
            }
            Some(_) if !end_stream => {
                // Trailers must end the stream (RFC 7540 Section 8.1)
                self.session.submit_rst_stream(stream_id, error_code::PROTOCOL_ERROR);
                return Ok(());
            }
            Some(_) => HeadersCategory::Trailers,
            None => {
                if stream_id <= self.session.last_stream_id {
                    // A stream we already closed or refused; frames may still be in flight.
                    debug!(stream_id, "HEADERS on closed stream");
                    self.session.submit_rst_stream(stream_id, error_code::STREAM_CLOSED);
                    return Ok(());
                }
                self.session.last_stream_id = stream_id;
                if let Some(max) = self.session.local_max_concurrent_streams {
                    if self.session.open_streams() >= max as usize {
                        debug!(stream_id, max, "refusing stream over concurrency limit");
                        self.session.submit_rst_stream(stream_id, error_code::REFUSED_STREAM);
                        return Ok(());
                    }
                }
                let stream = Stream::new(self.session.remote_initial_window, self.session.local_initial_window);
                self.session.streams.insert(stream_id, stream);
                HeadersCategory::Request
            }
        };

        let mut frame_flags = flags::END_HEADERS;
        if end_stream {
            frame_flags |= flags::END_STREAM;
        }
        let frame = FrameInfo {
            category: Some(category),
            ..FrameInfo::new(frame_type::HEADERS, frame_flags, stream_id)
        };

        for header in &headers {
            self.callbacks.on_header(&mut self.session, &frame, &header.name, &header.value)?;
        }
        if end_stream {
            if let Some(stream) = self.session.streams.get_mut(&stream_id) {
                stream.close_remote();
            }
        }
        self.callbacks.on_frame_recv(&mut self.session, &frame)?;
        Ok(())
    }

    /// `flow_len` is the frame's full payload length: padding counts against
    /// both receive windows and is credited back with the data.
    fn handle_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool, flow_len: u32) -> Result<(), SessionError> {
        if stream_id == 0 {
            return Err(SessionError::Protocol("DATA on stream 0".into()));
        }
        let data_len = flow_len;
        self.session.conn_recv_window.consume(data_len)?;

        let receiving = matches!(self.session.streams.get(&stream_id), Some(s) if s.can_recv());
        if !receiving {
            if stream_id > self.session.last_stream_id {
                return Err(SessionError::Protocol(format!("DATA on idle stream {}", stream_id)));
            }
            self.session.submit_rst_stream(stream_id, error_code::STREAM_CLOSED);
            self.session.replenish_windows(stream_id, data_len);
            return Ok(());
        }

        if let Some(stream) = self.session.streams.get_mut(&stream_id) {
            stream.recv_window.consume(data_len)?;
        }
        if !data.is_empty() {
            self.callbacks.on_data_chunk_recv(&mut self.session, stream_id, data)?;
        }
        if end_stream {
            if let Some(stream) = self.session.streams.get_mut(&stream_id) {
                stream.close_remote();
            }
        }

        let frame = FrameInfo::new(frame_type::DATA, if end_stream { flags::END_STREAM } else { 0 }, stream_id);
        self.callbacks.on_frame_recv(&mut self.session, &frame)?;
        self.session.replenish_windows(stream_id, data_len);
        Ok(())
    }

    fn handle_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), SessionError> {
        if increment == 0 {
            if stream_id == 0 {
                return Err(SessionError::Protocol("WINDOW_UPDATE with zero increment".into()));
            }
            self.session.submit_rst_stream(stream_id, error_code::PROTOCOL_ERROR);
            return Ok(());
        }
        if stream_id == 0 {
            self.session.conn_send_window.increase(increment)?;
        } else if let Some(stream) = self.session.streams.get_mut(&stream_id) {
            stream.send_window.increase(increment)?;
        }
        Ok(())
    }

    /// Pull response bodies into DATA frames while flow control allows.
    fn produce_data(&mut self, out: &mut Vec<u8>) -> Result<(), SessionError> {
        let max_frame = self.session.remote_max_frame_size as usize;
        let ids: Vec<u32> = self
            .session
            .streams
            .iter()
            .filter(|(_, s)| s.provider.is_some())
            .map(|(id, _)| *id)
            .collect();

        for stream_id in ids {
            loop {
                let conn_available = self.session.conn_send_window.available();
                let stream = match self.session.streams.get_mut(&stream_id) {
                    Some(stream) => stream,
                    None => break,
                };
                let provider = match stream.provider {
                    Some(provider) => provider,
                    None => break,
                };
                if stream.user_data.is_none() {
                    warn!(stream_id, "response source missing, resetting stream");
                    stream.reset(error_code::INTERNAL_ERROR);
                    out.extend_from_slice(&H2Codec::create_rst_stream(stream_id, error_code::INTERNAL_ERROR));
                    break;
                }

                let limit = conn_available.min(stream.send_window.available()).min(max_frame);
                self.scratch.resize(limit, 0);
                let mut data_flags = DataFlags::default();
                let n = match stream.user_data.as_mut() {
                    Some(source) => provider(source, &mut self.scratch[..limit], &mut data_flags).min(limit),
                    None => break,
                };
                if n == 0 && !data_flags.eof {
                    // Window exhausted or the source has nothing yet.
                    break;
                }

                stream.send_window.consume(n as u32)?;
                self.session.conn_send_window.consume(n as u32)?;
                out.extend_from_slice(&H2Codec::create_data_frame(stream_id, &self.scratch[..n], data_flags.eof));

                if data_flags.eof {
                    stream.provider = None;
                    stream.close_local();
                    trace!(stream_id, "response body complete");
                    break;
                }
            }
        }
        Ok(())
    }

    fn write_out(&mut self, mut out: Vec<u8>) -> Result<(), SessionError> {
        let mut written = 0;
        while written < out.len() {
            match self.callbacks.send(&out[written..]) {
                Ok(0) => break,
                Ok(n) => written += n.min(out.len() - written),
                Err(e) => return Err(e.into()),
            }
        }
        out.drain(..written);
        self.unsent = out;
        Ok(())
    }

    fn sweep_closed(&mut self) -> Result<(), SessionError> {
        let closed: Vec<(u32, u32)> = self
            .session
            .streams
            .iter()
            .filter(|(_, s)| s.status == StreamStatus::Closed)
            .map(|(id, s)| (*id, s.close_code))
            .collect();
        for (stream_id, code) in closed {
            self.close_stream(stream_id, code)?;
        }
        Ok(())
    }

    fn close_stream(&mut self, stream_id: u32, code: u32) -> Result<(), SessionError> {
        let result = self.callbacks.on_stream_close(&mut self.session, stream_id, code);
        self.session.streams.remove(&stream_id);
        trace!(stream_id, error_code = code, "stream closed");
        result.map_err(SessionError::from)
    }
}
