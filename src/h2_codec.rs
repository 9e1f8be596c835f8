//! HTTP/2 frame codec for the server side of a connection.
//!
//! A sans-I/O parser that turns raw client bytes into [`H2Event`]s and a set
//! of builders for the frames the server writes back. It handles:
//! 1. The mandatory client connection preface
//! 2. Frame boundaries across arbitrarily fragmented input
//! 3. HEADERS + CONTINUATION header block assembly
//! 4. Padding and priority fields on DATA and HEADERS
//!
//! Stream lifecycle, flow control and HPACK live in [`crate::session`].
//!
//! Frame layouts per RFC 7540.

use crate::error::FrameError;

/// HTTP/2 frame types (RFC 7540 Section 6)
#[allow(dead_code)]
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
#[allow(dead_code)]
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 SETTINGS identifiers (RFC 7540 Section 6.5.2)
#[allow(dead_code)]
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// HTTP/2 error codes (RFC 7540 Section 7)
#[allow(dead_code)]
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const SETTINGS_TIMEOUT: u32 = 0x4;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
    pub const COMPRESSION_ERROR: u32 = 0x9;
    pub const CONNECT_ERROR: u32 = 0xa;
    pub const ENHANCE_YOUR_CALM: u32 = 0xb;
    pub const INADEQUATE_SECURITY: u32 = 0xc;
    pub const HTTP_1_1_REQUIRED: u32 = 0xd;
}

/// Length of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Initial SETTINGS_MAX_FRAME_SIZE (RFC 7540 Section 6.5.2).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Cap on a HEADERS block plus its CONTINUATION frames (256 KiB).
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// The fixed 9-byte header in front of every frame.
#[derive(Debug, Clone)]
pub struct H2FrameHeader {
    pub length: u32,      // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,   // 31 bits (high bit reserved)
}

impl H2FrameHeader {
    pub fn new(length: u32, frame_type: u8, flags: u8, stream_id: u32) -> Self {
        Self { length, frame_type, flags, stream_id }
    }

    /// `None` until at least 9 bytes are available.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }

        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & 0x7FFF_FFFF;

        Some(Self {
            length,
            frame_type: data[3],
            flags: data[4],
            stream_id,
        })
    }

    /// Append the 9-byte wire form to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push((self.length >> 16) as u8);
        out.push((self.length >> 8) as u8);
        out.push(self.length as u8);
        out.push(self.frame_type);
        out.push(self.flags);
        out.extend_from_slice(&(self.stream_id & 0x7FFF_FFFF).to_be_bytes());
    }

    /// Header plus payload.
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }
}

/// Events emitted by the codec when parsing client frames
#[derive(Debug)]
pub enum H2Event {
    /// A complete header block (request headers or trailers)
    Headers {
        stream_id: u32,
        header_block: Vec<u8>,
        end_stream: bool,
    },
    /// Data for a stream
    Data {
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
        /// Whole frame payload, padding included; what flow control charges.
        flow_len: u32,
    },
    /// RST_STREAM from the client
    StreamReset {
        stream_id: u32,
        error_code: u32,
    },
    /// GOAWAY from the client
    GoAway {
        last_stream_id: u32,
        error_code: u32,
    },
    /// SETTINGS or SETTINGS ACK
    Settings {
        ack: bool,
        /// `(id, value)` in wire order; empty on an ACK.
        settings: Vec<(u16, u32)>,
    },
    /// Window update
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    /// PING or PING ACK
    Ping {
        ack: bool,
        data: [u8; 8],
    },
}

/// Server-side HTTP/2 frame parser.
#[derive(Debug)]
pub struct H2Codec {
    /// Bytes of a frame that has not fully arrived.
    buffer: Vec<u8>,
    /// Client connection preface consumed
    preface_received: bool,
    /// Largest frame payload we accept (our advertised SETTINGS_MAX_FRAME_SIZE)
    max_frame_size: u32,
    /// Stream whose header block still awaits END_HEADERS.
    pending_headers_stream: Option<u32>,
    /// END_STREAM as carried by the opening HEADERS frame.
    pending_headers_end_stream: bool,
    /// Fragments collected so far.
    pending_header_block: Vec<u8>,
}

impl Default for H2Codec {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            preface_received: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            pending_headers_stream: None,
            pending_headers_end_stream: false,
            pending_header_block: Vec::new(),
        }
    }
}

impl H2Codec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preface_received(&self) -> bool {
        self.preface_received
    }

    /// Skip the preface check, for feeding frames to a codec mid-connection.
    pub fn set_preface_received(&mut self, received: bool) {
        self.preface_received = received;
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    /// Bytes received but not yet forming a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Process incoming data and return parsed events.
    ///
    /// All of `data` is taken: incomplete trailing frames are kept in an
    /// internal buffer until the rest arrives.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<H2Event>, FrameError> {
        self.buffer.extend_from_slice(data);
        let mut events = Vec::new();

        if !self.preface_received {
            let n = self.buffer.len().min(CONNECTION_PREFACE.len());
            if self.buffer[..n] != CONNECTION_PREFACE[..n] {
                return Err(FrameError::InvalidPreface);
            }
            if n < CONNECTION_PREFACE.len() {
                return Ok(events);
            }
            self.buffer.drain(..CONNECTION_PREFACE.len());
            self.preface_received = true;
        }

        loop {
            let header = match H2FrameHeader::parse(&self.buffer) {
                Some(h) => h,
                None => break,
            };

            if header.length > self.max_frame_size {
                return Err(FrameError::FrameTooLarge {
                    length: header.length,
                    max: self.max_frame_size,
                });
            }

            let total_size = header.total_size();
            if self.buffer.len() < total_size {
                break;
            }

            let remainder = self.buffer.split_off(total_size);
            let mut payload = std::mem::replace(&mut self.buffer, remainder);
            payload.drain(..FRAME_HEADER_LEN);

            if let Some(event) = self.parse_frame(&header, payload)? {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Frames that carry nothing for the session yield `None`.
    fn parse_frame(&mut self, header: &H2FrameHeader, payload: Vec<u8>) -> Result<Option<H2Event>, FrameError> {
        if let Some(pending) = self.pending_headers_stream {
            if header.frame_type != frame_type::CONTINUATION {
                return Err(FrameError::ContinuationInterrupted {
                    pending,
                    frame_type: header.frame_type,
                });
            }
        }

        match header.frame_type {
            frame_type::DATA => {
                let data = extract_data_payload(header, payload)?;
                Ok(Some(H2Event::Data {
                    stream_id: header.stream_id,
                    data,
                    end_stream: header.is_end_stream(),
                    flow_len: header.length,
                }))
            }
            frame_type::HEADERS => {
                let header_block = extract_headers_payload(header, payload)?;
                if header.is_end_headers() {
                    return Ok(Some(H2Event::Headers {
                        stream_id: header.stream_id,
                        header_block,
                        end_stream: header.is_end_stream(),
                    }));
                }
                // Block continues in CONTINUATION frames.
                if header_block.len() > MAX_HEADER_BLOCK_SIZE {
                    return Err(FrameError::HeaderBlockTooLarge {
                        size: header_block.len(),
                        max: MAX_HEADER_BLOCK_SIZE,
                    });
                }
                self.pending_headers_stream = Some(header.stream_id);
                self.pending_headers_end_stream = header.is_end_stream();
                self.pending_header_block = header_block;
                Ok(None)
            }
            frame_type::CONTINUATION => {
                let pending_stream = self
                    .pending_headers_stream
                    .ok_or(FrameError::UnexpectedContinuation(header.stream_id))?;
                if pending_stream != header.stream_id {
                    return Err(FrameError::ContinuationMismatch {
                        got: header.stream_id,
                        pending: pending_stream,
                    });
                }
                let new_size = self.pending_header_block.len() + payload.len();
                if new_size > MAX_HEADER_BLOCK_SIZE {
                    self.pending_headers_stream = None;
                    self.pending_header_block.clear();
                    return Err(FrameError::HeaderBlockTooLarge {
                        size: new_size,
                        max: MAX_HEADER_BLOCK_SIZE,
                    });
                }
                self.pending_header_block.extend_from_slice(&payload);
                if !header.is_end_headers() {
                    return Ok(None);
                }
                let header_block = std::mem::take(&mut self.pending_header_block);
                let end_stream = self.pending_headers_end_stream;
                self.pending_headers_stream = None;
                self.pending_headers_end_stream = false;
                Ok(Some(H2Event::Headers {
                    stream_id: header.stream_id,
                    header_block,
                    end_stream,
                }))
            }
            frame_type::RST_STREAM => {
                if payload.len() < 4 {
                    return Err(FrameError::TooShort("RST_STREAM"));
                }
                Ok(Some(H2Event::StreamReset {
                    stream_id: header.stream_id,
                    error_code: read_u32(&payload[..4]),
                }))
            }
            frame_type::SETTINGS => {
                let ack = header.flags & flags::ACK != 0;
                if payload.len() % 6 != 0 || (ack && !payload.is_empty()) {
                    return Err(FrameError::SettingsLength(payload.len()));
                }
                let settings = if ack {
                    Vec::new()
                } else {
                    payload
                        .chunks_exact(6)
                        .map(|entry| (u16::from_be_bytes([entry[0], entry[1]]), read_u32(&entry[2..6])))
                        .collect()
                };
                Ok(Some(H2Event::Settings { ack, settings }))
            }
            frame_type::GOAWAY => {
                if payload.len() < 8 {
                    return Err(FrameError::TooShort("GOAWAY"));
                }
                Ok(Some(H2Event::GoAway {
                    last_stream_id: read_u32(&payload[..4]) & 0x7FFF_FFFF,
                    error_code: read_u32(&payload[4..8]),
                }))
            }
            frame_type::WINDOW_UPDATE => {
                if payload.len() < 4 {
                    return Err(FrameError::TooShort("WINDOW_UPDATE"));
                }
                Ok(Some(H2Event::WindowUpdate {
                    stream_id: header.stream_id,
                    increment: read_u32(&payload[..4]) & 0x7FFF_FFFF,
                }))
            }
            frame_type::PING => {
                if payload.len() < 8 {
                    return Err(FrameError::TooShort("PING"));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload[..8]);
                Ok(Some(H2Event::Ping {
                    ack: header.flags & flags::ACK != 0,
                    data,
                }))
            }
            // PRIORITY is advisory, PUSH_PROMISE is never sent by clients,
            // and unknown types MUST be ignored.
            _ => Ok(None),
        }
    }

    /// Build a HEADERS frame, spilling into CONTINUATION frames when the
    /// block does not fit in `max_frame_size`.
    pub fn create_headers_frames(
        stream_id: u32,
        header_block: &[u8],
        end_stream: bool,
        max_frame_size: u32,
    ) -> Vec<u8> {
        let max = max_frame_size.max(1) as usize;
        let mut chunks = header_block.chunks(max);
        let first = chunks.next().unwrap_or(&[]);
        let more = header_block.len() > max;

        let mut flags_byte = 0x0;
        if end_stream {
            flags_byte |= flags::END_STREAM;
        }
        if !more {
            flags_byte |= flags::END_HEADERS;
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + header_block.len());
        H2FrameHeader::new(first.len() as u32, frame_type::HEADERS, flags_byte, stream_id).encode(&mut frame);
        frame.extend_from_slice(first);

        let rest: Vec<&[u8]> = chunks.collect();
        for (i, chunk) in rest.iter().enumerate() {
            let last = i + 1 == rest.len();
            frame.extend_from_slice(&Self::create_continuation_frame(stream_id, chunk, last));
        }
        frame
    }

    /// Create a DATA frame
    pub fn create_data_frame(stream_id: u32, payload: &[u8], end_stream: bool) -> Vec<u8> {
        let flags_byte = if end_stream { flags::END_STREAM } else { 0x0 };
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        H2FrameHeader::new(payload.len() as u32, frame_type::DATA, flags_byte, stream_id).encode(&mut frame);
        frame.extend_from_slice(payload);
        frame
    }

    /// Create a RST_STREAM frame
    pub fn create_rst_stream(stream_id: u32, error_code: u32) -> Vec<u8> {
        let mut frame = Vec::with_capacity(13);
        H2FrameHeader::new(4, frame_type::RST_STREAM, 0x0, stream_id).encode(&mut frame);
        frame.extend_from_slice(&error_code.to_be_bytes());
        frame
    }

    /// Create a GOAWAY frame
    pub fn create_goaway(last_stream_id: u32, error_code: u32) -> Vec<u8> {
        let mut frame = Vec::with_capacity(17);
        H2FrameHeader::new(8, frame_type::GOAWAY, 0x0, 0).encode(&mut frame);
        frame.extend_from_slice(&(last_stream_id & 0x7FFF_FFFF).to_be_bytes());
        frame.extend_from_slice(&error_code.to_be_bytes());
        frame
    }

    pub fn create_settings_ack() -> Vec<u8> {
        vec![
            0, 0, 0,  // Length: 0
            frame_type::SETTINGS,
            flags::ACK,
            0, 0, 0, 0,
        ]
    }

    /// Create a SETTINGS frame carrying `(identifier, value)` entries.
    /// An empty slice produces the empty SETTINGS frame (use defaults).
    pub fn create_settings(entries: &[(u16, u32)]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + entries.len() * 6);
        H2FrameHeader::new((entries.len() * 6) as u32, frame_type::SETTINGS, 0x0, 0).encode(&mut frame);
        for (id, value) in entries {
            frame.extend_from_slice(&id.to_be_bytes());
            frame.extend_from_slice(&value.to_be_bytes());
        }
        frame
    }

    /// Echo a PING payload back with ACK set.
    pub fn create_ping_ack(data: [u8; 8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(17);
        H2FrameHeader::new(8, frame_type::PING, flags::ACK, 0).encode(&mut frame);
        frame.extend_from_slice(&data);
        frame
    }

    /// Stream 0 credits the connection window.
    pub fn create_window_update(stream_id: u32, increment: u32) -> Vec<u8> {
        let mut frame = Vec::with_capacity(13);
        H2FrameHeader::new(4, frame_type::WINDOW_UPDATE, 0x0, stream_id).encode(&mut frame);
        frame.extend_from_slice(&(increment & 0x7FFF_FFFF).to_be_bytes());
        frame
    }

    pub fn create_continuation_frame(stream_id: u32, payload: &[u8], end_headers: bool) -> Vec<u8> {
        let flags_byte = if end_headers { flags::END_HEADERS } else { 0x0 };
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        H2FrameHeader::new(payload.len() as u32, frame_type::CONTINUATION, flags_byte, stream_id)
            .encode(&mut frame);
        frame.extend_from_slice(payload);
        frame
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Strip DATA padding. Takes ownership of the payload Vec to avoid re-copying.
fn extract_data_payload(header: &H2FrameHeader, mut payload: Vec<u8>) -> Result<Vec<u8>, FrameError> {
    if header.flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(FrameError::TooShort("PADDED DATA"));
    }
    let pad_length = payload[0] as usize;
    if pad_length >= payload.len() {
        return Err(FrameError::InvalidPadding("DATA"));
    }
    payload.truncate(payload.len() - pad_length);
    payload.remove(0);
    Ok(payload)
}

/// Strip HEADERS padding and priority fields, leaving the header block fragment.
fn extract_headers_payload(header: &H2FrameHeader, mut payload: Vec<u8>) -> Result<Vec<u8>, FrameError> {
    let mut offset = 0;
    let mut end = payload.len();

    if header.flags & flags::PADDED != 0 {
        if payload.is_empty() {
            return Err(FrameError::TooShort("PADDED HEADERS"));
        }
        let pad_length = payload[0] as usize;
        offset = 1;
        if pad_length > payload.len() - offset {
            return Err(FrameError::InvalidPadding("HEADERS"));
        }
        end = payload.len() - pad_length;
    }

    if header.flags & flags::PRIORITY != 0 {
        if end - offset < 5 {
            return Err(FrameError::TooShort("PRIORITY HEADERS"));
        }
        // stream dependency and weight
        offset += 5;
    }

    if offset == 0 && end == payload.len() {
        return Ok(payload);
    }

    payload.truncate(end);
    payload.drain(..offset);
    Ok(payload)
}
