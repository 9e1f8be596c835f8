//! Error types for every layer of the dispatcher.

use std::io;

use thiserror::Error;

use crate::connection::ConnectionId;
use crate::h2_codec::error_code;

/// Errors raised while parsing inbound frames or header blocks.
///
/// Every variant is fatal to the connection; [`FrameError::error_code`]
/// gives the code to report in the closing GOAWAY.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid connection preface")]
    InvalidPreface,
    #[error("frame of {length} bytes exceeds max frame size {max}")]
    FrameTooLarge { length: u32, max: u32 },
    #[error("header block too large ({size} bytes, max {max})")]
    HeaderBlockTooLarge { size: usize, max: usize },
    #[error("CONTINUATION for stream {got} but pending headers on stream {pending}")]
    ContinuationMismatch { got: u32, pending: u32 },
    #[error("expected CONTINUATION for stream {pending}, got frame type {frame_type:#x}")]
    ContinuationInterrupted { pending: u32, frame_type: u8 },
    #[error("unexpected CONTINUATION frame for stream {0}")]
    UnexpectedContinuation(u32),
    #[error("{0} frame too short")]
    TooShort(&'static str),
    #[error("invalid padding length in {0} frame")]
    InvalidPadding(&'static str),
    #[error("SETTINGS payload of {0} bytes is not a whole number of entries")]
    SettingsLength(usize),
    #[error("HPACK decode error: {0}")]
    Compression(String),
}

impl FrameError {
    pub fn error_code(&self) -> u32 {
        match self {
            FrameError::FrameTooLarge { .. } | FrameError::TooShort(_) | FrameError::SettingsLength(_) => {
                error_code::FRAME_SIZE_ERROR
            }
            FrameError::Compression(_) => error_code::COMPRESSION_ERROR,
            _ => error_code::PROTOCOL_ERROR,
        }
    }
}

/// Failure reported by a [`SessionCallbacks`](crate::session::SessionCallbacks)
/// implementation. The engine treats it as fatal to the session.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("transport write failed: {0}")]
    Transport(#[from] io::Error),
    #[error("callback failed: {0}")]
    Failed(String),
}

/// Errors produced by the protocol engine session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("callback failure: {0}")]
    Callback(#[from] CallbackError),
    #[error("flow control window violated")]
    FlowControl,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("stream {0} not found")]
    StreamNotFound(u32),
    #[error("response already submitted on stream {0}")]
    AlreadyResponded(u32),
}

impl SessionError {
    /// HTTP/2 error code to send in GOAWAY when this error ends the session.
    pub fn error_code(&self) -> u32 {
        match self {
            SessionError::Frame(e) => e.error_code(),
            SessionError::FlowControl => error_code::FLOW_CONTROL_ERROR,
            SessionError::Protocol(_) => error_code::PROTOCOL_ERROR,
            _ => error_code::INTERNAL_ERROR,
        }
    }
}

/// A handler could not produce its response. Never fatal to the connection.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("failed to submit response: {0}")]
    Submit(#[from] SessionError),
}

/// Errors surfaced by the connection registry to the transport.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection {0} is already registered")]
    Duplicate(ConnectionId),
    #[error("no session registered for connection {0}")]
    Unknown(ConnectionId),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors from the listening server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("at least one worker thread is required")]
    NoWorkers,
    #[error("worker {0} is no longer accepting connections")]
    WorkerGone(usize),
}
