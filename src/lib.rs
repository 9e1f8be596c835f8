//! h2-dispatch: per-connection, per-stream HTTP/2 request dispatch
//!
//! A cleartext HTTP/2 server core. Each accepted connection gets its own
//! protocol session; each request stream is accumulated into a
//! [`StreamState`], routed by its `:path` to a [`Handler`], and answered with
//! a response body that the session pulls in flow-control-sized pieces.
//!
//! # Layers
//!
//! - [`h2_codec`]: sans-I/O frame parser and frame builders
//! - [`hpack`]: header compression via fluke-hpack
//! - [`session`]: the protocol engine, driven through [`SessionCallbacks`]
//! - [`dispatch`]: the callbacks that build requests and run handlers
//! - [`connection`]: sessions keyed by connection, bound to a [`Transport`]
//! - [`server`]: tokio listener with connections sharded across workers
//!
//! # Quick Start
//!
//! ```rust
//! use std::io;
//! use std::sync::Arc;
//! use h2_dispatch::{ConnectionId, ConnectionRegistry, HandlerRegistry, SessionConfig, Transport};
//!
//! struct Buffer(Vec<u8>);
//!
//! impl Transport for Buffer {
//!     fn send(&mut self, data: &[u8]) -> io::Result<usize> {
//!         self.0.extend_from_slice(data);
//!         Ok(data.len())
//!     }
//!     fn shutdown(&mut self) {}
//! }
//!
//! let mut registry = ConnectionRegistry::new(Arc::new(HandlerRegistry::builtin()), SessionConfig::default());
//! registry.connect(ConnectionId(1), Buffer(Vec::new())).unwrap();
//!
//! // Client preface followed by an empty SETTINGS frame
//! let mut input = h2_dispatch::CONNECTION_PREFACE.to_vec();
//! input.extend_from_slice(&[0, 0, 0, 4, 0, 0, 0, 0, 0]);
//! registry.receive(ConnectionId(1), &input).unwrap();
//! assert_eq!(registry.disconnect(ConnectionId(1)), Some(0));
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod flow_control;
pub mod h2_codec;
pub mod handler;
pub mod hpack;
pub mod server;
pub mod session;
pub mod stream;

pub use config::{ServerConfig, SessionConfig};
pub use connection::{ConnectionId, ConnectionRegistry, ConnectionSession, Transport};
pub use dispatch::DispatchPipeline;
pub use error::{CallbackError, ConnectionError, FrameError, HandlerError, ServerError, SessionError};
pub use flow_control::FlowControl;
pub use h2_codec::{
    H2Codec, H2Event, H2FrameHeader,
    CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE, MAX_HEADER_BLOCK_SIZE,
    error_code, flags, frame_type, settings_id,
};
pub use handler::{Handler, HandlerRegistry, Route};
pub use hpack::{H2Header, HpackDecoder, HpackEncoder};
pub use server::{ChannelTransport, Server};
pub use session::{
    DataFlags, DataProvider, FrameInfo, H2Session, HeadersCategory, Session, SessionCallbacks, SettingsEntry,
};
pub use stream::{provide_response, StreamState};
