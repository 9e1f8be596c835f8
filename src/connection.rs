//! Per-connection sessions and the registry that routes transport events.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::dispatch::DispatchPipeline;
use crate::error::{ConnectionError, SessionError};
use crate::h2_codec::error_code;
use crate::handler::HandlerRegistry;
use crate::session::{H2Session, SettingsEntry};

/// Outbound half of a client connection.
pub trait Transport {
    /// Queue `data` for writing without blocking. Returns the bytes accepted.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Close the connection once queued data is written.
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One HTTP/2 session bound to one transport connection.
pub struct ConnectionSession<T: Transport> {
    id: ConnectionId,
    h2: H2Session<DispatchPipeline<T>>,
}

impl<T: Transport> ConnectionSession<T> {
    /// Create the server session and queue our SETTINGS.
    pub fn new(
        id: ConnectionId,
        transport: T,
        handlers: Arc<HandlerRegistry>,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let mut h2 = H2Session::server(DispatchPipeline::new(id, transport, handlers));
        h2.submit_settings(&[SettingsEntry::max_concurrent_streams(config.max_concurrent_streams)])?;
        Ok(Self { id, h2 })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn pipeline(&self) -> &DispatchPipeline<T> {
        self.h2.callbacks()
    }

    pub fn transport(&self) -> &T {
        self.h2.callbacks().transport()
    }

    pub fn h2(&self) -> &H2Session<DispatchPipeline<T>> {
        &self.h2
    }

    /// Feed inbound bytes, then flush whatever the engine produced.
    pub fn receive(&mut self, data: &[u8]) -> Result<usize, SessionError> {
        let consumed = self.h2.mem_recv(data)?;
        self.h2.send()?;
        Ok(consumed)
    }

    pub fn flush(&mut self) -> Result<(), SessionError> {
        self.h2.send()
    }

    /// Report a fatal error to the peer and tear the session down.
    fn abort(mut self, err: &SessionError) {
        self.h2.session_mut().submit_goaway(err.error_code());
        if let Err(e) = self.h2.send() {
            debug!(conn = %self.id, error = %e, "GOAWAY not delivered");
        }
        self.close(err.error_code());
    }

    /// Close every stream with `code` and shut the transport down. Returns
    /// the number of stream states released by the teardown.
    fn close(mut self, code: u32) -> u64 {
        let released_before = self.h2.callbacks().streams_released();
        let closed = self.h2.terminate(code);
        let pipeline = self.h2.callbacks_mut();
        let released = pipeline.streams_released() - released_before;
        pipeline.transport_mut().shutdown();
        if pipeline.live_streams() != 0 {
            warn!(conn = %self.id, live = pipeline.live_streams(), "stream state outlived its session");
        }
        info!(
            conn = %self.id,
            streams_closed = closed,
            released,
            requests = pipeline.handlers_invoked(),
            "connection closed"
        );
        released
    }
}

/// Live sessions keyed by connection. One registry per worker thread.
pub struct ConnectionRegistry<T: Transport> {
    sessions: HashMap<ConnectionId, ConnectionSession<T>>,
    handlers: Arc<HandlerRegistry>,
    config: SessionConfig,
}

impl<T: Transport> ConnectionRegistry<T> {
    pub fn new(handlers: Arc<HandlerRegistry>, config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            handlers,
            config,
        }
    }

    /// Register a new connection and send the server preface.
    pub fn connect(&mut self, id: ConnectionId, transport: T) -> Result<(), ConnectionError> {
        if self.sessions.contains_key(&id) {
            return Err(ConnectionError::Duplicate(id));
        }

        let mut session = ConnectionSession::new(id, transport, Arc::clone(&self.handlers), &self.config)?;
        if let Err(e) = session.flush() {
            session.abort(&e);
            return Err(e.into());
        }
        self.sessions.insert(id, session);
        info!(conn = %id, "connection established");
        Ok(())
    }

    /// Route inbound bytes to the connection's session.
    ///
    /// A session error is fatal: the peer gets GOAWAY, the entry is removed,
    /// and the transport is shut down before the error is returned.
    pub fn receive(&mut self, id: ConnectionId, data: &[u8]) -> Result<usize, ConnectionError> {
        let Some(session) = self.sessions.get_mut(&id) else {
            warn!(conn = %id, bytes = data.len(), "data for unregistered connection");
            return Err(ConnectionError::Unknown(id));
        };

        match session.receive(data) {
            Ok(consumed) => Ok(consumed),
            Err(e) => {
                warn!(conn = %id, error = %e, "session failed, closing connection");
                if let Some(session) = self.sessions.remove(&id) {
                    session.abort(&e);
                }
                Err(e.into())
            }
        }
    }

    /// Retry output the transport did not accept earlier.
    pub fn flush(&mut self, id: ConnectionId) -> Result<(), ConnectionError> {
        let session = self.sessions.get_mut(&id).ok_or(ConnectionError::Unknown(id))?;
        if let Err(e) = session.flush() {
            warn!(conn = %id, error = %e, "flush failed, closing connection");
            if let Some(session) = self.sessions.remove(&id) {
                session.abort(&e);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop the connection's session, closing its open streams with CANCEL.
    /// Returns how many stream states were released, or `None` if the
    /// connection was not registered.
    pub fn disconnect(&mut self, id: ConnectionId) -> Option<u64> {
        match self.sessions.remove(&id) {
            Some(session) => Some(session.close(error_code::CANCEL)),
            None => {
                debug!(conn = %id, "disconnect for unregistered connection");
                None
            }
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionSession<T>> {
        self.sessions.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }
}
