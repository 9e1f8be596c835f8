//! TCP server: one acceptor, connections sharded across worker threads.
//!
//! Each worker thread runs a current-thread tokio runtime inside a
//! `LocalSet` and owns a [`ConnectionRegistry`]. An accepted socket is
//! handed to one worker round-robin and stays there for its lifetime, so
//! sessions and stream state are never shared between threads.
//!
//! Per connection, a read loop feeds the registry and a writer task drains
//! an unbounded channel, so the session's send callback never blocks.

use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{debug, error, info, warn};

use crate::config::{ServerConfig, SessionConfig};
use crate::connection::{ConnectionId, ConnectionRegistry, Transport};
use crate::error::ServerError;
use crate::handler::HandlerRegistry;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
    ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Message for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Data(Bytes),
    Shutdown,
}

/// [`Transport`] that hands bytes to the connection's writer task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.tx
            .send(Outbound::Data(Bytes::copy_from_slice(data)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection writer has exited"))?;
        Ok(data.len())
    }

    fn shutdown(&mut self) {
        let _ = self.tx.send(Outbound::Shutdown);
    }
}

struct Accepted {
    id: ConnectionId,
    stream: std::net::TcpStream,
    peer: SocketAddr,
}

struct Worker {
    index: usize,
    tx: mpsc::UnboundedSender<Accepted>,
    alive: bool,
}

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    handlers: Arc<HandlerRegistry>,
}

impl Server {
    /// Bind the listening socket with the built-in routes.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        if config.threads == 0 {
            return Err(ServerError::NoWorkers);
        }
        let listener = TcpListener::bind(config.listen_addr()).await?;
        info!(address = %listener.local_addr()?, threads = config.threads, "listening");
        Ok(Self {
            listener,
            config,
            handlers: Arc::new(HandlerRegistry::builtin()),
        })
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the workers and accept connections until every worker is gone.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut workers = Vec::with_capacity(self.config.threads);
        for index in 0..self.config.threads {
            workers.push(spawn_worker(
                index,
                Arc::clone(&self.handlers),
                self.config.session(),
                self.config.read_buffer_size,
            )?);
        }

        let mut next_worker = 0usize;
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Typically EMFILE; back off instead of spinning.
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            let stream = match stream.into_std() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(%peer, error = %e, "could not detach accepted socket");
                    continue;
                }
            };

            let mut pending = Some(Accepted { id: next_connection_id(), stream, peer });
            let count = workers.len();
            for _ in 0..count {
                let worker = &mut workers[next_worker % count];
                next_worker = next_worker.wrapping_add(1);
                if !worker.alive {
                    continue;
                }
                let Some(accepted) = pending.take() else { break };
                match worker.tx.send(accepted) {
                    Ok(()) => break,
                    Err(mpsc::error::SendError(accepted)) => {
                        error!(worker = worker.index, "worker exited");
                        worker.alive = false;
                        pending = Some(accepted);
                    }
                }
            }

            if pending.is_some() {
                let last = workers.last().map(|w| w.index).unwrap_or_default();
                return Err(ServerError::WorkerGone(last));
            }
        }
    }
}

fn spawn_worker(
    index: usize,
    handlers: Arc<HandlerRegistry>,
    config: SessionConfig,
    read_buffer_size: usize,
) -> Result<Worker, ServerError> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name(format!("h2-worker-{}", index))
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(worker = index, error = %e, "failed to start worker runtime");
                    return;
                }
            };
            let local = LocalSet::new();
            local.block_on(&runtime, worker_loop(index, rx, handlers, config, read_buffer_size));
        })?;
    Ok(Worker { index, tx, alive: true })
}

async fn worker_loop(
    index: usize,
    mut rx: mpsc::UnboundedReceiver<Accepted>,
    handlers: Arc<HandlerRegistry>,
    config: SessionConfig,
    read_buffer_size: usize,
) {
    let registry = Rc::new(RefCell::new(ConnectionRegistry::new(handlers, config)));
    debug!(worker = index, "worker started");
    while let Some(accepted) = rx.recv().await {
        tokio::task::spawn_local(serve_connection(accepted, Rc::clone(&registry), read_buffer_size));
    }
    debug!(worker = index, "worker stopped");
}

async fn serve_connection(
    accepted: Accepted,
    registry: Rc<RefCell<ConnectionRegistry<ChannelTransport>>>,
    read_buffer_size: usize,
) {
    let Accepted { id, stream, peer } = accepted;
    let stream = match TcpStream::from_std(stream) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(conn = %id, %peer, error = %e, "could not register socket");
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::task::spawn_local(write_loop(id, writer, rx));

    // The registry borrow must end before any await.
    let connected = registry.borrow_mut().connect(id, ChannelTransport::new(tx));
    if let Err(e) = connected {
        warn!(conn = %id, %peer, error = %e, "connection rejected");
        let _ = writer_task.await;
        return;
    }
    debug!(conn = %id, %peer, "serving connection");

    let mut buf = BytesMut::with_capacity(read_buffer_size);
    loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                debug!(conn = %id, "peer closed connection");
                break;
            }
            Ok(_) => {
                let result = registry.borrow_mut().receive(id, &buf);
                buf.clear();
                if result.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(conn = %id, error = %e, "read failed");
                break;
            }
        }
    }

    let _ = registry.borrow_mut().disconnect(id);
    let _ = writer_task.await;
}

async fn write_loop(id: ConnectionId, mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(message) = rx.recv().await {
        match message {
            Outbound::Data(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    debug!(conn = %id, error = %e, "write failed");
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    let _ = writer.shutdown().await;
}
