//! Command line and per-session configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;

/// Default SETTINGS_MAX_CONCURRENT_STREAMS advertised to every client.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;

/// Default number of worker threads.
pub const DEFAULT_THREADS: usize = 4;

/// Default size of each connection's read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Parser, Debug, Clone)]
#[command(name = "h2-dispatch")]
#[command(about = "Cleartext HTTP/2 server dispatching requests by path", long_about = None)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Address to bind
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Worker threads; each owns the connections assigned to it
    #[arg(short, long, default_value_t = DEFAULT_THREADS)]
    pub threads: usize,

    /// SETTINGS_MAX_CONCURRENT_STREAMS sent to clients
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_STREAMS)]
    pub max_concurrent_streams: u32,

    /// Bytes read from a socket at a time
    #[arg(long, default_value_t = DEFAULT_READ_BUFFER_SIZE)]
    pub read_buffer_size: usize,
}

impl ServerConfig {
    /// Defaults for everything except the port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            threads: DEFAULT_THREADS,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig { max_concurrent_streams: self.max_concurrent_streams }
    }
}

/// Policy applied to each new connection's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_concurrent_streams: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS }
    }
}
