//! Network module - Drives the protocol over a local byte channel
//!
//! Provides:
//! - Named channel endpoints (Unix domain sockets / Windows named pipes)
//! - Client dispatcher for the UI side
//! - Server dispatcher for the backend side
//! - Framed connections over any async byte stream

mod client;
mod connection;
mod handler;
mod server;
pub mod transport;

pub use client::*;
pub use connection::*;
pub use handler::*;
pub use server::*;
pub use transport::{ChannelEndpoint, ChannelListener, ClientStream, ServerStream};

use std::time::Duration;

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Runtime settings shared by both dispatchers
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Upper bound on a client connection attempt in milliseconds
    pub connect_timeout_ms: u64,
    /// Pause between attempts while the peer is not listening yet
    pub retry_interval_ms: u64,
    /// Largest frame payload accepted from the peer
    pub max_frame_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            retry_interval_ms: 50,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}
