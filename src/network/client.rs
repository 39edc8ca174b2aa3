//! Client dispatcher
//!
//! Owns the UI side of one channel. `connect` starts the connection attempt
//! in the background and returns at once; the first operation that needs
//! the connection waits for it, bounded by the connect timeout.

use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use super::connection::{Connection, ConnectionError, ConnectionResult, ConnectionStats};
use super::transport::{self, ChannelEndpoint, ClientStream};
use super::NetworkConfig;
use crate::protocol::{Request, Response};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Connect already called")]
    AlreadyConnecting,

    #[error("Not connected")]
    NotConnected,

    #[error("Dispatcher closed")]
    Closed,
}

impl ClientError {
    /// True when the peer went away while a call was in flight
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ClientError::Connection(e) if e.is_disconnect())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unconnected,
    Connecting,
    Connected,
    Closed,
}

/// One outbound channel, one request in flight at a time
pub struct ClientDispatcher<S> {
    /// Current state
    state: ClientState,
    /// Background connection attempt, until it resolves
    pending: Option<JoinHandle<Result<S, String>>>,
    /// Established connection
    connection: Option<Connection<S>>,
    /// Upper bound on the connection attempt
    connect_timeout: Duration,
    /// Pause between attempts while the peer is not listening
    retry_interval: Duration,
    /// Largest frame accepted from the peer
    max_frame_size: usize,
}

impl<S> ClientDispatcher<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create a new client dispatcher
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            state: ClientState::Unconnected,
            pending: None,
            connection: None,
            connect_timeout: config.connect_timeout(),
            retry_interval: config.retry_interval(),
            max_frame_size: config.max_frame_size,
        }
    }

    /// Start connecting through `connector` without waiting for it.
    ///
    /// Must be called from within a Tokio runtime, and only once.
    pub fn connect_with<F>(&mut self, connector: F) -> ClientResult<()>
    where
        F: Future<Output = io::Result<S>> + Send + 'static,
    {
        match self.state {
            ClientState::Unconnected => {}
            ClientState::Closed => return Err(ClientError::Closed),
            ClientState::Connecting | ClientState::Connected => {
                return Err(ClientError::AlreadyConnecting)
            }
        }

        let timeout = self.connect_timeout;
        self.pending = Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, connector).await {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
            }
        }));
        self.state = ClientState::Connecting;

        Ok(())
    }

    /// Write one request
    pub async fn send_request(&mut self, request: &Request) -> ClientResult<()> {
        let result = self.connection().await?.send(request).await;
        self.settle(result)
    }

    /// Read one response. Responses arrive in request order.
    pub async fn receive_response(&mut self) -> ClientResult<Response> {
        let result = self.connection().await?.recv::<Response>().await;
        self.settle(result)
    }

    /// Send one request and wait for its response
    pub async fn call(&mut self, request: &Request) -> ClientResult<Response> {
        self.send_request(request).await?;
        self.receive_response().await
    }

    /// Release the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        if let Some(mut conn) = self.connection.take() {
            if let Err(e) = conn.shutdown().await {
                tracing::debug!("Shutdown after close failed: {}", e);
            }
        }
        if self.state != ClientState::Closed {
            tracing::debug!("Client dispatcher closed");
        }
        self.state = ClientState::Closed;
    }

    /// Get the current state
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Statistics of the established connection
    pub fn stats(&self) -> Option<&ConnectionStats> {
        self.connection.as_ref().map(Connection::stats)
    }

    /// Wait for the connection attempt if it is still running
    async fn connection(&mut self) -> ClientResult<&mut Connection<S>> {
        match self.state {
            ClientState::Unconnected => return Err(ClientError::NotConnected),
            ClientState::Closed => return Err(ClientError::Closed),
            ClientState::Connecting | ClientState::Connected => {}
        }

        if let Some(pending) = self.pending.as_mut() {
            let outcome = match pending.await {
                Ok(outcome) => outcome,
                Err(e) => Err(format!("connect task failed: {}", e)),
            };
            self.pending = None;

            match outcome {
                Ok(stream) => {
                    tracing::info!("Connected");
                    self.connection =
                        Some(Connection::new(stream).with_max_frame_size(self.max_frame_size));
                    self.state = ClientState::Connected;
                }
                Err(reason) => {
                    tracing::warn!("Connection failed: {}", reason);
                    self.state = ClientState::Closed;
                    return Err(ClientError::ConnectionFailed(reason));
                }
            }
        }

        self.connection.as_mut().ok_or(ClientError::Closed)
    }

    /// Any connection error ends the session
    fn settle<T>(&mut self, result: ConnectionResult<T>) -> ClientResult<T> {
        result.map_err(|e| {
            if e.is_disconnect() {
                tracing::warn!("Peer disconnected: {}", e);
            } else {
                tracing::error!("Connection error: {}", e);
            }
            self.connection = None;
            self.state = ClientState::Closed;
            ClientError::Connection(e)
        })
    }
}

impl ClientDispatcher<ClientStream> {
    /// Start connecting to a named channel without waiting for it
    pub fn connect(&mut self, endpoint: &ChannelEndpoint) -> ClientResult<()> {
        let endpoint = endpoint.clone();
        let retry_interval = self.retry_interval;
        tracing::info!("Connecting to channel {}", endpoint.name());

        self.connect_with(async move {
            transport::connect_with_retry(&endpoint, retry_interval).await
        })
    }
}

impl<S> Drop for ClientDispatcher<S> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}
