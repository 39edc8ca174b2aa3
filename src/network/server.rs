//! Server dispatcher
//!
//! Owns the backend side of one channel: accepts a single client, then
//! answers each request with exactly one response, in arrival order, until
//! the client hangs up.

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use super::connection::{Connection, ConnectionError, ConnectionStats};
use super::handler::{dispatch, RequestHandler};
use super::transport::{ChannelEndpoint, ChannelListener, ServerStream};
use super::NetworkConfig;
use crate::protocol::{Message, Request};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Dispatcher already served a session")]
    AlreadyServed,
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Source of one inbound connection
#[async_trait]
pub trait Acceptor: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&mut self) -> io::Result<Self::Stream>;
}

#[async_trait]
impl Acceptor for ChannelListener {
    type Stream = ServerStream;

    async fn accept(&mut self) -> io::Result<ServerStream> {
        ChannelListener::accept(self).await
    }
}

/// A stream that is already connected, handed out once
pub struct AcceptedStream<S>(Option<S>);

impl<S> AcceptedStream<S> {
    pub fn new(stream: S) -> Self {
        Self(Some(stream))
    }
}

#[async_trait]
impl<S> Acceptor for AcceptedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Stream = S;

    async fn accept(&mut self) -> io::Result<S> {
        self.0
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream already taken"))
    }
}

/// Server state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    Connected,
    Dispatching,
    Closed,
}

/// What happened during one session
#[derive(Debug, Default, Clone)]
pub struct SessionSummary {
    /// Requests answered
    pub requests: u64,
    /// Requests whose handler failed and were answered with `Rejected`
    pub handler_failures: u64,
    /// The client hung up in the middle of a frame
    pub disconnected_mid_frame: bool,
    /// Connection statistics at session end
    pub stats: ConnectionStats,
}

/// Serves exactly one client connection
pub struct ServerDispatcher<A> {
    /// Where the connection comes from
    acceptor: A,
    /// Current state
    state: ServerState,
    /// Largest frame accepted from the client
    max_frame_size: usize,
}

impl<A: Acceptor> ServerDispatcher<A> {
    /// Create a new server dispatcher
    pub fn new(acceptor: A, config: &NetworkConfig) -> Self {
        Self {
            acceptor,
            state: ServerState::Listening,
            max_frame_size: config.max_frame_size,
        }
    }

    /// Get the current state
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Wait for a client, then serve it until it disconnects.
    ///
    /// A client hang-up ends the session normally. Malformed frames and
    /// write failures close the channel and are returned as errors. Handler
    /// failures are answered with `Rejected` and the session goes on.
    pub async fn accept_and_serve<H>(&mut self, handler: Arc<H>) -> ServerResult<SessionSummary>
    where
        H: RequestHandler + ?Sized,
    {
        if self.state != ServerState::Listening {
            return Err(ServerError::AlreadyServed);
        }

        let stream = match self.acceptor.accept().await {
            Ok(stream) => stream,
            Err(e) => {
                self.state = ServerState::Closed;
                return Err(e.into());
            }
        };
        self.state = ServerState::Connected;
        tracing::info!("Client connected");

        let mut conn = Connection::new(stream).with_max_frame_size(self.max_frame_size);
        let result = self.serve(&mut conn, handler).await;

        if let Err(e) = conn.shutdown().await {
            tracing::debug!("Shutdown at session end failed: {}", e);
        }
        self.state = ServerState::Closed;

        match &result {
            Ok(summary) => tracing::info!(
                "Session ended after {} requests ({} handler failures)",
                summary.requests,
                summary.handler_failures
            ),
            Err(e) => tracing::error!("Session aborted: {}", e),
        }
        result
    }

    async fn serve<S, H>(
        &mut self,
        conn: &mut Connection<S>,
        handler: Arc<H>,
    ) -> ServerResult<SessionSummary>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        H: RequestHandler + ?Sized,
    {
        let mut summary = SessionSummary::default();

        loop {
            let request: Request = match conn.recv().await {
                Ok(request) => request,
                Err(e) if e.is_disconnect() => {
                    if !e.is_clean_close() {
                        tracing::warn!("Client disconnected mid-frame: {}", e);
                        summary.disconnected_mid_frame = true;
                    }
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            self.state = ServerState::Dispatching;
            tracing::debug!("Dispatching {} (tag {})", request.name(), request.tag());

            let response = match dispatch(handler.clone(), request).await {
                Ok(response) => response,
                Err(failure) => {
                    summary.handler_failures += 1;
                    failure.into_response()
                }
            };

            conn.send(&response).await?;
            summary.requests += 1;
            self.state = ServerState::Connected;
        }

        summary.stats = conn.stats().clone();
        Ok(summary)
    }
}

impl ServerDispatcher<ChannelListener> {
    /// Bind a named channel. The client is accepted later, by
    /// [`ServerDispatcher::accept_and_serve`].
    pub async fn bind(
        endpoint: &ChannelEndpoint,
        config: &NetworkConfig,
    ) -> ServerResult<Self> {
        let listener = ChannelListener::bind(endpoint).await?;
        tracing::info!("Listening on channel {}", endpoint.name());
        Ok(Self::new(listener, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DeleteElements, Response};
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    fn delete() -> Request {
        Request::DeleteElements(DeleteElements)
    }

    fn session(stream: DuplexStream) -> ServerDispatcher<AcceptedStream<DuplexStream>> {
        ServerDispatcher::new(AcceptedStream::new(stream), &NetworkConfig::default())
    }

    #[tokio::test]
    async fn test_server_creation() {
        let (a, _b) = duplex(64);
        let server = session(a);
        assert_eq!(server.state(), ServerState::Listening);
    }

    #[tokio::test]
    async fn test_pairs_in_order() {
        let (a, b) = duplex(64);
        let mut server = session(a);

        let counter = Arc::new(std::sync::atomic::AtomicI32::new(0));
        let handler = {
            let counter = counter.clone();
            Arc::new(move |_request: Request| {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move { Ok(Response::success(n)) }
            })
        };

        let client = tokio::spawn(async move {
            let mut conn = Connection::new(b);
            let mut seen = Vec::new();
            for _ in 0..5 {
                conn.send(&delete()).await.unwrap();
                let response: Response = conn.recv().await.unwrap();
                seen.push(response);
            }
            seen
        });

        let summary = server.accept_and_serve(handler).await.unwrap();
        let seen = client.await.unwrap();

        let expected: Vec<Response> = (0..5).map(Response::success).collect();
        assert_eq!(seen, expected);
        assert_eq!(summary.requests, 5);
        assert_eq!(summary.handler_failures, 0);
        assert!(!summary.disconnected_mid_frame);
        assert_eq!(server.state(), ServerState::Closed);
    }

    #[tokio::test]
    async fn test_handler_failure_keeps_session() {
        let (a, b) = duplex(64);
        let mut server = session(a);

        let handler = Arc::new(|_request: Request| async {
            Err::<Response, _>(anyhow::anyhow!("no selection"))
        });

        let client = tokio::spawn(async move {
            let mut conn = Connection::new(b);
            conn.send(&delete()).await.unwrap();
            let first: Response = conn.recv().await.unwrap();
            conn.send(&delete()).await.unwrap();
            let second: Response = conn.recv().await.unwrap();
            (first, second)
        });

        let summary = server.accept_and_serve(handler).await.unwrap();
        let (first, second) = client.await.unwrap();

        assert_eq!(first, Response::rejected("no selection"));
        assert_eq!(second, Response::rejected("no selection"));
        assert_eq!(summary.requests, 2);
        assert_eq!(summary.handler_failures, 2);
    }

    #[tokio::test]
    async fn test_unknown_tag_aborts_session() {
        let (a, mut b) = duplex(64);
        let mut server = session(a);
        let handler = Arc::new(|_request: Request| async { Ok(Response::success(1)) });

        b.write_all(&[4, 0, 0, 0, 0xE7, 0x03, 0, 0]).await.unwrap();

        let err = server.accept_and_serve(handler).await.unwrap_err();
        assert!(matches!(err, ServerError::Connection(ref e) if !e.is_disconnect()));
        assert_eq!(server.state(), ServerState::Closed);
    }

    #[tokio::test]
    async fn test_mid_frame_disconnect_ends_session() {
        let (a, mut b) = duplex(64);
        let mut server = session(a);
        let handler = Arc::new(|_request: Request| async { Ok(Response::success(1)) });

        b.write_all(&[4, 0]).await.unwrap();
        drop(b);

        let summary = server.accept_and_serve(handler).await.unwrap();
        assert_eq!(summary.requests, 0);
        assert!(summary.disconnected_mid_frame);
    }

    #[tokio::test]
    async fn test_write_failure_ends_session_with_error() {
        let (a, mut b) = duplex(64);
        let mut server = session(a);
        let handled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let handler = {
            let handled = handled.clone();
            Arc::new(move |_request: Request| {
                handled.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(Response::success(1)) }
            })
        };

        // The client sends one request and goes away before the answer
        b.write_all(&[4, 0, 0, 0, 0, 0, 0, 0]).await.unwrap();
        drop(b);

        let err = server.accept_and_serve(handler).await.unwrap_err();
        assert!(matches!(err, ServerError::Connection(ref e) if e.is_disconnect()));
        assert!(handled.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(server.state(), ServerState::Closed);
    }

    #[tokio::test]
    async fn test_serves_only_once() {
        let (a, b) = duplex(64);
        let mut server = session(a);
        drop(b);

        let handler = Arc::new(|_request: Request| async { Ok(Response::success(1)) });
        server.accept_and_serve(handler.clone()).await.unwrap();

        let err = server.accept_and_serve(handler).await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadyServed));
    }
}
