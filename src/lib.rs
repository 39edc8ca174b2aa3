//! PipeLink - typed commands between a backend and its UI process
//!
//! Two processes on one machine exchange typed requests and responses over
//! a single local byte channel (Unix domain socket or Windows named pipe).
//!
//! - [`protocol`]: frame codec and the request/response tag registries
//! - [`network`]: client and server dispatchers over a named channel
//! - [`config`]: TOML configuration
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pipelink::network::{ChannelEndpoint, ClientDispatcher, NetworkConfig, ServerDispatcher};
//! use pipelink::protocol::{DeleteElements, Request, Response};
//!
//! let config = NetworkConfig::default();
//! let endpoint = ChannelEndpoint::new("demo", None);
//!
//! // Backend
//! let mut server = ServerDispatcher::bind(&endpoint, &config).await?;
//! let handler = Arc::new(|_request: Request| async { Ok(Response::success(3)) });
//! tokio::spawn(async move { server.accept_and_serve(handler).await });
//!
//! // UI
//! let mut client = ClientDispatcher::new(&config);
//! client.connect(&endpoint)?;
//! let response = client.call(&Request::DeleteElements(DeleteElements)).await?;
//! ```

pub mod config;
pub mod network;
pub mod protocol;
