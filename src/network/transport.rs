//! Named local channels
//!
//! - Unix: Unix domain socket at `<socket_dir>/<name>.sock`
//! - Windows: named pipe `\\.\pipe\<name>`
//!
//! Both peers derive the same channel name independently, usually from the
//! user name and the path of the document the backend has open.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

use crate::protocol::DEFAULT_CHANNEL_NAME;

/// Deterministic channel name for a user working on a document
pub fn derive_channel_name(user: &str, path: &str) -> String {
    let key = format!("{}\0{}", user, path);
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes());
    format!("{}-{}", DEFAULT_CHANNEL_NAME, id.simple())
}

/// Fresh random channel name
pub fn generate_channel_name() -> String {
    format!("{}-{}", DEFAULT_CHANNEL_NAME, Uuid::new_v4().simple())
}

/// Name of the user running this process
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Directory holding channel sockets when none is configured
pub fn default_socket_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(std::env::temp_dir)
}

/// A channel name resolved to a platform address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoint {
    name: String,
    address: PathBuf,
}

impl ChannelEndpoint {
    /// Resolve `name`. `socket_dir` is ignored on Windows.
    pub fn new(name: impl Into<String>, socket_dir: Option<&Path>) -> Self {
        let name = name.into();
        let address = platform_address(&name, socket_dir);
        Self { name, address }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Socket path or pipe name
    pub fn address(&self) -> &Path {
        &self.address
    }
}

#[cfg(unix)]
fn platform_address(name: &str, socket_dir: Option<&Path>) -> PathBuf {
    let dir = socket_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(default_socket_dir);
    dir.join(format!("{}.sock", name))
}

#[cfg(windows)]
fn platform_address(name: &str, _socket_dir: Option<&Path>) -> PathBuf {
    PathBuf::from(format!(r"\\.\pipe\{}", name))
}

/// Connect, retrying while the peer is not listening yet.
///
/// Never gives up on its own; callers bound it with a timeout.
pub async fn connect_with_retry(
    endpoint: &ChannelEndpoint,
    retry_interval: Duration,
) -> io::Result<ClientStream> {
    let mut attempts: u32 = 0;
    loop {
        match connect(endpoint).await {
            Ok(stream) => {
                tracing::debug!(
                    "Connected to {} after {} retries",
                    endpoint.name(),
                    attempts
                );
                return Ok(stream);
            }
            Err(e) if is_not_ready(&e) => {
                if attempts == 0 {
                    tracing::debug!("Waiting for {} to start listening", endpoint.name());
                }
                attempts += 1;
                tokio::time::sleep(retry_interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Errors meaning "nobody is listening yet"
fn is_not_ready(err: &io::Error) -> bool {
    #[cfg(windows)]
    {
        // ERROR_PIPE_BUSY: every pipe instance is taken, try again
        if err.raw_os_error() == Some(231) {
            return true;
        }
    }
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use tokio::net::{UnixListener, UnixStream};

    /// Stream accepted by the backend
    pub type ServerStream = UnixStream;
    /// Stream opened by the UI client
    pub type ClientStream = UnixStream;

    /// Listening end of a channel; removes its socket file on drop
    pub struct ChannelListener {
        listener: UnixListener,
        path: PathBuf,
    }

    impl ChannelListener {
        /// Bind the channel, replacing a stale socket file
        pub async fn bind(endpoint: &ChannelEndpoint) -> io::Result<Self> {
            let path = endpoint.address().to_path_buf();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if path.exists() {
                std::fs::remove_file(&path)?;
            }

            let listener = UnixListener::bind(&path)?;
            tracing::debug!("Bound channel {} at {}", endpoint.name(), path.display());

            Ok(Self { listener, path })
        }

        /// Accept a single connection
        pub async fn accept(&mut self) -> io::Result<ServerStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(stream)
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for ChannelListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// Single connection attempt
    pub async fn connect(endpoint: &ChannelEndpoint) -> io::Result<ClientStream> {
        UnixStream::connect(endpoint.address()).await
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    /// Stream accepted by the backend
    pub type ServerStream = NamedPipeServer;
    /// Stream opened by the UI client
    pub type ClientStream = NamedPipeClient;

    /// Listening end of a channel; always holds one unconnected pipe
    /// instance so clients can find the name.
    pub struct ChannelListener {
        next: NamedPipeServer,
        path: PathBuf,
    }

    impl ChannelListener {
        pub async fn bind(endpoint: &ChannelEndpoint) -> io::Result<Self> {
            let path = endpoint.address().to_path_buf();
            let next = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&path)?;
            tracing::debug!("Bound channel {} at {}", endpoint.name(), path.display());

            Ok(Self { next, path })
        }

        /// Accept a single connection
        pub async fn accept(&mut self) -> io::Result<ServerStream> {
            self.next.connect().await?;
            let fresh = ServerOptions::new().create(&self.path)?;
            Ok(std::mem::replace(&mut self.next, fresh))
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    /// Single connection attempt
    pub async fn connect(endpoint: &ChannelEndpoint) -> io::Result<ClientStream> {
        ClientOptions::new().open(endpoint.address())
    }
}

// ============================================================================
// Platform-independent re-exports
// ============================================================================

#[cfg(unix)]
pub use unix_impl::{connect, ChannelListener, ClientStream, ServerStream};

#[cfg(windows)]
pub use windows_impl::{connect, ChannelListener, ClientStream, ServerStream};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_name_is_stable() {
        let a = derive_channel_name("alice", "/projects/tower.model");
        let b = derive_channel_name("alice", "/projects/tower.model");
        assert_eq!(a, b);
        assert!(a.starts_with("pipelink-"));
    }

    #[test]
    fn test_derived_name_separates_users_and_paths() {
        let base = derive_channel_name("alice", "/projects/tower.model");
        assert_ne!(base, derive_channel_name("bob", "/projects/tower.model"));
        assert_ne!(base, derive_channel_name("alice", "/projects/bridge.model"));
        // The separator keeps ("ab", "c") and ("a", "bc") apart
        assert_ne!(
            derive_channel_name("ab", "c"),
            derive_channel_name("a", "bc")
        );
    }

    #[test]
    fn test_generated_names_are_unique() {
        assert_ne!(generate_channel_name(), generate_channel_name());
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_endpoint_address() {
        let endpoint = ChannelEndpoint::new("demo", Some(Path::new("/run/user/1000")));
        assert_eq!(endpoint.name(), "demo");
        assert_eq!(endpoint.address(), Path::new("/run/user/1000/demo.sock"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_accept_connect() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempfile::tempdir().unwrap();
        let endpoint = ChannelEndpoint::new(generate_channel_name(), Some(dir.path()));

        let mut listener = ChannelListener::bind(&endpoint).await.unwrap();
        assert!(listener.path().exists());

        let mut client = connect(&endpoint).await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        let path = listener.path().to_path_buf();
        drop(listener);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_waits_for_late_listener() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = ChannelEndpoint::new(generate_channel_name(), Some(dir.path()));

        let connecting = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                connect_with_retry(&endpoint, Duration::from_millis(10)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut listener = ChannelListener::bind(&endpoint).await.unwrap();
        let _server = listener.accept().await.unwrap();

        assert!(connecting.await.unwrap().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_without_listener_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = ChannelEndpoint::new(generate_channel_name(), Some(dir.path()));

        let err = connect(&endpoint).await.unwrap_err();
        assert!(is_not_ready(&err));
    }
}
