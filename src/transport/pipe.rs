//! Platform-specific local pipe.
//!
//! - Unix: Unix Domain Socket at `<temp_dir>/procwire-<name>.sock`
//! - Windows: Named Pipe at `\\.\pipe\<name>`
//!
//! # Example
//!
//! ```ignore
//! use procwire_rpc::transport::{pipe, PipeListener};
//!
//! let listener = PipeListener::bind("calc").await?;
//! let (server, client) = tokio::join!(listener.accept(), pipe::connect("calc"));
//! ```

use std::time::Duration;

use crate::error::{ProcwireError, Result};
#[cfg(windows)]
use tokio::io::{AsyncRead, AsyncWrite};

/// Delay between connection attempts while the server side is not up yet.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Platform address for a pipe name.
///
/// Format:
/// - Unix: `<temp_dir>/procwire-{name}.sock`
/// - Windows: `\\.\pipe\{name}`
pub fn pipe_path(name: &str) -> String {
    #[cfg(unix)]
    {
        std::env::temp_dir()
            .join(format!("procwire-{name}.sock"))
            .to_string_lossy()
            .into_owned()
    }

    #[cfg(windows)]
    {
        format!(r"\\.\pipe\{name}")
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(ProcwireError::InvalidConfig(format!(
            "Invalid pipe name '{name}'"
        )));
    }
    Ok(())
}

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::io::ErrorKind;
    use std::path::Path;
    use tokio::net::{UnixListener, UnixStream};

    /// A connected Unix Domain Socket.
    pub type PipeStream = UnixStream;

    /// Unix Domain Socket listener. Removes its socket file on drop.
    pub struct PipeListener {
        listener: UnixListener,
        path: String,
    }

    impl PipeListener {
        /// Bind the socket for a pipe name, replacing a stale socket file.
        pub async fn bind(name: &str) -> Result<Self> {
            validate_name(name)?;
            let path = pipe_path(name);
            if Path::new(&path).exists() {
                std::fs::remove_file(&path)?;
            }

            let listener = UnixListener::bind(&path)?;
            tracing::debug!(%path, "pipe listener bound");
            Ok(Self { listener, path })
        }

        pub async fn accept(&self) -> Result<PipeStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(stream)
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// Connect to a pipe name, waiting until a listener is bound.
    pub async fn connect(name: &str) -> Result<PipeStream> {
        validate_name(name)?;
        let path = pipe_path(name);
        loop {
            match UnixStream::connect(&path).await {
                Ok(stream) => return Ok(stream),
                Err(e)
                    if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) =>
                {
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(ProcwireError::Io(e)),
            }
        }
    }
}

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    const ERROR_FILE_NOT_FOUND: i32 = 2;
    const ERROR_PIPE_BUSY: i32 = 231;

    /// A connected Named Pipe, from either end.
    pub enum PipeStream {
        Server(NamedPipeServer),
        Client(NamedPipeClient),
    }

    /// Named Pipe listener.
    pub struct PipeListener {
        path: String,
        /// Created by `bind` so the name is taken before anyone connects.
        first: parking_lot::Mutex<Option<NamedPipeServer>>,
    }

    impl PipeListener {
        pub async fn bind(name: &str) -> Result<Self> {
            validate_name(name)?;
            let path = pipe_path(name);
            let first = ServerOptions::new().first_pipe_instance(true).create(&path)?;
            tracing::debug!(%path, "pipe listener bound");
            Ok(Self {
                path,
                first: parking_lot::Mutex::new(Some(first)),
            })
        }

        pub async fn accept(&self) -> Result<PipeStream> {
            let first = self.first.lock().take();
            let server = match first {
                Some(server) => server,
                None => ServerOptions::new().create(&self.path)?,
            };
            server.connect().await?;
            Ok(PipeStream::Server(server))
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    /// Connect to a pipe name, waiting until a server instance is free.
    pub async fn connect(name: &str) -> Result<PipeStream> {
        validate_name(name)?;
        let path = pipe_path(name);
        loop {
            match ClientOptions::new().open(&path) {
                Ok(client) => return Ok(PipeStream::Client(client)),
                Err(e)
                    if matches!(
                        e.raw_os_error(),
                        Some(ERROR_PIPE_BUSY | ERROR_FILE_NOT_FOUND)
                    ) =>
                {
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(ProcwireError::Io(e)),
            }
        }
    }

    macro_rules! either_end {
        ($self:ident, $pipe:ident => $call:expr) => {
            match $self.get_mut() {
                PipeStream::Server($pipe) => $call,
                PipeStream::Client($pipe) => $call,
            }
        };
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            either_end!(self, p => Pin::new(p).poll_read(cx, buf))
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            either_end!(self, p => Pin::new(p).poll_write(cx, buf))
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            either_end!(self, p => Pin::new(p).poll_flush(cx))
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            either_end!(self, p => Pin::new(p).poll_shutdown(cx))
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{connect, PipeListener, PipeStream};

#[cfg(windows)]
pub use windows_impl::{connect, PipeListener, PipeStream};

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_pipe_path_format() {
        let path = pipe_path("calc");

        #[cfg(unix)]
        {
            assert!(path.ends_with("procwire-calc.sock"));
            assert!(path.starts_with(&*std::env::temp_dir().to_string_lossy()));
        }

        #[cfg(windows)]
        {
            assert_eq!(path, r"\\.\pipe\calc");
        }
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(r"a\b").is_err());
        assert!(validate_name("ok-name_1").is_ok());
    }

    #[tokio::test]
    async fn test_bind_accept_connect() {
        let name = format!("pipe-test-{}", std::process::id());
        let listener = PipeListener::bind(&name).await.unwrap();

        let (server, client) = tokio::join!(listener.accept(), connect(&name));
        let mut server = server.unwrap();
        let mut client = client.unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_connect_waits_for_listener() {
        let name = format!("pipe-late-{}", std::process::id());
        let connecting = tokio::spawn({
            let name = name.clone();
            async move { connect(&name).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let listener = PipeListener::bind(&name).await.unwrap();
        let accepted = listener.accept().await;

        assert!(accepted.is_ok());
        assert!(connecting.await.unwrap().is_ok());
    }
}
