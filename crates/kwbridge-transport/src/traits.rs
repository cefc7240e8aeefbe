use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Result;

/// A connected IPC stream: implements `AsyncRead + AsyncWrite`.
///
/// On Unix, this wraps a Unix domain socket stream.
/// On Windows, this wraps a named pipe server instance.
pub struct IpcStream {
    inner: IpcStreamInner,
    peer_pid: Option<u32>,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(windows)]
    Pipe(tokio::net::windows::named_pipe::NamedPipeServer),
}

impl IpcStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: tokio::net::UnixStream, peer_pid: Option<u32>) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
            peer_pid,
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_pipe(pipe: tokio::net::windows::named_pipe::NamedPipeServer) -> Self {
        Self {
            inner: IpcStreamInner::Pipe(pipe),
            peer_pid: None,
        }
    }

    /// Process id of the connected peer as reported by the kernel.
    ///
    /// Only available for Unix domain sockets on platforms exposing peer
    /// credentials. This is informational; clients identify themselves in
    /// the handshake.
    pub fn peer_pid(&self) -> Option<u32> {
        self.peer_pid
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => "unix-domain-socket",
            #[cfg(windows)]
            IpcStreamInner::Pipe(_) => "named-pipe",
        }
    }
}

impl AsyncRead for IpcStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(windows)]
            IpcStreamInner::Pipe(pipe) => Pin::new(pipe).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IpcStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(windows)]
            IpcStreamInner::Pipe(pipe) => Pin::new(pipe).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(windows)]
            IpcStreamInner::Pipe(pipe) => Pin::new(pipe).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(windows)]
            IpcStreamInner::Pipe(pipe) => Pin::new(pipe).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("type", &self.transport_name())
            .field("peer_pid", &self.peer_pid)
            .finish()
    }
}

/// A listening endpoint on the platform's local transport.
pub enum IpcListener {
    #[cfg(unix)]
    Unix(crate::uds::UnixDomainSocket),
    #[cfg(windows)]
    Pipe(crate::pipe::NamedPipeListener),
}

impl IpcListener {
    /// Bind the platform transport at `name`.
    ///
    /// `name` is a filesystem path on Unix and a pipe name on Windows.
    pub fn bind(name: impl AsRef<Path>) -> Result<Self> {
        #[cfg(unix)]
        {
            crate::uds::UnixDomainSocket::bind(name).map(IpcListener::Unix)
        }
        #[cfg(windows)]
        {
            crate::pipe::NamedPipeListener::bind(name).map(IpcListener::Pipe)
        }
    }

    /// Accept the next incoming connection.
    pub async fn accept(&mut self) -> Result<IpcStream> {
        match self {
            #[cfg(unix)]
            IpcListener::Unix(socket) => socket.accept().await,
            #[cfg(windows)]
            IpcListener::Pipe(pipe) => pipe.accept().await,
        }
    }

    /// The name this listener is bound to.
    pub fn name(&self) -> &Path {
        match self {
            #[cfg(unix)]
            IpcListener::Unix(socket) => socket.path(),
            #[cfg(windows)]
            IpcListener::Pipe(pipe) => pipe.name(),
        }
    }
}
