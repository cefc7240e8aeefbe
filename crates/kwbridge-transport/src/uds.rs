use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::net::UnixListener;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::naming::{validate_socket_name, Platform};
use crate::traits::IpcStream;

/// Device and inode of the socket file this process created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketIdentity {
    dev: u64,
    ino: u64,
}

impl SocketIdentity {
    fn of(metadata: &Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }
}

/// The broker's Unix domain socket.
///
/// The socket file is owner-only and is unlinked on drop, as long as the
/// path still names the file created by [`UnixDomainSocket::bind`].
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    identity: SocketIdentity,
}

impl UnixDomainSocket {
    pub const SOCKET_MODE: u32 = 0o600;

    /// Bind at `path`, replacing a stale socket left by a previous run.
    ///
    /// Anything at `path` that is not a socket is left alone and the bind
    /// fails. Missing parent directories (the macOS group container) are
    /// created. Must be called from within a tokio runtime.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        validate_socket_name(Platform::current(), &path)?;

        let bind_error = |source: io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        prepare_parent(&path).map_err(bind_error)?;
        remove_stale_socket(&path).map_err(bind_error)?;

        let listener = UnixListener::bind(&path).map_err(bind_error)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(Self::SOCKET_MODE))
            .map_err(bind_error)?;
        let identity = fs::symlink_metadata(&path)
            .map(|metadata| SocketIdentity::of(&metadata))
            .map_err(bind_error)?;

        info!(?path, "listening for extension connections");
        Ok(Self {
            listener,
            path,
            identity,
        })
    }

    pub async fn accept(&self) -> Result<IpcStream> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        let peer_pid = stream
            .peer_cred()
            .ok()
            .and_then(|cred| cred.pid())
            .and_then(|pid| u32::try_from(pid).ok());
        debug!(?peer_pid, "extension host connected");
        Ok(IpcStream::from_unix(stream, peer_pid))
    }

    /// Blocking connect, as a native messaging host does it.
    pub fn connect(path: impl AsRef<Path>) -> Result<std::os::unix::net::UnixStream> {
        let path = path.as_ref();
        std::os::unix::net::UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Ok(metadata) = fs::symlink_metadata(&self.path) else {
            return;
        };
        if !metadata.file_type().is_socket() || SocketIdentity::of(&metadata) != self.identity {
            debug!(path = ?self.path, "socket path was replaced, leaving it");
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = ?self.path, error = %err, "cannot remove socket file");
        }
    }
}

fn prepare_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            fs::create_dir_all(parent)
        }
        _ => Ok(()),
    }
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        ));
    }
    debug!(?path, "removing socket left by a previous run");
    fs::remove_file(path)
}
