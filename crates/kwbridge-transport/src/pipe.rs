use std::path::{Path, PathBuf};

use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::naming::{validate_socket_name, Platform};
use crate::traits::IpcStream;

/// Named pipe listener.
///
/// Keeps one unconnected server instance open at all times so a client can
/// connect while the previous one is being handed off.
pub struct NamedPipeListener {
    name: PathBuf,
    next: NamedPipeServer,
}

impl NamedPipeListener {
    /// Create the first pipe instance at `name` (e.g. `\\.\pipe\keeweb-connect-alice`).
    pub fn bind(name: impl AsRef<Path>) -> Result<Self> {
        let name = name.as_ref().to_path_buf();
        validate_socket_name(Platform::current(), &name)?;

        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .reject_remote_clients(true)
            .create(&name)
            .map_err(|e| TransportError::Bind {
                path: name.clone(),
                source: e,
            })?;

        info!(?name, "listening on named pipe");
        Ok(Self { name, next })
    }

    /// Wait for a client on the pending instance and open a fresh one.
    pub async fn accept(&mut self) -> Result<IpcStream> {
        self.next.connect().await.map_err(TransportError::Accept)?;

        let fresh = ServerOptions::new()
            .reject_remote_clients(true)
            .create(&self.name)
            .map_err(TransportError::Accept)?;
        let connected = std::mem::replace(&mut self.next, fresh);

        debug!(name = ?self.name, "accepted pipe client");
        Ok(IpcStream::from_pipe(connected))
    }

    /// The pipe name.
    pub fn name(&self) -> &Path {
        &self.name
    }
}
