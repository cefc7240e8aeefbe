//! Local transport for the browser extension bridge.
//!
//! Provides a unified interface over the two local transport mechanisms
//! browser extensions use to reach the application:
//! - Unix domain sockets (Linux/macOS)
//! - Named pipes (Windows)
//!
//! This is the lowest layer of kwbridge. The broker accepts [`IpcStream`]s
//! from an [`IpcListener`] bound to the per-user name from [`naming`].

pub mod error;
pub mod naming;
pub mod traits;

#[cfg(unix)]
pub mod uds;

#[cfg(windows)]
pub mod pipe;

pub use error::{Result, TransportError};
pub use naming::{socket_name_for_current_user, validate_socket_name, MAX_SOCKET_NAME_LEN};
pub use traits::{IpcListener, IpcStream};

#[cfg(unix)]
pub use uds::UnixDomainSocket;

#[cfg(windows)]
pub use pipe::NamedPipeListener;
