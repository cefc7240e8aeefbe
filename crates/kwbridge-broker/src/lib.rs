//! Connection broker between browser extensions and the application.
//!
//! Many partially trusted extension connections are multiplexed onto one
//! [`RequestHandler`]. Each socket connection must open with a handshake
//! naming its origin and browser process, after which its requests are
//! handed to the handler one at a time, in order. Unsolicited events are
//! fanned out to every identified connection that accepts them.
//!
//! [`ExtensionBridge`] is the entry point: it picks the OS socket or the
//! in-page transport and follows the enablement toggles in [`Settings`].

pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod facade;
pub mod gate;
pub mod handler;
pub mod inpage;
pub mod listener;
pub mod origins;
pub mod process;
pub mod registry;
pub mod settings;

pub use config::BrokerConfig;
#[cfg(unix)]
pub use connector::{BridgeClient, MAX_RESPONSE_SIZE};
pub use connector::handshake_message;
pub use connection::{
    ConnectionId, ConnectionIdentity, ConnectionInfo, IN_PAGE_CONNECTION_ID,
};
pub use error::{BrokerError, Result};
pub use facade::{ExtensionBridge, TransportMode};
pub use gate::IdentityGate;
pub use handler::{ExtensionInstaller, HandlerError, RequestHandler};
pub use inpage::{PageMessage, PagePort};
pub use listener::SocketListener;
pub use origins::OriginTable;
pub use process::{ProcessEntry, ProcessInfo, ProcessLookupError, ProcfsProcessInfo};
pub use registry::Registry;
pub use settings::{Browser, ExtensionFamily, Settings, ToggleSettings};
