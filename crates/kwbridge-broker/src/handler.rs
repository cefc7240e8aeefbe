//! Collaborators the broker hands decoded traffic to.

use async_trait::async_trait;
use serde_json::Value;

use crate::connection::{ConnectionId, ConnectionInfo};
use crate::settings::{Browser, ExtensionFamily};

/// An application-level failure reported by the request handler.
///
/// Unlike framing or handshake errors this never closes the connection; it
/// is turned into an error-shaped response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Interprets decoded requests and owns per-connection session state.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one request. `Ok(None)` means no response is sent.
    ///
    /// May wait on interactive user approval; the broker imposes no timeout.
    async fn handle(
        &self,
        request: Value,
        connection: &ConnectionInfo,
    ) -> Result<Option<Value>, HandlerError>;

    /// Shape `error` into a response for `request`.
    fn error_to_response(&self, error: &HandlerError, request: &Value) -> Value;

    /// Drop any session tied to `connection_id`.
    fn release_connection(&self, connection_id: ConnectionId);

    /// Drop all sessions. Called when the broker stops.
    fn cleanup(&self) {}

    /// Snapshot of active sessions, for display.
    fn sessions(&self) -> Value {
        Value::Array(Vec::new())
    }

    /// Permissions granted to `client_id`.
    fn client_permissions(&self, _client_id: &str) -> Option<Value> {
        None
    }

    /// Replace the permissions granted to `client_id`.
    fn set_client_permissions(&self, _client_id: &str, _permissions: Value) {}
}

/// Registers or removes the native messaging manifest for a browser.
#[async_trait]
pub trait ExtensionInstaller: Send + Sync + 'static {
    async fn install(&self, browser: Browser, extension: ExtensionFamily) -> Result<(), String>;

    async fn uninstall(&self, browser: Browser, extension: ExtensionFamily)
        -> Result<(), String>;
}
