use crate::connection::ConnectionId;

/// Errors that can occur while brokering extension connections.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] kwbridge_transport::TransportError),

    /// Framing violation: oversized frame, buffer overflow or malformed JSON.
    #[error("frame error: {0}")]
    Frame(#[from] kwbridge_frame::FrameError),

    /// The first message did not establish a valid identity.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The client broke per-connection request discipline.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The connection was closed from the application side.
    #[error("connection {0} terminated")]
    Terminated(ConnectionId),

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Whether this error is the client's fault and severs its connection.
    pub fn is_violation(&self) -> bool {
        match self {
            BrokerError::Frame(err) => err.is_violation(),
            BrokerError::Handshake(_) | BrokerError::Protocol(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
