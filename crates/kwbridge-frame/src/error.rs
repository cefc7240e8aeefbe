/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame header declares a payload larger than the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// More unprocessed bytes are buffered than the connection may hold.
    #[error("receive buffer overflow ({size} bytes, max {max})")]
    BufferOverflow { size: usize, max: usize },

    /// The payload is not valid UTF-8 JSON.
    #[error("malformed JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this error is a protocol violation by the remote side.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            FrameError::PayloadTooLarge { .. }
                | FrameError::BufferOverflow { .. }
                | FrameError::InvalidJson(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
