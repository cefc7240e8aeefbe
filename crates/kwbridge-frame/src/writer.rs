use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use serde_json::Value;

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Blocking message writer for the extension side of a connection.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            config,
        }
    }

    /// Frame and write one payload.
    ///
    /// Payloads the broker would reject are refused here instead of being
    /// sent and costing the connection.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let max = self.config.max_message_size;
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;
        self.write_pending()
    }

    pub fn send_json(&mut self, value: &Value) -> Result<()> {
        self.send(&serde_json::to_vec(value)?)
    }

    /// Write `bytes` as they are, with no length prefix.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.clear();
        self.buf.extend_from_slice(bytes);
        self.write_pending()
    }

    fn write_pending(&mut self) -> Result<()> {
        self.inner
            .write_all(&self.buf)
            .and_then(|()| self.inner.flush())
            .map_err(|err| match err.kind() {
                ErrorKind::WriteZero | ErrorKind::BrokenPipe => FrameError::ConnectionClosed,
                _ => FrameError::Io(err),
            })
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
