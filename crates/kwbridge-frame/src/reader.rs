use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use serde_json::Value;

use crate::codec::{check_buffered, try_extract_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Blocking message reader for the extension side of a connection.
///
/// Bytes are accumulated until a whole length-prefixed message is present,
/// subject to the same limits the broker enforces.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
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

    /// Block until the next message arrives.
    ///
    /// End of stream, whether between messages or inside one, is
    /// [`FrameError::ConnectionClosed`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = try_extract_frame(&mut self.buf, self.config.max_message_size)? {
                return Ok(frame);
            }
            check_buffered(&self.buf, self.config.max_buffered_size)?;

            if self.fill()? == 0 {
                return Err(FrameError::ConnectionClosed);
            }
        }
    }

    pub fn read_json(&mut self) -> Result<Value> {
        self.read_frame()?.json()
    }

    /// Append what the stream has ready. Zero means end of stream.
    fn fill(&mut self) -> Result<usize> {
        let start = self.buf.len();
        self.buf.resize(start + READ_CHUNK_SIZE, 0);

        let outcome = loop {
            match self.inner.read(&mut self.buf[start..]) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        let read = outcome.as_ref().map_or(0, |n| *n);
        self.buf.truncate(start + read);
        Ok(outcome?)
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
