use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{check_buffered, encode_frame, try_extract_frame, Frame, FrameConfig};
use crate::error::FrameError;

/// `tokio_util` codec for the length-prefixed JSON wire format.
///
/// Decoding enforces both limits from [`FrameConfig`]: the declared length
/// of the next frame and the total amount of unprocessed bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeCodec {
    config: FrameConfig,
}

impl BridgeCodec {
    /// Create a codec with explicit limits.
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    /// Current limits.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for BridgeCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match try_extract_frame(src, self.config.max_message_size)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                check_buffered(src, self.config.max_buffered_size)?;
                Ok(None)
            }
        }
    }
}

impl Encoder<Bytes> for BridgeCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&payload, dst)
    }
}

impl Encoder<Frame> for BridgeCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&frame.payload, dst)
    }
}
