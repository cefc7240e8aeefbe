//! Length-prefixed JSON message framing for the browser extension bridge.
//!
//! Every message on the socket is framed as:
//! - A 4-byte little-endian payload length
//! - `length` bytes of UTF-8 JSON
//!
//! Frames are only surfaced once complete; partial frames stay buffered.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    check_buffered, encode_frame, try_extract_frame, Frame, FrameConfig, DEFAULT_MAX_MESSAGE_SIZE,
    HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::BridgeCodec;
