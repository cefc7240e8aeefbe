use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: little-endian payload length.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size accepted from a client.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10_000;

/// A complete framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The JSON payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Serialize `value` into a frame.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    /// Parse the payload as JSON.
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a payload into the wire format.
///
/// ```text
/// ┌──────────────┬─────────────────────┐
/// │ Length       │ Payload             │
/// │ (4B LE)      │ (Length bytes JSON) │
/// └──────────────┴─────────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Extract the first complete frame from an accumulating buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer so that `src` holds
/// only the remainder.
///
/// A declared length above `max_message_size` is rejected as soon as the
/// header is readable, before any payload arrives.
pub fn try_extract_frame(src: &mut BytesMut, max_message_size: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let payload_len = u32::from_le_bytes(header) as usize;

    if payload_len > max_message_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_message_size,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { payload }))
}

/// Reject a receive buffer that has grown past `max_buffered_size`.
pub fn check_buffered(src: &BytesMut, max_buffered_size: usize) -> Result<()> {
    if src.len() > max_buffered_size {
        return Err(FrameError::BufferOverflow {
            size: src.len(),
            max: max_buffered_size,
        });
    }
    Ok(())
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 10 000.
    pub max_message_size: usize,
    /// Maximum unprocessed bytes held per connection.
    /// Default: one maximum-size frame including its header.
    pub max_buffered_size: usize,
}

impl FrameConfig {
    /// Config with the given message limit and a buffer limit that fits one such frame.
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            max_buffered_size: max_message_size + HEADER_SIZE,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_encode_extract() {
        let mut buf = BytesMut::new();
        let payload = br#"{"action":"ping"}"#;

        encode_frame(payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len());
        assert_eq!(&buf[..4], &(payload.len() as u32).to_le_bytes());

        let frame = try_extract_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_extract_incomplete_header() {
        let mut buf = BytesMut::from(&[0x05, 0x00, 0x00][..]);
        let result = try_extract_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 3, "incomplete header must stay buffered");
    }

    #[test]
    fn test_extract_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"{\"a\":1}", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        let result = try_extract_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn test_oversized_declared_length_rejected_without_payload() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(20_000);

        let result = try_extract_frame(&mut buf, 10_000);
        assert!(matches!(
            result,
            Err(FrameError::PayloadTooLarge {
                size: 20_000,
                max: 10_000
            })
        ));
    }

    #[test]
    fn test_length_at_limit_accepted() {
        let payload = vec![b' '; 16];
        let mut buf = BytesMut::new();
        encode_frame(&payload, &mut buf).unwrap();

        let frame = try_extract_frame(&mut buf, 16).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 16);
    }

    #[test]
    fn test_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_frame(b"1", &mut buf).unwrap();
        encode_frame(b"\"second\"", &mut buf).unwrap();

        let f1 = try_extract_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();
        let f2 = try_extract_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();

        assert_eq!(f1.payload.as_ref(), b"1");
        assert_eq!(f2.payload.as_ref(), b"\"second\"");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"", &mut buf).unwrap();

        let frame = try_extract_frame(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();
        assert!(frame.payload.is_empty());
        assert!(matches!(frame.json(), Err(FrameError::InvalidJson(_))));
    }

    #[test]
    fn test_check_buffered() {
        let buf = BytesMut::from(&[0u8; 12][..]);
        assert!(check_buffered(&buf, 12).is_ok());
        assert!(matches!(
            check_buffered(&buf, 11),
            Err(FrameError::BufferOverflow { size: 12, max: 11 })
        ));
    }

    #[test]
    fn test_default_config_fits_one_full_frame() {
        let cfg = FrameConfig::default();
        assert_eq!(cfg.max_message_size, 10_000);
        assert_eq!(cfg.max_buffered_size, 10_004);
    }

    #[test]
    fn test_frame_json() {
        let frame = Frame::from_json(&serde_json::json!({"action": "ping"})).unwrap();
        assert_eq!(frame.json().unwrap()["action"], "ping");
        assert_eq!(frame.wire_size(), HEADER_SIZE + frame.payload.len());
    }

    fn extract_all(buf: &mut BytesMut, out: &mut Vec<Bytes>) {
        while let Some(frame) = try_extract_frame(buf, DEFAULT_MAX_MESSAGE_SIZE).unwrap() {
            out.push(frame.payload);
        }
    }

    proptest! {
        #[test]
        fn chunk_boundaries_do_not_change_frames(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..8),
            cuts in prop::collection::vec(1usize..64, 0..32),
        ) {
            let mut wire = BytesMut::new();
            for payload in &payloads {
                encode_frame(payload, &mut wire).unwrap();
            }
            let wire = wire.freeze();

            let mut whole = BytesMut::from(wire.as_ref());
            let mut expected = Vec::new();
            extract_all(&mut whole, &mut expected);

            let mut chunked = BytesMut::new();
            let mut received = Vec::new();
            let mut offset = 0usize;
            for cut in cuts.iter().copied().chain(std::iter::repeat(64)) {
                if offset >= wire.len() {
                    break;
                }
                let end = (offset + cut).min(wire.len());
                chunked.extend_from_slice(&wire[offset..end]);
                offset = end;
                extract_all(&mut chunked, &mut received);
            }

            prop_assert_eq!(&received, &expected);
            prop_assert_eq!(received.len(), payloads.len());
            prop_assert!(chunked.is_empty());
        }
    }
}
