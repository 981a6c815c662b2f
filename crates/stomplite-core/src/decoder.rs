//! Stateful decoder that carries partial frames across reads.

use bytes::BytesMut;

use crate::codec::decode;
use crate::error::ProtocolError;
use crate::frame::Frame;

/// Default upper bound on buffered, not-yet-decoded bytes (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frames produced by one `FrameDecoder::push`.
#[derive(Debug, Default)]
pub struct DecodedFrames {
    /// Complete frames in arrival order.
    pub frames: Vec<Frame>,
    /// Malformed frames that were skipped.
    pub malformed: Vec<ProtocolError>,
    /// Set to `FrameTooLarge` when the undecoded remainder outgrew the limit.
    /// The frames above were complete before that point and are still valid.
    pub overflow: Option<ProtocolError>,
}

/// Accumulates transport reads and yields complete frames.
///
/// Leftover bytes of a partial frame stay buffered until the next push.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder with a custom limit (0 = no limit).
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Append `data` and decode every frame that is now complete.
    ///
    /// When the undecoded remainder outgrows the limit the buffer is cleared
    /// and `overflow` is set on the result.
    pub fn push(&mut self, data: &[u8]) -> DecodedFrames {
        self.buffer.extend_from_slice(data);

        let decoded = decode(&self.buffer);
        let consumed = decoded.consumed(&self.buffer);
        let mut out = DecodedFrames {
            frames: decoded.frames,
            malformed: decoded.malformed,
            overflow: None,
        };
        let _ = self.buffer.split_to(consumed);

        if self.max_frame_size > 0 && self.buffer.len() > self.max_frame_size {
            out.overflow = Some(ProtocolError::FrameTooLarge {
                size: self.buffer.len(),
                max: self.max_frame_size,
            });
            self.buffer.clear();
        }

        out
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
