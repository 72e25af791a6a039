//! Tokio codec for reader connections.
//!
//! Readers exchange two kinds of frames over one byte stream: JSON text
//! envelopes and opaque binary payloads (firmware chunks). Each frame is
//! prefixed with a kind byte and a big-endian length:
//!
//! ```text
//! +------+----------------+------------------+
//! | kind | length (u32 BE) | payload (length) |
//! +------+----------------+------------------+
//!   0x01 = UTF-8 text, 0x02 = binary
//! ```
//!
//! The codec only does framing. Text frames are handed up as strings and
//! parsed into envelopes by the connection layer, so a malformed envelope
//! does not poison the stream.

use attractap_core::constants::{
    DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LENGTH, FRAME_KIND_BINARY, FRAME_KIND_TEXT,
};
use attractap_core::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::Envelope;

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    fn kind(&self) -> u8 {
        match self {
            Frame::Text(_) => FRAME_KIND_TEXT,
            Frame::Binary(_) => FRAME_KIND_BINARY,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(bytes) => bytes,
        }
    }

    /// Size of the payload in bytes, excluding the header.
    pub fn len(&self) -> usize {
        self.payload().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TryFrom<&Envelope> for Frame {
    type Error = Error;

    fn try_from(envelope: &Envelope) -> Result<Self> {
        Ok(Frame::Text(envelope.to_json()?))
    }
}

/// Length-prefixed frame codec.
///
/// # Example
///
/// ```
/// use attractap_protocol::{Frame, ReaderCodec};
/// use bytes::BytesMut;
/// use tokio_util::codec::{Decoder, Encoder};
///
/// let mut codec = ReaderCodec::new();
/// let mut buffer = BytesMut::new();
/// codec.encode(Frame::Text("{}".into()), &mut buffer).unwrap();
/// assert_eq!(&buffer[..], b"\x01\x00\x00\x00\x02{}");
///
/// let frame = codec.decode(&mut buffer).unwrap();
/// assert_eq!(frame, Some(Frame::Text("{}".into())));
/// ```
#[derive(Debug, Clone)]
pub struct ReaderCodec {
    max_frame_size: usize,
}

impl ReaderCodec {
    /// Create a codec with the default maximum frame size (64 KB).
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for ReaderCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ReaderCodec {
    type Item = Frame;
    type Error = Error;

    /// Decode one frame from the stream buffer.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownFrameKind`] for a kind byte other than text or binary
    /// - [`Error::FrameTooLarge`] when the announced length exceeds the limit
    /// - [`Error::InvalidMessageFormat`] for a text frame that is not UTF-8
    ///
    /// All of these leave the stream unusable; the caller closes the connection.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < FRAME_HEADER_LENGTH {
            return Ok(None);
        }

        let kind = src[0];
        if kind != FRAME_KIND_TEXT && kind != FRAME_KIND_BINARY {
            return Err(Error::UnknownFrameKind(kind));
        }

        let length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if length > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        if src.len() < FRAME_HEADER_LENGTH + length {
            // Reserve the rest up front so the next read fills the whole frame
            src.reserve(FRAME_HEADER_LENGTH + length - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LENGTH);
        let payload = src.split_to(length).freeze();

        let frame = if kind == FRAME_KIND_TEXT {
            let text = String::from_utf8(payload.to_vec())
                .map_err(|e| Error::InvalidMessageFormat(format!("text frame is not UTF-8: {e}")))?;
            Frame::Text(text)
        } else {
            Frame::Binary(payload)
        };

        tracing::trace!(kind, length, "decoded frame");
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for ReaderCodec {
    type Error = Error;

    /// Encode one frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] without touching `dst` when the
    /// payload exceeds the limit.
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let payload = item.payload();
        if payload.len() > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(FRAME_HEADER_LENGTH + payload.len());
        dst.put_u8(item.kind());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(payload);
        Ok(())
    }
}
