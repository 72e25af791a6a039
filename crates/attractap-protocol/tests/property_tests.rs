//! Property-based tests for the frame codec and envelope parsing.
//!
//! These tests use proptest to check that arbitrary frames survive the
//! codec regardless of how the byte stream is sliced, and that the
//! envelope parser never panics on arbitrary input.

use attractap_protocol::{Envelope, Frame, ReaderCodec, TypeTag};
use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

/// Strategy for generating frames of either kind up to 4 KB.
fn any_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        ".{0,512}".prop_map(Frame::Text),
        prop::collection::vec(any::<u8>(), 0..4096).prop_map(|v| Frame::Binary(Bytes::from(v))),
    ]
}

/// Strategy for generating wire type names, known and unknown.
fn type_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("NFC_TAP".to_string()),
        Just("READER_FIRMWARE_STREAM_CHUNK".to_string()),
        "[B-Z][A-Z_]{0,31}",
    ]
}

proptest! {
    /// Property: any sequence of frames decodes to the same sequence, no
    /// matter at which byte offsets the stream is cut.
    #[test]
    fn prop_frames_survive_arbitrary_slicing(
        frames in prop::collection::vec(any_frame(), 1..8),
        cut in 1usize..64,
    ) {
        let mut codec = ReaderCodec::new();
        let mut wire = BytesMut::new();
        for frame in &frames {
            codec.encode(frame.clone(), &mut wire).unwrap();
        }

        let mut buffer = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(cut) {
            buffer.extend_from_slice(piece);
            while let Some(frame) = codec.decode(&mut buffer).unwrap() {
                decoded.push(frame);
            }
        }

        prop_assert_eq!(decoded, frames);
        prop_assert!(buffer.is_empty());
    }

    /// Property: the decoder never panics on garbage input.
    #[test]
    fn prop_decoder_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut codec = ReaderCodec::with_max_frame_size(128);
        let mut buffer = BytesMut::from(&bytes[..]);
        while let Ok(Some(_)) = codec.decode(&mut buffer) {}
    }

    /// Property: the envelope parser never panics on arbitrary text.
    #[test]
    fn prop_envelope_parser_never_panics(text in ".{0,256}") {
        let _ = Envelope::from_json(&text);
    }

    /// Property: type tags print back exactly as they were read.
    #[test]
    fn prop_type_tag_preserves_wire_name(name in type_name(), ack in any::<bool>()) {
        let wire = if ack { format!("ACK_{name}") } else { name };
        let tag = TypeTag::parse(&wire);
        prop_assert_eq!(tag.is_ack(), ack);
        prop_assert_eq!(tag.to_string(), wire);
    }
}
