//! Length-delimited framing of streamed parts.
//!
//! Each part travels as one frame: a 4-byte big-endian payload length
//! followed by the payload.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::LengthDelimitedCodec;

/// Bytes of framing added to every part
pub const FRAME_HEADER_LEN: usize = 4;

/// Codec for part frames no larger than `max_frame_len` payload bytes
pub fn frame_codec(max_frame_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(FRAME_HEADER_LEN)
        .big_endian()
        .max_frame_length(max_frame_len)
        .new_codec()
}

/// Encode one part as a frame
pub fn encode_frame(payload: Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    buf.freeze()
}
