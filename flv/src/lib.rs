//! FLV muxing primitives: tag framing over a reusable buffer and AMF0
//! serialization for script-data tags and RTMP command messages.

pub mod amf0;
pub mod tag;

pub use tag::{
    AUDIO_PAYLOAD_OFFSET, AacPacketType, AvcPacketType, FrameType, MAX_TAG_LEN, TAG_HEADER_LEN,
    TAG_TRAILER_LEN, TagBuffer, TagError, TagKind, VIDEO_PAYLOAD_OFFSET, file_header,
};
