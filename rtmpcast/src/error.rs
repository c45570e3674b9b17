use thiserror::Error;

use crate::{config::ProducerError, encoder::EncoderError};

/// Errors reported while constructing a [`crate::Stream`].
#[derive(Debug, Error)]
pub enum InitError {
    #[error("At least one of video or audio must be enabled")]
    NoMediaEnabled,

    #[error("Invalid destination URL")]
    InvalidUrl(#[source] rtmp::RtmpError),

    #[error("Encoder initialization failed: {0}")]
    Encoder(#[from] EncoderError),
}

/// Fatal errors reported from `connect` and `update`. After one of these
/// the caller is expected to `close` the stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("RTMP transport error: {0}")]
    Transport(#[from] rtmp::RtmpError),

    #[error("Tag framing error: {0}")]
    Tag(#[from] flv::TagError),

    #[error("AMF0 encoding error: {0}")]
    Amf0(#[from] flv::amf0::EncodingError),

    #[error("Video encoder error: {0}")]
    VideoEncoder(#[source] EncoderError),

    #[error("Audio encoder error: {0}")]
    AudioEncoder(#[source] EncoderError),

    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error("Stream is not connected")]
    NotConnected,
}
