use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RtmpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid RTMP URL: {0}")]
    InvalidUrl(Arc<str>),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(Arc<str>),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(Arc<str>),

    #[error("Malformed FLV tag passed to write_tag")]
    MalformedTag,

    #[error("Truncated control message payload")]
    MalformedControlPayload,

    #[error("Chunk stream protocol violation: {0}")]
    ChunkProtocol(Arc<str>),

    #[error("Socket closed")]
    SocketClosed,

    #[error("AMF0 encoding error: {0}")]
    Amf0Encoding(#[from] flv::amf0::EncodingError),

    #[error("AMF0 decoding error: {0}")]
    Amf0Decoding(#[from] flv::amf0::DecodingError),
}
