//! Encoder facades. Both media follow the same three-phase contract:
//! construct, emit a sequence header, then produce one compressed packet
//! per call directly into a caller-provided buffer region.

use thiserror::Error;

use crate::config::ProducerError;

pub(crate) mod aac;
pub(crate) mod h264;
mod nal;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("No H264 encoder available in this FFmpeg build")]
    NoCodec,

    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("Encoder produced no SPS/PPS headers")]
    MissingHeaders,

    #[error("fdk-aac call failed with code {0}")]
    FdkAac(fdk_aac_sys::AACENC_ERROR),

    #[error("Encoded packet of {0} bytes does not fit the tag buffer")]
    PacketTooLarge(usize),
}

/// Splits producer failures (fatal for both media) from encoder failures
/// (fatal for audio, a dropped frame for video).
#[derive(Debug, Error)]
pub(crate) enum ProduceError {
    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error(transparent)]
    Encoder(#[from] EncoderError),
}

/// Outcome of one video encode step.
pub(crate) enum VideoPoll {
    /// A complete coded picture was written to the buffer.
    Frame { len: usize, keyframe: bool },
    /// The encoder buffered the input and has nothing to ship yet.
    NotReady,
}

pub(crate) trait VideoFacade {
    /// Writes the AVCDecoderConfigurationRecord into `dst` and returns its
    /// length.
    fn sequence_header(&mut self, dst: &mut [u8]) -> Result<usize, EncoderError>;

    /// Pulls one frame from the producer, encodes it, and writes the
    /// length-prefixed NAL units into `dst`.
    fn produce(&mut self, dst: &mut [u8]) -> Result<VideoPoll, ProduceError>;
}

pub(crate) trait AudioFacade {
    /// Writes the AudioSpecificConfig into `dst` and returns its length.
    fn sequence_header(&mut self, dst: &mut [u8]) -> Result<usize, EncoderError>;

    /// Pulls one block of PCM from the producer, encodes it, and writes the
    /// raw AAC frame into `dst`. Returns 0 while the encoder is priming.
    fn produce(&mut self, dst: &mut [u8]) -> Result<usize, ProduceError>;
}
