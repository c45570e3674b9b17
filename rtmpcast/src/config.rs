use std::{path::PathBuf, sync::Arc};

use thiserror::Error;

/// Error returned from a producer callback. Producer failures always stop
/// the stream; there is no retry path for missing source data.
#[derive(Debug, Clone, Error)]
#[error("Producer callback failed: {0}")]
pub struct ProducerError(pub Arc<str>);

impl ProducerError {
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self(message.into())
    }
}

/// Writable YUV 4:2:0 planes handed to the video producer for one frame.
/// `y` is `width * height` bytes, `u` and `v` a quarter of that each.
pub struct VideoPlanes<'a> {
    pub y: &'a mut [u8],
    pub u: &'a mut [u8],
    pub v: &'a mut [u8],
}

/// Fills one uncompressed video frame.
pub type VideoProducer = Box<dyn FnMut(VideoPlanes<'_>) -> Result<(), ProducerError>>;

/// Fills up to `1024 * channels` interleaved signed 16-bit PCM samples and
/// returns how many were written.
pub type AudioProducer = Box<dyn FnMut(&mut [i16]) -> Result<usize, ProducerError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioChannels {
    Mono,
    Stereo,
}

impl AudioChannels {
    pub fn count(self) -> u32 {
        match self {
            AudioChannels::Mono => 1,
            AudioChannels::Stereo => 2,
        }
    }
}

pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub producer: VideoProducer,
}

pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: AudioChannels,
    pub bitrate_kbps: u32,
    pub producer: AudioProducer,
}

/// Everything a stream needs, fixed at construction. At least one of
/// `video` and `audio` must be set.
pub struct StreamConfig {
    /// Publish destination, `rtmp://host[:port]/app/stream_key`.
    pub url: String,
    /// Local FLV copy of everything sent over RTMP. Failure to open the
    /// file disables the copy but does not fail the stream.
    pub capture_path: Option<PathBuf>,
    pub video: Option<VideoConfig>,
    pub audio: Option<AudioConfig>,
}
