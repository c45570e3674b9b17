//! Live FLV-over-RTMP publishing.
//!
//! Application code supplies raw frames through callbacks; [`Stream`]
//! compresses them (H.264 baseline for video, AAC-LC for audio), wraps each
//! compressed unit in an FLV tag and pushes the tags onto an RTMP
//! connection, paced against wall-clock time. An optional side-copy of the
//! muxed stream can be written to a local FLV file.
//!
//! The expected driver loop:
//!
//! ```no_run
//! # fn produce_config() -> rtmpcast::StreamConfig { unimplemented!() }
//! let mut stream = rtmpcast::Stream::create(produce_config())?;
//! stream.connect()?;
//! loop {
//!     let sleep = stream.update()?;
//!     std::thread::sleep(sleep);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;

mod encoder;
mod schedule;
mod stream;

pub use config::{
    AudioChannels, AudioConfig, AudioProducer, ProducerError, StreamConfig, VideoConfig,
    VideoPlanes, VideoProducer,
};
pub use encoder::EncoderError;
pub use error::{InitError, StreamError};
pub use stream::Stream;
