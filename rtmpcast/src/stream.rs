use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use flv::{
    AUDIO_PAYLOAD_OFFSET, AacPacketType, AvcPacketType, FrameType, TagBuffer, TagKind,
    VIDEO_PAYLOAD_OFFSET, amf0, file_header,
};
use rtmp::{RtmpClient, RtmpClientConfig, RtmpError};

use crate::{
    config::{AudioChannels, StreamConfig},
    encoder::{
        AudioFacade, ProduceError, VideoFacade, VideoPoll, aac::AacEncoder, h264::H264Encoder,
    },
    error::{InitError, StreamError},
    schedule::{Medium, Schedule},
};

/// Upper bound on tags emitted per `update` call. A caller that slept far
/// past its hint catches up gradually instead of stalling in one call.
const MAX_CATCHUP_TAGS: usize = 256;

/// Where finalized tags go. [`RtmpClient`] in production; tests substitute
/// a recorder.
trait TagSink {
    fn write_tag(&mut self, tag: &[u8]) -> Result<(), RtmpError>;
    fn poll_control(&mut self) -> Result<(), RtmpError>;
    fn close(&mut self) -> Result<(), RtmpError>;
}

impl TagSink for RtmpClient {
    fn write_tag(&mut self, tag: &[u8]) -> Result<(), RtmpError> {
        RtmpClient::write_tag(self, tag)
    }

    fn poll_control(&mut self) -> Result<(), RtmpError> {
        RtmpClient::poll_control(self)
    }

    fn close(&mut self) -> Result<(), RtmpError> {
        RtmpClient::close(self)
    }
}

struct VideoChannel {
    facade: Box<dyn VideoFacade>,
    width: u32,
    height: u32,
    fps: u32,
    bitrate_kbps: u32,
}

struct AudioChannel {
    facade: Box<dyn AudioFacade>,
    sample_rate: u32,
    channels: AudioChannels,
    bitrate_kbps: u32,
}

/// A live FLV-over-RTMP publishing session.
///
/// Single-threaded by design: all methods are called from one thread, and
/// the producer callbacks run on that thread inside [`Stream::update`].
pub struct Stream {
    destination: RtmpClientConfig,
    transport: Option<Box<dyn TagSink>>,
    capture: Option<BufWriter<File>>,
    tags: TagBuffer,
    video: Option<VideoChannel>,
    audio: Option<AudioChannel>,
    schedule: Schedule,
    epoch: Option<Instant>,
}

impl Stream {
    /// Validates the configuration, constructs the encoders and opens the
    /// optional capture file. Does not touch the network.
    pub fn create(config: StreamConfig) -> Result<Self, InitError> {
        if config.video.is_none() && config.audio.is_none() {
            return Err(InitError::NoMediaEnabled);
        }
        let destination =
            RtmpClientConfig::parse(&config.url).map_err(InitError::InvalidUrl)?;
        let schedule = Schedule::new(
            config.video.as_ref().map(|video| video.fps),
            config.audio.as_ref().map(|audio| audio.sample_rate),
        );

        let has_video = config.video.is_some();
        let has_audio = config.audio.is_some();
        let video = config
            .video
            .map(|cfg| -> Result<VideoChannel, InitError> {
                let (width, height, fps, bitrate_kbps) =
                    (cfg.width, cfg.height, cfg.fps, cfg.bitrate_kbps);
                Ok(VideoChannel {
                    facade: Box::new(H264Encoder::new(cfg)?),
                    width,
                    height,
                    fps,
                    bitrate_kbps,
                })
            })
            .transpose()?;
        let audio = config
            .audio
            .map(|cfg| -> Result<AudioChannel, InitError> {
                let (sample_rate, channels, bitrate_kbps) =
                    (cfg.sample_rate, cfg.channels, cfg.bitrate_kbps);
                Ok(AudioChannel {
                    facade: Box::new(AacEncoder::new(cfg)?),
                    sample_rate,
                    channels,
                    bitrate_kbps,
                })
            })
            .transpose()?;

        let capture = config
            .capture_path
            .as_deref()
            .and_then(|path| open_capture(path, has_video, has_audio));

        Ok(Self {
            destination,
            transport: None,
            capture,
            tags: TagBuffer::new(),
            video,
            audio,
            schedule,
            epoch: None,
        })
    }

    /// Dials the RTMP endpoint, emits the metadata and sequence header tags
    /// and establishes the stream epoch. Any failure here is fatal; the
    /// caller is expected to `close`.
    pub fn connect(&mut self) -> Result<(), StreamError> {
        let client = RtmpClient::connect(&self.destination)?;
        self.transport = Some(Box::new(client));
        self.write_startup_tags()?;
        // Pacing is relative to the instant the startup tags went out.
        self.epoch = Some(Instant::now());
        info!("stream connected");
        Ok(())
    }

    /// Emits every tag whose scheduled time has been reached, drains
    /// inbound RTMP control traffic, and returns how long the caller should
    /// sleep before the next call.
    pub fn update(&mut self) -> Result<Duration, StreamError> {
        let Some(epoch) = self.epoch else {
            return Err(StreamError::NotConnected);
        };

        let mut now = epoch.elapsed().as_secs_f64();
        let mut emitted = 0;
        while emitted < MAX_CATCHUP_TAGS {
            let Some(medium) = self.schedule.next_due(now) else {
                break;
            };
            match medium {
                Medium::Video => self.emit_video()?,
                Medium::Audio => self.emit_audio()?,
            }
            // The schedule advances whether or not a tag was shipped.
            self.schedule.advance(medium);
            emitted += 1;
            now = epoch.elapsed().as_secs_f64();
        }
        if emitted == MAX_CATCHUP_TAGS {
            warn!("catch-up budget exhausted, stream is falling behind");
        }

        if let Some(transport) = self.transport.as_deref_mut() {
            if let Err(err) = transport.poll_control() {
                warn!(%err, "failed to drain inbound control traffic");
            }
        }

        Ok(Duration::from_secs_f64(self.schedule.sleep_hint(now)))
    }

    /// Announces end-of-stream and releases the transport, encoders and
    /// capture file. Safe to call in any state.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if self.video.is_some() {
                let ts = self.schedule.timestamp_ms(Medium::Video);
                self.tags.start_tag(TagKind::Video, ts);
                self.tags
                    .put_avc_prefix(FrameType::Keyframe, AvcPacketType::EndOfSequence, 0);
                match self.tags.finish_tag() {
                    Ok(bytes) => {
                        if let Err(err) = transport.write_tag(bytes) {
                            warn!(%err, "end-of-sequence tag write failed");
                        }
                        mirror(&mut self.capture, bytes);
                    }
                    Err(err) => warn!(%err, "end-of-sequence tag framing failed"),
                }
            }
            if let Err(err) = transport.close() {
                warn!(%err, "RTMP teardown failed");
            }
        }
        if let Some(mut capture) = self.capture.take() {
            if let Err(err) = capture.flush() {
                warn!(%err, "failed to flush capture file");
            }
        }
        self.video = None;
        self.audio = None;
        self.epoch = None;
        info!("stream closed");
    }

    /// The three tags every stream starts with, each at timestamp zero:
    /// metadata, video sequence header, audio sequence header.
    fn write_startup_tags(&mut self) -> Result<(), StreamError> {
        self.write_metadata_tag()?;
        self.write_video_sequence_header()?;
        self.write_audio_sequence_header()?;
        Ok(())
    }

    fn write_metadata_tag(&mut self) -> Result<(), StreamError> {
        let (width, height, framerate, videodatarate, videocodecid) = match &self.video {
            Some(video) => (
                video.width as f64,
                video.height as f64,
                video.fps as f64,
                video.bitrate_kbps as f64,
                7.0,
            ),
            None => (0.0, 0.0, 0.0, 0.0, 0.0),
        };
        let (audiodatarate, audiosamplerate, audiocodecid, stereo) = match &self.audio {
            Some(audio) => (
                audio.bitrate_kbps as f64,
                audio.sample_rate as f64,
                10.0,
                audio.channels == AudioChannels::Stereo,
            ),
            None => (0.0, 0.0, 0.0, false),
        };

        let tags = &mut self.tags;
        tags.start_tag(TagKind::ScriptData, 0);
        amf0::put_string(tags, "onMetaData")?;
        amf0::put_ecma_array_header(tags, 9);
        amf0::put_number_entry(tags, "width", width)?;
        amf0::put_number_entry(tags, "height", height)?;
        amf0::put_number_entry(tags, "framerate", framerate)?;
        amf0::put_number_entry(tags, "videocodecid", videocodecid)?;
        amf0::put_number_entry(tags, "videodatarate", videodatarate)?;
        amf0::put_number_entry(tags, "audiocodecid", audiocodecid)?;
        amf0::put_number_entry(tags, "audiodatarate", audiodatarate)?;
        amf0::put_number_entry(tags, "audiosamplerate", audiosamplerate)?;
        amf0::put_boolean_entry(tags, "stereo", stereo)?;
        amf0::put_object_end(tags);

        let transport = self.transport.as_deref_mut().ok_or(StreamError::NotConnected)?;
        send_current_tag(transport, &mut self.capture, &mut self.tags)
    }

    fn write_video_sequence_header(&mut self) -> Result<(), StreamError> {
        let Some(video) = self.video.as_mut() else {
            return Ok(());
        };
        self.tags.start_tag(TagKind::Video, 0);
        self.tags
            .put_avc_prefix(FrameType::Keyframe, AvcPacketType::SequenceHeader, 0);
        let len = video
            .facade
            .sequence_header(self.tags.encoder_region(VIDEO_PAYLOAD_OFFSET))
            .map_err(StreamError::VideoEncoder)?;
        self.tags.advance(len);

        let transport = self.transport.as_deref_mut().ok_or(StreamError::NotConnected)?;
        send_current_tag(transport, &mut self.capture, &mut self.tags)
    }

    fn write_audio_sequence_header(&mut self) -> Result<(), StreamError> {
        let Some(audio) = self.audio.as_mut() else {
            return Ok(());
        };
        self.tags.start_tag(TagKind::Audio, 0);
        self.tags.put_aac_prefix(AacPacketType::SequenceHeader);
        let len = audio
            .facade
            .sequence_header(self.tags.encoder_region(AUDIO_PAYLOAD_OFFSET))
            .map_err(StreamError::AudioEncoder)?;
        self.tags.advance(len);

        let transport = self.transport.as_deref_mut().ok_or(StreamError::NotConnected)?;
        send_current_tag(transport, &mut self.capture, &mut self.tags)
    }

    /// One video emission attempt. Encoder failures and transport write
    /// failures drop the frame; only producer failures are fatal.
    fn emit_video(&mut self) -> Result<(), StreamError> {
        let ts = self.schedule.timestamp_ms(Medium::Video);
        let Some(video) = self.video.as_mut() else {
            return Ok(());
        };
        self.tags.start_tag(TagKind::Video, ts);
        match video
            .facade
            .produce(self.tags.encoder_region(VIDEO_PAYLOAD_OFFSET))
        {
            Ok(VideoPoll::Frame { len, keyframe }) => {
                let frame_type = if keyframe {
                    FrameType::Keyframe
                } else {
                    FrameType::Interframe
                };
                self.tags.put_avc_prefix(frame_type, AvcPacketType::Nalu, 0);
                self.tags.advance(len);
                let transport =
                    self.transport.as_deref_mut().ok_or(StreamError::NotConnected)?;
                if let Err(err) = send_current_tag(transport, &mut self.capture, &mut self.tags) {
                    warn!(%err, "video tag write failed, dropping frame");
                }
            }
            Ok(VideoPoll::NotReady) => debug!("video encoder buffered the frame"),
            Err(ProduceError::Producer(err)) => return Err(err.into()),
            Err(ProduceError::Encoder(err)) => {
                warn!(%err, "video encode failed, dropping frame");
            }
        }
        Ok(())
    }

    /// One audio emission attempt. Audio encoder failures are fatal: a
    /// video glitch is recoverable at the decoder, desynchronized audio is
    /// not.
    fn emit_audio(&mut self) -> Result<(), StreamError> {
        let ts = self.schedule.timestamp_ms(Medium::Audio);
        let Some(audio) = self.audio.as_mut() else {
            return Ok(());
        };
        self.tags.start_tag(TagKind::Audio, ts);
        self.tags.put_aac_prefix(AacPacketType::Raw);
        match audio
            .facade
            .produce(self.tags.encoder_region(AUDIO_PAYLOAD_OFFSET))
        {
            // A 0-byte result (the encoder's priming frames) still ships the
            // prefix-only tag, keeping the emitted cadence uniform.
            Ok(len) => {
                self.tags.advance(len);
                let transport =
                    self.transport.as_deref_mut().ok_or(StreamError::NotConnected)?;
                if let Err(err) = send_current_tag(transport, &mut self.capture, &mut self.tags) {
                    warn!(%err, "audio tag write failed");
                }
            }
            Err(ProduceError::Producer(err)) => return Err(err.into()),
            Err(ProduceError::Encoder(err)) => return Err(StreamError::AudioEncoder(err)),
        }
        Ok(())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.transport.is_some() || self.capture.is_some() {
            self.close();
        }
    }
}

fn send_current_tag(
    transport: &mut dyn TagSink,
    capture: &mut Option<BufWriter<File>>,
    tags: &mut TagBuffer,
) -> Result<(), StreamError> {
    let bytes = tags.finish_tag()?;
    transport.write_tag(bytes)?;
    mirror(capture, bytes);
    Ok(())
}

/// Capture failures never fail the stream; the local copy is best-effort.
fn mirror(capture: &mut Option<BufWriter<File>>, bytes: &[u8]) {
    if let Some(file) = capture {
        if let Err(err) = file.write_all(bytes) {
            warn!(%err, "capture write failed, disabling local copy");
            *capture = None;
        }
    }
}

fn open_capture(path: &Path, has_video: bool, has_audio: bool) -> Option<BufWriter<File>> {
    let file = match File::create(path) {
        Ok(file) => file,
        Err(err) => {
            warn!(%err, path = %path.display(), "failed to open capture file, continuing without local copy");
            return None;
        }
    };
    let mut writer = BufWriter::new(file);
    match writer.write_all(&file_header(has_video, has_audio)) {
        Ok(()) => Some(writer),
        Err(err) => {
            warn!(%err, "failed to write capture file header, continuing without local copy");
            None
        }
    }
}
