use ffmpeg_next::{
    Dictionary, Rational,
    codec::{Context, Id},
    format::Pixel,
    frame,
};
use tracing::info;

use crate::config::{VideoConfig, VideoPlanes, VideoProducer};

use super::{EncoderError, ProduceError, VideoFacade, VideoPoll, nal};

/// libx264 behind the video facade contract. Configured for baseline
/// profile with zero-latency tuning, so PTS equals DTS and the composition
/// time offset in every video tag can stay zero.
pub(crate) struct H264Encoder {
    encoder: ffmpeg_next::encoder::Video,
    packet: ffmpeg_next::Packet,
    producer: VideoProducer,
    y_plane: Vec<u8>,
    u_plane: Vec<u8>,
    v_plane: Vec<u8>,
    width: u32,
    height: u32,
    extradata: Vec<u8>,
    frame_index: i64,
}

impl H264Encoder {
    pub(crate) fn new(config: VideoConfig) -> Result<Self, EncoderError> {
        info!(
            width = config.width,
            height = config.height,
            fps = config.fps,
            kbps = config.bitrate_kbps,
            "Initialize H264 encoder"
        );
        ffmpeg_next::init()?;
        let codec =
            ffmpeg_next::codec::encoder::find(Id::H264).ok_or(EncoderError::NoCodec)?;

        let mut encoder = Context::new().encoder().video()?;
        encoder.set_time_base(Rational::new(1, config.fps as i32));
        encoder.set_format(Pixel::YUV420P);
        encoder.set_width(config.width);
        encoder.set_height(config.height);
        encoder.set_frame_rate(Some((config.fps as i32, 1)));
        encoder.set_max_b_frames(0);
        // SPS/PPS land in extradata instead of being repeated per keyframe.
        encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);

        let bitrate = (config.bitrate_kbps as u64 * 1000).to_string();
        let mut options = Dictionary::new();
        options.set("preset", "veryfast");
        options.set("tune", "zerolatency");
        options.set("profile", "baseline");
        options.set("threads", "1");
        options.set("b", &bitrate);
        options.set("maxrate", &bitrate);
        options.set("bufsize", &bitrate);
        options.set("g", &(4 * config.fps).to_string());

        let encoder = encoder.open_as_with(codec, options)?;

        let extradata = read_extradata(&encoder);
        if extradata.is_empty() {
            return Err(EncoderError::MissingHeaders);
        }

        let chroma_len = (config.width.div_ceil(2) * config.height.div_ceil(2)) as usize;
        Ok(Self {
            encoder,
            packet: ffmpeg_next::Packet::empty(),
            producer: config.producer,
            y_plane: vec![0; (config.width * config.height) as usize],
            u_plane: vec![0; chroma_len],
            v_plane: vec![0; chroma_len],
            width: config.width,
            height: config.height,
            extradata,
            frame_index: 0,
        })
    }
}

impl VideoFacade for H264Encoder {
    fn sequence_header(&mut self, dst: &mut [u8]) -> Result<usize, EncoderError> {
        nal::write_decoder_config(&self.extradata, dst)
    }

    fn produce(&mut self, dst: &mut [u8]) -> Result<VideoPoll, ProduceError> {
        (self.producer)(VideoPlanes {
            y: &mut self.y_plane,
            u: &mut self.u_plane,
            v: &mut self.v_plane,
        })?;

        let mut av_frame = frame::Video::new(Pixel::YUV420P, self.width, self.height);
        write_plane_to_av_frame(&mut av_frame, 0, &self.y_plane);
        write_plane_to_av_frame(&mut av_frame, 1, &self.u_plane);
        write_plane_to_av_frame(&mut av_frame, 2, &self.v_plane);
        av_frame.set_pts(Some(self.frame_index));
        self.frame_index += 1;

        self.encoder
            .send_frame(&av_frame)
            .map_err(EncoderError::from)?;

        match self.encoder.receive_packet(&mut self.packet) {
            Ok(()) => {
                let data = self.packet.data().unwrap_or(&[]);
                let len = nal::annexb_to_avcc_into(data, dst)?;
                if len == 0 {
                    return Ok(VideoPoll::NotReady);
                }
                let keyframe = self
                    .packet
                    .flags()
                    .contains(ffmpeg_next::packet::Flags::KEY);
                Ok(VideoPoll::Frame { len, keyframe })
            }
            Err(ffmpeg_next::Error::Other {
                errno: ffmpeg_next::error::EAGAIN,
            })
            | Err(ffmpeg_next::Error::Eof) => Ok(VideoPoll::NotReady),
            Err(err) => Err(EncoderError::from(err).into()),
        }
    }
}

fn write_plane_to_av_frame(frame: &mut frame::Video, plane: usize, data: &[u8]) {
    let stride = frame.stride(plane);
    let width = frame.plane_width(plane) as usize;

    data.chunks(width)
        .zip(frame.data_mut(plane).chunks_mut(stride))
        .for_each(|(data, target)| target[..width].copy_from_slice(data));
}

fn read_extradata(encoder: &ffmpeg_next::encoder::Video) -> Vec<u8> {
    unsafe {
        let encoder_ptr = encoder.0 .0 .0.as_ptr();
        let size = (*encoder_ptr).extradata_size;
        if size > 0 {
            std::slice::from_raw_parts((*encoder_ptr).extradata, size as usize).to_vec()
        } else {
            Vec::new()
        }
    }
}
