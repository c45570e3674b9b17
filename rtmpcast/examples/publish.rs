//! Publishes a synthetic test pattern with a matching test tone.
//!
//! Usage: publish <rtmp-url> [capture.flv]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use anyhow::Context;
use tracing::error;

use rtmpcast::{
    AudioChannels, AudioConfig, AudioProducer, Stream, StreamConfig, VideoConfig, VideoPlanes,
    VideoProducer,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .context("usage: publish <rtmp-url> [capture.flv]")?;
    let capture_path = std::env::args().nth(2).map(Into::into);

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, stop.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, stop.clone())?;

    // Scrolling luma gradient over a fixed chroma tint.
    let mut frame_number: u64 = 0;
    let video_producer: VideoProducer = Box::new(move |planes: VideoPlanes<'_>| {
        for (row, line) in planes.y.chunks_mut(WIDTH as usize).enumerate() {
            line.fill((frame_number * 2 + row as u64) as u8);
        }
        planes.u.fill(64);
        planes.v.fill(192);
        frame_number += 1;
        Ok(())
    });

    // A harsh sawtooth-ish buzz, but unmistakable on the receiving end.
    let mut packet_number: i16 = 0;
    let audio_producer: AudioProducer = Box::new(move |samples: &mut [i16]| {
        for (i, sample) in samples.iter_mut().enumerate() {
            *sample = packet_number.wrapping_mul((i / 2) as i16);
        }
        packet_number = (packet_number + 1) % 200;
        Ok(samples.len())
    });

    let mut stream = Stream::create(StreamConfig {
        url,
        capture_path,
        video: Some(VideoConfig {
            width: WIDTH,
            height: HEIGHT,
            fps: 30,
            bitrate_kbps: 700,
            producer: video_producer,
        }),
        audio: Some(AudioConfig {
            sample_rate: 44100,
            channels: AudioChannels::Stereo,
            bitrate_kbps: 128,
            producer: audio_producer,
        }),
    })?;

    if let Err(err) = stream.connect() {
        stream.close();
        return Err(err.into());
    }

    while !stop.load(Ordering::Relaxed) {
        match stream.update() {
            Ok(sleep) => thread::sleep(sleep),
            Err(err) => {
                error!(%err, "stream failed");
                break;
            }
        }
    }

    stream.close();
    Ok(())
}
