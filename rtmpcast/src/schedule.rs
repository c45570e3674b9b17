/// The medium whose emission is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Medium {
    Video,
    Audio,
}

/// Wall-clock pacing of tag emission. Times are seconds relative to the
/// stream epoch. A disabled medium gets an infinite step, so it never
/// becomes due. Schedules only move forward: every emission attempt
/// advances the chosen medium by one step, whether or not a tag was
/// actually shipped.
#[derive(Debug)]
pub(crate) struct Schedule {
    video: Channel,
    audio: Channel,
}

/// Scheduled times are derived as `(emitted + 1) * step` rather than by
/// repeated addition, so they never accumulate floating point drift.
#[derive(Debug)]
struct Channel {
    step: f64,
    emitted: u64,
}

impl Channel {
    fn next(&self) -> f64 {
        (self.emitted + 1) as f64 * self.step
    }
}

impl Schedule {
    /// `video_fps` and `audio_sample_rate` are `None` for disabled media.
    /// The first emission of each medium is due one step after the epoch.
    pub(crate) fn new(video_fps: Option<u32>, audio_sample_rate: Option<u32>) -> Self {
        let video_step = match video_fps {
            Some(fps) => 1.0 / fps as f64,
            None => f64::INFINITY,
        };
        // AAC-LC consumes 1024 samples per channel per frame.
        let audio_step = match audio_sample_rate {
            Some(rate) => 1024.0 / rate as f64,
            None => f64::INFINITY,
        };
        Self {
            video: Channel {
                step: video_step,
                emitted: 0,
            },
            audio: Channel {
                step: audio_step,
                emitted: 0,
            },
        }
    }

    /// The medium whose scheduled time has been reached, earliest first,
    /// with ties going to video.
    pub(crate) fn next_due(&self, now: f64) -> Option<Medium> {
        let video_next = self.video.next();
        let audio_next = self.audio.next();
        match (video_next <= now, audio_next <= now) {
            (true, true) if audio_next < video_next => Some(Medium::Audio),
            (true, _) => Some(Medium::Video),
            (_, true) => Some(Medium::Audio),
            _ => None,
        }
    }

    /// FLV timestamp of the pending emission, in milliseconds.
    pub(crate) fn timestamp_ms(&self, medium: Medium) -> u32 {
        let next = match medium {
            Medium::Video => self.video.next(),
            Medium::Audio => self.audio.next(),
        };
        (1000.0 * next).round() as u32
    }

    pub(crate) fn advance(&mut self, medium: Medium) {
        match medium {
            Medium::Video => self.video.emitted += 1,
            Medium::Audio => self.audio.emitted += 1,
        }
    }

    /// Seconds until the next emission is due. Zero when already behind.
    pub(crate) fn sleep_hint(&self, now: f64) -> f64 {
        (self.video.next().min(self.audio.next()) - now).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_second_of_30fps_and_44100hz() {
        let mut schedule = Schedule::new(Some(30), Some(44100));
        let mut video_tags = 0;
        let mut audio_tags = 0;
        while let Some(medium) = schedule.next_due(1.0) {
            match medium {
                Medium::Video => video_tags += 1,
                Medium::Audio => audio_tags += 1,
            }
            schedule.advance(medium);
        }
        assert_eq!(video_tags, 30);
        assert_eq!(audio_tags, 43);
    }

    #[test]
    fn ties_go_to_video() {
        // 10 fps video against a hypothetical audio step of the same
        // length: both due at exactly 0.1.
        let mut schedule = Schedule::new(Some(10), Some(10240));
        assert_eq!(schedule.next_due(0.1), Some(Medium::Video));
        schedule.advance(Medium::Video);
        assert_eq!(schedule.next_due(0.1), Some(Medium::Audio));
    }

    #[test]
    fn disabled_audio_never_becomes_due() {
        let mut schedule = Schedule::new(Some(30), None);
        for _ in 0..1000 {
            let medium = schedule.next_due(1e9).unwrap();
            assert_eq!(medium, Medium::Video);
            schedule.advance(medium);
        }
    }

    #[test]
    fn timestamps_are_strictly_increasing_per_medium() {
        let mut schedule = Schedule::new(Some(30), Some(44100));
        let mut last_video = None;
        let mut last_audio = None;
        while let Some(medium) = schedule.next_due(5.0) {
            let ts = schedule.timestamp_ms(medium);
            match medium {
                Medium::Video => {
                    if let Some(last) = last_video {
                        assert!(ts > last);
                    }
                    last_video = Some(ts);
                }
                Medium::Audio => {
                    if let Some(last) = last_audio {
                        assert!(ts > last);
                    }
                    last_audio = Some(ts);
                }
            }
            schedule.advance(medium);
        }
    }

    #[test]
    fn interleaved_timestamps_are_non_decreasing() {
        let mut schedule = Schedule::new(Some(30), Some(44100));
        let mut last = 0;
        while let Some(medium) = schedule.next_due(3.0) {
            let ts = schedule.timestamp_ms(medium);
            assert!(ts >= last);
            last = ts;
            schedule.advance(medium);
        }
    }

    #[test]
    fn advance_moves_schedule_even_without_emission() {
        let mut schedule = Schedule::new(Some(30), None);
        let before = schedule.sleep_hint(0.0);
        schedule.advance(Medium::Video);
        let after = schedule.sleep_hint(0.0);
        assert!((after - before - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn sleep_hint_is_zero_when_behind() {
        let schedule = Schedule::new(Some(30), Some(44100));
        assert_eq!(schedule.sleep_hint(10.0), 0.0);
        assert!(schedule.sleep_hint(0.0) > 0.0);
    }
}
