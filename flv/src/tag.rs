//! FLV tag framing over a single reusable buffer.
//!
//! A tag is laid out as: type (1 byte) | payload size (u24, back-patched by
//! [`TagBuffer::finish_tag`]) | timestamp low (u24) | timestamp high (1 byte) |
//! stream id (u24, always 0) | payload | previous-tag-size (u32).

use thiserror::Error;

pub const TAG_HEADER_LEN: usize = 11;
pub const TAG_TRAILER_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;
pub const MAX_TAG_LEN: usize = TAG_HEADER_LEN + MAX_PAYLOAD_LEN + TAG_TRAILER_LEN;

/// Video payloads start after the 5-byte AVC video packet prefix.
pub const VIDEO_PAYLOAD_OFFSET: usize = TAG_HEADER_LEN + 5;
/// Audio payloads start after the 2-byte AAC audio prefix.
pub const AUDIO_PAYLOAD_OFFSET: usize = TAG_HEADER_LEN + 2;

#[derive(Error, Debug)]
pub enum TagError {
    #[error("Tag payload too large: {0} bytes (max {MAX_PAYLOAD_LEN})")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Audio,
    Video,
    ScriptData,
}

impl TagKind {
    pub fn into_raw(self) -> u8 {
        match self {
            TagKind::Audio => 8,
            TagKind::Video => 9,
            TagKind::ScriptData => 18,
        }
    }

    pub fn try_from_raw(value: u8) -> Option<Self> {
        match value {
            8 => Some(TagKind::Audio),
            9 => Some(TagKind::Video),
            18 => Some(TagKind::ScriptData),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum FrameType {
    #[default]
    Keyframe,
    Interframe,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AvcPacketType {
    SequenceHeader,
    Nalu,
    EndOfSequence,
}

impl AvcPacketType {
    fn into_raw(self) -> u8 {
        match self {
            AvcPacketType::SequenceHeader => 0,
            AvcPacketType::Nalu => 1,
            AvcPacketType::EndOfSequence => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AacPacketType {
    SequenceHeader,
    Raw,
}

/// Reusable tag scratch buffer sized for the largest possible FLV tag.
///
/// One tag is built at a time: [`TagBuffer::start_tag`] writes the 11-byte
/// header, payload bytes are appended through the `put_*` methods or written
/// directly into [`TagBuffer::encoder_region`] + [`TagBuffer::advance`], and
/// [`TagBuffer::finish_tag`] back-patches the payload size and appends the
/// trailing tag size.
pub struct TagBuffer {
    buf: Box<[u8]>,
    len: usize,
}

impl TagBuffer {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; MAX_TAG_LEN].into_boxed_slice(),
            len: 0,
        }
    }

    /// Begins a new tag, discarding any previous contents.
    pub fn start_tag(&mut self, kind: TagKind, timestamp_ms: u32) {
        self.len = 0;
        self.put_u8(kind.into_raw());
        // Payload size is unknown until finish_tag.
        self.put_u24_be(0);
        // FLV splits the 32-bit timestamp into a low u24 and a high byte.
        self.put_u24_be(timestamp_ms & 0x00FF_FFFF);
        self.put_u8((timestamp_ms >> 24) as u8);
        // Stream id.
        self.put_u24_be(0);
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf[self.len] = value;
        self.len += 1;
    }

    pub fn put_u16_be(&mut self, value: u16) {
        self.put_slice(&value.to_be_bytes());
    }

    pub fn put_u24_be(&mut self, value: u32) {
        self.put_slice(&value.to_be_bytes()[1..4]);
    }

    pub fn put_u32_be(&mut self, value: u32) {
        self.put_slice(&value.to_be_bytes());
    }

    pub fn put_f64_be(&mut self, value: f64) {
        self.put_slice(&value.to_be_bytes());
    }

    pub fn put_slice(&mut self, data: &[u8]) {
        self.buf[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
    }

    /// First 5 bytes of an AVC video payload: frame/codec byte, packet type
    /// and composition time offset (pts - dts in ms, 0 without B-frames).
    pub fn put_avc_prefix(
        &mut self,
        frame_type: FrameType,
        packet_type: AvcPacketType,
        composition_time: i32,
    ) {
        self.put_u8(match frame_type {
            FrameType::Keyframe => 0x17,
            FrameType::Interframe => 0x27,
        });
        self.put_u8(packet_type.into_raw());
        self.put_u24_be(composition_time as u32 & 0x00FF_FFFF);
    }

    /// First 2 bytes of an AAC audio payload. The 0xAF flags byte hard-codes
    /// the 44.1 kHz/stereo/16-bit nibble; decoders take the real parameters
    /// from the AudioSpecificConfig.
    pub fn put_aac_prefix(&mut self, packet_type: AacPacketType) {
        self.put_u8(0xAF);
        self.put_u8(match packet_type {
            AacPacketType::SequenceHeader => 0,
            AacPacketType::Raw => 1,
        });
    }

    /// Writable region starting at a fixed offset from the tag start, for
    /// encoders that produce their payload directly into the tag. The caller
    /// accounts for written bytes with [`TagBuffer::advance`].
    pub fn encoder_region(&mut self, offset: usize) -> &mut [u8] {
        &mut self.buf[offset..TAG_HEADER_LEN + MAX_PAYLOAD_LEN]
    }

    pub fn advance(&mut self, len: usize) {
        debug_assert!(self.len + len <= TAG_HEADER_LEN + MAX_PAYLOAD_LEN);
        self.len += len;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Back-patches the payload size, appends the trailing tag size and
    /// returns the complete tag, ready for transmission.
    pub fn finish_tag(&mut self) -> Result<&[u8], TagError> {
        let payload_len = self.len - TAG_HEADER_LEN;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(TagError::PayloadTooLarge(payload_len));
        }
        self.buf[1..4].copy_from_slice(&(payload_len as u32).to_be_bytes()[1..4]);
        self.put_u32_be((TAG_HEADER_LEN + payload_len) as u32);
        Ok(&self.buf[..self.len])
    }
}

impl Default for TagBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// The 13-byte FLV file header written at the start of a capture file:
/// signature, version, audio/video flags, header length and the initial
/// previous-tag-size of zero.
pub fn file_header(has_video: bool, has_audio: bool) -> [u8; 13] {
    let flags = if has_audio { 0x04 } else { 0 } | if has_video { 0x01 } else { 0 };
    [
        b'F', b'L', b'V', 0x01, flags, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u24(data: &[u8]) -> u32 {
        ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | data[2] as u32
    }

    fn read_u32(data: &[u8]) -> u32 {
        u32::from_be_bytes([data[0], data[1], data[2], data[3]])
    }

    #[test]
    fn finish_patches_payload_size_and_trailer() {
        let mut tag = TagBuffer::new();
        tag.start_tag(TagKind::ScriptData, 0);
        tag.put_slice(&[0xAA; 37]);
        let bytes = tag.finish_tag().unwrap().to_vec();

        assert_eq!(bytes.len(), TAG_HEADER_LEN + 37 + TAG_TRAILER_LEN);
        assert_eq!(read_u24(&bytes[1..4]) as usize, bytes.len() - 15);
        assert_eq!(
            read_u32(&bytes[bytes.len() - 4..]) as usize,
            bytes.len() - 4
        );
    }

    #[test]
    fn timestamp_split_round_trips() {
        for ts in [0u32, 1, 999, 0x00FF_FFFF, 0x0100_0000, 0xFEDC_BA98] {
            let mut tag = TagBuffer::new();
            tag.start_tag(TagKind::Video, ts);
            let bytes = tag.finish_tag().unwrap();
            let restored = ((bytes[7] as u32) << 24) | read_u24(&bytes[4..7]);
            assert_eq!(restored, ts);
        }
    }

    #[test]
    fn empty_end_of_sequence_tag_is_20_bytes() {
        let mut tag = TagBuffer::new();
        tag.start_tag(TagKind::Video, 1234);
        tag.put_avc_prefix(FrameType::Keyframe, AvcPacketType::EndOfSequence, 0);
        let bytes = tag.finish_tag().unwrap();

        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[1..4], &[0x00, 0x00, 0x05]);
        assert_eq!(bytes[11], 0x17);
        assert_eq!(bytes[12], 2);
    }

    #[test]
    fn avc_prefix_interframe_nalu() {
        let mut tag = TagBuffer::new();
        tag.start_tag(TagKind::Video, 0);
        tag.put_avc_prefix(FrameType::Interframe, AvcPacketType::Nalu, 0);
        assert_eq!(&tag.buf[11..16], &[0x27, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn aac_prefix_bytes() {
        let mut tag = TagBuffer::new();
        tag.start_tag(TagKind::Audio, 0);
        tag.put_aac_prefix(AacPacketType::SequenceHeader);
        assert_eq!(&tag.buf[11..13], &[0xAF, 0x00]);

        tag.start_tag(TagKind::Audio, 0);
        tag.put_aac_prefix(AacPacketType::Raw);
        assert_eq!(&tag.buf[11..13], &[0xAF, 0x01]);
    }

    #[test]
    fn file_header_bytes() {
        assert_eq!(
            file_header(true, true),
            [0x46, 0x4C, 0x56, 0x01, 0x05, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(file_header(true, false)[4], 0x01);
        assert_eq!(file_header(false, true)[4], 0x04);
    }

    #[test]
    fn encoder_region_is_offset_into_tag() {
        let mut tag = TagBuffer::new();
        tag.start_tag(TagKind::Video, 0);
        let region = tag.encoder_region(VIDEO_PAYLOAD_OFFSET);
        region[..3].copy_from_slice(&[1, 2, 3]);
        tag.put_avc_prefix(FrameType::Keyframe, AvcPacketType::Nalu, 0);
        tag.advance(3);
        let bytes = tag.finish_tag().unwrap();
        assert_eq!(&bytes[16..19], &[1, 2, 3]);
        assert_eq!(read_u24(&bytes[1..4]), 8);
    }
}
