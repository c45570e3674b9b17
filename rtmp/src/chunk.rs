use std::{
    collections::HashMap,
    io::{self, Write},
};

use bytes::{Buf, BytesMut};

use crate::{error::RtmpError, message::RawMessage};

pub(crate) const DEFAULT_CHUNK_SIZE: usize = 128;

const EXTENDED_TIMESTAMP: u32 = 0xFF_FFFF;

/// Serializes messages into chunk streams. Every message is written with a
/// full type 0 header followed by type 3 continuation chunks, so the peer
/// never has to rely on header compression state we would have to mirror.
pub(crate) struct MessageWriter {
    chunk_size: usize,
}

impl MessageWriter {
    pub(crate) fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub(crate) fn set_chunk_size(&mut self, chunk_size: u32) {
        self.chunk_size = chunk_size as usize;
    }

    pub(crate) fn write<W: Write>(
        &self,
        writer: &mut W,
        cs_id: u8,
        msg: &RawMessage,
    ) -> io::Result<()> {
        debug_assert!((2..64).contains(&cs_id));

        let extended = msg.timestamp >= EXTENDED_TIMESTAMP;
        let ts_field = if extended {
            EXTENDED_TIMESTAMP
        } else {
            msg.timestamp
        };

        let mut header = [0u8; 16];
        header[0] = cs_id; // fmt 0
        header[1..4].copy_from_slice(&ts_field.to_be_bytes()[1..]);
        header[4..7].copy_from_slice(&(msg.payload.len() as u32).to_be_bytes()[1..]);
        header[7] = msg.msg_type_id;
        header[8..12].copy_from_slice(&msg.stream_id.to_le_bytes());
        let mut header_len = 12;
        if extended {
            header[12..16].copy_from_slice(&msg.timestamp.to_be_bytes());
            header_len = 16;
        }
        writer.write_all(&header[..header_len])?;

        let mut chunks = msg.payload.chunks(self.chunk_size);
        if let Some(first) = chunks.next() {
            writer.write_all(first)?;
        }
        for chunk in chunks {
            writer.write_all(&[0xC0 | cs_id])?;
            if extended {
                writer.write_all(&msg.timestamp.to_be_bytes())?;
            }
            writer.write_all(chunk)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct PrevHeader {
    timestamp: u32,
    timestamp_delta: u32,
    length: u32,
    msg_type_id: u8,
    stream_id: u32,
    extended: bool,
}

enum Step {
    NeedMoreData,
    MessageIncomplete,
    MessageComplete(RawMessage),
}

/// Incremental chunk stream parser. Bytes read off the socket are appended
/// with [`ChunkReader::extend`] and reassembled messages are drained with
/// [`ChunkReader::try_next_message`].
pub(crate) struct ChunkReader {
    buf: BytesMut,
    chunk_size: usize,
    prev: HashMap<u32, PrevHeader>,
    partial: HashMap<u32, BytesMut>,
}

impl ChunkReader {
    pub(crate) fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            prev: HashMap::new(),
            partial: HashMap::new(),
        }
    }

    pub(crate) fn set_chunk_size(&mut self, chunk_size: u32) {
        self.chunk_size = chunk_size as usize;
    }

    pub(crate) fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next fully reassembled message, or `None` when the
    /// buffered bytes end mid-chunk.
    pub(crate) fn try_next_message(&mut self) -> Result<Option<RawMessage>, RtmpError> {
        loop {
            match self.parse_chunk()? {
                Step::NeedMoreData => return Ok(None),
                Step::MessageIncomplete => continue,
                Step::MessageComplete(msg) => return Ok(Some(msg)),
            }
        }
    }

    fn parse_chunk(&mut self) -> Result<Step, RtmpError> {
        let buf = &self.buf[..];
        if buf.is_empty() {
            return Ok(Step::NeedMoreData);
        }

        let fmt = buf[0] >> 6;
        let (cs_id, basic_len) = match buf[0] & 0x3F {
            0 => {
                if buf.len() < 2 {
                    return Ok(Step::NeedMoreData);
                }
                (buf[1] as u32 + 64, 2)
            }
            1 => {
                if buf.len() < 3 {
                    return Ok(Step::NeedMoreData);
                }
                (buf[2] as u32 * 256 + buf[1] as u32 + 64, 3)
            }
            cs => (cs as u32, 1),
        };

        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if buf.len() < basic_len + header_len {
            return Ok(Step::NeedMoreData);
        }
        let header = &buf[basic_len..basic_len + header_len];

        let prev = self.prev.get(&cs_id).copied();
        let continuing = self.partial.get(&cs_id).map(|p| p.len()).unwrap_or(0);

        let require_prev = |prev: Option<PrevHeader>| {
            prev.ok_or_else(|| {
                RtmpError::ChunkProtocol(
                    format!("compressed header on unknown chunk stream {cs_id}").into(),
                )
            })
        };

        // Resolve the full header, falling back to the previous header on
        // this chunk stream for the fields a compressed format omits.
        let (resolved, ts_field) = match fmt {
            0 => {
                let ts = read_u24(&header[0..3]);
                (
                    PrevHeader {
                        timestamp: ts,
                        timestamp_delta: 0,
                        length: read_u24(&header[3..6]),
                        msg_type_id: header[6],
                        stream_id: u32::from_le_bytes([
                            header[7], header[8], header[9], header[10],
                        ]),
                        extended: ts == EXTENDED_TIMESTAMP,
                    },
                    ts,
                )
            }
            1 => {
                let prev = require_prev(prev)?;
                let delta = read_u24(&header[0..3]);
                (
                    PrevHeader {
                        timestamp: prev.timestamp,
                        timestamp_delta: delta,
                        length: read_u24(&header[3..6]),
                        msg_type_id: header[6],
                        stream_id: prev.stream_id,
                        extended: delta == EXTENDED_TIMESTAMP,
                    },
                    delta,
                )
            }
            2 => {
                let prev = require_prev(prev)?;
                let delta = read_u24(&header[0..3]);
                (
                    PrevHeader {
                        timestamp_delta: delta,
                        extended: delta == EXTENDED_TIMESTAMP,
                        ..prev
                    },
                    delta,
                )
            }
            _ => {
                let prev = require_prev(prev)?;
                (prev, 0)
            }
        };

        let mut offset = basic_len + header_len;
        let mut resolved = resolved;
        if resolved.extended {
            if buf.len() < offset + 4 {
                return Ok(Step::NeedMoreData);
            }
            let ext = u32::from_be_bytes([
                buf[offset],
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
            ]);
            match fmt {
                0 => resolved.timestamp = ext,
                1 | 2 => resolved.timestamp_delta = ext,
                _ => (),
            }
            offset += 4;
        } else {
            match fmt {
                0 => resolved.timestamp = ts_field,
                1 | 2 => resolved.timestamp_delta = ts_field,
                _ => (),
            }
        }

        // Deltas only apply when a chunk starts a new message. A type 3
        // chunk continuing a partial message keeps the current timestamp.
        if continuing == 0 && fmt != 0 {
            resolved.timestamp = resolved.timestamp.wrapping_add(resolved.timestamp_delta);
        }

        let data_len = (resolved.length as usize)
            .saturating_sub(continuing)
            .min(self.chunk_size);
        if buf.len() < offset + data_len {
            return Ok(Step::NeedMoreData);
        }

        let partial = self.partial.entry(cs_id).or_default();
        partial.extend_from_slice(&self.buf[offset..offset + data_len]);
        self.buf.advance(offset + data_len);
        self.prev.insert(cs_id, resolved);

        if self.partial[&cs_id].len() < resolved.length as usize {
            return Ok(Step::MessageIncomplete);
        }
        let payload = self
            .partial
            .remove(&cs_id)
            .unwrap_or_default()
            .freeze();
        Ok(Step::MessageComplete(RawMessage {
            msg_type_id: resolved.msg_type_id,
            stream_id: resolved.stream_id,
            timestamp: resolved.timestamp,
            payload,
        }))
    }
}

fn read_u24(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}
