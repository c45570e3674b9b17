use bytes::{Buf, Bytes};

use flv::amf0::{Amf0Value, decode_amf0_values, encode_amf0_values};

use crate::error::RtmpError;

// https://rtmp.veriskope.com/docs/spec/#54-protocol-control-messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageType {
    SetChunkSize,     // 1
    Acknowledgement,  // 3
    UserControl,      // 4
    WindowAckSize,    // 5
    SetPeerBandwidth, // 6
    Audio,            // 8
    Video,            // 9
    DataAmf0,         // 18 (0x12)
    CommandAmf0,      // 20 (0x14)
}

impl MessageType {
    pub(crate) fn into_raw(self) -> u8 {
        match self {
            MessageType::SetChunkSize => 1,
            MessageType::Acknowledgement => 3,
            MessageType::UserControl => 4,
            MessageType::WindowAckSize => 5,
            MessageType::SetPeerBandwidth => 6,
            MessageType::Audio => 8,
            MessageType::Video => 9,
            MessageType::DataAmf0 => 18,
            MessageType::CommandAmf0 => 20,
        }
    }
}

/// A fully reassembled RTMP message, before interpretation.
#[derive(Debug)]
pub(crate) struct RawMessage {
    pub msg_type_id: u8,
    pub stream_id: u32,
    pub timestamp: u32,
    pub payload: Bytes,
}

// https://rtmp.veriskope.com/docs/spec/#717user-control-message-events
#[derive(Debug)]
pub(crate) enum UserControlEvent {
    StreamBegin { stream_id: u32 },
    PingRequest { timestamp: u32 },
    Unknown { event_type: u16 },
}

/// The inbound messages a publishing client has to react to. Everything else
/// is surfaced as `Unknown` and dropped by the dispatcher.
#[derive(Debug)]
pub(crate) enum InboundMessage {
    SetChunkSize { chunk_size: u32 },
    Acknowledgement { sequence_number: u32 },
    UserControl(UserControlEvent),
    WindowAckSize { window_size: u32 },
    SetPeerBandwidth { bandwidth: u32, limit_type: u8 },
    Command { values: Vec<Amf0Value> },
    Unknown { msg_type_id: u8 },
}

impl InboundMessage {
    pub(crate) fn from_raw(msg: RawMessage) -> Result<Self, RtmpError> {
        let mut payload = msg.payload;
        let parsed = match msg.msg_type_id {
            1 => InboundMessage::SetChunkSize {
                chunk_size: read_u32(&mut payload)?,
            },
            3 => InboundMessage::Acknowledgement {
                sequence_number: read_u32(&mut payload)?,
            },
            4 => {
                let event_type = read_u16(&mut payload)?;
                let event = match event_type {
                    0 => UserControlEvent::StreamBegin {
                        stream_id: read_u32(&mut payload)?,
                    },
                    6 => UserControlEvent::PingRequest {
                        timestamp: read_u32(&mut payload)?,
                    },
                    other => UserControlEvent::Unknown { event_type: other },
                };
                InboundMessage::UserControl(event)
            }
            5 => InboundMessage::WindowAckSize {
                window_size: read_u32(&mut payload)?,
            },
            6 => InboundMessage::SetPeerBandwidth {
                bandwidth: read_u32(&mut payload)?,
                limit_type: read_u8(&mut payload)?,
            },
            20 => InboundMessage::Command {
                values: decode_amf0_values(&payload)?,
            },
            other => InboundMessage::Unknown { msg_type_id: other },
        };
        Ok(parsed)
    }
}

pub(crate) fn command(values: &[Amf0Value], stream_id: u32) -> Result<RawMessage, RtmpError> {
    Ok(RawMessage {
        msg_type_id: MessageType::CommandAmf0.into_raw(),
        stream_id,
        timestamp: 0,
        payload: encode_amf0_values(values)?,
    })
}

pub(crate) fn ping_response(timestamp: u32) -> RawMessage {
    RawMessage {
        msg_type_id: MessageType::UserControl.into_raw(),
        stream_id: 0,
        timestamp: 0,
        payload: Bytes::from([&7u16.to_be_bytes()[..], &timestamp.to_be_bytes()].concat()),
    }
}

pub(crate) fn acknowledgement(sequence_number: u32) -> RawMessage {
    RawMessage {
        msg_type_id: MessageType::Acknowledgement.into_raw(),
        stream_id: 0,
        timestamp: 0,
        payload: Bytes::copy_from_slice(&sequence_number.to_be_bytes()),
    }
}

pub(crate) fn set_chunk_size(chunk_size: u32) -> RawMessage {
    RawMessage {
        msg_type_id: MessageType::SetChunkSize.into_raw(),
        stream_id: 0,
        timestamp: 0,
        payload: Bytes::copy_from_slice(&chunk_size.to_be_bytes()),
    }
}

fn read_u8(payload: &mut Bytes) -> Result<u8, RtmpError> {
    if payload.remaining() < 1 {
        return Err(RtmpError::MalformedControlPayload);
    }
    Ok(payload.get_u8())
}

fn read_u16(payload: &mut Bytes) -> Result<u16, RtmpError> {
    if payload.remaining() < 2 {
        return Err(RtmpError::MalformedControlPayload);
    }
    Ok(payload.get_u16())
}

fn read_u32(payload: &mut Bytes) -> Result<u32, RtmpError> {
    if payload.remaining() < 4 {
        return Err(RtmpError::MalformedControlPayload);
    }
    Ok(payload.get_u32())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_chunk_size() {
        let msg = RawMessage {
            msg_type_id: 1,
            stream_id: 0,
            timestamp: 0,
            payload: Bytes::copy_from_slice(&4096u32.to_be_bytes()),
        };
        assert!(matches!(
            InboundMessage::from_raw(msg).unwrap(),
            InboundMessage::SetChunkSize { chunk_size: 4096 }
        ));
    }

    #[test]
    fn parses_ping_request() {
        let payload = [&6u16.to_be_bytes()[..], &1234u32.to_be_bytes()].concat();
        let msg = RawMessage {
            msg_type_id: 4,
            stream_id: 0,
            timestamp: 0,
            payload: Bytes::from(payload),
        };
        assert!(matches!(
            InboundMessage::from_raw(msg).unwrap(),
            InboundMessage::UserControl(UserControlEvent::PingRequest { timestamp: 1234 })
        ));
    }

    #[test]
    fn ping_response_echoes_timestamp() {
        let msg = ping_response(1234);
        assert_eq!(msg.msg_type_id, 4);
        assert_eq!(&msg.payload[..2], &7u16.to_be_bytes());
        assert_eq!(&msg.payload[2..6], &1234u32.to_be_bytes());
    }

    #[test]
    fn truncated_control_payload_is_an_error() {
        let msg = RawMessage {
            msg_type_id: 5,
            stream_id: 0,
            timestamp: 0,
            payload: Bytes::from_static(&[0x00, 0x01]),
        };
        assert!(InboundMessage::from_raw(msg).is_err());
    }

    #[test]
    fn unknown_types_are_preserved_not_rejected() {
        let msg = RawMessage {
            msg_type_id: 17,
            stream_id: 0,
            timestamp: 0,
            payload: Bytes::new(),
        };
        assert!(matches!(
            InboundMessage::from_raw(msg).unwrap(),
            InboundMessage::Unknown { msg_type_id: 17 }
        ));
    }
}
