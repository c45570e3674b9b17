use std::{
    io::{Read, Write},
    net::TcpStream,
};

use bytes::Bytes;
use tracing::{debug, trace, warn};
use url::Url;

use flv::amf0::Amf0Value;

use crate::{
    chunk::{ChunkReader, MessageWriter},
    error::RtmpError,
    handshake,
    message::{self, InboundMessage, MessageType, RawMessage, UserControlEvent},
};

const DEFAULT_PORT: u16 = 1935;
const OUTBOUND_CHUNK_SIZE: u32 = 4096;

// Chunk stream ids per media type, mirroring what FMLE-style publishers use.
const CS_ID_CONTROL: u8 = 2;
const CS_ID_COMMAND: u8 = 3;
const CS_ID_AUDIO: u8 = 4;
const CS_ID_SCRIPT: u8 = 5;
const CS_ID_VIDEO: u8 = 6;

/// Publish destination parsed from an `rtmp://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpClientConfig {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub stream_key: String,
}

impl RtmpClientConfig {
    /// Splits `rtmp://host[:port]/app[/...]/stream_key` into its parts. The
    /// last path segment is the stream key, everything before it the app.
    pub fn parse(url: &str) -> Result<Self, RtmpError> {
        let parsed =
            Url::parse(url).map_err(|err| RtmpError::InvalidUrl(err.to_string().into()))?;
        if parsed.scheme() != "rtmp" {
            return Err(RtmpError::InvalidUrl(
                format!("unsupported scheme \"{}\"", parsed.scheme()).into(),
            ));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| RtmpError::InvalidUrl("missing host".into()))?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_PORT);

        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let [app_segments @ .., stream_key] = &segments[..] else {
            return Err(RtmpError::InvalidUrl("missing app and stream key".into()));
        };
        if app_segments.is_empty() {
            return Err(RtmpError::InvalidUrl("missing app".into()));
        }
        Ok(Self {
            host,
            port,
            app: app_segments.join("/"),
            stream_key: stream_key.to_string(),
        })
    }

    fn tc_url(&self) -> String {
        format!("rtmp://{}:{}/{}", self.host, self.port, self.app)
    }
}

/// A connected publishing session. Created by [`RtmpClient::connect`], which
/// returns only after the server acknowledged the publish request.
pub struct RtmpClient {
    stream: TcpStream,
    writer: MessageWriter,
    reader: ChunkReader,
    msg_stream_id: u32,
    next_transaction_id: f64,
    bytes_in: u64,
    bytes_acked: u64,
    window_ack_size: u32,
}

impl RtmpClient {
    /// Dials the server and runs the handshake plus the
    /// connect/createStream/publish command exchange.
    pub fn connect(config: &RtmpClientConfig) -> Result<Self, RtmpError> {
        let mut stream = TcpStream::connect((config.host.as_str(), config.port))?;
        stream.set_nodelay(true)?;
        handshake::perform(&mut stream)?;
        debug!(host = %config.host, port = config.port, "RTMP handshake complete");

        let mut client = Self {
            stream,
            writer: MessageWriter::new(),
            reader: ChunkReader::new(),
            msg_stream_id: 0,
            next_transaction_id: 1.0,
            bytes_in: 0,
            bytes_acked: 0,
            window_ack_size: 0,
        };

        client.send(CS_ID_CONTROL, &message::set_chunk_size(OUTBOUND_CHUNK_SIZE))?;
        client.writer.set_chunk_size(OUTBOUND_CHUNK_SIZE);

        client.send_connect(config)?;
        client.send_create_stream()?;
        client.send_publish(config)?;
        debug!(app = %config.app, "publishing started");
        Ok(client)
    }

    /// Re-frames a finalized FLV tag (header, payload and trailing size
    /// field) as an RTMP media message. The tag bytes are produced by the
    /// muxer and passed through unmodified apart from the framing.
    pub fn write_tag(&mut self, tag: &[u8]) -> Result<(), RtmpError> {
        if tag.len() < 15 {
            return Err(RtmpError::MalformedTag);
        }
        let payload_len =
            u32::from_be_bytes([0, tag[1], tag[2], tag[3]]) as usize;
        if tag.len() != payload_len + 15 {
            return Err(RtmpError::MalformedTag);
        }
        let timestamp = u32::from_be_bytes([tag[7], tag[4], tag[5], tag[6]]);
        let (msg_type, cs_id) = match tag[0] {
            8 => (MessageType::Audio, CS_ID_AUDIO),
            9 => (MessageType::Video, CS_ID_VIDEO),
            18 => (MessageType::DataAmf0, CS_ID_SCRIPT),
            _ => return Err(RtmpError::MalformedTag),
        };

        let msg = RawMessage {
            msg_type_id: msg_type.into_raw(),
            stream_id: self.msg_stream_id,
            timestamp,
            payload: Bytes::copy_from_slice(&tag[11..11 + payload_len]),
        };
        self.send(cs_id, &msg)
    }

    /// Drains whatever control traffic the server has queued without
    /// blocking. Media-only servers stay quiet for long stretches, so an
    /// empty read is the common case.
    pub fn poll_control(&mut self) -> Result<(), RtmpError> {
        self.stream.set_nonblocking(true)?;
        let drained = self.drain_socket();
        self.stream.set_nonblocking(false)?;
        drained?;

        while let Some(msg) = self.reader.try_next_message()? {
            let inbound = InboundMessage::from_raw(msg)?;
            if let InboundMessage::Command { values } = inbound {
                trace!(?values, "ignoring mid-stream command");
            } else {
                self.handle_control(inbound)?;
            }
        }
        self.maybe_acknowledge()
    }

    /// Announces the end of the stream to the server. The socket itself is
    /// released on drop.
    pub fn close(&mut self) -> Result<(), RtmpError> {
        let delete_stream = message::command(
            &[
                Amf0Value::String("deleteStream".into()),
                Amf0Value::Number(self.take_transaction_id()),
                Amf0Value::Null,
                Amf0Value::Number(self.msg_stream_id as f64),
            ],
            0,
        )?;
        self.send(CS_ID_COMMAND, &delete_stream)?;
        self.stream.shutdown(std::net::Shutdown::Write)?;
        Ok(())
    }

    fn send(&mut self, cs_id: u8, msg: &RawMessage) -> Result<(), RtmpError> {
        self.writer.write(&mut self.stream, cs_id, msg)?;
        self.stream.flush()?;
        Ok(())
    }

    fn send_connect(&mut self, config: &RtmpClientConfig) -> Result<(), RtmpError> {
        let transaction_id = self.take_transaction_id();
        let connect = message::command(
            &[
                Amf0Value::String("connect".into()),
                Amf0Value::Number(transaction_id),
                Amf0Value::Object(vec![
                    ("app".into(), Amf0Value::String(config.app.clone())),
                    ("type".into(), Amf0Value::String("nonprivate".into())),
                    (
                        "flashVer".into(),
                        Amf0Value::String("FMLE/3.0 (compatible; FMSc/1.0)".into()),
                    ),
                    ("tcUrl".into(), Amf0Value::String(config.tc_url())),
                ]),
            ],
            0,
        )?;
        self.send(CS_ID_COMMAND, &connect)?;
        self.await_result(transaction_id)?;
        Ok(())
    }

    fn send_create_stream(&mut self) -> Result<(), RtmpError> {
        let transaction_id = self.take_transaction_id();
        let create_stream = message::command(
            &[
                Amf0Value::String("createStream".into()),
                Amf0Value::Number(transaction_id),
                Amf0Value::Null,
            ],
            0,
        )?;
        self.send(CS_ID_COMMAND, &create_stream)?;

        let values = self.await_result(transaction_id)?;
        let Some(Amf0Value::Number(stream_id)) = values.get(3) else {
            return Err(RtmpError::NegotiationFailed(
                "createStream result carried no stream id".into(),
            ));
        };
        self.msg_stream_id = *stream_id as u32;
        Ok(())
    }

    fn send_publish(&mut self, config: &RtmpClientConfig) -> Result<(), RtmpError> {
        let publish = message::command(
            &[
                Amf0Value::String("publish".into()),
                Amf0Value::Number(self.take_transaction_id()),
                Amf0Value::Null,
                Amf0Value::String(config.stream_key.clone()),
                Amf0Value::String("live".into()),
            ],
            self.msg_stream_id,
        )?;
        self.send(CS_ID_COMMAND, &publish)?;
        self.await_publish_start()
    }

    /// Blocks until a `_result` for `transaction_id` arrives, servicing
    /// control messages in the meantime.
    fn await_result(&mut self, transaction_id: f64) -> Result<Vec<Amf0Value>, RtmpError> {
        loop {
            let values = match self.read_inbound_blocking()? {
                InboundMessage::Command { values } => values,
                other => {
                    self.handle_control(other)?;
                    continue;
                }
            };
            match (values.first(), values.get(1)) {
                (Some(Amf0Value::String(name)), Some(Amf0Value::Number(txn)))
                    if *txn == transaction_id =>
                {
                    if name == "_result" {
                        return Ok(values);
                    }
                    if name == "_error" {
                        return Err(RtmpError::NegotiationFailed(
                            format!("server rejected transaction {transaction_id}: {values:?}")
                                .into(),
                        ));
                    }
                    debug!(%name, "unexpected command during negotiation");
                }
                _ => trace!(?values, "skipping unrelated command"),
            }
        }
    }

    fn await_publish_start(&mut self) -> Result<(), RtmpError> {
        loop {
            let values = match self.read_inbound_blocking()? {
                InboundMessage::Command { values } => values,
                other => {
                    self.handle_control(other)?;
                    continue;
                }
            };
            let Some(Amf0Value::String(name)) = values.first() else {
                continue;
            };
            if name != "onStatus" {
                trace!(?values, "skipping unrelated command");
                continue;
            }
            let code = values.iter().find_map(|value| {
                let Amf0Value::Object(entries) = value else {
                    return None;
                };
                entries.iter().find_map(|(key, value)| match value {
                    Amf0Value::String(code) if key == "code" => Some(code.as_str()),
                    _ => None,
                })
            });
            match code {
                Some("NetStream.Publish.Start") => return Ok(()),
                Some(other) => {
                    return Err(RtmpError::NegotiationFailed(
                        format!("publish refused with status {other}").into(),
                    ));
                }
                None => {
                    return Err(RtmpError::NegotiationFailed(
                        "onStatus without a status code".into(),
                    ));
                }
            }
        }
    }

    fn read_inbound_blocking(&mut self) -> Result<InboundMessage, RtmpError> {
        loop {
            if let Some(msg) = self.reader.try_next_message()? {
                return InboundMessage::from_raw(msg);
            }
            let mut buf = [0u8; 4096];
            let read = self.stream.read(&mut buf)?;
            if read == 0 {
                return Err(RtmpError::SocketClosed);
            }
            self.bytes_in += read as u64;
            self.reader.extend(&buf[..read]);
        }
    }

    fn drain_socket(&mut self) -> Result<(), RtmpError> {
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(RtmpError::SocketClosed),
                Ok(read) => {
                    self.bytes_in += read as u64;
                    self.reader.extend(&buf[..read]);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn handle_control(&mut self, inbound: InboundMessage) -> Result<(), RtmpError> {
        match inbound {
            InboundMessage::SetChunkSize { chunk_size } => {
                debug!(chunk_size, "server changed inbound chunk size");
                self.reader.set_chunk_size(chunk_size);
            }
            InboundMessage::WindowAckSize { window_size } => {
                self.window_ack_size = window_size;
            }
            InboundMessage::UserControl(UserControlEvent::PingRequest { timestamp }) => {
                self.send(CS_ID_CONTROL, &message::ping_response(timestamp))?;
            }
            InboundMessage::UserControl(event) => {
                trace!(?event, "ignoring user control event");
            }
            InboundMessage::SetPeerBandwidth { bandwidth, .. } => {
                trace!(bandwidth, "ignoring peer bandwidth request");
            }
            InboundMessage::Acknowledgement { .. } => (),
            InboundMessage::Command { values } => {
                trace!(?values, "ignoring command");
            }
            InboundMessage::Unknown { msg_type_id } => {
                warn!(msg_type_id, "ignoring message of unknown type");
            }
        }
        Ok(())
    }

    fn maybe_acknowledge(&mut self) -> Result<(), RtmpError> {
        if self.window_ack_size == 0 {
            return Ok(());
        }
        if self.bytes_in - self.bytes_acked >= self.window_ack_size as u64 {
            self.send(
                CS_ID_CONTROL,
                &message::acknowledgement(self.bytes_in as u32),
            )?;
            self.bytes_acked = self.bytes_in;
        }
        Ok(())
    }

    fn take_transaction_id(&mut self) -> f64 {
        let id = self.next_transaction_id;
        self.next_transaction_id += 1.0;
        id
    }
}
