//! Typed RTMP packets
//!
//! Converts between reassembled `RtmpMessage`s and typed packets:
//! - Protocol control (types 1-6): fixed binary layouts
//! - Commands (types 20, 17): AMF0 name, transaction id, positional values
//! - Data (types 18, 15): metadata and other notifications
//! - Audio/video (types 8, 9): passed through untouched
//!
//! Commands this server acts on get their own variant; any other
//! well-formed command decodes to `Packet::Call` so callers can ignore it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{Amf0Decoder, Amf0Encoder, AmfObject, AmfValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::chunk::{MessageHeader, RtmpMessage};
use crate::protocol::constants::*;

/// User control event (message type 4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, data: Bytes },
}

/// Generic AMF command
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Usually null except for connect and responses
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: f64) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments: Vec::new(),
        }
    }

    pub fn with_object(mut self, object: AmfValue) -> Self {
        self.command_object = object;
        self
    }

    pub fn arg(mut self, value: AmfValue) -> Self {
        self.arguments.push(value);
        self
    }

    fn string_arg(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).and_then(AmfValue::as_str)
    }

    fn number_arg(&self, index: usize) -> Option<f64> {
        self.arguments.get(index).and_then(AmfValue::as_number)
    }

    fn required_string(&self, index: usize, field: &str) -> Result<String> {
        self.string_arg(index)
            .map(str::to_owned)
            .ok_or_else(|| ProtocolError::MissingField(format!("{}.{}", self.name, field)).into())
    }

    fn encode(&self) -> Bytes {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode(&AmfValue::Number(self.transaction_id));
        encoder.encode(&self.command_object);
        encoder.encode_all(&self.arguments);
        encoder.finish()
    }
}

/// Parameters of the `connect` command object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectParams {
    pub app: String,
    pub tc_url: Option<String>,
    pub flash_ver: Option<String>,
    pub swf_url: Option<String>,
    pub page_url: Option<String>,
    pub object_encoding: f64,
    /// The full command object, for handlers that need other fields
    pub object: AmfObject,
}

/// Vhost used when the tcUrl names none
pub const DEFAULT_VHOST: &str = "__defaultVhost__";

impl ConnectParams {
    pub fn from_object(object: &AmfObject) -> Self {
        let string = |key: &str| object.get(key).and_then(AmfValue::as_str).map(str::to_owned);
        Self {
            app: string("app").unwrap_or_default().trim_matches('/').to_string(),
            tc_url: string("tcUrl").or_else(|| string("tcurl")),
            flash_ver: string("flashVer").or_else(|| string("flashver")),
            swf_url: string("swfUrl").or_else(|| string("swfurl")),
            page_url: string("pageUrl").or_else(|| string("pageurl")),
            object_encoding: object
                .get("objectEncoding")
                .and_then(AmfValue::as_number)
                .unwrap_or(0.0),
            object: object.clone(),
        }
    }

    /// Vhost from `?vhost=` in the tcUrl, else its host, else the default.
    ///
    /// A bare IP address is not a vhost name.
    pub fn vhost(&self) -> String {
        let Some(tc_url) = self.tc_url.as_deref() else {
            return DEFAULT_VHOST.to_string();
        };

        if let Some((_, query)) = tc_url.split_once('?') {
            for pair in query.split(['&', '?']) {
                if let Some(("vhost", value)) = pair.split_once('=') {
                    if !value.is_empty() {
                        return value.to_string();
                    }
                }
            }
        }

        let rest = tc_url.split_once("://").map(|(_, r)| r).unwrap_or(tc_url);
        let authority = rest.split(['/', '?']).next().unwrap_or_default();
        let host = authority.split(':').next().unwrap_or_default();
        if host.is_empty() || host.parse::<std::net::IpAddr>().is_ok() || host == "localhost" {
            DEFAULT_VHOST.to_string()
        } else {
            host.to_string()
        }
    }

    fn to_object(&self) -> AmfObject {
        let mut object = self.object.clone();
        object.insert("app", AmfValue::from(self.app.as_str()));
        if let Some(tc_url) = &self.tc_url {
            object.insert("tcUrl", AmfValue::from(tc_url.as_str()));
        }
        if let Some(flash_ver) = &self.flash_ver {
            object.insert("flashVer", AmfValue::from(flash_ver.as_str()));
        }
        object.insert("objectEncoding", AmfValue::Number(self.object_encoding));
        object
    }
}

/// Non-metadata data message
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub name: String,
    pub values: Vec<AmfValue>,
}

/// Typed RTMP packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    SetChunkSize(u32),
    Abort { csid: u32 },
    Acknowledgement { sequence: u32 },
    UserControl(UserControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },

    Audio(Bytes),
    Video(Bytes),
    Aggregate(Bytes),

    Connect { transaction_id: f64, params: ConnectParams },
    CreateStream { transaction_id: f64 },
    Publish { transaction_id: f64, stream_name: String, publish_type: String },
    Play { transaction_id: f64, stream_name: String, start: f64, duration: f64, reset: bool },
    Pause { transaction_id: f64, paused: bool, position_ms: f64 },
    DeleteStream { transaction_id: f64, stream_id: u32 },
    CloseStream { transaction_id: f64 },
    ReleaseStream { transaction_id: f64, stream_name: String },
    FcPublish { transaction_id: f64, stream_name: String },
    FcUnpublish { transaction_id: f64, stream_name: String },
    /// `_result` or `_error`
    Response { success: bool, command: Command },
    OnStatus { info: AmfObject },
    /// Any other command (`_checkbw`, `getStreamLength`, ...)
    Call(Command),

    /// `onMetaData`, with any `@setDataFrame` wrapper removed
    Metadata(AmfValue),
    Data(DataMessage),

    Unknown { message_type: u8, payload: Bytes },
}

fn control_u32(message_type: u8, payload: &Bytes) -> Result<u32> {
    if payload.len() < 4 {
        return Err(ProtocolError::MalformedControl {
            message_type,
            len: payload.len(),
        }
        .into());
    }
    Ok(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
}

impl Packet {
    /// Decode a complete message into a typed packet
    pub fn decode(msg: &RtmpMessage) -> Result<Packet> {
        let message_type = msg.header.message_type;
        let payload = &msg.payload;

        match message_type {
            MSG_SET_CHUNK_SIZE => Ok(Packet::SetChunkSize(
                control_u32(message_type, payload)? & 0x7FFF_FFFF,
            )),
            MSG_ABORT => Ok(Packet::Abort {
                csid: control_u32(message_type, payload)?,
            }),
            MSG_ACKNOWLEDGEMENT => Ok(Packet::Acknowledgement {
                sequence: control_u32(message_type, payload)?,
            }),
            MSG_WINDOW_ACK_SIZE => Ok(Packet::WindowAckSize(control_u32(message_type, payload)?)),
            MSG_SET_PEER_BANDWIDTH => {
                if payload.len() < 5 {
                    return Err(ProtocolError::MalformedControl {
                        message_type,
                        len: payload.len(),
                    }
                    .into());
                }
                Ok(Packet::SetPeerBandwidth {
                    size: control_u32(message_type, payload)?,
                    limit_type: payload[4],
                })
            }
            MSG_USER_CONTROL => decode_user_control(payload.clone()).map(Packet::UserControl),
            MSG_AUDIO => Ok(Packet::Audio(payload.clone())),
            MSG_VIDEO => Ok(Packet::Video(payload.clone())),
            MSG_AGGREGATE => Ok(Packet::Aggregate(payload.clone())),
            MSG_COMMAND_AMF0 => decode_command(payload.clone()),
            MSG_DATA_AMF0 => decode_data(payload.clone()),
            // AMF3 variants lead with a format byte, then AMF0 values
            MSG_COMMAND_AMF3 => decode_command(skip_format_byte(payload)),
            MSG_DATA_AMF3 => decode_data(skip_format_byte(payload)),
            _ => Ok(Packet::Unknown {
                message_type,
                payload: payload.clone(),
            }),
        }
    }

    /// Message type and payload for this packet
    pub fn encode(&self) -> (u8, Bytes) {
        let mut buf = BytesMut::with_capacity(10);
        match self {
            Packet::SetChunkSize(size) => {
                buf.put_u32(*size & 0x7FFF_FFFF);
                (MSG_SET_CHUNK_SIZE, buf.freeze())
            }
            Packet::Abort { csid } => {
                buf.put_u32(*csid);
                (MSG_ABORT, buf.freeze())
            }
            Packet::Acknowledgement { sequence } => {
                buf.put_u32(*sequence);
                (MSG_ACKNOWLEDGEMENT, buf.freeze())
            }
            Packet::WindowAckSize(size) => {
                buf.put_u32(*size);
                (MSG_WINDOW_ACK_SIZE, buf.freeze())
            }
            Packet::SetPeerBandwidth { size, limit_type } => {
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }
            Packet::UserControl(event) => {
                encode_user_control(event, &mut buf);
                (MSG_USER_CONTROL, buf.freeze())
            }
            Packet::Audio(data) => (MSG_AUDIO, data.clone()),
            Packet::Video(data) => (MSG_VIDEO, data.clone()),
            Packet::Aggregate(data) => (MSG_AGGREGATE, data.clone()),
            Packet::Metadata(value) => {
                let mut encoder = Amf0Encoder::new();
                encoder.encode(&AmfValue::from(CMD_ON_METADATA));
                encoder.encode(value);
                (MSG_DATA_AMF0, encoder.finish())
            }
            Packet::Data(data) => {
                let mut encoder = Amf0Encoder::new();
                encoder.encode(&AmfValue::String(data.name.clone()));
                encoder.encode_all(&data.values);
                (MSG_DATA_AMF0, encoder.finish())
            }
            Packet::Unknown {
                message_type,
                payload,
            } => (*message_type, payload.clone()),
            command => (MSG_COMMAND_AMF0, command.to_command().encode()),
        }
    }

    /// Wrap into a message on the conventional chunk stream for its kind
    pub fn to_message(&self, stream_id: u32, timestamp: u32) -> RtmpMessage {
        let (message_type, payload) = self.encode();
        let csid = match message_type {
            MSG_SET_CHUNK_SIZE..=MSG_SET_PEER_BANDWIDTH => CSID_PROTOCOL_CONTROL,
            MSG_AUDIO => CSID_AUDIO,
            MSG_VIDEO => CSID_VIDEO,
            MSG_DATA_AMF0 | MSG_DATA_AMF3 => CSID_DATA,
            _ => CSID_COMMAND,
        };
        let timestamp = if message_type <= MSG_SET_PEER_BANDWIDTH {
            0
        } else {
            timestamp
        };
        RtmpMessage::new(
            csid,
            MessageHeader::new(message_type, timestamp, stream_id),
            payload,
        )
    }

    /// Command form of a command packet.
    ///
    /// Non-command packets map to an empty `Call`; `encode` never asks for them.
    fn to_command(&self) -> Command {
        match self {
            Packet::Connect {
                transaction_id,
                params,
            } => Command::new(CMD_CONNECT, *transaction_id)
                .with_object(AmfValue::Object(params.to_object())),
            Packet::CreateStream { transaction_id } => {
                Command::new(CMD_CREATE_STREAM, *transaction_id)
            }
            Packet::Publish {
                transaction_id,
                stream_name,
                publish_type,
            } => Command::new(CMD_PUBLISH, *transaction_id)
                .arg(AmfValue::from(stream_name.as_str()))
                .arg(AmfValue::from(publish_type.as_str())),
            Packet::Play {
                transaction_id,
                stream_name,
                start,
                duration,
                reset,
            } => Command::new(CMD_PLAY, *transaction_id)
                .arg(AmfValue::from(stream_name.as_str()))
                .arg(AmfValue::Number(*start))
                .arg(AmfValue::Number(*duration))
                .arg(AmfValue::Boolean(*reset)),
            Packet::Pause {
                transaction_id,
                paused,
                position_ms,
            } => Command::new(CMD_PAUSE, *transaction_id)
                .arg(AmfValue::Boolean(*paused))
                .arg(AmfValue::Number(*position_ms)),
            Packet::DeleteStream {
                transaction_id,
                stream_id,
            } => Command::new(CMD_DELETE_STREAM, *transaction_id)
                .arg(AmfValue::Number(*stream_id as f64)),
            Packet::CloseStream { transaction_id } => {
                Command::new(CMD_CLOSE_STREAM, *transaction_id)
            }
            Packet::ReleaseStream {
                transaction_id,
                stream_name,
            } => Command::new(CMD_RELEASE_STREAM, *transaction_id)
                .arg(AmfValue::from(stream_name.as_str())),
            Packet::FcPublish {
                transaction_id,
                stream_name,
            } => Command::new(CMD_FC_PUBLISH, *transaction_id)
                .arg(AmfValue::from(stream_name.as_str())),
            Packet::FcUnpublish {
                transaction_id,
                stream_name,
            } => Command::new(CMD_FC_UNPUBLISH, *transaction_id)
                .arg(AmfValue::from(stream_name.as_str())),
            Packet::Response { command, .. } | Packet::Call(command) => command.clone(),
            Packet::OnStatus { info } => {
                Command::new(CMD_ON_STATUS, 0.0).arg(AmfValue::Object(info.clone()))
            }
            _ => Command::new(String::new(), 0.0),
        }
    }

    // === Response builders ===

    /// `_result` for a successful connect
    pub fn connect_result(transaction_id: f64, object_encoding: f64) -> Packet {
        let props = AmfObject::new()
            .with("fmsVer", "FMS/3,5,3,888".into())
            .with("capabilities", AmfValue::Number(127.0))
            .with("mode", AmfValue::Number(1.0));
        let info = AmfObject::new()
            .with("level", "status".into())
            .with("code", NC_CONNECT_SUCCESS.into())
            .with("description", "Connection succeeded".into())
            .with("objectEncoding", AmfValue::Number(object_encoding));

        Packet::Response {
            success: true,
            command: Command::new(CMD_RESULT, transaction_id)
                .with_object(AmfValue::Object(props))
                .arg(AmfValue::Object(info)),
        }
    }

    /// `_error` for a refused connect
    pub fn connect_rejected(transaction_id: f64, reason: &str) -> Packet {
        let info = AmfObject::new()
            .with("level", "error".into())
            .with("code", NC_CONNECT_REJECTED.into())
            .with("description", reason.into());

        Packet::Response {
            success: false,
            command: Command::new(CMD_ERROR, transaction_id).arg(AmfValue::Object(info)),
        }
    }

    /// `_result` carrying the new message stream id
    pub fn create_stream_result(transaction_id: f64, stream_id: u32) -> Packet {
        Packet::Response {
            success: true,
            command: Command::new(CMD_RESULT, transaction_id)
                .arg(AmfValue::Number(stream_id as f64)),
        }
    }

    /// Empty `_result` (releaseStream, FCPublish and friends)
    pub fn empty_result(transaction_id: f64) -> Packet {
        Packet::Response {
            success: true,
            command: Command::new(CMD_RESULT, transaction_id).arg(AmfValue::Undefined),
        }
    }

    pub fn on_status(level: &str, code: &str, description: &str) -> Packet {
        Packet::OnStatus {
            info: status_info(level, code, description),
        }
    }

    /// `onFCPublish` / `onFCUnpublish`
    pub fn on_fc(name: &str, code: &str, description: &str) -> Packet {
        Packet::Call(
            Command::new(name, 0.0).arg(AmfValue::Object(status_info("status", code, description))),
        )
    }

    /// `onStatus(NetStream.Data.Start)` data notification sent before playback
    pub fn data_start() -> Packet {
        Packet::Data(DataMessage {
            name: CMD_ON_STATUS.to_string(),
            values: vec![AmfValue::Object(
                AmfObject::new().with("code", NS_DATA_START.into()),
            )],
        })
    }
}

fn status_info(level: &str, code: &str, description: &str) -> AmfObject {
    AmfObject::new()
        .with("level", level.into())
        .with("code", code.into())
        .with("description", description.into())
}

fn skip_format_byte(payload: &Bytes) -> Bytes {
    if payload.is_empty() {
        payload.clone()
    } else {
        payload.slice(1..)
    }
}

fn decode_user_control(mut payload: Bytes) -> Result<UserControlEvent> {
    let malformed = |len| ProtocolError::MalformedControl {
        message_type: MSG_USER_CONTROL,
        len,
    };
    if payload.len() < 2 {
        return Err(malformed(payload.len()).into());
    }
    let len = payload.len();
    let event_type = payload.get_u16();

    let needs = match event_type {
        UC_SET_BUFFER_LENGTH => 8,
        UC_STREAM_BEGIN | UC_STREAM_EOF | UC_STREAM_DRY | UC_STREAM_IS_RECORDED
        | UC_PING_REQUEST | UC_PING_RESPONSE => 4,
        _ => 0,
    };
    if payload.remaining() < needs {
        return Err(malformed(len).into());
    }

    Ok(match event_type {
        UC_STREAM_BEGIN => UserControlEvent::StreamBegin(payload.get_u32()),
        UC_STREAM_EOF => UserControlEvent::StreamEof(payload.get_u32()),
        UC_STREAM_DRY => UserControlEvent::StreamDry(payload.get_u32()),
        UC_SET_BUFFER_LENGTH => UserControlEvent::SetBufferLength {
            stream_id: payload.get_u32(),
            buffer_ms: payload.get_u32(),
        },
        UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(payload.get_u32()),
        UC_PING_REQUEST => UserControlEvent::PingRequest(payload.get_u32()),
        UC_PING_RESPONSE => UserControlEvent::PingResponse(payload.get_u32()),
        _ => UserControlEvent::Unknown {
            event_type,
            data: payload,
        },
    })
}

fn encode_user_control(event: &UserControlEvent, buf: &mut BytesMut) {
    match event {
        UserControlEvent::StreamBegin(id) => {
            buf.put_u16(UC_STREAM_BEGIN);
            buf.put_u32(*id);
        }
        UserControlEvent::StreamEof(id) => {
            buf.put_u16(UC_STREAM_EOF);
            buf.put_u32(*id);
        }
        UserControlEvent::StreamDry(id) => {
            buf.put_u16(UC_STREAM_DRY);
            buf.put_u32(*id);
        }
        UserControlEvent::SetBufferLength {
            stream_id,
            buffer_ms,
        } => {
            buf.put_u16(UC_SET_BUFFER_LENGTH);
            buf.put_u32(*stream_id);
            buf.put_u32(*buffer_ms);
        }
        UserControlEvent::StreamIsRecorded(id) => {
            buf.put_u16(UC_STREAM_IS_RECORDED);
            buf.put_u32(*id);
        }
        UserControlEvent::PingRequest(ts) => {
            buf.put_u16(UC_PING_REQUEST);
            buf.put_u32(*ts);
        }
        UserControlEvent::PingResponse(ts) => {
            buf.put_u16(UC_PING_RESPONSE);
            buf.put_u32(*ts);
        }
        UserControlEvent::Unknown { event_type, data } => {
            buf.put_u16(*event_type);
            buf.put_slice(data);
        }
    }
}

fn decode_command(mut payload: Bytes) -> Result<Packet> {
    let mut decoder = Amf0Decoder::new();

    let name = match decoder.decode(&mut payload)? {
        AmfValue::String(s) => s,
        other => {
            return Err(
                ProtocolError::InvalidCommand(format!("expected command name, got {:?}", other))
                    .into(),
            )
        }
    };
    let transaction_id = if payload.has_remaining() {
        decoder.decode(&mut payload)?.as_number().unwrap_or(0.0)
    } else {
        0.0
    };
    let command_object = if payload.has_remaining() {
        decoder.decode(&mut payload)?
    } else {
        AmfValue::Null
    };
    let arguments = decoder.decode_all(&mut payload)?;

    let cmd = Command {
        name,
        transaction_id,
        command_object,
        arguments,
    };

    Ok(match cmd.name.as_str() {
        CMD_CONNECT => {
            let object = cmd
                .command_object
                .as_object()
                .ok_or_else(|| ProtocolError::MissingField("connect.commandObject".into()))?;
            Packet::Connect {
                transaction_id,
                params: ConnectParams::from_object(object),
            }
        }
        CMD_CREATE_STREAM => Packet::CreateStream { transaction_id },
        CMD_PUBLISH => Packet::Publish {
            transaction_id,
            stream_name: cmd.required_string(0, "streamName")?,
            publish_type: cmd.string_arg(1).unwrap_or("live").to_string(),
        },
        CMD_PLAY => Packet::Play {
            transaction_id,
            stream_name: cmd.required_string(0, "streamName")?,
            start: cmd.number_arg(1).unwrap_or(-2.0),
            duration: cmd.number_arg(2).unwrap_or(-1.0),
            reset: cmd
                .arguments
                .get(3)
                .and_then(AmfValue::as_bool)
                .unwrap_or(true),
        },
        CMD_PAUSE => Packet::Pause {
            transaction_id,
            paused: cmd
                .arguments
                .first()
                .and_then(AmfValue::as_bool)
                .ok_or_else(|| ProtocolError::MissingField("pause.pauseFlag".into()))?,
            position_ms: cmd.number_arg(1).unwrap_or(0.0),
        },
        CMD_DELETE_STREAM => Packet::DeleteStream {
            transaction_id,
            stream_id: cmd.number_arg(0).unwrap_or(0.0) as u32,
        },
        CMD_CLOSE_STREAM => Packet::CloseStream { transaction_id },
        CMD_RELEASE_STREAM => Packet::ReleaseStream {
            transaction_id,
            stream_name: cmd.string_arg(0).unwrap_or_default().to_string(),
        },
        CMD_FC_PUBLISH => Packet::FcPublish {
            transaction_id,
            stream_name: cmd.string_arg(0).unwrap_or_default().to_string(),
        },
        CMD_FC_UNPUBLISH => Packet::FcUnpublish {
            transaction_id,
            stream_name: cmd.string_arg(0).unwrap_or_default().to_string(),
        },
        CMD_RESULT | CMD_ERROR => Packet::Response {
            success: cmd.name == CMD_RESULT,
            command: cmd,
        },
        CMD_ON_STATUS => Packet::OnStatus {
            info: cmd
                .arguments
                .first()
                .and_then(AmfValue::as_object)
                .cloned()
                .unwrap_or_default(),
        },
        _ => Packet::Call(cmd),
    })
}

fn decode_data(mut payload: Bytes) -> Result<Packet> {
    let mut values = Amf0Decoder::new().decode_all(&mut payload)?.into_iter();

    let mut name = match values.next() {
        Some(AmfValue::String(s)) => s,
        Some(other) => {
            return Err(
                ProtocolError::InvalidCommand(format!("expected data name, got {:?}", other))
                    .into(),
            )
        }
        None => return Err(ProtocolError::MissingField("data.name".into()).into()),
    };

    if name == CMD_SET_DATA_FRAME {
        match values.next() {
            Some(AmfValue::String(inner)) => name = inner,
            _ => return Err(ProtocolError::MissingField("@setDataFrame.name".into()).into()),
        }
    }

    if name == CMD_ON_METADATA {
        let metadata = values
            .next()
            .unwrap_or_else(|| AmfValue::EcmaArray(AmfObject::new()));
        return Ok(Packet::Metadata(metadata));
    }

    Ok(Packet::Data(DataMessage {
        name,
        values: values.collect(),
    }))
}
