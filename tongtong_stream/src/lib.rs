//! TongStream protocol helpers.
//!
//! Every message is a fixed-size header followed by a MessagePack payload.
//! The host publishes character poses and session events with it; external
//! renderers and inspectors decode them with the same helpers.

use std::convert::TryFrom;

use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

/// Bytes that prefix every TongStream message ("TONG").
pub const HEADER_MAGIC: [u8; 4] = *b"TONG";

pub const PROTOCOL_VERSION: u16 = 0x0001;

/// Length of the binary header in bytes.
pub const HEADER_LEN: usize = 4 + 2 + 2 + 4;

/// Payloads larger than this are rejected before any allocation.
pub const MAX_PAYLOAD_LEN: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr, Hash)]
#[repr(u16)]
pub enum MessageKind {
    Hello = 0x0001,
    PoseUpdate = 0x0002,
    SessionEvent = 0x0003,
    Heartbeat = 0x0004,
}

impl TryFrom<u16> for MessageKind {
    type Error = ();

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Hello),
            0x0002 => Ok(Self::PoseUpdate),
            0x0003 => Ok(Self::SessionEvent),
            0x0004 => Ok(Self::Heartbeat),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u16,
    pub kind: MessageKind,
    pub length: u32,
}

impl MessageHeader {
    /// Encode the header as big-endian bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&HEADER_MAGIC);
        out[4..6].copy_from_slice(&self.version.to_be_bytes());
        out[6..8].copy_from_slice(&(self.kind as u16).to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn decode(input: &[u8]) -> Result<Self, ProtocolError> {
        if input.len() < HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader);
        }
        if input[..4] != HEADER_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let mut cursor = &input[4..HEADER_LEN];
        let version = cursor.get_u16();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let kind_raw = cursor.get_u16();
        let kind = MessageKind::try_from(kind_raw)
            .map_err(|_| ProtocolError::UnknownMessageKind(kind_raw))?;
        let length = cursor.get_u32();
        if length > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge(length));
        }
        Ok(Self {
            version,
            kind,
            length,
        })
    }
}

/// Handshake sent to every subscriber right after it connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: String,
    pub producer: String,
    pub build: Option<String>,
}

impl Hello {
    pub fn new(producer: impl Into<String>, build: Option<String>) -> Self {
        Self {
            protocol: "TongStream".to_string(),
            producer: producer.into(),
            build,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Character pose published once per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseUpdate {
    pub seq: u64,
    pub host_time_ns: u64,
    pub frame: u32,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub yaw: f32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub animation_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_id: Option<String>,
    #[serde(skip_serializing_if = "is_false", default)]
    pub matched: bool,
}

/// Session event mirrored from the host's JSON event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEventMessage {
    pub seq: u64,
    pub host_time_ns: u64,
    pub label: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub seq: u64,
    pub host_time_ns: u64,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("header smaller than {HEADER_LEN} bytes")]
    TruncatedHeader,
    #[error("header magic mismatch")]
    BadMagic,
    #[error("protocol version {0:#06x} is not supported")]
    UnsupportedVersion(u16),
    #[error("message kind {0:#06x} is unknown")]
    UnknownMessageKind(u16),
    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(u32),
    #[error("payload length mismatch: header declared {expected} bytes but read {actual}")]
    LengthMismatch { expected: u32, actual: usize },
    #[error("payload decode error: {0}")]
    PayloadDecode(#[from] rmp_serde::decode::Error),
    #[error("payload encode error: {0}")]
    PayloadEncode(#[from] rmp_serde::encode::Error),
}

/// Wraps a payload with framing suitable for the wire.
pub fn encode_message<T>(kind: MessageKind, payload: &T) -> Result<Vec<u8>, ProtocolError>
where
    T: Serialize,
{
    let payload_bytes = rmp_serde::to_vec_named(payload)?;
    let length = u32::try_from(payload_bytes.len()).unwrap_or(u32::MAX);
    if length > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge(length));
    }
    let header = MessageHeader {
        version: PROTOCOL_VERSION,
        kind,
        length,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload_bytes.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&payload_bytes);
    Ok(out)
}

/// Decodes one complete framed message, returning both header and payload.
pub fn decode_envelope(bytes: &[u8]) -> Result<(MessageHeader, &[u8]), ProtocolError> {
    let header = MessageHeader::decode(bytes)?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != header.length as usize {
        return Err(ProtocolError::LengthMismatch {
            expected: header.length,
            actual: payload.len(),
        });
    }
    Ok((header, payload))
}

/// Decode a payload straight into the requested type.
pub fn decode_payload<T>(payload: &[u8]) -> Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    let value = rmp_serde::from_slice(payload)?;
    Ok(value)
}

/// Splits the next complete message off the front of a receive buffer.
/// Returns `Ok(None)` while the buffer still lacks a full frame.
pub fn take_frame(buffer: &mut BytesMut) -> Result<Option<(MessageHeader, Bytes)>, ProtocolError> {
    if buffer.len() < HEADER_LEN {
        return Ok(None);
    }
    let header = MessageHeader::decode(&buffer[..HEADER_LEN])?;
    let total = HEADER_LEN + header.length as usize;
    if buffer.len() < total {
        return Ok(None);
    }
    buffer.advance(HEADER_LEN);
    let payload = buffer.split_to(header.length as usize).freeze();
    Ok(Some((header, payload)))
}
