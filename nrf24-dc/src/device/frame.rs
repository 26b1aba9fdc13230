//! On-air frames exchanged between the server and its clients.
//!
//! Every frame starts with a [Tag] byte. Multi-byte integers are big endian. Payload
//! bytes (the tail of `Data` and `StartSession` frames) are the only part touched by
//! the cipher, so peers can dispatch on the tag before decrypting anything.
use crate::ClientId;

use super::radio::MAX_SIZE_OF_RF_PACKET;

/// Network addresses are 3 bytes wide.
pub const NETWORK_ADDRESS_MASK: u32 = 0x00FF_FFFF;
/// Device id used for frames every client must listen to.
pub const BROADCAST_ID: u16 = 0xFFFF;
/// Device id of the server itself.
pub const SERVER_ID: u16 = 0xFFFE;

/// Builds the 5-byte pipe address of `id` inside `network`: `network (3B) | id (2B)`.
pub fn device_address(network: u32, id: u16) -> u64 {
    (((network & NETWORK_ADDRESS_MASK) as u64) << 16) | id as u64
}

pub fn client_address(network: u32, id: ClientId) -> u64 {
    device_address(network, id as u16)
}

pub fn broadcast_address(network: u32) -> u64 {
    device_address(network, BROADCAST_ID)
}

pub fn server_address(network: u32) -> u64 {
    device_address(network, SERVER_ID)
}

/// Trait to calculate size on frame for every component on frame.
pub trait FrameSize {
    /// Calculate component size on frame (meaning encoded) in bytes.
    fn size(&self) -> usize;
}

/// First byte of every frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// Server announces a census period ("who is there").
    WhoIsThere = b'W',
    /// Server polls one device / device answers the poll.
    Lookup = b'L',
    /// Server opens a session on the announced work channel.
    StartSession = b'S',
    KeepAlive = b'K',
    EndSession = b'E',
    Data = b'D',
}

impl TryFrom<u8> for Tag {
    type Error = FrameError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            b'W' => Ok(Tag::WhoIsThere),
            b'L' => Ok(Tag::Lookup),
            b'S' => Ok(Tag::StartSession),
            b'K' => Ok(Tag::KeepAlive),
            b'E' => Ok(Tag::EndSession),
            b'D' => Ok(Tag::Data),
            other => Err(FrameError::UnknownTag { tag: other }),
        }
    }
}

/// Decoded representation of a frame, borrowing its payload from the packet buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    WhoIsThere { timeout_ms: u16 },
    Lookup { id: ClientId },
    StartSession {
        channel: u8,
        timeout_ms: u16,
        data: &'a [u8],
    },
    KeepAlive,
    EndSession,
    /// Payload for or from one device. The id always names the device, in both
    /// directions, so a late answer can never be mistaken for another device's.
    Data { id: ClientId, payload: &'a [u8] },
}

const START_SESSION_HEADER: usize = 4;
const DATA_HEADER: usize = 3;

/// Largest application payload a `StartSession` frame can carry.
pub const MAX_START_SESSION_DATA: usize = MAX_SIZE_OF_RF_PACKET - START_SESSION_HEADER;
/// Largest payload a `Data` frame can carry.
pub const MAX_DATA_PAYLOAD: usize = MAX_SIZE_OF_RF_PACKET - DATA_HEADER;

impl<'a> Frame<'a> {
    pub fn tag(&self) -> Tag {
        match self {
            Frame::WhoIsThere { .. } => Tag::WhoIsThere,
            Frame::Lookup { .. } => Tag::Lookup,
            Frame::StartSession { .. } => Tag::StartSession,
            Frame::KeepAlive => Tag::KeepAlive,
            Frame::EndSession => Tag::EndSession,
            Frame::Data { .. } => Tag::Data,
        }
    }

    /// Offset of the cipher-covered payload inside the encoded frame, if any.
    pub fn payload_offset(&self) -> Option<usize> {
        match self {
            Frame::StartSession { .. } => Some(START_SESSION_HEADER),
            Frame::Data { .. } => Some(DATA_HEADER),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let size = self.size();
        if size > MAX_SIZE_OF_RF_PACKET {
            return Err(FrameError::TooBigFrameError { size });
        }
        let mut bytes = Vec::with_capacity(size);
        bytes.push(self.tag() as u8);
        match self {
            Frame::WhoIsThere { timeout_ms } => bytes.extend_from_slice(&timeout_ms.to_be_bytes()),
            Frame::Lookup { id } => bytes.extend_from_slice(&id.to_be_bytes()),
            Frame::StartSession {
                channel,
                timeout_ms,
                data,
            } => {
                bytes.push(*channel);
                bytes.extend_from_slice(&timeout_ms.to_be_bytes());
                bytes.extend_from_slice(data);
            }
            Frame::KeepAlive | Frame::EndSession => {}
            Frame::Data { id, payload } => {
                bytes.extend_from_slice(&id.to_be_bytes());
                bytes.extend_from_slice(payload);
            }
        }
        Ok(bytes)
    }

    pub fn try_from_bytes(bytes: &'a [u8]) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::InvalidHeader {
                context: Some("Frame is empty (0 byte).".to_owned()),
            });
        }
        if bytes.len() > MAX_SIZE_OF_RF_PACKET {
            return Err(FrameError::TooBigFrameError { size: bytes.len() });
        }
        let tag = Tag::try_from(bytes[0])?;
        let body = &bytes[1..];
        match tag {
            Tag::WhoIsThere => Ok(Frame::WhoIsThere {
                timeout_ms: read_u16(body, "who-is-there timeout")?,
            }),
            Tag::Lookup => Ok(Frame::Lookup {
                id: read_u16(body, "lookup device id")? as ClientId,
            }),
            Tag::StartSession => {
                if body.len() < START_SESSION_HEADER - 1 {
                    return Err(FrameError::InvalidHeader {
                        context: Some(format!(
                            "Start session frame is too small ({} bytes).",
                            bytes.len()
                        )),
                    });
                }
                Ok(Frame::StartSession {
                    channel: body[0],
                    timeout_ms: read_u16(&body[1..], "session timeout")?,
                    data: &body[3..],
                })
            }
            Tag::KeepAlive => Ok(Frame::KeepAlive),
            Tag::EndSession => Ok(Frame::EndSession),
            Tag::Data => Ok(Frame::Data {
                id: read_u16(body, "data device id")? as ClientId,
                payload: &body[2..],
            }),
        }
    }
}

fn read_u16(bytes: &[u8], what: &str) -> Result<u16, FrameError> {
    if bytes.len() < 2 {
        return Err(FrameError::InvalidHeader {
            context: Some(format!("Badly formatted frame, missing {}!", what)),
        });
    }
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

impl FrameSize for Tag {
    fn size(&self) -> usize {
        1
    }
}

impl FrameSize for Frame<'_> {
    fn size(&self) -> usize {
        self.tag().size()
            + match self {
                Frame::WhoIsThere { .. } | Frame::Lookup { .. } => 2,
                Frame::StartSession { data, .. } => START_SESSION_HEADER - 1 + data.len(),
                Frame::KeepAlive | Frame::EndSession => 0,
                Frame::Data { payload, .. } => DATA_HEADER - 1 + payload.len(),
            }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid header. Context: {}", .context.as_ref().unwrap_or(&"<none>".to_owned()))]
    InvalidHeader { context: Option<String> },

    #[error("Unknown frame tag 0x{:02x}.", .tag)]
    UnknownTag { tag: u8 },

    #[error("Frame is too big to be transmitted (is: {}B, max: {}B)!", .size, MAX_SIZE_OF_RF_PACKET)]
    TooBigFrameError { size: usize },
}
