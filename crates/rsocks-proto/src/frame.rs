//! Multiplexing frames
//!
//! Every frame starts with a fixed 10 byte header:
//!
//! ```text
//! +-----------------+---------+---------+-----------------+
//! | stream_id (u32) | type u8 | flags u8| length (u32)    |
//! +-----------------+---------+---------+-----------------+
//! ```
//!
//! followed by `length` bytes of payload. All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Stream identifier
pub type StreamId = u32;

/// Frame types for multiplexing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Stream payload; also carries SYN/FIN/RST flags
    Data = 0,
    /// Grants the peer more send credit on a stream (payload: u32 delta)
    WindowUpdate = 1,
    /// Session liveness probe (payload: u32 opaque value)
    Ping = 2,
    /// Session is being torn down (payload: u32 code)
    GoAway = 3,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::WindowUpdate),
            2 => Ok(FrameType::Ping),
            3 => Ok(FrameType::GoAway),
            _ => Err(FrameError::InvalidFrameType(value)),
        }
    }
}

/// Frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const SYN: u8 = 0b0000_0001;
    pub const ACK: u8 = 0b0000_0010;
    pub const FIN: u8 = 0b0000_0100;
    pub const RST: u8 = 0b0000_1000;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_syn(mut self) -> Self {
        self.0 |= Self::SYN;
        self
    }

    pub fn with_ack(mut self) -> Self {
        self.0 |= Self::ACK;
        self
    }

    pub fn with_fin(mut self) -> Self {
        self.0 |= Self::FIN;
        self
    }

    pub fn with_rst(mut self) -> Self {
        self.0 |= Self::RST;
        self
    }

    pub fn has_syn(&self) -> bool {
        self.0 & Self::SYN != 0
    }

    pub fn has_ack(&self) -> bool {
        self.0 & Self::ACK != 0
    }

    pub fn has_fin(&self) -> bool {
        self.0 & Self::FIN != 0
    }

    pub fn has_rst(&self) -> bool {
        self.0 & Self::RST != 0
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }
}

/// Reason carried by a go-away frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoAwayCode {
    Normal,
    ProtocolError,
    InternalError,
}

impl GoAwayCode {
    pub fn as_u32(self) -> u32 {
        match self {
            GoAwayCode::Normal => 0,
            GoAwayCode::ProtocolError => 1,
            GoAwayCode::InternalError => 2,
        }
    }

    /// Unknown codes are reported as internal errors
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => GoAwayCode::Normal,
            1 => GoAwayCode::ProtocolError,
            _ => GoAwayCode::InternalError,
        }
    }
}

/// Frame errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Invalid frame type: {0}")]
    InvalidFrameType(u8),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Malformed {0:?} payload: expected 4 bytes, got {1}")]
    MalformedPayload(FrameType, usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Multiplexed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: StreamId,
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    pub payload: Bytes,
}

impl Frame {
    /// Frame header size: stream_id (4) + frame_type (1) + flags (1) + length (4) = 10 bytes
    pub const HEADER_SIZE: usize = 10;

    pub fn new(stream_id: StreamId, frame_type: FrameType, payload: Bytes) -> Self {
        Self {
            stream_id,
            frame_type,
            flags: FrameFlags::new(),
            payload,
        }
    }

    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn data(stream_id: StreamId, payload: Bytes) -> Self {
        Self::new(stream_id, FrameType::Data, payload)
    }

    /// Opens `stream_id` on the receiving side
    pub fn syn(stream_id: StreamId) -> Self {
        Self::data(stream_id, Bytes::new()).with_flags(FrameFlags::new().with_syn())
    }

    /// Half-closes the sender's direction of `stream_id`
    pub fn fin(stream_id: StreamId) -> Self {
        Self::data(stream_id, Bytes::new()).with_flags(FrameFlags::new().with_fin())
    }

    /// Aborts both directions of `stream_id`
    pub fn rst(stream_id: StreamId) -> Self {
        Self::data(stream_id, Bytes::new()).with_flags(FrameFlags::new().with_rst())
    }

    pub fn window_update(stream_id: StreamId, delta: u32) -> Self {
        Self::new(stream_id, FrameType::WindowUpdate, u32_bytes(delta))
    }

    pub fn ping(opaque: u32) -> Self {
        Self::new(crate::SESSION_STREAM_ID, FrameType::Ping, u32_bytes(opaque))
    }

    pub fn pong(opaque: u32) -> Self {
        Self::ping(opaque).with_flags(FrameFlags::new().with_ack())
    }

    pub fn go_away(code: GoAwayCode) -> Self {
        Self::new(
            crate::SESSION_STREAM_ID,
            FrameType::GoAway,
            u32_bytes(code.as_u32()),
        )
    }

    /// Read the u32 carried by window-update, ping and go-away frames
    pub fn u32_payload(&self) -> Result<u32, FrameError> {
        let bytes = <[u8; 4]>::try_from(&self.payload[..])
            .map_err(|_| FrameError::MalformedPayload(self.frame_type, self.payload.len()))?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Append the encoded frame to `dst`
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload_len = self.payload.len();
        if payload_len > crate::MAX_FRAME_SIZE as usize {
            return Err(FrameError::FrameTooLarge(payload_len));
        }

        dst.reserve(Self::HEADER_SIZE + payload_len);
        dst.put_u32(self.stream_id);
        dst.put_u8(self.frame_type as u8);
        dst.put_u8(self.flags.as_u8());
        dst.put_u32(payload_len as u32);
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode one frame from the front of `src`
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when more bytes are needed.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, FrameError> {
        if src.len() < Self::HEADER_SIZE {
            return Ok(None);
        }

        let frame_type = FrameType::try_from(src[4])?;
        let length = u32::from_be_bytes([src[6], src[7], src[8], src[9]]);

        if length > crate::MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length as usize));
        }

        let frame_len = Self::HEADER_SIZE + length as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut header = src.split_to(Self::HEADER_SIZE);
        let stream_id = header.get_u32();
        header.advance(1);
        let flags = FrameFlags::from_u8(header.get_u8());
        let payload = src.split_to(length as usize).freeze();

        Ok(Some(Self {
            stream_id,
            frame_type,
            flags,
            payload,
        }))
    }
}

fn u32_bytes(value: u32) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}
